// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::crypto::rng::RngError;

/// Errors surfaced by the protocol engine.
///
/// Nothing is retried at this layer. When `handle` or any other state
/// transition fails, the caller's state is untouched and the offending
/// message can be dropped.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller-side misuse: wrong index, wrong cipher suite, a welcome that
    /// does not address us.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// Peer- or wire-induced failure: bad signature, bad MAC, unknown
    /// proposal reference, missing or extra update path.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// A cryptographic primitive failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Message or extension types this implementation opted out of.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// Wire-format encoding or decoding failure.
    #[error("codec error: {0}")]
    Codec(#[from] tls_codec::Error),

    #[error(transparent)]
    Rng(#[from] RngError),
}

pub type Result<T> = std::result::Result<T, Error>;
