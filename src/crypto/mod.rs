// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cryptographic primitives behind the cipher-suite registry.
//!
//! Algorithms of the default provider:
//! - DHKEM-X25519 HPKE (RFC 9180)
//! - SHA256 HKDF with protocol-labeled expansion
//! - AES-128-GCM / AES-256-GCM / ChaCha20-Poly1305 AEAD
//! - Ed25519 (SHA512) DSA
//!
//! Random Number Generator:
//! - ChaCha20 stream cipher, seeded via `getrandom`
//!
//! Primitive objects are cheap handles selected on demand by
//! [`suite::CipherSuite`]; most implementations use the
//! [`libcrux`](https://github.com/cryspen/libcrux) crate internally.
pub mod aead;
pub mod hkdf;
pub mod hpke;
pub mod rng;
pub(crate) mod secret;
pub mod sha2;
pub mod signature;
pub mod suite;
pub mod x25519;

use thiserror::Error;

pub use rng::{Rng, RngError};
pub use secret::{KeyAndNonce, Secret};
pub use suite::CipherSuite;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unknown cipher suite 0x{0:04x}")]
    UnknownSuite(u16),

    #[error("cipher suite {0:?} is not supported by this provider")]
    UnsupportedSuite(CipherSuite),

    #[error("invalid key material for derivation")]
    InvalidKeyMaterial,

    #[error("invalid aead nonce size")]
    InvalidNonce,

    #[error("invalid aead argument: {0:?}")]
    InvalidAeadArgument(libcrux::aead::Error),

    #[error("could not encrypt with aead: {0:?}")]
    AeadSeal(libcrux::aead::Error),

    #[error("could not decrypt with aead: {0:?}")]
    AeadOpen(libcrux::aead::Error),

    #[error("could not encrypt with hpke: {0:?}")]
    HpkeSeal(libcrux::hpke::errors::HpkeError),

    #[error("could not decrypt with hpke: {0:?}")]
    HpkeOpen(libcrux::hpke::errors::HpkeError),

    #[error(transparent)]
    X25519(#[from] x25519::X25519Error),

    #[error(transparent)]
    Signature(#[from] signature::SignatureError),

    #[error(transparent)]
    Rand(#[from] RngError),
}
