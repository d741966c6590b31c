// SPDX-License-Identifier: MIT OR Apache-2.0

//! `grove` is an end-to-end encrypted group messaging engine: a continuous
//! group key agreement in the TreeKEM family (MLS draft-10 lineage).
//!
//! A group of participants maintains a shared secret that evolves as members
//! join, leave or refresh their keys. Every member derives identical
//! symmetric keys epoch by epoch, with forward secrecy and post-compromise
//! security, without any server learning the group key.
//!
//! The engine is made of three cooperating subsystems:
//!
//! - the **ratchet tree** ([`tree`], [`treekem`]): a left-balanced binary
//!   tree whose leaves are member key packages and whose internal nodes hold
//!   encapsulated path secrets, letting one member rekey the group with
//!   `O(log n)` public-key operations;
//! - the **key schedule** ([`key_schedule`], [`ratchet`]): the derivation
//!   chain turning per-epoch commit secrets into sender-data, handshake,
//!   application, confirmation, exporter and init secrets, plus the
//!   per-sender hash ratchets beneath them;
//! - the **group state machine** ([`group`], [`framing`], [`messages`]):
//!   per-member state that frames, signs, seals and consumes proposals,
//!   commits and welcome messages, advancing all honest members to identical
//!   successor states.
//!
//! The crate performs no I/O and never blocks. A [`group::GroupState`] is a
//! value: handling a commit returns a successor and leaves the current state
//! untouched on any error, so a single group can be driven safely from one
//! thread while independent groups run concurrently.
pub mod codec;
pub mod config;
pub mod credential;
pub mod crypto;
mod error;
pub mod framing;
pub mod group;
pub mod key_package;
pub mod key_schedule;
pub mod messages;
pub mod ratchet;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
pub mod tree;
pub mod tree_math;
pub mod treekem;
#[cfg(any(test, feature = "test_utils"))]
pub mod vectors;

#[cfg(test)]
mod tests;

pub use config::GroupConfig;
pub use credential::Credential;
pub use crypto::{CipherSuite, Rng, Secret};
pub use error::{Error, Result};
pub use framing::{PublicMessage, SealedMessage};
pub use group::GroupState;
pub use key_package::KeyPackage;
pub use messages::{PublicGroupState, Welcome};
