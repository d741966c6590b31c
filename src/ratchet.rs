// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-sender hash ratchets for handshake and application keys.
//!
//! The epoch's encryption secret is spread over the tree with a left-
//! balanced derivation; each leaf seeds two independent ratchets. Ratchets
//! only move forward: secrets are zeroized on advance, and decryption keys
//! live in a bounded per-generation cache to tolerate reordering within an
//! epoch.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tls_codec::Serialize as _;

use crate::config::GroupConfig;
use crate::crypto::hkdf::expand_with_label;
use crate::crypto::secret::{KeyAndNonce, Secret};
use crate::crypto::suite::CipherSuite;
use crate::error::{Error, Result};
use crate::tree_math::{LeafCount, LeafIndex, NodeIndex, direct_path, left, right, root};

pub type Generation = u32;

/// Which of a leaf's two ratchets a key belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RatchetKind {
    Handshake,
    Application,
}

/// Left-balanced derivation of per-leaf base secrets from the encryption
/// secret. Consumed node secrets are erased as soon as the leaf below them
/// has been derived.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct SecretTree {
    suite: CipherSuite,
    size: LeafCount,
    secrets: BTreeMap<u32, Secret>,
}

impl SecretTree {
    fn new(suite: CipherSuite, size: LeafCount, encryption_secret: Secret) -> Result<Self> {
        let width = size.node_width();
        let top = root(width)?;
        let mut secrets = BTreeMap::new();
        secrets.insert(top.0, encryption_secret);
        Ok(Self {
            suite,
            size,
            secrets,
        })
    }

    fn node_context(index: NodeIndex) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        index.tls_serialize(&mut out).map_err(Error::Codec)?;
        Ok(out)
    }

    /// Base secrets for a leaf's handshake and application ratchets.
    fn base_secrets(&mut self, sender: LeafIndex) -> Result<(Secret, Secret)> {
        let width = self.size.node_width();
        let top = root(width)?;
        let node = sender.node();

        let mut dirpath = vec![node];
        dirpath.extend(direct_path(node, width)?);
        if node != top {
            dirpath.push(top);
        }

        // Find the lowest populated ancestor.
        let populated = dirpath
            .iter()
            .position(|node| self.secrets.contains_key(&node.0))
            .ok_or(Error::InvalidParameter("no secret left to derive base key"))?;

        // Derive down towards the leaf.
        for position in (1..=populated).rev() {
            let parent = dirpath[position];
            let left_child = left(parent)?;
            let right_child = right(parent, width)?;

            let parent_secret = self
                .secrets
                .get(&parent.0)
                .expect("populated ancestor on path")
                .clone();
            let left_secret = expand_with_label(
                self.suite,
                &parent_secret,
                "tree",
                &Self::node_context(left_child)?,
                self.suite.hash_size(),
            )?;
            let right_secret = expand_with_label(
                self.suite,
                &parent_secret,
                "tree",
                &Self::node_context(right_child)?,
                self.suite.hash_size(),
            )?;
            self.secrets.insert(left_child.0, left_secret);
            self.secrets.insert(right_child.0, right_secret);
        }

        let leaf_secret = self
            .secrets
            .get(&node.0)
            .expect("derived down to the leaf")
            .clone();
        let handshake =
            expand_with_label(self.suite, &leaf_secret, "handshake", &[], self.suite.hash_size())?;
        let application = expand_with_label(
            self.suite,
            &leaf_secret,
            "application",
            &[],
            self.suite.hash_size(),
        )?;

        // Erase everything on the path; the leaf's ratchets are seeded now.
        for node in dirpath {
            self.secrets.remove(&node.0);
        }

        Ok((handshake, application))
    }
}

/// A single forward-only key ratchet with a bounded per-generation cache.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HashRatchet {
    suite: CipherSuite,
    node: NodeIndex,
    next_secret: Secret,
    next_generation: Generation,
    cache: BTreeMap<Generation, KeyAndNonce>,
}

impl HashRatchet {
    fn new(suite: CipherSuite, node: NodeIndex, base_secret: Secret) -> Self {
        Self {
            suite,
            node,
            next_secret: base_secret,
            next_generation: 0,
            cache: BTreeMap::new(),
        }
    }

    fn context(&self, generation: Generation) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.node
            .tls_serialize(&mut out)
            .and_then(|_| generation.tls_serialize(&mut out))
            .map_err(Error::Codec)?;
        Ok(out)
    }

    /// Derive the next generation's key and nonce and advance the chain.
    pub fn next(&mut self) -> Result<(Generation, KeyAndNonce)> {
        let generation = self.next_generation;
        let context = self.context(generation)?;

        let key = expand_with_label(
            self.suite,
            &self.next_secret,
            "key",
            &context,
            self.suite.aead_key_size(),
        )?;
        let nonce = expand_with_label(
            self.suite,
            &self.next_secret,
            "nonce",
            &context,
            self.suite.aead_nonce_size(),
        )?;
        let secret = expand_with_label(
            self.suite,
            &self.next_secret,
            "secret",
            &context,
            self.suite.hash_size(),
        )?;

        // The previous chain secret is zeroized when dropped here.
        self.next_secret = secret;
        self.next_generation += 1;

        let key_nonce = KeyAndNonce { key, nonce };
        self.cache.insert(generation, key_nonce.clone());
        Ok((generation, key_nonce))
    }

    /// Key and nonce for a given generation, fast-forwarding within the
    /// configured window. Erased generations are gone for good.
    pub fn get(&mut self, generation: Generation, config: &GroupConfig) -> Result<KeyAndNonce> {
        if let Some(key_nonce) = self.cache.get(&generation) {
            return Ok(key_nonce.clone());
        }

        if generation < self.next_generation {
            return Err(Error::Protocol("expired generation"));
        }
        if generation - self.next_generation > config.maximum_forward_distance {
            return Err(Error::Protocol("generation out of window"));
        }

        let mut result = None;
        while self.next_generation <= generation {
            result = Some(self.next()?);
        }
        let (_, key_nonce) = result.expect("ratchet advanced at least once");

        self.trim(config);
        Ok(key_nonce)
    }

    /// Erase a generation's key material after use.
    pub fn erase(&mut self, generation: Generation) {
        self.cache.remove(&generation);
    }

    fn trim(&mut self, config: &GroupConfig) {
        let retain = (config.out_of_order_tolerance as usize).max(1);
        while self.cache.len() > retain {
            let oldest = *self.cache.keys().next().expect("cache is non-empty");
            self.cache.remove(&oldest);
        }
    }
}

/// All per-sender ratchets of one epoch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupKeySource {
    suite: CipherSuite,
    secret_tree: SecretTree,
    chains: BTreeMap<(RatchetKind, u32), HashRatchet>,
    config: GroupConfig,
}

impl GroupKeySource {
    pub fn new(
        suite: CipherSuite,
        size: LeafCount,
        encryption_secret: Secret,
        config: GroupConfig,
    ) -> Result<Self> {
        Ok(Self {
            suite,
            secret_tree: SecretTree::new(suite, size, encryption_secret)?,
            chains: BTreeMap::new(),
            config,
        })
    }

    fn chain(&mut self, kind: RatchetKind, sender: LeafIndex) -> Result<&mut HashRatchet> {
        if !self.chains.contains_key(&(kind, sender.0)) {
            let (handshake, application) = self.secret_tree.base_secrets(sender)?;
            self.chains.insert(
                (RatchetKind::Handshake, sender.0),
                HashRatchet::new(self.suite, sender.node(), handshake),
            );
            self.chains.insert(
                (RatchetKind::Application, sender.0),
                HashRatchet::new(self.suite, sender.node(), application),
            );
        }
        Ok(self
            .chains
            .get_mut(&(kind, sender.0))
            .expect("chain was just seeded"))
    }

    /// Next send key for one of our ratchets.
    pub fn next(&mut self, kind: RatchetKind, sender: LeafIndex) -> Result<(Generation, KeyAndNonce)> {
        self.chain(kind, sender)?.next()
    }

    /// Receive key for a given sender and generation.
    pub fn get(
        &mut self,
        kind: RatchetKind,
        sender: LeafIndex,
        generation: Generation,
    ) -> Result<KeyAndNonce> {
        let config = self.config;
        self.chain(kind, sender)?.get(generation, &config)
    }

    /// Erase a delivered generation; decryption of it cannot be repeated.
    pub fn erase(&mut self, kind: RatchetKind, sender: LeafIndex, generation: Generation) -> Result<()> {
        self.chain(kind, sender)?.erase(generation);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::GroupConfig;
    use crate::crypto::secret::Secret;
    use crate::crypto::suite::CipherSuite;
    use crate::error::Error;
    use crate::tree_math::{LeafCount, LeafIndex};

    use super::{GroupKeySource, RatchetKind};

    const SUITE: CipherSuite = CipherSuite::X25519Aes128GcmSha256Ed25519;

    fn key_source(tolerance: u32) -> GroupKeySource {
        GroupKeySource::new(
            SUITE,
            LeafCount(4),
            Secret::from_slice(&[7; 32]),
            GroupConfig {
                maximum_forward_distance: 100,
                out_of_order_tolerance: tolerance,
            },
        )
        .unwrap()
    }

    #[test]
    fn sender_and_receiver_agree() {
        let mut sender = key_source(10);
        let mut receiver = key_source(10);

        for expected_generation in 0..5u32 {
            let (generation, sent) = sender
                .next(RatchetKind::Application, LeafIndex(2))
                .unwrap();
            assert_eq!(generation, expected_generation);

            let received = receiver
                .get(RatchetKind::Application, LeafIndex(2), generation)
                .unwrap();
            assert_eq!(sent, received);
        }
    }

    #[test]
    fn ratchets_are_independent() {
        let mut keys = key_source(10);

        let (_, handshake) = keys.next(RatchetKind::Handshake, LeafIndex(0)).unwrap();
        let (_, application) = keys.next(RatchetKind::Application, LeafIndex(0)).unwrap();
        let (_, other_leaf) = keys.next(RatchetKind::Handshake, LeafIndex(1)).unwrap();

        assert_ne!(handshake, application);
        assert_ne!(handshake, other_leaf);
    }

    #[test]
    fn get_is_repeatable_until_erased() {
        let mut keys = key_source(10);

        let kn_1 = keys.get(RatchetKind::Application, LeafIndex(1), 3).unwrap();
        let kn_2 = keys.get(RatchetKind::Application, LeafIndex(1), 3).unwrap();
        assert_eq!(kn_1, kn_2);

        keys.erase(RatchetKind::Application, LeafIndex(1), 3).unwrap();
        let result = keys.get(RatchetKind::Application, LeafIndex(1), 3);
        assert!(matches!(result, Err(Error::Protocol("expired generation"))));
    }

    #[test]
    fn window_limits_are_enforced() {
        let mut keys = key_source(2);

        // Fast-forward caps out.
        let result = keys.get(RatchetKind::Application, LeafIndex(0), 500);
        assert!(matches!(
            result,
            Err(Error::Protocol("generation out of window"))
        ));

        // Old generations fall out of the bounded cache.
        keys.get(RatchetKind::Application, LeafIndex(0), 10).unwrap();
        let result = keys.get(RatchetKind::Application, LeafIndex(0), 0);
        assert!(matches!(result, Err(Error::Protocol("expired generation"))));
    }
}
