// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conformance vectors: generate-and-verify harnesses for the deterministic
//! subsystems. `create` produces a vector from chosen inputs; `verify`
//! recomputes everything from the inputs and reports the first mismatch.
use serde::{Deserialize, Serialize};

use crate::config::GroupConfig;
use crate::crypto::hkdf::extract;
use crate::crypto::secret::Secret;
use crate::crypto::suite::CipherSuite;
use crate::error::Result;
use crate::key_schedule::KeyScheduleEpoch;
use crate::messages::GroupContext;
use crate::ratchet::{GroupKeySource, RatchetKind};
use crate::tree_math::{self, LeafCount, LeafIndex, NodeIndex};

/// Tables of the pure index arithmetic for a tree of `n_leaves`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeMathTestVector {
    pub n_leaves: u32,
    pub n_nodes: u32,
    /// `root(n)` for every leaf count up to `n_leaves`.
    pub root: Vec<u32>,
    pub left: Vec<Option<u32>>,
    pub right: Vec<Option<u32>>,
    pub parent: Vec<Option<u32>>,
    pub sibling: Vec<Option<u32>>,
}

impl TreeMathTestVector {
    pub fn create(n_leaves: u32) -> Result<Self> {
        let width = LeafCount(n_leaves).node_width();

        let mut root = Vec::new();
        for n in 1..=n_leaves {
            root.push(tree_math::root(LeafCount(n).node_width())?.0);
        }

        let mut left = Vec::new();
        let mut right = Vec::new();
        let mut parent = Vec::new();
        let mut sibling = Vec::new();
        for x in 0..width.0 {
            let x = NodeIndex(x);
            left.push(tree_math::left(x).ok().map(|n| n.0));
            right.push(tree_math::right(x, width).ok().map(|n| n.0));
            parent.push(tree_math::parent(x, width).ok().map(|n| n.0));
            sibling.push(tree_math::sibling(x, width).ok().map(|n| n.0));
        }

        Ok(Self {
            n_leaves,
            n_nodes: width.0,
            root,
            left,
            right,
            parent,
            sibling,
        })
    }

    /// `None` when the vector is internally consistent.
    pub fn verify(&self) -> Option<String> {
        let recomputed = match Self::create(self.n_leaves) {
            Ok(vector) => vector,
            Err(err) => return Some(format!("failed to recompute: {err}")),
        };
        if self.n_nodes != recomputed.n_nodes {
            return Some("n_nodes mismatch".into());
        }
        for (label, ours, theirs) in [
            ("left", &self.left, &recomputed.left),
            ("right", &self.right, &recomputed.right),
            ("parent", &self.parent, &recomputed.parent),
            ("sibling", &self.sibling, &recomputed.sibling),
        ] {
            if ours != theirs {
                return Some(format!("{label} table mismatch"));
            }
        }
        if self.root != recomputed.root {
            return Some("root table mismatch".into());
        }
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetStep {
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub nonce: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafSteps {
    pub generations: u32,
    pub handshake: Vec<RatchetStep>,
    pub application: Vec<RatchetStep>,
}

/// Per-leaf ratcheted keys derived from one encryption secret.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionTestVector {
    pub cipher_suite: CipherSuite,
    pub n_leaves: u32,
    #[serde(with = "serde_bytes")]
    pub encryption_secret: Vec<u8>,
    pub leaves: Vec<LeafSteps>,
}

impl EncryptionTestVector {
    fn key_source(&self) -> Result<GroupKeySource> {
        GroupKeySource::new(
            self.cipher_suite,
            LeafCount(self.n_leaves),
            Secret::from_slice(&self.encryption_secret),
            GroupConfig::default(),
        )
    }

    pub fn create(
        cipher_suite: CipherSuite,
        n_leaves: u32,
        n_generations: u32,
        encryption_secret: Vec<u8>,
    ) -> Result<Self> {
        let mut vector = Self {
            cipher_suite,
            n_leaves,
            encryption_secret,
            leaves: Vec::new(),
        };

        let mut keys = vector.key_source()?;
        for leaf in 0..n_leaves {
            let mut steps = LeafSteps {
                generations: n_generations,
                handshake: Vec::new(),
                application: Vec::new(),
            };
            for generation in 0..n_generations {
                for (kind, out) in [
                    (RatchetKind::Handshake, &mut steps.handshake),
                    (RatchetKind::Application, &mut steps.application),
                ] {
                    let key_nonce = keys.get(kind, LeafIndex(leaf), generation)?;
                    out.push(RatchetStep {
                        key: key_nonce.key.as_bytes().to_vec(),
                        nonce: key_nonce.nonce.as_bytes().to_vec(),
                    });
                }
            }
            vector.leaves.push(steps);
        }
        Ok(vector)
    }

    pub fn verify(&self) -> Option<String> {
        let mut keys = match self.key_source() {
            Ok(keys) => keys,
            Err(err) => return Some(format!("failed to rebuild key source: {err}")),
        };

        for (leaf, steps) in self.leaves.iter().enumerate() {
            for generation in 0..steps.generations {
                for (kind, expected) in [
                    (RatchetKind::Handshake, &steps.handshake),
                    (RatchetKind::Application, &steps.application),
                ] {
                    let key_nonce =
                        match keys.get(kind, LeafIndex(leaf as u32), generation) {
                            Ok(key_nonce) => key_nonce,
                            Err(err) => return Some(format!("derivation failed: {err}")),
                        };
                    let step = &expected[generation as usize];
                    if key_nonce.key.as_bytes() != step.key.as_slice()
                        || key_nonce.nonce.as_bytes() != step.nonce.as_slice()
                    {
                        return Some(format!(
                            "key mismatch at leaf {leaf} generation {generation}"
                        ));
                    }
                }
            }
        }
        None
    }
}

/// One epoch of the key-schedule chain, the richer variant: welcome secret,
/// membership key and external public key included.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyScheduleEpochVector {
    // Chosen by the generator.
    #[serde(with = "serde_bytes")]
    pub tree_hash: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub commit_secret: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub confirmed_transcript_hash: Vec<u8>,

    // Computed values.
    #[serde(with = "serde_bytes")]
    pub group_context: Vec<u8>,

    #[serde(with = "serde_bytes")]
    pub joiner_secret: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub welcome_secret: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub epoch_secret: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub init_secret: Vec<u8>,

    #[serde(with = "serde_bytes")]
    pub sender_data_secret: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub encryption_secret: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub exporter_secret: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub authentication_secret: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub external_secret: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub confirmation_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub membership_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub resumption_secret: Vec<u8>,

    #[serde(with = "serde_bytes")]
    pub external_pub: Vec<u8>,
}

/// A chain of epochs starting from a chosen init secret.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyScheduleTestVector {
    pub cipher_suite: CipherSuite,
    #[serde(with = "serde_bytes")]
    pub group_id: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub initial_init_secret: Vec<u8>,
    pub epochs: Vec<KeyScheduleEpochVector>,
}

impl KeyScheduleTestVector {
    fn context_bytes(
        &self,
        epoch: u64,
        tree_hash: &[u8],
        confirmed_transcript_hash: &[u8],
    ) -> Result<Vec<u8>> {
        crate::codec::encode(&GroupContext {
            group_id: self.group_id.clone(),
            epoch,
            tree_hash: tree_hash.to_vec(),
            confirmed_transcript_hash: confirmed_transcript_hash.to_vec(),
            extensions: Vec::new(),
        })
    }

    fn epoch_from_inputs(
        &self,
        init_secret: &Secret,
        epoch: u64,
        inputs: (&[u8], &[u8], &[u8]),
    ) -> Result<(KeyScheduleEpoch, Vec<u8>)> {
        let (tree_hash, commit_secret, confirmed_transcript_hash) = inputs;
        let context = self.context_bytes(epoch, tree_hash, confirmed_transcript_hash)?;
        let joiner_secret = extract(
            self.cipher_suite,
            init_secret.as_bytes(),
            commit_secret,
        );
        let epoch_secrets = KeyScheduleEpoch::from_joiner_secret(
            self.cipher_suite,
            joiner_secret,
            None,
            &context,
        )?;
        Ok((epoch_secrets, context))
    }

    /// Generate a chain of `n_epochs` epochs from deterministic inputs.
    pub fn create(
        cipher_suite: CipherSuite,
        group_id: Vec<u8>,
        initial_init_secret: Vec<u8>,
        n_epochs: u32,
    ) -> Result<Self> {
        let mut vector = Self {
            cipher_suite,
            group_id,
            initial_init_secret: initial_init_secret.clone(),
            epochs: Vec::new(),
        };

        let hash_size = cipher_suite.hash_size();
        let mut init_secret = Secret::from_slice(&initial_init_secret);
        for epoch in 0..n_epochs as u64 {
            // Deterministic per-epoch inputs in place of real tree state.
            let tree_hash = vec![epoch as u8 + 1; hash_size];
            let commit_secret = vec![epoch as u8 + 101; hash_size];
            let confirmed_transcript_hash = vec![epoch as u8 + 201; hash_size];

            let (secrets, context) = vector.epoch_from_inputs(
                &init_secret,
                epoch,
                (&tree_hash, &commit_secret, &confirmed_transcript_hash),
            )?;

            vector.epochs.push(KeyScheduleEpochVector {
                tree_hash,
                commit_secret,
                confirmed_transcript_hash,
                group_context: context,
                joiner_secret: secrets.joiner_secret.as_bytes().to_vec(),
                welcome_secret: secrets.welcome_secret()?.as_bytes().to_vec(),
                epoch_secret: secrets.epoch_secret.as_bytes().to_vec(),
                init_secret: secrets.init_secret.as_bytes().to_vec(),
                sender_data_secret: secrets.sender_data_secret.as_bytes().to_vec(),
                encryption_secret: secrets.encryption_secret.as_bytes().to_vec(),
                exporter_secret: secrets.exporter_secret.as_bytes().to_vec(),
                authentication_secret: secrets.authentication_secret.as_bytes().to_vec(),
                external_secret: secrets.external_secret.as_bytes().to_vec(),
                confirmation_key: secrets.confirmation_key.as_bytes().to_vec(),
                membership_key: secrets.membership_key.as_bytes().to_vec(),
                resumption_secret: secrets.resumption_secret.as_bytes().to_vec(),
                external_pub: secrets.external_pub().as_bytes().to_vec(),
            });

            init_secret = secrets.init_secret.clone();
        }

        Ok(vector)
    }

    /// `None` when every epoch's derived secrets recompute from its inputs.
    pub fn verify(&self) -> Option<String> {
        let mut init_secret = Secret::from_slice(&self.initial_init_secret);
        for (position, epoch_vector) in self.epochs.iter().enumerate() {
            let (secrets, context) = match self.epoch_from_inputs(
                &init_secret,
                position as u64,
                (
                    &epoch_vector.tree_hash,
                    &epoch_vector.commit_secret,
                    &epoch_vector.confirmed_transcript_hash,
                ),
            ) {
                Ok(result) => result,
                Err(err) => return Some(format!("epoch {position} failed: {err}")),
            };

            if context != epoch_vector.group_context {
                return Some(format!("epoch {position}: group context mismatch"));
            }

            let welcome_secret = match secrets.welcome_secret() {
                Ok(secret) => secret,
                Err(err) => return Some(format!("epoch {position} failed: {err}")),
            };

            let checks: [(&str, &[u8], &[u8]); 13] = [
                ("joiner_secret", secrets.joiner_secret.as_bytes(), &epoch_vector.joiner_secret),
                ("welcome_secret", welcome_secret.as_bytes(), &epoch_vector.welcome_secret),
                ("epoch_secret", secrets.epoch_secret.as_bytes(), &epoch_vector.epoch_secret),
                ("init_secret", secrets.init_secret.as_bytes(), &epoch_vector.init_secret),
                (
                    "sender_data_secret",
                    secrets.sender_data_secret.as_bytes(),
                    &epoch_vector.sender_data_secret,
                ),
                (
                    "encryption_secret",
                    secrets.encryption_secret.as_bytes(),
                    &epoch_vector.encryption_secret,
                ),
                ("exporter_secret", secrets.exporter_secret.as_bytes(), &epoch_vector.exporter_secret),
                (
                    "authentication_secret",
                    secrets.authentication_secret.as_bytes(),
                    &epoch_vector.authentication_secret,
                ),
                ("external_secret", secrets.external_secret.as_bytes(), &epoch_vector.external_secret),
                ("confirmation_key", secrets.confirmation_key.as_bytes(), &epoch_vector.confirmation_key),
                ("membership_key", secrets.membership_key.as_bytes(), &epoch_vector.membership_key),
                ("resumption_secret", secrets.resumption_secret.as_bytes(), &epoch_vector.resumption_secret),
                ("external_pub", secrets.external_pub().as_bytes(), &epoch_vector.external_pub),
            ];
            for (label, ours, theirs) in checks {
                if ours != theirs {
                    return Some(format!("epoch {position}: {label} mismatch"));
                }
            }

            init_secret = secrets.init_secret.clone();
        }
        None
    }
}
