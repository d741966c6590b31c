// SPDX-License-Identifier: MIT OR Apache-2.0

//! TreeKEM: the multi-recipient public-key operations refreshing the group
//! secret.
//!
//! `encap` rekeys a leaf's entire direct path and encrypts each new path
//! secret to the resolution of the corresponding copath subtree, so every
//! other member can recover exactly the secrets it is entitled to. `decap`
//! is the receiving side: decrypt the one ciphertext addressed to us,
//! re-derive the chain up to the root and check it against the advertised
//! public keys.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto::hkdf::expand_with_label;
use crate::crypto::hpke::{HpkePrivateKey, derive_key_pair, hpke_open, hpke_seal};
use crate::crypto::rng::Rng;
use crate::crypto::secret::Secret;
use crate::crypto::signature::SignaturePrivateKey;
use crate::crypto::suite::CipherSuite;
use crate::error::{Error, Result};
use crate::messages::{UpdatePath, UpdatePathNode};
use crate::tree::RatchetTree;
use crate::tree_math::{LeafCount, LeafIndex, NodeIndex, ancestor, copath, direct_path, root};

/// Ancestor chain of a leaf, bottom up, including the root. Empty for a
/// single-leaf tree.
fn path_to_root(index: LeafIndex, width: crate::tree_math::NodeCount) -> Result<Vec<NodeIndex>> {
    let node = index.node();
    let top = root(width)?;
    if node == top {
        return Ok(Vec::new());
    }
    let mut chain = direct_path(node, width)?;
    chain.push(top);
    Ok(chain)
}

/// A member's private view of the ratchet tree: the path secrets it knows,
/// keyed by node index into the companion public tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrivateTree {
    suite: CipherSuite,
    index: LeafIndex,
    update_secret: Secret,
    path_secrets: BTreeMap<u32, Secret>,
    key_cache: BTreeMap<u32, HpkePrivateKey>,
}

impl PrivateTree {
    /// Private state holding only the member's own leaf key, as after
    /// joining from a welcome without a path secret.
    pub fn solo(suite: CipherSuite, index: LeafIndex, leaf_key: HpkePrivateKey) -> Self {
        let mut key_cache = BTreeMap::new();
        key_cache.insert(index.node().0, leaf_key);
        Self {
            suite,
            index,
            update_secret: Secret::zero(suite.hash_size()),
            path_secrets: BTreeMap::new(),
            key_cache,
        }
    }

    /// Fresh private state for an encap from `index`: the full path-secret
    /// chain from the leaf secret up past the root.
    pub fn from_leaf_secret(
        suite: CipherSuite,
        size: LeafCount,
        index: LeafIndex,
        leaf_secret: &Secret,
    ) -> Result<Self> {
        let mut tree = Self {
            suite,
            index,
            update_secret: Secret::zero(suite.hash_size()),
            path_secrets: BTreeMap::new(),
            key_cache: BTreeMap::new(),
        };
        tree.insert_secret(index.node(), leaf_secret.clone())?;
        tree.implant_above(index.node(), size, leaf_secret.clone())?;
        Ok(tree)
    }

    /// Private state of a new joiner: its leaf key plus, when the committer
    /// provided one, the path secret at the lowest ancestor shared with the
    /// committer.
    pub fn joiner(
        suite: CipherSuite,
        size: LeafCount,
        index: LeafIndex,
        leaf_key: HpkePrivateKey,
        intersect: NodeIndex,
        path_secret: Option<Secret>,
    ) -> Result<Self> {
        let mut tree = Self::solo(suite, index, leaf_key);
        if let Some(path_secret) = path_secret {
            tree.insert_secret(intersect, path_secret.clone())?;
            tree.implant_above(intersect, size, path_secret)?;
        }
        Ok(tree)
    }

    pub fn index(&self) -> LeafIndex {
        self.index
    }

    /// The commit secret resulting from the last encap or decap.
    pub fn update_secret(&self) -> &Secret {
        &self.update_secret
    }

    pub(crate) fn node_key(&self, index: NodeIndex) -> Option<&HpkePrivateKey> {
        self.key_cache.get(&index.0)
    }

    /// The path secret at the lowest ancestor shared with another leaf, when
    /// known.
    pub fn shared_path_secret(&self, to: LeafIndex) -> Option<(NodeIndex, &Secret)> {
        let node = ancestor(self.index, to);
        self.path_secrets.get(&node.0).map(|secret| (node, secret))
    }

    fn insert_secret(&mut self, index: NodeIndex, secret: Secret) -> Result<()> {
        let node_secret =
            expand_with_label(self.suite, &secret, "node", &[], self.suite.hash_size())?;
        let key_pair = derive_key_pair(self.suite, &node_secret)?;
        self.path_secrets.insert(index.0, secret);
        self.key_cache.insert(index.0, key_pair);
        Ok(())
    }

    /// Derive and store the chain of path secrets from `start` (exclusive)
    /// up to the root, then step once more for the update secret.
    fn implant_above(
        &mut self,
        start: NodeIndex,
        size: LeafCount,
        start_secret: Secret,
    ) -> Result<()> {
        let width = size.node_width();
        let top = root(width)?;

        let mut chain = Vec::new();
        if start != top {
            chain = direct_path(start, width)?;
            chain.push(top);
        }

        let mut secret = start_secret;
        for node in chain {
            secret = expand_with_label(self.suite, &secret, "path", &[], self.suite.hash_size())?;
            self.insert_secret(node, secret.clone())?;
        }

        // One step past the root.
        self.update_secret =
            expand_with_label(self.suite, &secret, "path", &[], self.suite.hash_size())?;
        Ok(())
    }

    /// Process an update path from `from`: decrypt the path secret at the
    /// lowest shared ancestor, re-derive the chain and check it against the
    /// advertised public keys.
    pub fn decap(
        &mut self,
        from: LeafIndex,
        tree: &RatchetTree,
        context: &[u8],
        path: &UpdatePath,
    ) -> Result<()> {
        let width = tree.node_width();
        let chain = path_to_root(from, width)?;
        if path.nodes.len() != chain.len() {
            return Err(Error::Protocol("update path length mismatch"));
        }

        let overlap = ancestor(from, self.index);
        let overlap_level = chain
            .iter()
            .position(|node| *node == overlap)
            .ok_or(Error::Protocol("decap path mismatch"))?;

        // The ciphertexts at the overlap level address the resolution of the
        // copath child whose subtree contains us.
        let copath_nodes = copath(from.node(), width)?;
        let resolution = tree.resolve(copath_nodes[overlap_level])?;
        let (position, key) = resolution
            .iter()
            .enumerate()
            .find_map(|(position, node)| {
                self.node_key(*node).map(|key| (position, key))
            })
            .ok_or(Error::Protocol("decap path mismatch"))?;

        let ciphertext = path.nodes[overlap_level]
            .encrypted_path_secrets
            .get(position)
            .ok_or(Error::Protocol("decap path mismatch"))?;

        let plaintext = hpke_open(self.suite, ciphertext, key, &[], context)?;
        let path_secret = Secret::from_bytes(plaintext);

        self.insert_secret(overlap, path_secret.clone())?;
        self.implant_above(overlap, width.leaf_count(), path_secret)?;

        // The re-derived public keys must match the advertised ones.
        for (level, node) in chain.iter().enumerate().skip(overlap_level) {
            let derived = self
                .node_key(*node)
                .expect("implanted above the overlap node");
            if derived.public_key() != &path.nodes[level].public_key {
                return Err(Error::Protocol("update path forgery"));
            }
        }

        Ok(())
    }

    /// Drop private state outside the tree after truncation.
    pub fn truncate(&mut self, size: LeafCount) {
        let width = size.node_width();
        self.path_secrets.retain(|node, _| *node < width.0);
        self.key_cache.retain(|node, _| *node < width.0);
    }

    /// Every cached private key matches the public key in the companion
    /// tree.
    pub fn consistent_with(&self, tree: &RatchetTree) -> Result<bool> {
        for (node, key) in &self.key_cache {
            let index = NodeIndex(*node);
            if index.0 >= tree.node_width().0 {
                continue;
            }
            if let Some(node) = tree.node(index)? {
                if node.public_key() != key.public_key() {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

impl RatchetTree {
    /// Rekey `from`'s leaf and direct path. Installs the new public keys and
    /// the re-signed leaf key package into the tree and returns the new
    /// private state along with the update path for the wire.
    pub fn encap(
        &mut self,
        from: LeafIndex,
        context: &[u8],
        leaf_secret: &Secret,
        signing_key: &SignaturePrivateKey,
        rng: &Rng,
    ) -> Result<(PrivateTree, UpdatePath)> {
        let suite = self.suite();
        let width = self.node_width();
        let private_tree = PrivateTree::from_leaf_secret(suite, self.size(), from, leaf_secret)?;

        let chain = path_to_root(from, width)?;

        // Install the new node keys; unmerged leaves are blended in by the
        // rekey and their lists reset.
        for node in &chain {
            let key = private_tree
                .node_key(*node)
                .expect("chain keys derived from leaf secret");
            self.set_parent_node(*node, key.public_key().clone())?;
        }

        // Fresh leaf key package carrying the new init key and parent hash.
        let parent_hash = self.set_parent_hashes(from)?;
        let mut key_package = self
            .key_package(from)?
            .cloned()
            .ok_or(Error::Protocol("blanked sender leaf"))?;
        key_package.init_key = private_tree
            .node_key(from.node())
            .expect("leaf key derived from leaf secret")
            .public_key()
            .clone();
        key_package.set_parent_hash(&parent_hash)?;
        key_package.sign(signing_key)?;
        self.set_leaf_node(from, key_package.clone())?;

        // Encrypt each level's path secret to the resolution of the
        // corresponding copath subtree.
        let copath_nodes = copath(from.node(), width)?;
        let mut nodes = Vec::with_capacity(chain.len());
        for (level, node) in chain.iter().enumerate() {
            let path_secret = private_tree
                .path_secrets
                .get(&node.0)
                .expect("chain secrets derived from leaf secret");

            let mut encrypted_path_secrets = Vec::new();
            for recipient in self.resolve(copath_nodes[level])? {
                let public_key = self.public_key(recipient)?;
                encrypted_path_secrets.push(hpke_seal(
                    suite,
                    public_key,
                    &[],
                    context,
                    path_secret.as_bytes(),
                    rng,
                )?);
            }

            nodes.push(UpdatePathNode {
                public_key: private_tree
                    .node_key(*node)
                    .expect("chain keys derived from leaf secret")
                    .public_key()
                    .clone(),
                encrypted_path_secrets,
            });
        }

        self.clear_hash_path(from)?;

        Ok((
            private_tree,
            UpdatePath {
                leaf_key_package: key_package,
                nodes,
            },
        ))
    }

    /// Receiver side of `encap`: install the advertised public keys and the
    /// new leaf key package, re-deriving and checking the parent hashes.
    pub fn merge(&mut self, from: LeafIndex, path: &UpdatePath) -> Result<()> {
        let width = self.node_width();
        let chain = path_to_root(from, width)?;
        if path.nodes.len() != chain.len() {
            return Err(Error::Protocol("update path length mismatch"));
        }

        for (node, path_node) in chain.iter().zip(path.nodes.iter()) {
            self.set_parent_node(*node, path_node.public_key.clone())?;
        }

        let parent_hash = self.set_parent_hashes(from)?;
        if path.leaf_key_package.parent_hash()? != Some(parent_hash) {
            return Err(Error::Protocol("parent hash mismatch"));
        }
        self.set_leaf_node(from, path.leaf_key_package.clone())?;
        self.clear_hash_path(from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::credential::Credential;
    use crate::crypto::hkdf::expand_with_label;
    use crate::crypto::hpke::derive_key_pair;
    use crate::crypto::rng::Rng;
    use crate::crypto::secret::Secret;
    use crate::crypto::signature::{SignaturePrivateKey, SignatureScheme};
    use crate::crypto::suite::CipherSuite;
    use crate::error::Error;
    use crate::key_package::KeyPackage;
    use crate::tree::RatchetTree;
    use crate::tree_math::LeafIndex;

    use super::PrivateTree;

    const SUITE: CipherSuite = CipherSuite::X25519Aes128GcmSha256Ed25519;

    struct Member {
        index: LeafIndex,
        signing_key: SignaturePrivateKey,
        private_tree: PrivateTree,
    }

    fn add_member(tree: &mut RatchetTree, rng: &Rng, identity: u8) -> Member {
        let signing_key = SignaturePrivateKey::generate(SignatureScheme::Ed25519, rng).unwrap();
        let leaf_secret = Secret::from_bytes(rng.random_vec(32).unwrap());
        let node_secret =
            expand_with_label(SUITE, &leaf_secret, "node", &[], SUITE.hash_size()).unwrap();
        let leaf_key = derive_key_pair(SUITE, &node_secret).unwrap();
        let key_package = KeyPackage::new(
            SUITE,
            leaf_key.public_key().clone(),
            Credential::basic(
                vec![identity],
                SignatureScheme::Ed25519,
                signing_key.public_key().clone(),
            ),
            Vec::new(),
            &signing_key,
        )
        .unwrap();
        let index = tree.add_leaf(key_package).unwrap();
        Member {
            index,
            signing_key,
            private_tree: PrivateTree::solo(SUITE, index, leaf_key),
        }
    }

    #[test]
    fn encap_decap_converge() {
        let rng = Rng::from_seed([1; 32]);
        let mut tree = RatchetTree::new(SUITE);

        let alice = add_member(&mut tree, &rng, 1);
        let mut bob = add_member(&mut tree, &rng, 2);
        let mut carol = add_member(&mut tree, &rng, 3);

        let context = b"group context";
        let leaf_secret = Secret::from_bytes(rng.random_vec(32).unwrap());

        let receiver_tree = tree.clone();
        let (alice_priv, path) = tree
            .encap(
                alice.index,
                context,
                &leaf_secret,
                &alice.signing_key,
                &rng,
            )
            .unwrap();

        for member in [&mut bob, &mut carol] {
            let mut member_tree = receiver_tree.clone();
            member
                .private_tree
                .decap(alice.index, &member_tree, context, &path)
                .unwrap();
            member_tree.merge(alice.index, &path).unwrap();

            assert_eq!(
                member.private_tree.update_secret(),
                alice_priv.update_secret()
            );
            assert_eq!(member_tree, tree);
            assert!(member.private_tree.consistent_with(&member_tree).unwrap());
        }

        assert!(tree.parent_hash_valid().unwrap());
        assert!(alice_priv.consistent_with(&tree).unwrap());
    }

    #[test]
    fn decap_rejects_tampered_ciphertext() {
        let rng = Rng::from_seed([2; 32]);
        let mut tree = RatchetTree::new(SUITE);

        let alice = add_member(&mut tree, &rng, 1);
        let mut bob = add_member(&mut tree, &rng, 2);

        let context = b"group context";
        let leaf_secret = Secret::from_bytes(rng.random_vec(32).unwrap());

        let receiver_tree = tree.clone();
        let (_, mut path) = tree
            .encap(
                alice.index,
                context,
                &leaf_secret,
                &alice.signing_key,
                &rng,
            )
            .unwrap();

        path.nodes[0].encrypted_path_secrets[0].ciphertext[0] ^= 0x01;
        let result = bob
            .private_tree
            .decap(alice.index, &receiver_tree, context, &path);
        assert!(matches!(result, Err(Error::Crypto(_))));
    }

    #[test]
    fn shared_path_secret_covers_joiners() {
        let rng = Rng::from_seed([3; 32]);
        let mut tree = RatchetTree::new(SUITE);

        let alice = add_member(&mut tree, &rng, 1);
        let _bob = add_member(&mut tree, &rng, 2);
        let carol = add_member(&mut tree, &rng, 3);

        let leaf_secret = Secret::from_bytes(rng.random_vec(32).unwrap());
        let (alice_priv, _) = tree
            .encap(
                alice.index,
                b"ctx",
                &leaf_secret,
                &alice.signing_key,
                &rng,
            )
            .unwrap();

        // Alice knows a path secret for the ancestor she shares with Carol.
        let (node, _) = alice_priv.shared_path_secret(carol.index).unwrap();
        assert_eq!(node, crate::tree_math::ancestor(alice.index, carol.index));
    }
}
