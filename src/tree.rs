// SPDX-License-Identifier: MIT OR Apache-2.0

//! The public ratchet tree: a left-balanced binary tree whose leaves are
//! member key packages and whose internal nodes hold the public halves of
//! encapsulated path secrets.
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tls_codec::{Deserialize as TlsDeserialize, Serialize as TlsSerialize, Size};

use crate::codec::{
    opaque8_len, optional_len, read_opaque8, read_optional, read_vector32, vector32_len,
    write_opaque8, write_optional, write_vector32,
};
use crate::crypto::hpke::HpkePublicKey;
use crate::crypto::sha2::hash;
use crate::crypto::suite::CipherSuite;
use crate::error::{Error, Result};
use crate::key_package::KeyPackage;
use crate::tree_math::{
    LeafCount, LeafIndex, NodeCount, NodeIndex, direct_path, left, level, right, root, sibling,
};

const NODE_TYPE_LEAF: u8 = 0x00;
const NODE_TYPE_PARENT: u8 = 0x01;

/// Internal tree node: a public key plus the bookkeeping needed to keep the
/// tree consistent across joins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentNode {
    pub public_key: HpkePublicKey,
    /// Leaves whose joins have not yet been blended into this node's key.
    pub unmerged_leaves: Vec<LeafIndex>,
    #[serde(with = "serde_bytes")]
    pub parent_hash: Vec<u8>,
}

/// A tree slot's occupant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    Leaf(KeyPackage),
    Parent(ParentNode),
}

impl Node {
    pub fn public_key(&self) -> &HpkePublicKey {
        match self {
            Node::Leaf(key_package) => &key_package.init_key,
            Node::Parent(parent) => &parent.public_key,
        }
    }

    /// The parent-hash value carried by this node: the extension for
    /// leaves, the field for internal nodes.
    pub fn parent_hash(&self) -> Result<Option<Vec<u8>>> {
        match self {
            Node::Leaf(key_package) => key_package.parent_hash(),
            Node::Parent(parent) => Ok(Some(parent.parent_hash.clone())),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Slot {
    node: Option<Node>,
    /// Memoized subtree hash; `None` marks the slot dirty.
    hash: Option<Vec<u8>>,
}

impl Slot {
    fn blank() -> Self {
        Self {
            node: None,
            hash: None,
        }
    }

    fn is_blank(&self) -> bool {
        self.node.is_none()
    }
}

/// The public tree state shared by all members of a group.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RatchetTree {
    suite: CipherSuite,
    slots: Vec<Slot>,
}

impl PartialEq for RatchetTree {
    fn eq(&self, other: &Self) -> bool {
        self.suite == other.suite
            && self.slots.len() == other.slots.len()
            && self
                .slots
                .iter()
                .zip(other.slots.iter())
                .all(|(a, b)| a.node == b.node)
    }
}

impl RatchetTree {
    pub fn new(suite: CipherSuite) -> Self {
        Self {
            suite,
            slots: Vec::new(),
        }
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Number of leaf slots, including blank ones.
    pub fn size(&self) -> LeafCount {
        NodeCount(self.slots.len() as u32).leaf_count()
    }

    pub fn node_width(&self) -> NodeCount {
        NodeCount(self.slots.len() as u32)
    }

    fn slot(&self, index: NodeIndex) -> Result<&Slot> {
        self.slots
            .get(index.0 as usize)
            .ok_or(Error::InvalidParameter("node index out of range"))
    }

    fn slot_mut(&mut self, index: NodeIndex) -> Result<&mut Slot> {
        self.slots
            .get_mut(index.0 as usize)
            .ok_or(Error::InvalidParameter("node index out of range"))
    }

    pub fn node(&self, index: NodeIndex) -> Result<Option<&Node>> {
        Ok(self.slot(index)?.node.as_ref())
    }

    pub fn public_key(&self, index: NodeIndex) -> Result<&HpkePublicKey> {
        self.node(index)?
            .map(Node::public_key)
            .ok_or(Error::Protocol("blank node has no public key"))
    }

    pub fn key_package(&self, index: LeafIndex) -> Result<Option<&KeyPackage>> {
        match self.node(index.node())? {
            None => Ok(None),
            Some(Node::Leaf(key_package)) => Ok(Some(key_package)),
            Some(Node::Parent(_)) => Err(Error::Protocol("parent node in leaf slot")),
        }
    }

    /// Leftmost leaf holding exactly this key package.
    pub fn find(&self, key_package: &KeyPackage) -> Result<Option<LeafIndex>> {
        for index in 0..self.size().0 {
            let index = LeafIndex(index);
            if self.key_package(index)? == Some(key_package) {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Install a key package at the leftmost blank leaf, extending the tree
    /// when none is free. The new leaf is recorded as unmerged on every
    /// non-blank ancestor.
    pub fn add_leaf(&mut self, key_package: KeyPackage) -> Result<LeafIndex> {
        let mut target = None;
        for index in 0..self.size().0 {
            if self.slot(LeafIndex(index).node())?.is_blank() {
                target = Some(LeafIndex(index));
                break;
            }
        }

        let index = match target {
            Some(index) => index,
            None => {
                if !self.slots.is_empty() {
                    self.slots.push(Slot::blank());
                }
                self.slots.push(Slot::blank());
                LeafIndex(self.size().0 - 1)
            }
        };

        let node = index.node();
        self.slot_mut(node)?.node = Some(Node::Leaf(key_package));

        let width = self.node_width();
        let mut ancestors = direct_path(node, width)?;
        let top = root(width)?;
        if node != top {
            ancestors.push(top);
        }
        for ancestor in ancestors {
            if let Some(Node::Parent(parent)) = &mut self.slot_mut(ancestor)?.node {
                parent.unmerged_leaves.push(index);
            }
        }

        self.clear_hash_path(index)?;
        Ok(index)
    }

    /// Replace the leaf and blank its direct path; any unmerged-leaves
    /// bookkeeping above is dropped with the blanked nodes.
    pub fn update_leaf(&mut self, index: LeafIndex, key_package: KeyPackage) -> Result<()> {
        self.blank_path(index)?;
        self.slot_mut(index.node())?.node = Some(Node::Leaf(key_package));
        self.clear_hash_path(index)?;
        Ok(())
    }

    /// Blank the leaf and every node on its direct path.
    pub fn blank_path(&mut self, index: LeafIndex) -> Result<()> {
        let node = index.node();
        let width = self.node_width();
        self.slot_mut(node)?.node = None;

        let top = root(width)?;
        let mut ancestors = direct_path(node, width)?;
        if node != top {
            ancestors.push(top);
        }
        for ancestor in ancestors {
            self.slot_mut(ancestor)?.node = None;
        }

        self.clear_hash_path(index)?;
        Ok(())
    }

    /// Drop trailing blank leaves. The tree keeps at least one non-blank
    /// leaf; emptying the group is not a defined operation.
    pub fn truncate(&mut self) -> Result<()> {
        let mut last = None;
        for index in 0..self.size().0 {
            if !self.slot(LeafIndex(index).node())?.is_blank() {
                last = Some(index);
            }
        }
        let last = last.ok_or(Error::InvalidParameter("group must not be empty"))?;

        let width = LeafCount(last + 1).node_width();
        if width.0 < self.node_width().0 {
            self.slots.truncate(width.0 as usize);
            // Interior hashes along the right spine changed shape.
            self.clear_hash_path(LeafIndex(last))?;
        }
        Ok(())
    }

    /// The ordered minimal set of non-blank nodes covering the subtree.
    pub fn resolve(&self, index: NodeIndex) -> Result<Vec<NodeIndex>> {
        match &self.slot(index)?.node {
            Some(Node::Leaf(_)) => Ok(vec![index]),
            Some(Node::Parent(parent)) => {
                let mut resolution = vec![index];
                resolution.extend(parent.unmerged_leaves.iter().map(|leaf| leaf.node()));
                Ok(resolution)
            }
            None => {
                if level(index) == 0 {
                    return Ok(Vec::new());
                }
                let mut resolution = self.resolve(left(index)?)?;
                resolution.extend(self.resolve(right(index, self.node_width())?)?);
                Ok(resolution)
            }
        }
    }

    fn leaf_hash_input(
        &self,
        index: NodeIndex,
        key_package: Option<&KeyPackage>,
    ) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        NODE_TYPE_LEAF
            .tls_serialize(&mut out)
            .and_then(|_| index.tls_serialize(&mut out))
            .and_then(|_| write_optional(&mut out, &key_package.cloned()))
            .map_err(Error::Codec)?;
        Ok(out)
    }

    fn parent_hash_input(
        &self,
        index: NodeIndex,
        parent: Option<&ParentNode>,
        left_hash: &[u8],
        right_hash: &[u8],
    ) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        NODE_TYPE_PARENT
            .tls_serialize(&mut out)
            .and_then(|_| index.tls_serialize(&mut out))
            .and_then(|_| write_optional(&mut out, &parent.cloned()))
            .and_then(|_| write_opaque8(&mut out, left_hash))
            .and_then(|_| write_opaque8(&mut out, right_hash))
            .map_err(Error::Codec)?;
        Ok(out)
    }

    fn compute_hash(&mut self, index: NodeIndex) -> Result<Vec<u8>> {
        if let Some(cached) = &self.slot(index)?.hash {
            return Ok(cached.clone());
        }

        let input = if level(index) == 0 {
            let key_package = match &self.slot(index)?.node {
                None => None,
                Some(Node::Leaf(key_package)) => Some(key_package.clone()),
                Some(Node::Parent(_)) => {
                    return Err(Error::Protocol("parent node in leaf slot"));
                }
            };
            self.leaf_hash_input(index, key_package.as_ref())?
        } else {
            let left_hash = self.compute_hash(left(index)?)?;
            let right_hash = self.compute_hash(right(index, self.node_width())?)?;
            let parent = match &self.slot(index)?.node {
                None => None,
                Some(Node::Parent(parent)) => Some(parent.clone()),
                Some(Node::Leaf(_)) => {
                    return Err(Error::Protocol("leaf node in parent slot"));
                }
            };
            self.parent_hash_input(index, parent.as_ref(), &left_hash, &right_hash)?
        };

        let digest = hash(self.suite, &[&input]);
        self.slot_mut(index)?.hash = Some(digest.clone());
        Ok(digest)
    }

    /// Recompute every dirty subtree hash.
    pub fn set_hash_all(&mut self) -> Result<()> {
        if self.slots.is_empty() {
            return Err(Error::InvalidParameter("tree must not be empty"));
        }
        let top = root(self.node_width())?;
        self.compute_hash(top)?;
        Ok(())
    }

    /// Subtree hash of the root; callers run `set_hash_all` after mutations.
    pub fn root_hash(&mut self) -> Result<Vec<u8>> {
        let top = root(self.node_width())?;
        self.compute_hash(top)
    }

    /// Install a fresh parent node with the given public key, dropping any
    /// unmerged-leaves bookkeeping.
    pub(crate) fn set_parent_node(
        &mut self,
        index: NodeIndex,
        public_key: HpkePublicKey,
    ) -> Result<()> {
        if level(index) == 0 {
            return Err(Error::InvalidParameter("parent node in leaf slot"));
        }
        let slot = self.slot_mut(index)?;
        slot.node = Some(Node::Parent(ParentNode {
            public_key,
            unmerged_leaves: Vec::new(),
            parent_hash: Vec::new(),
        }));
        slot.hash = None;
        Ok(())
    }

    pub(crate) fn set_leaf_node(&mut self, index: LeafIndex, key_package: KeyPackage) -> Result<()> {
        let slot = self.slot_mut(index.node())?;
        slot.node = Some(Node::Leaf(key_package));
        slot.hash = None;
        Ok(())
    }

    pub(crate) fn clear_hash_path(&mut self, index: LeafIndex) -> Result<()> {
        let node = index.node();
        let width = self.node_width();
        self.slot_mut(node)?.hash = None;
        let top = root(width)?;
        let mut ancestors = direct_path(node, width)?;
        if node != top {
            ancestors.push(top);
        }
        for ancestor in ancestors {
            self.slot_mut(ancestor)?.hash = None;
        }
        Ok(())
    }

    /// Subtree hash with the given leaves treated as blank and stripped from
    /// unmerged-leaves lists, used for parent-hash inputs.
    fn tree_hash_omitting(&self, index: NodeIndex, omit: &[LeafIndex]) -> Result<Vec<u8>> {
        let input = if level(index) == 0 {
            let key_package = match &self.slot(index)?.node {
                Some(Node::Leaf(key_package))
                    if !omit.contains(&index.leaf().expect("leaf level")) =>
                {
                    Some(key_package.clone())
                }
                _ => None,
            };
            self.leaf_hash_input(index, key_package.as_ref())?
        } else {
            let left_hash = self.tree_hash_omitting(left(index)?, omit)?;
            let right_hash =
                self.tree_hash_omitting(right(index, self.node_width())?, omit)?;
            let parent = match &self.slot(index)?.node {
                Some(Node::Parent(parent)) => {
                    let mut parent = parent.clone();
                    parent.unmerged_leaves.retain(|leaf| !omit.contains(leaf));
                    Some(parent)
                }
                _ => None,
            };
            self.parent_hash_input(index, parent.as_ref(), &left_hash, &right_hash)?
        };
        Ok(hash(self.suite, &[&input]))
    }

    /// The parent-hash value a child of `index` must carry:
    /// `H(public_key ‖ parent_hash ‖ sibling_hash)` with the sibling's
    /// subtree hashed as if this node's unmerged leaves were blank.
    pub(crate) fn parent_hash_value(&self, index: NodeIndex) -> Result<Vec<u8>> {
        let parent = match &self.slot(index)?.node {
            Some(Node::Parent(parent)) => parent,
            _ => return Err(Error::Protocol("parent hash of non-parent node")),
        };

        let width = self.node_width();
        let sibling_hash = if index == root(width)? {
            Vec::new()
        } else {
            self.tree_hash_omitting(sibling(index, width)?, &parent.unmerged_leaves)?
        };

        let mut input = Vec::new();
        parent
            .public_key
            .tls_serialize(&mut input)
            .and_then(|_| write_opaque8(&mut input, &parent.parent_hash))
            .and_then(|_| write_opaque8(&mut input, &sibling_hash))
            .map_err(Error::Codec)?;
        Ok(hash(self.suite, &[&input]))
    }

    /// Set the parent-hash fields of the nodes along a leaf's direct path,
    /// top down, and return the value the leaf's extension must carry.
    pub(crate) fn set_parent_hashes(&mut self, from: LeafIndex) -> Result<Vec<u8>> {
        let node = from.node();
        let width = self.node_width();
        let top = root(width)?;
        if node == top {
            // A single-leaf tree has no parents to bind.
            return Ok(Vec::new());
        }

        let mut chain = direct_path(node, width)?;
        chain.push(top);

        // Root first; every node below binds the value of its parent.
        let mut previous: Option<Vec<u8>> = None;
        for ancestor in chain.iter().rev() {
            let value = previous.take().unwrap_or_default();
            match &mut self.slot_mut(*ancestor)?.node {
                Some(Node::Parent(parent)) => parent.parent_hash = value,
                _ => return Err(Error::Protocol("blank node on update path")),
            }
            previous = Some(self.parent_hash_value(*ancestor)?);
        }

        Ok(previous.expect("chain is non-empty"))
    }

    /// Validate the parent-hash chain of every non-blank internal node: one
    /// of its non-blank children must carry its parent-hash value.
    pub fn parent_hash_valid(&self) -> Result<bool> {
        let width = self.node_width();
        for index in 0..width.0 {
            let index = NodeIndex(index);
            if level(index) == 0 {
                continue;
            }
            if self.slot(index)?.is_blank() {
                continue;
            }

            let expected = self.parent_hash_value(index)?;
            let mut found = false;
            for child in [left(index)?, right(index, width)?] {
                if let Some(node) = &self.slot(child)?.node {
                    if node.parent_hash()? == Some(expected.clone()) {
                        found = true;
                        break;
                    }
                }
            }
            if !found {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Export the slot contents for the wire.
    pub fn to_nodes(&self) -> TreeNodes {
        TreeNodes(self.slots.iter().map(|slot| slot.node.clone()).collect())
    }

    /// Rebuild a tree from wire nodes, checking slot kinds.
    pub fn from_nodes(suite: CipherSuite, nodes: TreeNodes) -> Result<Self> {
        let slots: Vec<Slot> = nodes
            .0
            .into_iter()
            .map(|node| Slot { node, hash: None })
            .collect();

        if slots.len() % 2 != 1 && !slots.is_empty() {
            return Err(Error::Protocol("tree width must be odd"));
        }
        for (position, slot) in slots.iter().enumerate() {
            match (&slot.node, position % 2) {
                (Some(Node::Parent(_)), 0) => {
                    return Err(Error::Protocol("parent node in leaf slot"));
                }
                (Some(Node::Leaf(_)), 1) => {
                    return Err(Error::Protocol("leaf node in parent slot"));
                }
                _ => {}
            }
        }

        Ok(Self { suite, slots })
    }
}

/// Wire representation of the tree: `optional<Node>` slots behind a 4-byte
/// length prefix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeNodes(pub Vec<Option<Node>>);

impl Size for TreeNodes {
    fn tls_serialized_len(&self) -> usize {
        let body: usize = self.0.iter().map(optional_len).sum();
        4 + body
    }
}

impl TlsSerialize for TreeNodes {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        let mut body = Vec::new();
        for node in &self.0 {
            write_optional(&mut body, node)?;
        }
        crate::codec::write_opaque32(writer, &body)
    }
}

impl TlsDeserialize for TreeNodes {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        let body = crate::codec::read_opaque32(bytes)?;
        let mut slice = body.as_slice();
        let mut nodes = Vec::new();
        while !slice.is_empty() {
            nodes.push(read_optional(&mut slice)?);
        }
        Ok(Self(nodes))
    }
}

impl Size for ParentNode {
    fn tls_serialized_len(&self) -> usize {
        self.public_key.tls_serialized_len()
            + vector32_len(&self.unmerged_leaves)
            + opaque8_len(&self.parent_hash)
    }
}

impl TlsSerialize for ParentNode {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        let mut written = self.public_key.tls_serialize(writer)?;
        written += write_vector32(writer, &self.unmerged_leaves)?;
        written += write_opaque8(writer, &self.parent_hash)?;
        Ok(written)
    }
}

impl TlsDeserialize for ParentNode {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        let public_key = HpkePublicKey::tls_deserialize(bytes)?;
        let unmerged_leaves = read_vector32(bytes)?;
        let parent_hash = read_opaque8(bytes)?;
        Ok(Self {
            public_key,
            unmerged_leaves,
            parent_hash,
        })
    }
}

impl Size for Node {
    fn tls_serialized_len(&self) -> usize {
        1 + match self {
            Node::Leaf(key_package) => key_package.tls_serialized_len(),
            Node::Parent(parent) => parent.tls_serialized_len(),
        }
    }
}

impl TlsSerialize for Node {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        match self {
            Node::Leaf(key_package) => {
                let mut written = NODE_TYPE_LEAF.tls_serialize(writer)?;
                written += key_package.tls_serialize(writer)?;
                Ok(written)
            }
            Node::Parent(parent) => {
                let mut written = NODE_TYPE_PARENT.tls_serialize(writer)?;
                written += parent.tls_serialize(writer)?;
                Ok(written)
            }
        }
    }
}

impl TlsDeserialize for Node {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        match u8::tls_deserialize(bytes)? {
            NODE_TYPE_LEAF => Ok(Node::Leaf(KeyPackage::tls_deserialize(bytes)?)),
            NODE_TYPE_PARENT => Ok(Node::Parent(ParentNode::tls_deserialize(bytes)?)),
            other => Err(tls_codec::Error::DecodingError(format!(
                "unknown node type {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::{decode, encode};
    use crate::credential::Credential;
    use crate::crypto::hpke::derive_key_pair;
    use crate::crypto::rng::Rng;
    use crate::crypto::secret::Secret;
    use crate::crypto::signature::{SignaturePrivateKey, SignatureScheme};
    use crate::crypto::suite::CipherSuite;
    use crate::key_package::KeyPackage;
    use crate::tree_math::{LeafIndex, NodeIndex};

    use super::{RatchetTree, TreeNodes};

    const SUITE: CipherSuite = CipherSuite::X25519Aes128GcmSha256Ed25519;

    fn test_key_package(seed: u8) -> KeyPackage {
        let rng = Rng::from_seed([seed; 32]);
        let signing_key = SignaturePrivateKey::generate(SignatureScheme::Ed25519, &rng).unwrap();
        let init_key =
            derive_key_pair(SUITE, &Secret::from_bytes(rng.random_vec(32).unwrap())).unwrap();
        KeyPackage::new(
            SUITE,
            init_key.public_key().clone(),
            Credential::basic(
                vec![seed],
                SignatureScheme::Ed25519,
                signing_key.public_key().clone(),
            ),
            Vec::new(),
            &signing_key,
        )
        .unwrap()
    }

    #[test]
    fn add_extends_leftmost() {
        let mut tree = RatchetTree::new(SUITE);
        assert_eq!(tree.add_leaf(test_key_package(1)).unwrap(), LeafIndex(0));
        assert_eq!(tree.add_leaf(test_key_package(2)).unwrap(), LeafIndex(1));
        assert_eq!(tree.add_leaf(test_key_package(3)).unwrap(), LeafIndex(2));
        assert_eq!(tree.size().0, 3);
        assert_eq!(tree.node_width().0, 5);

        // Blank a leaf, the next add fills it again.
        tree.blank_path(LeafIndex(1)).unwrap();
        assert_eq!(tree.add_leaf(test_key_package(4)).unwrap(), LeafIndex(1));
        assert_eq!(tree.size().0, 3);
    }

    #[test]
    fn find_and_key_package() {
        let mut tree = RatchetTree::new(SUITE);
        let kp_1 = test_key_package(1);
        let kp_2 = test_key_package(2);
        tree.add_leaf(kp_1.clone()).unwrap();
        tree.add_leaf(kp_2.clone()).unwrap();

        assert_eq!(tree.find(&kp_2).unwrap(), Some(LeafIndex(1)));
        assert_eq!(tree.key_package(LeafIndex(0)).unwrap(), Some(&kp_1));
        assert_eq!(tree.find(&test_key_package(9)).unwrap(), None);
    }

    #[test]
    fn resolution_of_blanks() {
        let mut tree = RatchetTree::new(SUITE);
        for seed in 1..=4 {
            tree.add_leaf(test_key_package(seed)).unwrap();
        }

        // All parents blank: the resolution of the root is all leaves.
        assert_eq!(
            tree.resolve(NodeIndex(3)).unwrap(),
            vec![NodeIndex(0), NodeIndex(2), NodeIndex(4), NodeIndex(6)]
        );

        tree.blank_path(LeafIndex(3)).unwrap();
        assert_eq!(
            tree.resolve(NodeIndex(3)).unwrap(),
            vec![NodeIndex(0), NodeIndex(2), NodeIndex(4)]
        );
    }

    #[test]
    fn hashes_track_mutations() {
        let mut tree = RatchetTree::new(SUITE);
        tree.add_leaf(test_key_package(1)).unwrap();
        tree.add_leaf(test_key_package(2)).unwrap();
        tree.set_hash_all().unwrap();
        let hash_before = tree.root_hash().unwrap();

        tree.update_leaf(LeafIndex(1), test_key_package(3)).unwrap();
        tree.set_hash_all().unwrap();
        let hash_after = tree.root_hash().unwrap();
        assert_ne!(hash_before, hash_after);

        // Same contents through a different operation sequence, same hash.
        let mut other = RatchetTree::new(SUITE);
        other.add_leaf(test_key_package(1)).unwrap();
        other.add_leaf(test_key_package(9)).unwrap();
        other.update_leaf(LeafIndex(1), test_key_package(3)).unwrap();
        other.set_hash_all().unwrap();
        assert_eq!(other.root_hash().unwrap(), hash_after);
    }

    #[test]
    fn truncate_drops_trailing_blanks() {
        let mut tree = RatchetTree::new(SUITE);
        for seed in 1..=4 {
            tree.add_leaf(test_key_package(seed)).unwrap();
        }
        tree.blank_path(LeafIndex(3)).unwrap();
        tree.blank_path(LeafIndex(2)).unwrap();

        tree.truncate().unwrap();
        assert_eq!(tree.size().0, 2);
        assert_eq!(tree.node_width().0, 3);

        // Truncating below one member is refused.
        tree.blank_path(LeafIndex(0)).unwrap();
        tree.blank_path(LeafIndex(1)).unwrap();
        assert!(tree.truncate().is_err());
    }

    #[test]
    fn wire_round_trip() {
        let mut tree = RatchetTree::new(SUITE);
        for seed in 1..=3 {
            tree.add_leaf(test_key_package(seed)).unwrap();
        }

        let nodes = tree.to_nodes();
        let bytes = encode(&nodes).unwrap();
        let decoded: TreeNodes = decode(&bytes).unwrap();
        assert_eq!(decoded, nodes);

        let rebuilt = RatchetTree::from_nodes(SUITE, decoded).unwrap();
        assert_eq!(rebuilt, tree);
    }
}
