// SPDX-License-Identifier: MIT OR Apache-2.0

//! Index arithmetic over the left-balanced binary tree.
//!
//! A tree with `n` leaves occupies `2n - 1` node slots. Leaf `i` lives at
//! node `2i`, internal nodes at the odd indices between their children. All
//! functions here are pure; nothing allocates beyond the returned vectors.
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tls_codec::{Deserialize as TlsDeserialize, Serialize as TlsSerialize, Size};

use crate::error::{Error, Result};

/// Position of a member among the leaves of the tree.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LeafIndex(pub u32);

/// Position of a slot in the node vector.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeIndex(pub u32);

/// Number of leaves in the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeafCount(pub u32);

/// Number of node slots in the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeCount(pub u32);

impl LeafIndex {
    pub fn node(&self) -> NodeIndex {
        NodeIndex(2 * self.0)
    }
}

impl NodeIndex {
    pub fn is_leaf(&self) -> bool {
        self.0 % 2 == 0
    }

    pub fn leaf(&self) -> Option<LeafIndex> {
        self.is_leaf().then_some(LeafIndex(self.0 / 2))
    }
}

impl LeafCount {
    pub fn node_width(&self) -> NodeCount {
        if self.0 == 0 {
            NodeCount(0)
        } else {
            NodeCount(2 * self.0 - 1)
        }
    }
}

impl NodeCount {
    pub fn leaf_count(&self) -> LeafCount {
        LeafCount(self.0 / 2 + self.0 % 2)
    }

    fn contains(&self, index: NodeIndex) -> bool {
        index.0 < self.0
    }
}

/// Position of the highest set bit, zero for zero.
fn log2(x: u32) -> u32 {
    if x == 0 { 0 } else { 31 - x.leading_zeros() }
}

/// Height of a node above the leaf level: the number of trailing one bits.
pub fn level(index: NodeIndex) -> u32 {
    index.0.trailing_ones()
}

/// Root of a tree with the given number of node slots.
pub fn root(width: NodeCount) -> Result<NodeIndex> {
    if width.0 == 0 {
        return Err(Error::InvalidParameter("tree must not be empty"));
    }
    Ok(NodeIndex((1 << log2(width.0)) - 1))
}

/// Left child of an internal node.
pub fn left(index: NodeIndex) -> Result<NodeIndex> {
    let k = level(index);
    if k == 0 {
        return Err(Error::InvalidParameter("leaf node has no children"));
    }
    Ok(NodeIndex(index.0 ^ (0b01 << (k - 1))))
}

/// Right child of an internal node, clamped into the tree.
pub fn right(index: NodeIndex, width: NodeCount) -> Result<NodeIndex> {
    let k = level(index);
    if k == 0 {
        return Err(Error::InvalidParameter("leaf node has no children"));
    }
    if !width.contains(index) {
        return Err(Error::InvalidParameter("node index out of range"));
    }
    let mut r = NodeIndex(index.0 ^ (0b11 << (k - 1)));
    while !width.contains(r) {
        r = left(r)?;
    }
    Ok(r)
}

/// Parent of a node as if the tree were complete.
fn parent_step(x: u32) -> u32 {
    let k = level(NodeIndex(x));
    let b = (x >> (k + 1)) & 0b01;
    (x | (1 << k)) & !(b << (k + 1))
}

/// Parent of a node, clamped into the tree.
pub fn parent(index: NodeIndex, width: NodeCount) -> Result<NodeIndex> {
    if !width.contains(index) {
        return Err(Error::InvalidParameter("node index out of range"));
    }
    if index == root(width)? {
        return Err(Error::InvalidParameter("root node has no parent"));
    }
    let mut p = NodeIndex(parent_step(index.0));
    while !width.contains(p) {
        p = NodeIndex(parent_step(p.0));
    }
    Ok(p)
}

/// The other child of a node's parent.
pub fn sibling(index: NodeIndex, width: NodeCount) -> Result<NodeIndex> {
    let p = parent(index, width)?;
    if index.0 < p.0 {
        right(p, width)
    } else {
        left(p)
    }
}

/// Ancestors of a node in ascending order, excluding the node itself and the
/// root.
pub fn direct_path(index: NodeIndex, width: NodeCount) -> Result<Vec<NodeIndex>> {
    if !width.contains(index) {
        return Err(Error::InvalidParameter("node index out of range"));
    }
    let top = root(width)?;
    let mut path = Vec::new();
    let mut current = index;
    while current != top {
        current = parent(current, width)?;
        if current != top {
            path.push(current);
        }
    }
    Ok(path)
}

/// Siblings of the node and of each node along its direct path.
pub fn copath(index: NodeIndex, width: NodeCount) -> Result<Vec<NodeIndex>> {
    if index == root(width)? {
        return Ok(Vec::new());
    }
    let mut nodes = vec![index];
    nodes.extend(direct_path(index, width)?);
    nodes.iter().map(|node| sibling(*node, width)).collect()
}

/// Lowest common ancestor of two leaves; the lowest node whose subtree
/// contains both.
pub fn ancestor(left_leaf: LeafIndex, right_leaf: LeafIndex) -> NodeIndex {
    let mut ln = left_leaf.node().0;
    let mut rn = right_leaf.node().0;
    if ln == rn {
        return NodeIndex(ln);
    }

    let mut k: u32 = 0;
    while ln != rn {
        ln >>= 1;
        rn >>= 1;
        k += 1;
    }
    NodeIndex((ln << k) + (1 << (k - 1)) - 1)
}

impl Size for LeafIndex {
    fn tls_serialized_len(&self) -> usize {
        4
    }
}

impl TlsSerialize for LeafIndex {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        self.0.tls_serialize(writer)
    }
}

impl TlsDeserialize for LeafIndex {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        Ok(Self(u32::tls_deserialize(bytes)?))
    }
}

impl Size for NodeIndex {
    fn tls_serialized_len(&self) -> usize {
        4
    }
}

impl TlsSerialize for NodeIndex {
    fn tls_serialize<W: Write>(&self, writer: &mut W) -> std::result::Result<usize, tls_codec::Error> {
        self.0.tls_serialize(writer)
    }
}

impl TlsDeserialize for NodeIndex {
    fn tls_deserialize<R: Read>(bytes: &mut R) -> std::result::Result<Self, tls_codec::Error> {
        Ok(Self(u32::tls_deserialize(bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        LeafCount, LeafIndex, NodeCount, NodeIndex, ancestor, copath, direct_path, left, level,
        parent, right, root, sibling,
    };

    #[test]
    fn known_tree_of_five_leaves() {
        // Node layout for five leaves (width 9):
        //
        //          3
        //        /   \
        //       1     5
        //      / \   / \
        //     0   2 4   6   8
        let width = LeafCount(5).node_width();
        assert_eq!(width, NodeCount(9));
        assert_eq!(root(width).unwrap(), NodeIndex(7));

        assert_eq!(left(NodeIndex(3)).unwrap(), NodeIndex(1));
        assert_eq!(right(NodeIndex(3), width).unwrap(), NodeIndex(5));
        // The right subtree of the root is cut short.
        assert_eq!(right(NodeIndex(7), width).unwrap(), NodeIndex(8));
        assert_eq!(parent(NodeIndex(8), width).unwrap(), NodeIndex(7));
        assert_eq!(sibling(NodeIndex(8), width).unwrap(), NodeIndex(3));

        assert_eq!(
            direct_path(NodeIndex(0), width).unwrap(),
            vec![NodeIndex(1), NodeIndex(3)]
        );
        assert_eq!(
            copath(NodeIndex(0), width).unwrap(),
            vec![NodeIndex(2), NodeIndex(5), NodeIndex(8)]
        );
    }

    #[test]
    fn parent_inverts_children() {
        for n_leaves in 1u32..=32 {
            let width = LeafCount(n_leaves).node_width();
            for x in 0..width.0 {
                let x = NodeIndex(x);
                if level(x) == 0 {
                    continue;
                }
                assert_eq!(parent(left(x).unwrap(), width).unwrap(), x, "left of {x:?}");
                assert_eq!(
                    parent(right(x, width).unwrap(), width).unwrap(),
                    x,
                    "right of {x:?}"
                );
            }
        }
    }

    #[test]
    fn single_leaf_tree() {
        let width = LeafCount(1).node_width();
        assert_eq!(root(width).unwrap(), NodeIndex(0));
        assert!(direct_path(NodeIndex(0), width).unwrap().is_empty());
        assert!(copath(NodeIndex(0), width).unwrap().is_empty());
        assert!(parent(NodeIndex(0), width).is_err());
    }

    #[test]
    fn out_of_range_is_rejected() {
        let width = LeafCount(4).node_width();
        assert!(parent(NodeIndex(7), width).is_err());
        assert!(direct_path(NodeIndex(9), width).is_err());
        assert!(root(NodeCount(0)).is_err());
    }

    #[test]
    fn lowest_common_ancestor() {
        assert_eq!(ancestor(LeafIndex(0), LeafIndex(0)), NodeIndex(0));
        assert_eq!(ancestor(LeafIndex(0), LeafIndex(1)), NodeIndex(1));
        assert_eq!(ancestor(LeafIndex(0), LeafIndex(2)), NodeIndex(3));
        assert_eq!(ancestor(LeafIndex(2), LeafIndex(3)), NodeIndex(5));
        assert_eq!(ancestor(LeafIndex(0), LeafIndex(4)), NodeIndex(7));
        assert_eq!(ancestor(LeafIndex(4), LeafIndex(1)), NodeIndex(7));
    }

    #[test]
    fn leaf_and_node_conversions() {
        assert_eq!(LeafIndex(3).node(), NodeIndex(6));
        assert_eq!(NodeIndex(6).leaf(), Some(LeafIndex(3)));
        assert_eq!(NodeIndex(5).leaf(), None);
        assert_eq!(NodeCount(9).leaf_count(), LeafCount(5));
    }
}
