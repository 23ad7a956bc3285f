//! The transaction Merkle tree.
//!
//! Levels are built bottom-up: adjacent hashes are paired, concatenated and
//! double-SHA-256 hashed; a level of odd length duplicates its last element.
//! The materialized tree keeps every level in one flat vector, so branches
//! can be enumerated for any leaf.

use std::{fmt, io, iter::FromIterator};

use crate::serialization::{sha256d, ChainDeserialize, ChainSerialize, SerializationError};
use crate::transaction;
use vireo_serde_derive::ChainSerialize;

/// The root of the transaction Merkle tree, as committed to in the block
/// header.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, ChainSerialize)]
pub struct Root(pub [u8; 32]);

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed_bytes = self.0;
        reversed_bytes.reverse();
        f.debug_tuple("merkle::Root")
            .field(&hex::encode(&reversed_bytes))
            .finish()
    }
}

impl ChainDeserialize for Root {
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Root(<[u8; 32]>::chain_deserialize(&mut reader)?))
    }
}

impl FromIterator<transaction::Hash> for Root {
    fn from_iter<I: IntoIterator<Item = transaction::Hash>>(hashes: I) -> Self {
        Tree::build(hashes.into_iter().collect()).root()
    }
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut concat = [0u8; 64];
    concat[..32].copy_from_slice(left);
    concat[32..].copy_from_slice(right);
    sha256d::hash256(&concat)
}

/// A materialized Merkle tree: all levels in one vector, leaves first.
pub struct Tree {
    nodes: Vec<[u8; 32]>,
    leaves: usize,
}

impl Tree {
    /// Build the tree over an ordered list of transaction hashes.
    pub fn build(hashes: Vec<transaction::Hash>) -> Tree {
        let leaves = hashes.len();
        let mut nodes: Vec<[u8; 32]> = hashes.into_iter().map(|h| h.0).collect();
        let mut j = 0;
        let mut size = leaves;
        while size > 1 {
            let mut i = 0;
            while i < size {
                let i2 = std::cmp::min(i + 1, size - 1);
                let parent = hash_pair(&nodes[j + i], &nodes[j + i2]);
                nodes.push(parent);
                i += 2;
            }
            j += size;
            size = (size + 1) / 2;
        }
        Tree { nodes, leaves }
    }

    /// The tree root, or the all-zero root for an empty tree.
    pub fn root(&self) -> Root {
        match self.nodes.last() {
            Some(node) => Root(*node),
            None => Root([0; 32]),
        }
    }

    /// The sibling path linking leaf `index` to the root.
    pub fn branch(&self, mut index: usize) -> Vec<[u8; 32]> {
        let mut branch = Vec::new();
        let mut j = 0;
        let mut size = self.leaves;
        while size > 1 {
            let i = std::cmp::min(index ^ 1, size - 1);
            branch.push(self.nodes[j + i]);
            index >>= 1;
            j += size;
            size = (size + 1) / 2;
        }
        branch
    }
}

/// Recompute the root committed to by `branch` for `leaf` at `index`.
///
/// The result equals the tree root iff the branch was produced for that
/// `(leaf, index)` pair in the original tree.
pub fn check_branch(leaf: transaction::Hash, branch: &[[u8; 32]], mut index: usize) -> Root {
    let mut hash = leaf.0;
    for sibling in branch {
        if index & 1 != 0 {
            hash = hash_pair(sibling, &hash);
        } else {
            hash = hash_pair(&hash, sibling);
        }
        index >>= 1;
    }
    Root(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<transaction::Hash> {
        (0..n)
            .map(|i| {
                let mut bytes = [0u8; 32];
                bytes[0] = i as u8;
                transaction::Hash(bytes)
            })
            .collect()
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let hashes = leaves(1);
        let tree = Tree::build(hashes.clone());
        assert_eq!(tree.root().0, hashes[0].0);
    }

    #[test]
    fn odd_level_duplicates_last_element() {
        // With three leaves, the second level pairs (0,1) and (2,2).
        let hashes = leaves(3);
        let ab = hash_pair(&hashes[0].0, &hashes[1].0);
        let cc = hash_pair(&hashes[2].0, &hashes[2].0);
        let expected = hash_pair(&ab, &cc);
        assert_eq!(Tree::build(hashes).root().0, expected);
    }

    #[test]
    fn branches_reconstruct_the_root() {
        for n in 1..12usize {
            let hashes = leaves(n);
            let tree = Tree::build(hashes.clone());
            let root = tree.root();
            for (index, leaf) in hashes.iter().enumerate() {
                let branch = tree.branch(index);
                assert_eq!(check_branch(*leaf, &branch, index), root);
            }
        }
    }

    #[test]
    fn branch_fails_for_wrong_index() {
        let hashes = leaves(4);
        let tree = Tree::build(hashes.clone());
        let branch = tree.branch(0);
        assert_ne!(check_branch(hashes[0], &branch, 1), tree.root());
    }
}
