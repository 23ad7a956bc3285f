use crate::work::difficulty::CompactDifficulty;
use crate::{ChainDeserialize, ChainSerialize, SerializationError};
use vireo_serde_derive::{ChainDeserialize, ChainSerialize};

use super::merkle;

/// A block header, containing metadata about a block.
///
/// Blocks are chained by the backwards reference (previous header hash)
/// present here: each block points to its parent, all the way back to the
/// genesis block. The header hash is a memory-hard scrypt digest of the
/// 80-byte serialization, computed in [`super::Hash`].
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ChainSerialize, ChainDeserialize,
)]
pub struct Header {
    /// The block's version field.
    pub version: i32,

    /// The hash of the previous block.
    pub previous_block_hash: super::Hash,

    /// The root of the transaction Merkle tree, binding the header to the
    /// transactions in the block.
    pub merkle_root: merkle::Root,

    /// Unix epoch seconds at which the block claims to have been generated.
    pub time: u32,

    /// The difficulty target this block's hash (for proof-of-work) or
    /// coinstake kernel hash (for proof-of-stake) must satisfy, in compact
    /// form.
    pub bits: CompactDifficulty,

    /// Freely chosen by proof-of-work miners to vary the header hash.
    pub nonce: u32,
}

impl Header {
    pub const CURRENT_VERSION: i32 = 6;

    /// Length of a serialized header in bytes.
    pub const fn len() -> usize {
        80
    }
}
