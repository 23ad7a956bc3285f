//! Blocks and block-related structures (headers, hashes, Merkle trees).
#![allow(clippy::unit_arg)]

mod hash;
mod header;

pub mod merkle;

use std::{fmt, io::Read, sync::Arc};

use crate::compactint::CompactInt;
use crate::fmt::DisplayToDebug;
use crate::parameters::MAX_BLOCK_SIZE;
use crate::transaction::Transaction;
use crate::transparent::OutPoint;
use crate::{ChainDeserialize, ChainSerialize, SerializationError};
use vireo_serde_derive::ChainSerialize;

pub use hash::Hash;
pub use header::Header;

/// A block: a header, the transactions it commits to, and (for
/// proof-of-stake blocks) a signature by the coinstake generator key.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, ChainSerialize)]
pub struct Block {
    /// The block header, containing block metadata.
    pub header: Header,
    /// The block transactions.
    pub transactions: Vec<Arc<Transaction>>,
    /// The generator signature over the block hash; empty for most
    /// proof-of-work blocks.
    pub signature: Vec<u8>,
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("hash", &DisplayToDebug(self.hash()))
            .finish()
    }
}

impl Block {
    /// Compute the hash of this block.
    pub fn hash(&self) -> Hash {
        Hash::from(&self.header)
    }

    /// A block is proof-of-stake when its second transaction is a coinstake.
    pub fn is_proof_of_stake(&self) -> bool {
        self.transactions.len() > 1 && self.transactions[1].is_coinstake()
    }

    pub fn is_proof_of_work(&self) -> bool {
        !self.is_proof_of_stake()
    }

    /// The staked prevout and stake time of a proof-of-stake block, used for
    /// duplicate-stake detection.
    pub fn proof_of_stake(&self) -> Option<(OutPoint, u32)> {
        if self.is_proof_of_stake() {
            Some((
                self.transactions[1].inputs[0].prevout,
                self.transactions[1].time,
            ))
        } else {
            None
        }
    }

    /// The latest transaction timestamp in the block.
    pub fn max_transaction_time(&self) -> u32 {
        self.transactions
            .iter()
            .map(|tx| tx.time)
            .max()
            .unwrap_or(0)
    }

    /// The entropy bit this block contributes to the stake modifier.
    pub fn stake_entropy_bit(&self) -> u8 {
        // The low bit of the block hash, taken over the hash as a
        // little-endian number.
        self.hash().0[0] & 1
    }

    /// Compute this block's transaction Merkle root.
    pub fn merkle_root(&self) -> merkle::Root {
        self.transactions.iter().map(|tx| tx.hash()).collect()
    }
}

impl ChainDeserialize for Block {
    fn chain_deserialize<R: Read>(src: R) -> Result<Self, SerializationError> {
        let mut src = src.take(MAX_BLOCK_SIZE as u64);
        let header = Header::chain_deserialize(&mut src)?;

        let tx_count = CompactInt::chain_deserialize(&mut src)?.value();
        // Sanity check the claimed count before allocating: every
        // transaction needs at least one input.
        if tx_count > (MAX_BLOCK_SIZE as u64) / (36 * 4) {
            return Err(SerializationError::Parse(
                "block claims more transactions than could fit",
            ));
        }
        let mut transactions = Vec::with_capacity(tx_count as usize);
        for _ in 0..tx_count {
            transactions.push(<Arc<Transaction>>::chain_deserialize(&mut src)?);
        }
        let signature = <Vec<u8>>::chain_deserialize(&mut src)?;
        Ok(Block {
            header,
            transactions,
            signature,
        })
    }
}

impl<'a> From<&'a Block> for Hash {
    fn from(block: &'a Block) -> Hash {
        (&block.header).into()
    }
}

#[cfg(test)]
mod tests;
