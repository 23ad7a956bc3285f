//! The in-memory block tree.
//!
//! The parent graph is a DAG rooted at genesis whose nodes never die during
//! the process lifetime, so it is stored as an arena: a vector of nodes
//! owned centrally, with parent/successor pointers as indices and a
//! hash-to-index map for lookup.

use primitive_types::U256;

use vireo_chain::amount::Amount;
use vireo_chain::block::{self, Header};
use vireo_chain::transparent::OutPoint;
use vireo_state::disk::{
    DiskBlockIndex, BLOCK_FAILED_CHILD, BLOCK_FAILED_MASK, BLOCK_FAILED_VALID, BLOCK_HAVE_DATA,
    BLOCK_HAVE_UNDO, BLOCK_VALID_MASK, FLAG_PROOF_OF_STAKE, FLAG_STAKE_ENTROPY,
    FLAG_STAKE_MODIFIER,
};

use std::collections::HashMap;

/// The monotonic validation stages a block passes through.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum ValidityStage {
    /// Not yet validated at all.
    Unknown = 0,
    /// Parsed, version recognized, claimed proof satisfied, timestamp sane.
    Header = 1,
    /// Parent found, difficulty matches, timestamp beats the median,
    /// checkpoints hold.
    Tree = 2,
    /// Coinbase first and alone, merkle root matches, no duplicate txids,
    /// size and sigop limits hold.
    Transactions = 3,
    /// Inputs resolve without overspends, double spends, or immature
    /// generation spends.
    Chain = 4,
    /// Scripts and signatures verified.
    Scripts = 5,
}

/// Validation status: the reached stage in the low bits, plus data and
/// failure flags.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockStatus(pub u32);

impl BlockStatus {
    pub fn stage(self) -> ValidityStage {
        match self.0 & BLOCK_VALID_MASK {
            0 => ValidityStage::Unknown,
            1 => ValidityStage::Header,
            2 => ValidityStage::Tree,
            3 => ValidityStage::Transactions,
            4 => ValidityStage::Chain,
            _ => ValidityStage::Scripts,
        }
    }

    /// Raise the validation stage. Stages only move forward.
    pub fn raise(&mut self, stage: ValidityStage) {
        if (stage as u32) > self.0 & BLOCK_VALID_MASK {
            self.0 = (self.0 & !BLOCK_VALID_MASK) | stage as u32;
        }
    }

    /// Whether the block reached `stage` and is not failed.
    pub fn is_valid(self, stage: ValidityStage) -> bool {
        self.0 & BLOCK_FAILED_MASK == 0 && self.stage() >= stage
    }

    pub fn has_data(self) -> bool {
        self.0 & BLOCK_HAVE_DATA != 0
    }

    pub fn has_undo(self) -> bool {
        self.0 & BLOCK_HAVE_UNDO != 0
    }

    pub fn set_have_data(&mut self) {
        self.0 |= BLOCK_HAVE_DATA;
    }

    pub fn set_have_undo(&mut self) {
        self.0 |= BLOCK_HAVE_UNDO;
    }

    pub fn is_failed(self) -> bool {
        self.0 & BLOCK_FAILED_MASK != 0
    }

    /// Mark this block itself invalid.
    pub fn set_failed(&mut self) {
        self.0 |= BLOCK_FAILED_VALID;
    }

    /// Mark this block a descendant of an invalid block.
    pub fn set_failed_child(&mut self) {
        self.0 |= BLOCK_FAILED_CHILD;
    }
}

/// One node of the block tree.
#[derive(Clone, Debug)]
pub struct BlockIndex {
    /// This block's hash.
    pub hash: block::Hash,
    /// Arena index of the parent; `None` only for genesis.
    pub prev: Option<usize>,
    /// Arena index of the successor on the *active* chain, if this block is
    /// on it.
    pub next: Option<usize>,
    /// Height in the chain; genesis is 0.
    pub height: u32,
    /// Which numbered file stores this block's data.
    pub file: u32,
    /// Payload offset of the block within its file.
    pub data_pos: u32,
    /// Payload offset of the undo record within the rev file.
    pub undo_pos: u32,
    /// Trust of the chain up to and including this block.
    pub chain_trust: U256,
    /// Number of transactions in the block.
    pub tx_count: u32,
    /// Validation status.
    pub status: BlockStatus,
    /// Coins minted by this block.
    pub mint: Amount,
    /// Total coins created up to and including this block.
    pub money_supply: Amount,
    /// Proof-of-stake / entropy / modifier flags.
    pub flags: u32,
    /// The stake modifier active at this block.
    pub stake_modifier: u64,
    /// Hardened checksum over the modifier chain; memory only.
    pub stake_modifier_checksum: u32,
    /// Prevout of the coinstake, for proof-of-stake blocks.
    pub prevout_stake: OutPoint,
    /// Timestamp of the coinstake transaction.
    pub stake_time: u32,
    /// The coinstake kernel hash, as a 256-bit number.
    pub proof_hash: U256,
    /// The block header (parent hash included, for reconstruction).
    pub header: Header,
    /// Process-local arrival order; earlier blocks win trust ties.
    pub sequence: u64,
}

impl BlockIndex {
    pub fn time(&self) -> i64 {
        self.header.time as i64
    }

    pub fn is_proof_of_stake(&self) -> bool {
        self.flags & FLAG_PROOF_OF_STAKE != 0
    }

    pub fn is_proof_of_work(&self) -> bool {
        !self.is_proof_of_stake()
    }

    pub fn set_proof_of_stake(&mut self) {
        self.flags |= FLAG_PROOF_OF_STAKE;
    }

    pub fn stake_entropy_bit(&self) -> u64 {
        ((self.flags & FLAG_STAKE_ENTROPY) >> 1) as u64
    }

    pub fn set_stake_entropy_bit(&mut self, bit: u8) {
        if bit != 0 {
            self.flags |= FLAG_STAKE_ENTROPY;
        }
    }

    pub fn generated_stake_modifier(&self) -> bool {
        self.flags & FLAG_STAKE_MODIFIER != 0
    }

    pub fn set_stake_modifier(&mut self, modifier: u64, generated: bool) {
        self.stake_modifier = modifier;
        if generated {
            self.flags |= FLAG_STAKE_MODIFIER;
        }
    }

    /// This block's own trust contribution.
    pub fn block_trust(&self) -> U256 {
        match self.header.bits.to_expanded() {
            Some(target) => target.block_trust(),
            None => U256::zero(),
        }
    }

    /// The proof hash fed into stake-modifier selection: the kernel hash
    /// for proof-of-stake blocks, the block hash otherwise.
    pub fn selection_proof(&self) -> U256 {
        if self.is_proof_of_stake() {
            self.proof_hash
        } else {
            U256::from_little_endian(&self.hash.0)
        }
    }

    /// Convert to the persisted record.
    pub fn to_disk(&self, hash_prev: block::Hash) -> DiskBlockIndex {
        let mut proof_hash = [0u8; 32];
        self.proof_hash.to_little_endian(&mut proof_hash);
        DiskBlockIndex {
            height: self.height,
            status: self.status.0,
            tx_count: self.tx_count,
            file: self.file,
            data_pos: self.data_pos,
            undo_pos: self.undo_pos,
            mint: self.mint,
            money_supply: self.money_supply,
            flags: self.flags,
            stake_modifier: self.stake_modifier,
            prevout_stake: self.prevout_stake,
            stake_time: self.stake_time,
            proof_hash,
            block_hash: self.hash,
            version: self.header.version,
            hash_prev,
            merkle_root: self.header.merkle_root,
            time: self.header.time,
            bits: self.header.bits,
            nonce: self.header.nonce,
        }
    }
}

/// The arena of block-index nodes with hash lookup.
#[derive(Default)]
pub struct ChainIndex {
    nodes: Vec<BlockIndex>,
    by_hash: HashMap<block::Hash, usize>,
}

impl ChainIndex {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, hash: &block::Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn lookup(&self, hash: &block::Hash) -> Option<usize> {
        self.by_hash.get(hash).copied()
    }

    pub fn node(&self, index: usize) -> &BlockIndex {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: usize) -> &mut BlockIndex {
        &mut self.nodes[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &BlockIndex)> {
        self.nodes.iter().enumerate()
    }

    /// Insert a node, returning its arena index.
    pub fn insert(&mut self, node: BlockIndex) -> usize {
        let index = self.nodes.len();
        self.by_hash.insert(node.hash, index);
        self.nodes.push(index_with_sequence(node, index as u64));
        index
    }

    /// Walk from `index` back towards genesis, inclusive.
    pub fn ancestors<'a>(&'a self, index: usize) -> impl Iterator<Item = usize> + 'a {
        let mut current = Some(index);
        std::iter::from_fn(move || {
            let this = current?;
            current = self.nodes[this].prev;
            Some(this)
        })
    }

    /// The median of the previous eleven block timestamps, starting at
    /// `index` and walking back.
    pub fn median_time_past(&self, index: usize) -> i64 {
        const MEDIAN_TIME_SPAN: usize = 11;
        let mut times: Vec<i64> = self
            .ancestors(index)
            .take(MEDIAN_TIME_SPAN)
            .map(|i| self.nodes[i].time())
            .collect();
        times.sort_unstable();
        times[times.len() / 2]
    }

    /// The most recent block of the requested proof type at or before
    /// `index`.
    pub fn last_of_type(&self, index: usize, proof_of_stake: bool) -> Option<usize> {
        self.ancestors(index)
            .find(|&i| self.nodes[i].is_proof_of_stake() == proof_of_stake)
    }

    /// The expanded target limit corresponding to a node's own trust.
    pub fn chain_trust_of(&self, index: usize) -> U256 {
        self.nodes[index].chain_trust
    }
}

fn index_with_sequence(mut node: BlockIndex, sequence: u64) -> BlockIndex {
    node.sequence = sequence;
    node
}
