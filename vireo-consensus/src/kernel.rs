//! The proof-of-stake kernel: stake modifier derivation, kernel-hash
//! admission, and the hardened modifier checksum chain.
//!
//! The stake modifier exists to stop a coin owner from precomputing future
//! proofs of stake at the time their output confirms: to satisfy the kernel
//! protocol, the output must hash together with a modifier derived from
//! blocks *after* it. The modifier is recomputed at a fixed interval rather
//! than every block, so an attacker cannot steer its bits even by
//! generating a run of blocks.

use std::collections::{HashMap, HashSet};

use primitive_types::{U256, U512};
use tracing::{debug, trace};

use vireo_chain::amount::COIN;
use vireo_chain::block;
use vireo_chain::parameters::{
    Network, MODIFIER_INTERVAL, MODIFIER_INTERVAL_RATIO, ONE_DAY, STAKE_MAX_AGE, STAKE_MIN_AGE,
};
use vireo_chain::serialization::sha256d::hash256;
use vireo_chain::transparent::OutPoint;
use vireo_chain::work::difficulty::CompactDifficulty;

use crate::block_index::ChainIndex;
use crate::error::ConsensusError;

/// Hardened checkpoints of stake-modifier checksums, keeping the modifier
/// chain deterministic across versions.
const MODIFIER_CHECKPOINTS_MAINNET: &[(u32, u32)] = &[
    (0, 0x0e00670b),
    (9690, 0x97dcdafa),
    (12661, 0x5d84115d),
    (37092, 0xd230afcc),
    (44200, 0x05370164),
    (65000, 0xc8e7be6a),
    (68600, 0x73a8cc4c),
    (92161, 0xe21a911a),
    (98661, 0xd20c44d4),
];

// The test network carries no hardened modifier history.
const MODIFIER_CHECKPOINTS_TESTNET: &[(u32, u32)] = &[];

/// Eras before this block timestamp used a laxer modifier-interval rule.
const MODIFIER_SWITCH_TIME: u32 = 1_413_763_200; // 2014-10-20 00:00:00 UTC
const MODIFIER_SWITCH_TIME_TESTNET: u32 = 1_397_520_000; // 2014-04-15 00:00:00 UTC

/// Whether `block_time` falls under the fixed modifier-interval protocol.
fn is_fixed_modifier_interval(network: Network, block_time: u32) -> bool {
    let switch = match network {
        Network::Mainnet => MODIFIER_SWITCH_TIME,
        Network::Testnet => MODIFIER_SWITCH_TIME_TESTNET,
    };
    block_time >= switch
}

/// The time weight of an interval, for coin-day computation: seconds beyond
/// the minimum stake age, saturating at the maximum.
pub fn stake_weight(interval_start: i64, interval_end: i64) -> i64 {
    std::cmp::min(
        interval_end - interval_start - STAKE_MIN_AGE as i64,
        STAKE_MAX_AGE as i64,
    )
}

/// Width of selection-interval section `section`, in seconds.
///
/// Section widths shrink towards the most recent section; their sum over
/// all 64 sections is exactly [`selection_interval`].
pub fn selection_interval_section(modifier_interval: i64, section: usize) -> i64 {
    assert!(section < 64);
    modifier_interval * 63
        / (63 + (63 - section as i64) * (MODIFIER_INTERVAL_RATIO - 1))
}

/// The span of block timestamps eligible to feed one modifier, in seconds.
pub fn selection_interval(modifier_interval: i64) -> i64 {
    (0..64)
        .map(|section| selection_interval_section(modifier_interval, section))
        .sum()
}

/// The hash ranking a candidate block for modifier selection. Proof-of-stake
/// candidates are right-shifted 32 bits so they always outrank
/// proof-of-work candidates, preserving the energy-efficiency property.
fn selection_hash(proof: U256, prev_modifier: u64, proof_of_stake: bool) -> U256 {
    let mut data = [0u8; 40];
    proof.to_little_endian(&mut data[..32]);
    data[32..].copy_from_slice(&prev_modifier.to_le_bytes());
    let hash = U256::from_little_endian(&hash256(&data));
    if proof_of_stake {
        hash >> 32
    } else {
        hash
    }
}

/// Select one block from the sorted candidates: the lowest selection hash
/// among those not yet chosen with timestamp at or before
/// `selection_stop`.
fn select_block_from_candidates(
    chain: &ChainIndex,
    sorted_by_timestamp: &[(i64, block::Hash)],
    selected: &HashMap<block::Hash, usize>,
    selection_stop: i64,
    prev_modifier: u64,
) -> Result<usize, ConsensusError> {
    let mut best: Option<(U256, usize)> = None;
    for (time, hash) in sorted_by_timestamp {
        let index = chain
            .lookup(hash)
            .ok_or(ConsensusError::ModifierUnavailable(*hash))?;
        if best.is_some() && *time > selection_stop {
            break;
        }
        if selected.contains_key(hash) {
            continue;
        }
        let node = chain.node(index);
        let hash_selection =
            selection_hash(node.selection_proof(), prev_modifier, node.is_proof_of_stake());
        match best {
            Some((best_hash, _)) if hash_selection >= best_hash => {}
            _ => best = Some((hash_selection, index)),
        }
    }
    match best {
        Some((_, index)) => Ok(index),
        None => Err(ConsensusError::BadPos("no candidate for modifier round")),
    }
}

/// Compute the stake modifier for a block being attached at `current`,
/// whose parent is `prev`.
///
/// Returns the modifier and whether it was newly generated. The modifier
/// only regenerates when the parent crosses into a new modifier interval;
/// under the fixed-interval protocol the new block itself must lie in a
/// newer interval than the last generation too.
pub fn compute_next_stake_modifier(
    chain: &ChainIndex,
    network: Network,
    current_time: u32,
    prev: Option<usize>,
) -> Result<(u64, bool), ConsensusError> {
    let prev = match prev {
        Some(prev) => prev,
        // The genesis block's modifier is zero.
        None => return Ok((0, true)),
    };

    // Find the last generated modifier and its generation time.
    let last = chain
        .ancestors(prev)
        .find(|&i| chain.node(i).generated_stake_modifier())
        .ok_or(ConsensusError::BadPos("no modifier generated at genesis"))?;
    let mut modifier = chain.node(last).stake_modifier;
    let modifier_time = chain.node(last).time();
    let interval = MODIFIER_INTERVAL as i64;

    if modifier_time / interval >= chain.node(prev).time() / interval {
        // Same interval as the previous block: keep the current modifier.
        return Ok((modifier, false));
    }
    if modifier_time / interval >= current_time as i64 / interval
        && is_fixed_modifier_interval(network, current_time)
    {
        // Fixed-interval protocol: the new block must also cross over.
        return Ok((modifier, false));
    }

    // Collect candidate blocks over a selection interval before the start
    // of the parent's modifier interval, ordered by (timestamp, hash).
    let selection_interval = selection_interval(interval);
    let selection_start =
        (chain.node(prev).time() / interval) * interval - selection_interval;
    let mut sorted_by_timestamp: Vec<(i64, block::Hash)> = chain
        .ancestors(prev)
        .take_while(|&i| chain.node(i).time() >= selection_start)
        .map(|i| (chain.node(i).time(), chain.node(i).hash))
        .collect();
    sorted_by_timestamp.reverse();
    sorted_by_timestamp.sort();

    // Pick 64 blocks; each contributes its entropy bit to the new modifier.
    let mut new_modifier: u64 = 0;
    let mut selected: HashMap<block::Hash, usize> = HashMap::new();
    let mut selection_stop = selection_start;
    let rounds = std::cmp::min(64, sorted_by_timestamp.len());
    for round in 0..rounds {
        selection_stop += selection_interval_section(interval, round);
        let index = select_block_from_candidates(
            chain,
            &sorted_by_timestamp,
            &selected,
            selection_stop,
            modifier,
        )?;
        let node = chain.node(index);
        new_modifier |= node.stake_entropy_bit() << round;
        selected.insert(node.hash, index);
        trace!(
            round,
            height = node.height,
            bit = node.stake_entropy_bit(),
            "selected modifier candidate"
        );
    }

    debug!(
        modifier = new_modifier,
        time = chain.node(prev).time(),
        "computed new stake modifier"
    );
    modifier = new_modifier;
    Ok((modifier, true))
}

/// The modifier to use when hashing a kernel whose staked output confirmed
/// in the block `from_hash`: the first modifier generated at least a
/// selection interval after that block.
///
/// `Err(ModifierUnavailable)` is transient; the chain may simply not have
/// advanced far enough yet. Once the tip is old enough that the modifier
/// must have existed, the failure hardens into a consensus error.
pub fn kernel_stake_modifier(
    chain: &ChainIndex,
    from_hash: &block::Hash,
    adjusted_time: i64,
) -> Result<u64, ConsensusError> {
    let from = chain
        .lookup(from_hash)
        .ok_or(ConsensusError::BadPos("stake prevout block not indexed"))?;
    let from_time = chain.node(from).time();
    let selection_interval = selection_interval(MODIFIER_INTERVAL as i64);

    let mut index = from;
    let mut modifier_time = from_time;
    while modifier_time < from_time + selection_interval {
        match chain.node(index).next {
            Some(next) => {
                index = next;
                if chain.node(index).generated_stake_modifier() {
                    modifier_time = chain.node(index).time();
                }
            }
            None => {
                // Reached the best block; transient while catching up,
                // suspicious once the kernel is old enough that the
                // modifier must exist.
                let stale = chain.node(index).time() + STAKE_MIN_AGE as i64
                    - selection_interval
                    > adjusted_time;
                if stale {
                    return Err(ConsensusError::BadPos(
                        "reached best block before modifier interval",
                    ));
                }
                return Err(ConsensusError::ModifierUnavailable(*from_hash));
            }
        }
    }
    Ok(chain.node(index).stake_modifier)
}

/// The serialized kernel preimage:
/// `modifier || prev-block-time || prev-tx-offset || prev-tx-time ||
/// prevout-index || tx-time`.
pub fn kernel_preimage(
    modifier: u64,
    prev_block_time: u32,
    prev_tx_offset: u32,
    prev_tx_time: u32,
    prevout_index: u32,
    tx_time: u32,
) -> [u8; 28] {
    let mut data = [0u8; 28];
    data[0..8].copy_from_slice(&modifier.to_le_bytes());
    data[8..12].copy_from_slice(&prev_block_time.to_le_bytes());
    data[12..16].copy_from_slice(&prev_tx_offset.to_le_bytes());
    data[16..20].copy_from_slice(&prev_tx_time.to_le_bytes());
    data[20..24].copy_from_slice(&prevout_index.to_le_bytes());
    data[24..28].copy_from_slice(&tx_time.to_le_bytes());
    data
}

/// The coin-day weight of `value` staked over the given interval, in
/// coin-days.
pub fn coin_day_weight(value: i64, prev_tx_time: u32, tx_time: u32) -> U256 {
    let weight = stake_weight(prev_tx_time as i64, tx_time as i64);
    let weighted = U256::from(value as u64) * U256::from(weight as u64);
    weighted / U256::from(COIN as u64) / U256::from(ONE_DAY as u64)
}

/// Verify the kernel protocol for a coinstake input:
///
/// ```text
/// hash256(modifier || prev-block-time || prev-tx-offset || prev-tx-time
///         || prevout-index || tx-time)  ≤  target · coin-day-weight
/// ```
///
/// The modifier scrambles the preimage against precomputation, the prevout
/// block time stops timestamp fishing, and the offset and prevout index
/// decorrelate stakers hashing in the same second. Block or transaction
/// hashes are deliberately absent: they can be ground out in bulk, which
/// would degrade the system back to proof of work.
///
/// Returns the kernel hash and the scaled target on success.
#[allow(clippy::too_many_arguments)]
pub fn check_stake_kernel_hash(
    bits: CompactDifficulty,
    prev_block_time: u32,
    prev_tx_offset: u32,
    prev_tx_time: u32,
    prev_output_value: i64,
    prevout: &OutPoint,
    tx_time: u32,
    modifier: u64,
) -> Result<(U256, U512), ConsensusError> {
    if tx_time < prev_tx_time {
        return Err(ConsensusError::BadPos("stake spends into the past"));
    }
    if prev_block_time + STAKE_MIN_AGE > tx_time {
        return Err(ConsensusError::BadPos("stake violates minimum age"));
    }

    let target = bits
        .to_expanded()
        .ok_or(ConsensusError::BadPos("unexpandable stake target"))?;
    let weight = coin_day_weight(prev_output_value, prev_tx_time, tx_time);
    let scaled_target = target.scale(weight);

    let preimage = kernel_preimage(
        modifier,
        prev_block_time,
        prev_tx_offset,
        prev_tx_time,
        prevout.index,
        tx_time,
    );
    let proof = U256::from_little_endian(&hash256(&preimage));

    if vireo_chain::work::difficulty::widen(proof) > scaled_target {
        return Err(ConsensusError::BadPos("kernel hash above target"));
    }
    Ok((proof, scaled_target))
}

/// The hardened checksum of the modifier chain at one block:
/// `hash256(prev-checksum || flags || proof-hash || modifier)`, truncated
/// to its most significant 32 bits.
pub fn stake_modifier_checksum(
    prev_checksum: Option<u32>,
    flags: u32,
    proof_hash: U256,
    modifier: u64,
) -> u32 {
    let mut data = Vec::with_capacity(48);
    if let Some(prev) = prev_checksum {
        data.extend_from_slice(&prev.to_le_bytes());
    }
    data.extend_from_slice(&flags.to_le_bytes());
    let mut proof_bytes = [0u8; 32];
    proof_hash.to_little_endian(&mut proof_bytes);
    data.extend_from_slice(&proof_bytes);
    data.extend_from_slice(&modifier.to_le_bytes());

    let hash = hash256(&data);
    // (hash >> 224) as the low 32 bits: the top four bytes.
    u32::from_le_bytes([hash[28], hash[29], hash[30], hash[31]])
}

/// Check a computed modifier checksum against the hardened table.
pub fn check_stake_modifier_checkpoint(network: Network, height: u32, checksum: u32) -> bool {
    let table = match network {
        Network::Mainnet => MODIFIER_CHECKPOINTS_MAINNET,
        Network::Testnet => MODIFIER_CHECKPOINTS_TESTNET,
    };
    match table.binary_search_by_key(&height, |entry| entry.0) {
        Ok(position) => table[position].1 == checksum,
        Err(_) => true,
    }
}

/// The set of (prevout, stake-time) pairs already bound to indexed blocks,
/// used to reject duplicate stakes.
pub type StakeSeen = HashSet<(OutPoint, u32)>;
