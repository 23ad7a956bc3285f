//! Difficulty retargeting.
//!
//! Proof-of-work and proof-of-stake difficulties retarget independently:
//! the next target is derived from the previous block *of the same type*
//! and the spacing between it and its own same-type predecessor, smoothed
//! over the retarget window and clamped to the network limit.

use primitive_types::U256;

use vireo_chain::parameters::{
    Network, STAKE_TARGET_SPACING, TARGET_SPACING_WORK_MAX, TARGET_TIMESPAN,
};
use vireo_chain::work::difficulty::{CompactDifficulty, ExpandedDifficulty};

use crate::block_index::ChainIndex;

/// The target required for the block following `last`, of the given proof
/// type.
pub fn next_target_required(
    chain: &ChainIndex,
    last: Option<usize>,
    proof_of_stake: bool,
    network: Network,
) -> CompactDifficulty {
    let limit = ExpandedDifficulty::target_difficulty_limit(network);

    let last = match last {
        Some(index) => index,
        // Genesis.
        None => return limit.to_compact(),
    };
    let prev = match chain.last_of_type(last, proof_of_stake) {
        Some(index) => index,
        // First block of this type.
        None => return limit.to_compact(),
    };
    let prev_prev = match chain
        .node(prev)
        .prev
        .and_then(|p| chain.last_of_type(p, proof_of_stake))
    {
        Some(index) => index,
        // Second block of this type.
        None => return limit.to_compact(),
    };

    let mut actual_spacing = chain.node(prev).time() - chain.node(prev_prev).time();
    let target_spacing = if proof_of_stake {
        STAKE_TARGET_SPACING
    } else {
        // Proof-of-work spacing stretches with the distance to the last
        // work block, capped.
        let gap = chain.node(last).height - chain.node(prev).height;
        std::cmp::min(
            TARGET_SPACING_WORK_MAX,
            STAKE_TARGET_SPACING * (1 + gap as i64),
        )
    };
    if actual_spacing < 0 {
        actual_spacing = target_spacing;
    }

    // Exponentially weighted retarget over the window.
    let prev_target = match chain.node(prev).header.bits.to_expanded() {
        Some(target) => target.to_u256(),
        None => return limit.to_compact(),
    };
    let interval = TARGET_TIMESPAN / target_spacing;
    let numerator = (interval - 1) * target_spacing + 2 * actual_spacing;
    let denominator = (interval + 1) * target_spacing;
    if numerator <= 0 || denominator <= 0 {
        return limit.to_compact();
    }

    // prev_target * numerator may exceed 256 bits; go through 512.
    let widened = prev_target.full_mul(U256::from(numerator as u64));
    let next = widened / primitive_types::U512::from(denominator as u64);
    let next = if next > vireo_chain::work::difficulty::widen(limit.to_u256()) {
        limit.to_u256()
    } else {
        // The quotient fits in 256 bits whenever it is at most the limit.
        let mut bytes = [0u8; 64];
        next.to_big_endian(&mut bytes);
        U256::from_big_endian(&bytes[32..])
    };

    ExpandedDifficulty::from_u256(next).to_compact()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_index::{BlockIndex, BlockStatus};
    use vireo_chain::block::{self, merkle, Header};
    use vireo_chain::transparent::OutPoint;

    fn node(
        hash_byte: u8,
        prev: Option<usize>,
        height: u32,
        time: u32,
        bits: CompactDifficulty,
        proof_of_stake: bool,
    ) -> BlockIndex {
        let mut node = BlockIndex {
            hash: block::Hash([hash_byte; 32]),
            prev,
            next: None,
            height,
            file: 0,
            data_pos: 0,
            undo_pos: 0,
            chain_trust: U256::zero(),
            tx_count: 1,
            status: BlockStatus::default(),
            mint: 0,
            money_supply: 0,
            flags: 0,
            stake_modifier: 0,
            stake_modifier_checksum: 0,
            prevout_stake: OutPoint::null(),
            stake_time: 0,
            proof_hash: U256::zero(),
            header: Header {
                version: 6,
                previous_block_hash: block::Hash::zero(),
                merkle_root: merkle::Root([0; 32]),
                time,
                bits,
                nonce: 0,
            },
            sequence: 0,
        };
        if proof_of_stake {
            node.set_proof_of_stake();
        }
        node
    }

    #[test]
    fn genesis_gets_the_limit() {
        let chain = ChainIndex::default();
        let limit = ExpandedDifficulty::target_difficulty_limit(Network::Testnet).to_compact();
        assert_eq!(
            next_target_required(&chain, None, false, Network::Testnet),
            limit
        );
    }

    #[test]
    fn on_target_spacing_keeps_the_target() {
        let mut chain = ChainIndex::default();
        let limit = ExpandedDifficulty::target_difficulty_limit(Network::Testnet).to_compact();
        let spacing = STAKE_TARGET_SPACING as u32;
        let a = chain.insert(node(1, None, 0, 1000, limit, false));
        let b = chain.insert(node(2, Some(a), 1, 1000 + spacing, limit, false));
        let c = chain.insert(node(3, Some(b), 2, 1000 + 2 * spacing, limit, false));

        // Exactly on schedule: numerator == denominator, target unchanged.
        assert_eq!(
            next_target_required(&chain, Some(c), false, Network::Testnet),
            limit
        );
    }

    #[test]
    fn slow_blocks_cannot_exceed_the_limit() {
        let mut chain = ChainIndex::default();
        let limit = ExpandedDifficulty::target_difficulty_limit(Network::Testnet).to_compact();
        let a = chain.insert(node(1, None, 0, 1000, limit, false));
        // A fortnight between blocks: the retarget wants an easier target,
        // but the limit clamps it.
        let b = chain.insert(node(2, Some(a), 1, 1000 + 14 * 24 * 3600, limit, false));
        let c = chain.insert(node(3, Some(b), 2, 1000 + 28 * 24 * 3600, limit, false));
        assert_eq!(
            next_target_required(&chain, Some(c), false, Network::Testnet),
            limit
        );
    }

    #[test]
    fn types_retarget_independently() {
        let mut chain = ChainIndex::default();
        let limit = ExpandedDifficulty::target_difficulty_limit(Network::Testnet).to_compact();
        let hard = CompactDifficulty(0x1d00ffff);
        let spacing = STAKE_TARGET_SPACING as u32;

        let a = chain.insert(node(1, None, 0, 1000, limit, false));
        let b = chain.insert(node(2, Some(a), 1, 1000 + spacing, hard, true));
        let c = chain.insert(node(3, Some(b), 2, 1000 + 2 * spacing, hard, true));
        let d = chain.insert(node(4, Some(c), 3, 1000 + 3 * spacing, limit, false));

        // The stake target comes from the stake pair, untouched by the
        // work blocks around them.
        assert_eq!(
            next_target_required(&chain, Some(d), true, Network::Testnet),
            hard
        );
    }

    #[test]
    fn fast_blocks_tighten_the_target() {
        let mut chain = ChainIndex::default();
        let start = CompactDifficulty(0x1d00ffff);
        let a = chain.insert(node(1, None, 0, 1000, start, false));
        // Ten seconds apart instead of six hundred.
        let b = chain.insert(node(2, Some(a), 1, 1010, start, false));
        let c = chain.insert(node(3, Some(b), 2, 1020, start, false));

        let next = next_target_required(&chain, Some(c), false, Network::Mainnet);
        let next_target = next.to_expanded().unwrap().to_u256();
        let start_target = start.to_expanded().unwrap().to_u256();
        assert!(next_target < start_target);
    }
}
