//! Network parameters and consensus constants.

use lazy_static::lazy_static;

use crate::amount::{Amount, CENT, COIN};
use crate::block;

/// The maximum serialized size of a block, in bytes.
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

/// The maximum serialized size of a block produced by this node.
pub const MAX_BLOCK_SIZE_GEN: usize = MAX_BLOCK_SIZE / 2;

/// The per-block cap on signature operations, P2SH redemptions included.
pub const MAX_BLOCK_SIGOPS: usize = MAX_BLOCK_SIZE / 50;

/// Coinbase input scripts must be between these many bytes, inclusive.
pub const MIN_COINBASE_SCRIPT_LEN: usize = 2;
pub const MAX_COINBASE_SCRIPT_LEN: usize = 100;

/// Threshold for `lock_time`: below this value it is interpreted as a block
/// height, otherwise as a UNIX timestamp.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// The minimum fee per kilobyte for mempool admission.
pub const MIN_TX_FEE: Amount = CENT / 10;
pub const MIN_RELAY_TX_FEE: Amount = CENT / 50;

/// The largest amount a proof-of-work coinbase may mint.
pub const MAX_MINT_PROOF_OF_WORK: Amount = 100 * COIN;

/// The minimum age before an output may serve as a stake kernel, in seconds.
pub const STAKE_MIN_AGE: u32 = 60 * 60 * 24 * 30;

/// The age beyond which additional coin age stops accruing, in seconds.
pub const STAKE_MAX_AGE: u32 = 60 * 60 * 24 * 90;

/// The target spacing between proof-of-stake blocks, in seconds.
pub const STAKE_TARGET_SPACING: i64 = 600;

/// The cap on the effective proof-of-work spacing used by retargeting.
pub const TARGET_SPACING_WORK_MAX: i64 = 12 * STAKE_TARGET_SPACING;

/// The retargeting window, in seconds.
pub const TARGET_TIMESPAN: i64 = 7 * 24 * 60 * 60;

/// The stake modifier is re-derived once per this many seconds.
pub const MODIFIER_INTERVAL: u32 = 6 * 60 * 60;

/// Ratio of section weights in the stake modifier selection schedule.
pub const MODIFIER_INTERVAL_RATIO: i64 = 3;

/// Seconds in one day, the unit of coin-day weight.
pub const ONE_DAY: i64 = 24 * 60 * 60;

/// Timestamp drift allowed on block headers relative to adjusted time.
pub fn past_drift(time: i64) -> i64 {
    time - 2 * 60 * 60
}

pub fn future_drift(time: i64) -> i64 {
    time + 2 * 60 * 60
}

lazy_static! {
    /// The hash of the main network genesis block.
    pub static ref GENESIS_BLOCK_HASH: block::Hash =
        "00000a060336cbb72fe969666d337b87198b1add2abaa59cca226820b32933a4"
            .parse()
            .expect("hard-coded hash parses");

    /// The hash of the test network genesis block.
    pub static ref GENESIS_BLOCK_HASH_TESTNET: block::Hash =
        "0000c763e402f2436da9ed36c7286f62c3f6e5dbafce9ff289bd43d7459327eb"
            .parse()
            .expect("hard-coded hash parses");
}

/// An enum describing the possible network choices.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Network {
    /// The production network.
    Mainnet,
    /// The test network.
    Testnet,
}

impl Default for Network {
    fn default() -> Self {
        Network::Mainnet
    }
}

impl Network {
    /// The hash of this network's genesis block.
    pub fn genesis_hash(self) -> block::Hash {
        match self {
            Network::Mainnet => *GENESIS_BLOCK_HASH,
            Network::Testnet => *GENESIS_BLOCK_HASH_TESTNET,
        }
    }

    /// The number of blocks a coinbase or coinstake output must wait before
    /// it may be spent.
    ///
    /// The test network uses a short maturity window so that chains of
    /// spendable generation outputs can be built quickly.
    pub fn coinbase_maturity(self) -> u32 {
        match self {
            Network::Mainnet => 500,
            Network::Testnet => 6,
        }
    }

    /// The exponent of the upper bound on expanded difficulty targets:
    /// targets are below `2^256 >> shift`.
    ///
    /// The test network limit is intentionally trivial, so tests can mine
    /// proof-of-work blocks in a handful of hash attempts.
    pub fn target_limit_shift(self) -> usize {
        match self {
            Network::Mainnet => 20,
            Network::Testnet => 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_hash_round_trips_through_display() {
        assert_eq!(
            GENESIS_BLOCK_HASH.to_string(),
            "00000a060336cbb72fe969666d337b87198b1add2abaa59cca226820b32933a4"
        );
    }

    #[test]
    fn sigop_limit_follows_block_size() {
        assert_eq!(MAX_BLOCK_SIGOPS, 20_000);
    }
}
