//! Hardened block checkpoints.
//!
//! A good checkpoint block is surrounded by blocks with reasonable
//! timestamps and contains no strange transactions. The tables are distinct
//! per network; the test network has none.

use std::collections::HashMap;

use lazy_static::lazy_static;

use vireo_chain::block;
use vireo_chain::parameters::Network;

lazy_static! {
    static ref MAINNET_CHECKPOINTS: HashMap<u32, block::Hash> = [
        (5001u32, "2fac9021be0c311e7b6dc0933a72047c70f817e2eb1e01bede011193ad1b28bc"),
        (10000, "0000000000827e4dc601f7310a91c45af8df0dfc1b6fa1dfa5b896cb00c8767c"),
        (38425, "62bf2e9701226d2f88d9fa99d650bd81f3faf2e56f305b7d71ccd1e7aa9c3075"),
        (254348, "9bf8d9bd757d3ef23d5906d70567e5f0da93f1e0376588c8d421a95e2421838b"),
        (319002, "0011494d03b2cdf1ecfc8b0818f1e0ef7ee1d9e9b3d1279c10d35456bc3899ef"),
        (872456, "e4fd321ced1de06213d2e246b150b4bfd8c4aa0989965dce88f2a58668c64860"),
    ]
    .iter()
    .map(|(height, hash)| (*height, hash.parse().expect("hard-coded hash parses")))
    .collect();
}

/// Check `hash` against the hardened checkpoint at `height`, if one exists.
pub fn check_hardened(network: Network, height: u32, hash: &block::Hash) -> bool {
    let checkpoints: &HashMap<u32, block::Hash> = match network {
        Network::Mainnet => &MAINNET_CHECKPOINTS,
        // The test network has no checkpoints.
        Network::Testnet => return true,
    };
    match checkpoints.get(&height) {
        Some(expected) => expected == hash,
        None => true,
    }
}

/// The height of the highest compiled checkpoint, used as a progress
/// estimate during initial download.
pub fn total_blocks_estimate(network: Network) -> u32 {
    match network {
        Network::Mainnet => MAINNET_CHECKPOINTS.keys().max().copied().unwrap_or(0),
        Network::Testnet => 0,
    }
}
