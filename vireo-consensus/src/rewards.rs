//! Coin age and generation rewards.
//!
//! Proof-of-work subsidies shrink as difficulty rises, halving for every
//! sixteenfold difficulty increase, capped at [`MAX_MINT_PROOF_OF_WORK`].
//! Proof-of-stake mints interest proportional to the coin age consumed by
//! the coinstake.

use primitive_types::U512;

use vireo_chain::amount::{Amount, CENT, COIN};
use vireo_chain::coins::Coins;
use vireo_chain::parameters::{
    Network, MAX_MINT_PROOF_OF_WORK, ONE_DAY, STAKE_MIN_AGE,
};
use vireo_chain::transaction::Transaction;
use vireo_chain::work::difficulty::{widen, CompactDifficulty, ExpandedDifficulty};

/// Annual proof-of-stake interest, in base units per coin-year.
const COIN_YEAR_REWARD: Amount = CENT; // 1% per year

/// The proof-of-work subsidy for a block at difficulty `bits`.
///
/// The subsidy halves for every sixteenfold rise in difficulty:
/// `(cap / subsidy)⁴ == target_limit / target`, binary-searched to one cent
/// of precision and capped at [`MAX_MINT_PROOF_OF_WORK`]. The continuous
/// curve avoids supply shocks at difficulty steps.
pub fn proof_of_work_reward(bits: CompactDifficulty, fees: Amount, network: Network) -> Amount {
    let target = match bits.to_expanded() {
        Some(target) => widen(target.to_u256()),
        None => return fees,
    };
    let limit = widen(ExpandedDifficulty::target_difficulty_limit(network).to_u256());

    let cap = MAX_MINT_PROOF_OF_WORK;
    let fourth = |value: Amount| {
        let value = U512::from(value as u64);
        value * value * value * value
    };
    let cap_scaled = fourth(cap) * target;
    let mut lower: Amount = CENT;
    let mut upper: Amount = cap;
    while lower + CENT <= upper {
        let mid = (lower + upper) / 2;
        if fourth(mid) * limit > cap_scaled {
            upper = mid;
        } else {
            lower = mid;
        }
    }
    let subsidy = (upper / CENT) * CENT;
    std::cmp::min(subsidy, cap) + fees
}

/// The proof-of-stake reward for consuming `coin_age` coin-days.
pub fn proof_of_stake_reward(coin_age: u64) -> Amount {
    // coin-days * (units per coin-year) / days per year.
    let subsidy = (coin_age as i64) * 33 / (365 * 33 + 8) * COIN_YEAR_REWARD;
    subsidy
}

/// The coin age consumed by one input: value-weighted seconds, in
/// cent-seconds, zero until the prevout passes the minimum stake age.
fn input_cent_seconds(prev: &Coins, prevout_index: u32, spend_time: u32) -> u128 {
    if !prev.is_available(prevout_index) {
        return 0;
    }
    if spend_time < prev.time + STAKE_MIN_AGE {
        // Only mature coins earn age.
        return 0;
    }
    let value = prev.outputs[prevout_index as usize].value as u128;
    value * (spend_time - prev.time) as u128 / CENT as u128
}

/// Total coin age consumed by `tx`, in coin-days.
///
/// `resolve` maps each input's prevout to its coin record; unresolvable
/// inputs contribute nothing (matching behavior during initial download).
pub fn transaction_coin_age<F>(tx: &Transaction, mut resolve: F) -> u64
where
    F: FnMut(&vireo_chain::transparent::OutPoint) -> Option<Coins>,
{
    if tx.is_coinbase() {
        return 0;
    }
    let mut cent_seconds: u128 = 0;
    for input in &tx.inputs {
        if let Some(prev) = resolve(&input.prevout) {
            cent_seconds += input_cent_seconds(&prev, input.prevout.index, tx.time);
        }
    }
    // cent-seconds to coin-days.
    (cent_seconds * CENT as u128 / COIN as u128 / ONE_DAY as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use vireo_chain::transparent::{Output, Script};

    #[test]
    fn work_reward_at_the_limit_is_the_cap() {
        let limit = ExpandedDifficulty::target_difficulty_limit(Network::Mainnet).to_compact();
        assert_eq!(
            proof_of_work_reward(limit, 0, Network::Mainnet),
            MAX_MINT_PROOF_OF_WORK
        );
    }

    #[test]
    fn work_reward_shrinks_with_difficulty() {
        let easy = ExpandedDifficulty::target_difficulty_limit(Network::Mainnet).to_compact();
        let hard = CompactDifficulty(0x1b00ffff);
        let easy_reward = proof_of_work_reward(easy, 0, Network::Mainnet);
        let hard_reward = proof_of_work_reward(hard, 0, Network::Mainnet);
        assert!(hard_reward < easy_reward);
        assert!(hard_reward >= 0);
    }

    #[test]
    fn fees_ride_on_top() {
        let limit = ExpandedDifficulty::target_difficulty_limit(Network::Mainnet).to_compact();
        let with_fees = proof_of_work_reward(limit, 3 * CENT, Network::Mainnet);
        assert_eq!(with_fees, MAX_MINT_PROOF_OF_WORK + 3 * CENT);
    }

    #[test]
    fn stake_reward_is_one_percent_annually() {
        // 100 coins staked for a year: 36500 coin-days, just under one coin
        // of interest.
        let reward = proof_of_stake_reward(36_500);
        assert_eq!(reward, 99 * CENT);
    }

    #[test]
    fn coin_age_requires_minimum_age() {
        let mut prev = Coins::pruned();
        prev.outputs = vec![Output::new(1000 * COIN, Script(vec![0x51]))];
        prev.time = 1_000_000;

        let young_spend = prev.time + STAKE_MIN_AGE - 1;
        assert_eq!(input_cent_seconds(&prev, 0, young_spend), 0);

        let aged_spend = prev.time + 60 * 24 * 60 * 60;
        let cent_seconds = input_cent_seconds(&prev, 0, aged_spend);
        // 1000 coins for 60 days.
        let expected =
            (1000 * COIN) as u128 * (60 * 24 * 60 * 60) as u128 / CENT as u128;
        assert_eq!(cent_seconds, expected);
    }
}
