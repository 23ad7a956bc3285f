//! Kernel-hash search workers.
//!
//! A staking wallet holds the first 24 bytes of the kernel preimage fixed
//! (modifier, prevout block time, offset, prevout tx time, prevout index)
//! and scans the transaction timestamp. Each worker saves a SHA-256
//! midstate over those fixed bytes and, per candidate timestamp, finishes
//! the first hashing round with the 4 timestamp bytes, hashes once more,
//! and early-rejects against the top word of a precomputed upper-bound
//! target before paying for the full admission check.
//!
//! Workers are independent: each owns a disjoint timestamp interval and
//! reports its admissions over a bounded channel. Cancellation is
//! cooperative through a shared flag polled at the top of the scan loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use primitive_types::{U256, U512};
use sha2::{Digest, Sha256};
use tracing::debug;

use vireo_chain::amount::COIN;
use vireo_chain::parameters::{ONE_DAY, STAKE_MAX_AGE};
use vireo_chain::work::difficulty::{widen, CompactDifficulty};

use crate::kernel::coin_day_weight;

/// One admission found by the search: the kernel hash and the transaction
/// timestamp that produced it.
pub type Solution = (U256, u32);

/// A kernel search over one timestamp interval.
pub struct KernelWorker {
    /// The fixed 24-byte prefix of the kernel preimage.
    kernel: [u8; 24],
    bits: CompactDifficulty,
    /// Timestamp of the transaction holding the staked output.
    input_tx_time: u32,
    value_in: i64,
    /// Scanned interval: `interval_end` down to `interval_begin`,
    /// exclusive.
    interval_begin: u32,
    interval_end: u32,
    solutions: Vec<Solution>,
}

impl KernelWorker {
    pub fn new(
        kernel: [u8; 24],
        bits: CompactDifficulty,
        input_tx_time: u32,
        value_in: i64,
        interval_begin: u32,
        interval_end: u32,
    ) -> KernelWorker {
        KernelWorker {
            kernel,
            bits,
            input_tx_time,
            value_in,
            interval_begin,
            interval_end,
            solutions: Vec::new(),
        }
    }

    /// Scan the whole interval, collecting every admission.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        let target_per_coin_day = match self.bits.to_expanded() {
            Some(target) => target,
            None => return,
        };

        // The largest target any timestamp in the interval could enjoy:
        // value at maximum age. Anything above its top word cannot pass.
        let max_target: U512 = target_per_coin_day.scale(
            U256::from(self.value_in as u64) * U256::from(STAKE_MAX_AGE as u64)
                / U256::from(COIN as u64)
                / U256::from(ONE_DAY as u64),
        );
        let max_target_word = if max_target > widen(U256::max_value()) {
            u32::max_value()
        } else {
            ((max_target >> 224).low_u64()) as u32
        };

        // Midstate over the fixed 24-byte prefix.
        let mut midstate = Sha256::new();
        midstate.update(&self.kernel[..]);

        let mut tx_time = self.interval_end;
        while tx_time > self.interval_begin {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            // Finish the first round with the timestamp bytes, then the
            // second round over the 32-byte intermediate.
            let mut first_round = midstate.clone();
            first_round.update(&tx_time.to_le_bytes());
            let intermediate = first_round.finalize();
            let hash = Sha256::digest(intermediate.as_slice());
            let proof = U256::from_little_endian(&hash);

            // Cheap filter on the most significant word.
            if ((proof >> 224).low_u64()) as u32 > max_target_word {
                tx_time -= 1;
                continue;
            }

            let weight = coin_day_weight(self.value_in, self.input_tx_time, tx_time);
            let target = target_per_coin_day.scale(weight);
            if widen(proof) <= target {
                self.solutions.push((proof, tx_time));
            }
            tx_time -= 1;
        }
    }

    pub fn solutions(&self) -> &[Solution] {
        &self.solutions
    }

    pub fn into_solutions(self) -> Vec<Solution> {
        self.solutions
    }
}

/// Scan `interval` backward for the first admission, single-threaded.
pub fn scan_kernel_backward(
    kernel: [u8; 24],
    bits: CompactDifficulty,
    input_tx_time: u32,
    value_in: i64,
    interval: (u32, u32),
    shutdown: &AtomicBool,
) -> Option<Solution> {
    let (end, begin) = interval;
    let mut worker = KernelWorker::new(kernel, bits, input_tx_time, value_in, begin, end);
    worker.run(shutdown);
    worker.into_solutions().into_iter().next()
}

/// Search `[begin, end)` with one worker per CPU, each owning a disjoint
/// slice. Returns every admission found, unordered.
pub fn search_interval(
    kernel: [u8; 24],
    bits: CompactDifficulty,
    input_tx_time: u32,
    value_in: i64,
    begin: u32,
    end: u32,
    shutdown: &AtomicBool,
) -> Vec<Solution> {
    if end <= begin {
        return Vec::new();
    }
    let workers = num_cpus::get().max(1) as u32;
    let span = end - begin;
    let slice = (span + workers - 1) / workers;
    let (sender, receiver) = mpsc::sync_channel(workers as usize);

    let mut found = Vec::new();
    thread::scope(|scope| {
        for worker_index in 0..workers {
            let slice_begin = begin + worker_index * slice;
            let slice_end = std::cmp::min(slice_begin + slice, end);
            if slice_begin >= slice_end {
                break;
            }
            let sender = sender.clone();
            let shutdown = &*shutdown;
            scope.spawn(move || {
                let mut worker = KernelWorker::new(
                    kernel,
                    bits,
                    input_tx_time,
                    value_in,
                    slice_begin,
                    slice_end,
                );
                worker.run(shutdown);
                // A full receiver only blocks until the collector drains.
                let _ = sender.send(worker.into_solutions());
            });
        }
        drop(sender);
        while let Ok(mut solutions) = receiver.recv() {
            found.append(&mut solutions);
        }
    });
    debug!(admissions = found.len(), "kernel search finished");
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{check_stake_kernel_hash, kernel_preimage};
    use vireo_chain::parameters::{STAKE_MAX_AGE, STAKE_MIN_AGE};
    use vireo_chain::transparent::OutPoint;
    use vireo_chain::work::difficulty::ExpandedDifficulty;

    /// The end-to-end admission scenario: a 1000-coin output aged sixty
    /// days searched over a one-hour window must yield at least one
    /// admission, and every admission must satisfy the scaled-target bound.
    ///
    /// The target is chosen so the fixed hash outcomes over the window
    /// contain admissions with overwhelming margin; at higher difficulties
    /// an hour of timestamps is expected to admit less than once.
    #[test]
    fn one_hour_search_finds_admissions() {
        vireo_test::init();
        let bits = CompactDifficulty(0x1f00ffff);
        let value_in = 1000 * COIN;
        let modifier = 0x0123_4567_89ab_cdefu64;
        let prev_block_time = 1_000_000u32;
        let prev_tx_time = 1_000_000u32;
        let prevout_index = 0u32;

        // Search a one-hour window sixty days after the prevout.
        let end = prev_tx_time + 60 * 24 * 60 * 60;
        let begin = end - 3600;

        let preimage = kernel_preimage(modifier, prev_block_time, 97, prev_tx_time, prevout_index, 0);
        let mut kernel = [0u8; 24];
        kernel.copy_from_slice(&preimage[..24]);

        let shutdown = AtomicBool::new(false);
        let solutions =
            search_interval(kernel, bits, prev_tx_time, value_in, begin, end, &shutdown);
        assert!(
            !solutions.is_empty(),
            "a one-hour window at baseline difficulty must admit"
        );

        let target_per_coin_day = bits.to_expanded().unwrap();
        for (proof, tx_time) in &solutions {
            assert!(*tx_time > begin && *tx_time <= end);
            let weight = coin_day_weight(value_in, prev_tx_time, *tx_time);
            assert!(widen(*proof) <= target_per_coin_day.scale(weight));

            // The full checker agrees with the worker.
            let checked = check_stake_kernel_hash(
                bits,
                prev_block_time,
                97,
                prev_tx_time,
                value_in,
                &OutPoint {
                    hash: vireo_chain::transaction::Hash([0; 32]),
                    index: prevout_index,
                },
                *tx_time,
                modifier,
            );
            let (checked_proof, _) = checked.expect("worker admissions re-verify");
            assert_eq!(checked_proof, *proof);
        }
    }

    #[test]
    fn shutdown_stops_the_scan() {
        let shutdown = AtomicBool::new(true);
        let solutions = search_interval(
            [0u8; 24],
            CompactDifficulty(0x1d00ffff),
            1_000_000,
            1000 * COIN,
            1_000_000 + STAKE_MIN_AGE,
            1_000_000 + STAKE_MIN_AGE + 100_000,
            &shutdown,
        );
        assert!(solutions.is_empty());
    }

    #[test]
    fn workers_cover_the_whole_interval() {
        // A maximal stake at maximal age pushes the scaled target past
        // 2^256, so every timestamp is an admission and the union of worker
        // slices must be the exact interval.
        let limit =
            ExpandedDifficulty::target_difficulty_limit(vireo_chain::parameters::Network::Testnet)
                .to_compact();
        let prev_tx_time = 1_000_000u32;
        let begin = prev_tx_time + STAKE_MIN_AGE + STAKE_MAX_AGE;
        let end = begin + 500;

        let shutdown = AtomicBool::new(false);
        let mut solutions = search_interval(
            [7u8; 24],
            limit,
            prev_tx_time,
            vireo_chain::amount::MAX_MONEY,
            begin,
            end,
            &shutdown,
        );
        solutions.sort_by_key(|(_, time)| *time);
        let times: Vec<u32> = solutions.iter().map(|(_, time)| *time).collect();
        let expected: Vec<u32> = (begin + 1..=end).collect();
        assert_eq!(times, expected);
    }
}
