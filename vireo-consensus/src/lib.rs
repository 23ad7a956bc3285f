//! The Vireo consensus engine: the block and transaction validation
//! pipeline, the block-index tree with undo-log reorganization, and the
//! proof-of-stake kernel.
//!
//! The entry point is [`chain::ChainState`]: blocks flow in through
//! [`chain::ChainState::process_block`], which runs the monotonic
//! validation stages, commits coin mutations through the
//! [`vireo_state::CoinsView`] stack, and reorganizes when a side branch
//! overtakes the active tip.

pub mod block_index;
pub mod chain;
pub mod checkpoints;
pub mod checks;
pub mod difficulty;
pub mod error;
pub mod kernel;
pub mod kernel_worker;
pub mod rewards;
pub mod time;

pub use chain::{ChainState, ProcessOutcome};
pub use error::ConsensusError;
pub use time::{NetworkClock, SystemClock};

#[cfg(test)]
mod tests;
