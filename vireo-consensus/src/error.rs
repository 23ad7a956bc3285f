//! Consensus error types.

use thiserror::Error;

use vireo_chain::transparent::OutPoint;
use vireo_chain::{block, SerializationError};
use vireo_state::BoxError;

/// A consensus-rule violation or a failure encountered while validating.
///
/// The first group of variants are permanent rule violations: the offending
/// block is marked failed and the peer that relayed it is penalized by
/// [`ConsensusError::dos_score`]. The contextual variants are transient;
/// the data may become valid once a missing parent or input arrives.
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// A structurally invalid block header.
    #[error("invalid block header: {0}")]
    BadHeader(&'static str),

    /// The header hash does not satisfy the claimed proof-of-work target.
    #[error("proof of work check failed")]
    BadPow,

    /// The coinstake does not satisfy the proof-of-stake kernel protocol.
    #[error("proof of stake check failed: {0}")]
    BadPos(&'static str),

    /// A transaction violates the context-free structural rules.
    #[error("invalid transaction structure: {0}")]
    BadTxStructure(&'static str),

    /// The header's Merkle root does not commit to the block's transactions.
    #[error("merkle root mismatch")]
    BadMerkle,

    /// Two transactions in one block share a txid.
    #[error("duplicate transaction in block")]
    DuplicateTx,

    /// An input's prevout is missing or already spent.
    #[error("input {0} already spent or unavailable")]
    DoubleSpend(OutPoint),

    /// Input and output amounts violate the fee rules.
    #[error("bad fee or amount: {0}")]
    BadFee(&'static str),

    /// A generation output was spent before maturing.
    #[error("spend of immature generation output")]
    ImmatureCoin,

    /// An input script failed verification.
    #[error("script verification failed for input {0}: {1}")]
    ScriptFailure(usize, vireo_chain::script::ScriptError),

    /// The block contradicts a hardened checkpoint.
    #[error("checkpoint mismatch at height {0}")]
    CheckpointMismatch(u32),

    /// The stake modifier checksum contradicts a hardened checkpoint.
    #[error("stake modifier checkpoint mismatch at height {0} (checksum {1:#010x})")]
    ModifierCheckpointMismatch(u32, u32),

    /// The same stake prevout was already used at this stake time.
    #[error("duplicate proof of stake for {0}")]
    DuplicateStake(OutPoint),

    /// The block's parent is not in the index yet; queued as an orphan.
    #[error("missing parent block {0}")]
    MissingParent(block::Hash),

    /// The parent is marked failed; every descendant inherits the failure.
    #[error("parent block {0} is invalid")]
    FailedParent(block::Hash),

    /// One or more inputs are unknown; transient while syncing.
    #[error("missing inputs")]
    MissingInputs,

    /// The stake modifier for a kernel check is not yet derivable.
    #[error("stake modifier unavailable for block {0}")]
    ModifierUnavailable(block::Hash),

    /// An error from the state layer or the operating system.
    #[error("state error: {0}")]
    State(String),

    /// A serialization failure while reading stored data.
    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),
}

impl From<BoxError> for ConsensusError {
    fn from(err: BoxError) -> Self {
        ConsensusError::State(err.to_string())
    }
}

impl From<std::io::Error> for ConsensusError {
    fn from(err: std::io::Error) -> Self {
        ConsensusError::State(err.to_string())
    }
}

impl ConsensusError {
    /// The denial-of-service score the relaying peer earns for this error.
    pub fn dos_score(&self) -> u32 {
        use ConsensusError::*;
        match self {
            BadHeader(_) | BadPow | BadMerkle | DuplicateTx | DoubleSpend(_) | BadFee(_)
            | ImmatureCoin | ScriptFailure(_, _) | BadTxStructure(_) => 100,
            CheckpointMismatch(_) | ModifierCheckpointMismatch(_, _) => 100,
            DuplicateStake(_) => 100,
            FailedParent(_) => 100,
            // Transient conditions carry a token score: honest peers hit
            // them during initial download.
            BadPos(_) => 1,
            MissingParent(_) | MissingInputs | ModifierUnavailable(_) => 0,
            State(_) | Serialization(_) => 0,
        }
    }

    /// Whether the failure may resolve itself once more data arrives.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConsensusError::MissingParent(_)
                | ConsensusError::MissingInputs
                | ConsensusError::ModifierUnavailable(_)
        )
    }
}
