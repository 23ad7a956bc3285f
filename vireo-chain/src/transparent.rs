//! Transaction inputs and outputs.

mod script;

pub use script::Script;

use crate::amount::Amount;
use crate::{transaction, ChainDeserialize, ChainSerialize, SerializationError};
use vireo_serde_derive::{ChainDeserialize, ChainSerialize};

/// A particular transaction output reference: the hash of the transaction
/// that created the output, and its position in that transaction's output
/// list.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Hash,
    ChainSerialize, ChainDeserialize,
)]
pub struct OutPoint {
    /// References the transaction that contains the output being spent.
    pub hash: transaction::Hash,

    /// Identifies which output from that transaction is referenced; the
    /// first output is 0, etc.
    pub index: u32,
}

impl OutPoint {
    /// The null outpoint, used to mark the single input of a coinbase.
    pub fn null() -> OutPoint {
        OutPoint {
            hash: transaction::Hash([0; 32]),
            index: std::u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.hash == transaction::Hash([0; 32]) && self.index == std::u32::MAX
    }

    #[inline]
    pub const fn len() -> usize {
        36
    }
}

impl std::fmt::Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.hash, self.index)
    }
}

/// An input of a transaction. It contains the location of the previous
/// transaction's output that it claims, and a signature script that matches
/// the output's locking script.
///
/// A coinbase input carries a null `prevout` and free-form `script_sig`
/// contents.
#[derive(
    Clone, Debug, Eq, PartialEq, Serialize, Deserialize, ChainSerialize, ChainDeserialize,
)]
pub struct Input {
    /// The previous output reference.
    pub prevout: OutPoint,
    /// The script that authorizes spending `prevout`.
    pub script_sig: Script,
    /// The sequence number, used by transaction finality.
    pub sequence: u32,
}

impl Input {
    pub fn new(prevout: OutPoint, script_sig: Script) -> Input {
        Input {
            prevout,
            script_sig,
            sequence: std::u32::MAX,
        }
    }

    /// An input is final when its sequence number is at its maximum.
    pub fn is_final(&self) -> bool {
        self.sequence == std::u32::MAX
    }
}

/// An output of a transaction. It carries an amount and the locking script
/// the next input must satisfy to claim it.
#[derive(
    Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Hash, ChainSerialize, ChainDeserialize,
)]
pub struct Output {
    /// Transaction value; `-1` marks a spent (null) output inside a coin
    /// record.
    pub value: Amount,

    /// The locking script.
    pub script_pubkey: Script,
}

impl Default for Output {
    /// The null output.
    fn default() -> Self {
        Output::null()
    }
}

impl Output {
    pub fn new(value: Amount, script_pubkey: Script) -> Output {
        Output {
            value,
            script_pubkey,
        }
    }

    /// The null output: used to mark spent positions in a coin record.
    pub fn null() -> Output {
        Output {
            value: -1,
            script_pubkey: Script(Vec::new()),
        }
    }

    pub fn is_null(&self) -> bool {
        self.value == -1
    }

    pub fn set_null(&mut self) {
        self.value = -1;
        self.script_pubkey.0.clear();
    }

    /// The empty output: the mandatory first output of a coinstake.
    pub fn empty() -> Output {
        Output {
            value: 0,
            script_pubkey: Script(Vec::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value == 0 && self.script_pubkey.0.is_empty()
    }

    /// Returns the serialized length (in bytes) of this output.
    pub fn len(&self) -> usize {
        8 + self.script_pubkey.serialized_size()
    }
}
