//! Transactions and transaction-related structures.

mod hash;
mod serialize;

pub use hash::Hash;
pub use serialize::MAX_TX_SIZE;

use crate::parameters::LOCKTIME_THRESHOLD;
use crate::{cached::Cached, compactint::CompactInt};
use crate::{transparent, ChainSerialize};
use vireo_serde_derive::ChainSerialize;

/// A timestamped transaction with transparent inputs and outputs.
///
/// Two degenerate shapes carry consensus meaning: a *coinbase* has a single
/// null-prevout input and mints the block reward, and a *coinstake*, the
/// proof-of-stake generator, spends a real prevout into an empty first
/// output followed by the staked value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ChainSerialize)]
pub struct Transaction {
    /// The transaction version.
    pub version: i32,
    /// The transaction timestamp, part of the proof-of-stake kernel input.
    pub time: u32,
    /// The transaction inputs.
    pub inputs: Vec<transparent::Input>,
    /// The transaction outputs.
    pub outputs: Vec<transparent::Output>,
    /// Block height or unix time before which the transaction is not final.
    pub lock_time: u32,
    hash: Cached<Hash>,
}

impl Transaction {
    pub const CURRENT_VERSION: i32 = 1;

    pub fn new(
        version: i32,
        time: u32,
        inputs: Vec<transparent::Input>,
        outputs: Vec<transparent::Output>,
        lock_time: u32,
    ) -> Transaction {
        Transaction {
            version,
            time,
            inputs,
            outputs,
            lock_time,
            hash: Cached::new(),
        }
    }

    /// Get the hash of this transaction.
    pub fn hash(&self) -> Hash {
        // If we have a cached version, just return that
        if let Some(hash) = self.hash.value() {
            return hash;
        }
        // Otherwise, serialize the tx to calculate and return the hash
        Hash::from(self)
    }

    /// Returns `true` if this transaction creates new currency.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].prevout.is_null()
            && !self.outputs.is_empty()
    }

    /// Returns `true` if this is a proof-of-stake generator transaction,
    /// marked by its empty first output.
    pub fn is_coinstake(&self) -> bool {
        !self.inputs.is_empty()
            && !self.inputs[0].prevout.is_null()
            && self.outputs.len() >= 2
            && self.outputs[0].is_empty()
    }

    /// A transaction is final at `(height, time)` when its lock time has
    /// passed, or when every input opted out via a maximal sequence number.
    ///
    /// Lock times below [`LOCKTIME_THRESHOLD`] are block heights; at or
    /// above, unix timestamps.
    pub fn is_final(&self, height: u32, time: i64) -> bool {
        if self.lock_time == 0 {
            return true;
        }
        let cutoff = if self.lock_time < LOCKTIME_THRESHOLD {
            height as i64
        } else {
            time
        };
        if (self.lock_time as i64) < cutoff {
            return true;
        }
        self.inputs.iter().all(|input| input.is_final())
    }

    /// Sum of all output values.
    ///
    /// Callers must range-check the result; per-output bounds are enforced by
    /// the context-free transaction checks.
    pub fn value_out(&self) -> i64 {
        self.outputs.iter().map(|output| output.value).sum()
    }

    /// Returns the serialized length (in bytes) of this transaction.
    pub fn len(&self) -> usize {
        let mut size = 4 + 4 + CompactInt::size(self.inputs.len());
        for input in self.inputs.iter() {
            size += transparent::OutPoint::len()
                + input.script_sig.serialized_size()
                + 4;
        }
        size += CompactInt::size(self.outputs.len());
        for output in self.outputs.iter() {
            size += output.len();
        }
        size + 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transparent::{Input, OutPoint, Output, Script};
    use crate::{ChainDeserialize, ChainDeserializeInto};

    fn coinbase() -> Transaction {
        Transaction::new(
            1,
            1_600_000_000,
            vec![Input::new(OutPoint::null(), Script(vec![0x51, 0x51]))],
            vec![Output::new(50 * crate::amount::COIN, Script(vec![0x51]))],
            0,
        )
    }

    #[test]
    fn classification() {
        let tx = coinbase();
        assert!(tx.is_coinbase());
        assert!(!tx.is_coinstake());

        let stake = Transaction::new(
            1,
            1_600_000_000,
            vec![Input::new(
                OutPoint {
                    hash: tx.hash(),
                    index: 0,
                },
                Script::default(),
            )],
            vec![Output::empty(), Output::new(50 * crate::amount::COIN, Script(vec![0x51]))],
            0,
        );
        assert!(stake.is_coinstake());
        assert!(!stake.is_coinbase());
    }

    #[test]
    fn serialized_len_matches_encoding() {
        let tx = coinbase();
        let bytes = tx.chain_serialize_to_vec().unwrap();
        assert_eq!(bytes.len(), tx.len());
    }

    #[test]
    fn roundtrip_preserves_hash() {
        let tx = coinbase();
        let bytes = tx.chain_serialize_to_vec().unwrap();
        let decoded = Transaction::chain_deserialize(&bytes[..]).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.hash(), tx.hash());
    }

    #[test]
    fn finality() {
        let mut tx = coinbase();
        assert!(tx.is_final(0, 0));

        // Height-interpreted lock time.
        tx.lock_time = 100;
        tx.inputs[0].sequence = 0;
        assert!(!tx.is_final(100, 0));
        assert!(tx.is_final(101, 0));

        // Time-interpreted lock time.
        tx.lock_time = LOCKTIME_THRESHOLD + 5;
        assert!(!tx.is_final(u32::max_value(), (LOCKTIME_THRESHOLD + 5) as i64));
        assert!(tx.is_final(0, (LOCKTIME_THRESHOLD + 6) as i64));

        // Maximal sequence numbers make it final regardless.
        tx.inputs[0].sequence = u32::max_value();
        assert!(tx.is_final(0, 0));
    }

    #[test]
    fn deserialize_caches_hash() {
        let bytes = coinbase().chain_serialize_to_vec().unwrap();
        let tx: Transaction = (&bytes[..]).chain_deserialize_into().unwrap();
        assert!(tx.hash.has_value());
    }
}
