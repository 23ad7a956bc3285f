//! Deserialization for transactions, kept together so the wire order is in
//! one place: `version | time | inputs | outputs | lock_time`.

use std::io::Read;

use crate::serialization::{ChainDeserialize, SerializationError};
use crate::{cached::Cached, transparent};

use super::Transaction;

/// The maximum serialized size of a transaction: a whole block.
pub const MAX_TX_SIZE: u64 = 1_000_000;

/// Deserializes a transaction, calculating and caching its txid.
impl ChainDeserialize for Transaction {
    fn chain_deserialize<R: std::io::Read>(src: R) -> Result<Self, SerializationError> {
        // Sanity limit on the bytes one transaction may consume, to protect
        // against DOS attacks.
        let mut src = src.take(MAX_TX_SIZE);
        let version = i32::chain_deserialize(&mut src)?;
        let time = u32::chain_deserialize(&mut src)?;
        let inputs = <Vec<transparent::Input>>::chain_deserialize(&mut src)?;
        let outputs = <Vec<transparent::Output>>::chain_deserialize(&mut src)?;
        let lock_time = u32::chain_deserialize(&mut src)?;
        let mut tx = Transaction {
            version,
            time,
            inputs,
            outputs,
            lock_time,
            hash: Cached::new(),
        };
        // Calculate and cache the txid.
        let own_hash = tx.hash();
        tx.hash = Cached::from(own_hash);
        Ok(tx)
    }
}
