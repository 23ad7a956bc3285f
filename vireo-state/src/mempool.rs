//! The unconfirmed-transaction pool.
//!
//! Policy decisions (fees, standardness, input checking) live in the
//! consensus crate; this container only tracks the transactions themselves
//! and an index from spent prevouts back to the spending transaction.

use std::collections::HashMap;

use tracing::debug;

use vireo_chain::coins::{Coins, TxInUndo};
use vireo_chain::transaction::{self, Transaction};
use vireo_chain::transparent::OutPoint;

/// An in-memory pool of validated but unconfirmed transactions.
#[derive(Default)]
pub struct Mempool {
    transactions: HashMap<transaction::Hash, Transaction>,
    /// Maps each spent prevout to the spending transaction and input index.
    next_tx: HashMap<OutPoint, (transaction::Hash, u32)>,
}

impl Mempool {
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn contains(&self, txid: &transaction::Hash) -> bool {
        self.transactions.contains_key(txid)
    }

    pub fn get(&self, txid: &transaction::Hash) -> Option<&Transaction> {
        self.transactions.get(txid)
    }

    /// The transaction spending `prevout`, if any.
    pub fn spender_of(&self, prevout: &OutPoint) -> Option<&(transaction::Hash, u32)> {
        self.next_tx.get(prevout)
    }

    /// Insert a transaction that has already passed admission checks.
    pub fn insert_unchecked(&mut self, txid: transaction::Hash, tx: Transaction) {
        for (index, input) in tx.inputs.iter().enumerate() {
            self.next_tx
                .insert(input.prevout, (txid, index as u32));
        }
        self.transactions.insert(txid, tx);
        metrics::gauge!("mempool.size", self.transactions.len() as i64);
    }

    /// Remove a transaction, and recursively anything spending its outputs.
    pub fn remove(&mut self, txid: &transaction::Hash) {
        let tx = match self.transactions.remove(txid) {
            Some(tx) => tx,
            None => return,
        };
        for input in &tx.inputs {
            self.next_tx.remove(&input.prevout);
        }
        for index in 0..tx.outputs.len() as u32 {
            let prevout = OutPoint {
                hash: *txid,
                index,
            };
            if let Some((spender, _)) = self.next_tx.get(&prevout).cloned() {
                self.remove(&spender);
            }
        }
        debug!(?txid, remaining = self.transactions.len(), "removed from mempool");
        metrics::gauge!("mempool.size", self.transactions.len() as i64);
    }

    /// Mark outputs of `coins` spent where a mempool transaction already
    /// consumes them, so callers do not offer them for new spends.
    pub fn prune_spent(&self, txid: &transaction::Hash, coins: &mut Coins) {
        for index in 0..coins.outputs.len() as u32 {
            let prevout = OutPoint {
                hash: *txid,
                index,
            };
            if self.next_tx.contains_key(&prevout) {
                let mut undo = TxInUndo::default();
                coins.spend(&prevout, &mut undo);
            }
        }
    }

    /// All transaction ids currently in the pool.
    pub fn transaction_hashes(&self) -> Vec<transaction::Hash> {
        self.transactions.keys().cloned().collect()
    }
}
