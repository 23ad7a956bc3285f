//! The layered UTXO view stack.
//!
//! A [`CoinsView`] is the capability the validation pipeline works against:
//! fetch and store coin records by txid, and track the best block the coin
//! set corresponds to. Three implementations compose by holding another
//! view: the sled-backed [`StoreView`](crate::store::StoreView) at the
//! bottom, a [`CachedView`] buffering writes above it, and a
//! [`MempoolView`] overlaying unconfirmed transactions for input resolution.
//!
//! `batch_write` is the only operation that moves a backing view's best
//! block; a reorganization therefore becomes visible to other observers at
//! exactly one point.

use std::collections::HashMap;

use vireo_chain::coins::Coins;
use vireo_chain::{block, transaction};

use crate::mempool::Mempool;
use crate::{BoxError, MEMPOOL_HEIGHT};

/// Aggregate statistics over the whole coin set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoinsStats {
    /// Transactions with at least one unspent output.
    pub transactions: u64,
    /// Fully spent transactions still present as pruned records.
    pub pruned_transactions: u64,
    /// Total unspent outputs.
    pub transaction_outputs: u64,
    /// Serialized size of all records, including keys.
    pub serialized_size: u64,
}

/// Capability interface over the open transaction-output set.
pub trait CoinsView {
    /// Retrieve the coin record for `txid`, if any.
    fn coins(&mut self, txid: &transaction::Hash) -> Result<Option<Coins>, BoxError>;

    /// Replace the coin record for `txid`.
    fn set_coins(&mut self, txid: &transaction::Hash, coins: Coins) -> Result<(), BoxError>;

    /// Whether a record exists for `txid`. May return true for fully spent
    /// transactions whose pruned record is still present.
    fn have_coins(&mut self, txid: &transaction::Hash) -> Result<bool, BoxError> {
        Ok(self
            .coins(txid)?
            .map(|coins| !coins.is_pruned())
            .unwrap_or(false))
    }

    /// The block whose connection produced this coin state.
    fn best_block(&mut self) -> Result<Option<block::Hash>, BoxError>;

    /// Change the block this view claims to represent.
    fn set_best_block(&mut self, hash: block::Hash) -> Result<(), BoxError>;

    /// Atomically apply a batch of coin changes and move the best block.
    fn batch_write(
        &mut self,
        coins: &HashMap<transaction::Hash, Coins>,
        best_block: block::Hash,
    ) -> Result<(), BoxError>;

    /// Aggregate statistics, where the view can provide them.
    fn stats(&mut self) -> Result<CoinsStats, BoxError>;
}

/// A view that adds an in-memory cache on top of another view.
///
/// Reads promote records into a read cache; writes land in a separate write
/// cache until [`CachedView::flush`] pushes them through the backing view's
/// `batch_write` in one atomic step.
pub struct CachedView<V: CoinsView> {
    base: V,
    cache: HashMap<transaction::Hash, Coins>,
    read_cache: HashMap<transaction::Hash, Coins>,
    best_block: Option<block::Hash>,
}

impl<V: CoinsView> CachedView<V> {
    pub fn new(base: V) -> CachedView<V> {
        CachedView {
            base,
            cache: HashMap::new(),
            read_cache: HashMap::new(),
            best_block: None,
        }
    }

    /// The number of dirty entries waiting to be flushed.
    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    /// Push all buffered writes and the buffered best block through the
    /// backing view in one atomic batch, then drop both caches.
    pub fn flush(&mut self) -> Result<(), BoxError> {
        let best_block = match self.best_block {
            Some(hash) => hash,
            // Nothing moved the tip: nothing to flush.
            None => return Ok(()),
        };
        self.base.batch_write(&self.cache, best_block)?;
        self.cache.clear();
        self.read_cache.clear();
        Ok(())
    }

    /// Consume the view without flushing, returning the backing view.
    pub fn into_inner(self) -> V {
        self.base
    }
}

impl<V: CoinsView> CoinsView for CachedView<V> {
    fn coins(&mut self, txid: &transaction::Hash) -> Result<Option<Coins>, BoxError> {
        if let Some(coins) = self.cache.get(txid) {
            return Ok(Some(coins.clone()));
        }
        if let Some(coins) = self.read_cache.get(txid) {
            return Ok(Some(coins.clone()));
        }
        match self.base.coins(txid)? {
            Some(coins) => {
                self.read_cache.insert(*txid, coins.clone());
                Ok(Some(coins))
            }
            None => Ok(None),
        }
    }

    fn set_coins(&mut self, txid: &transaction::Hash, coins: Coins) -> Result<(), BoxError> {
        self.read_cache.remove(txid);
        self.cache.insert(*txid, coins);
        Ok(())
    }

    fn best_block(&mut self) -> Result<Option<block::Hash>, BoxError> {
        match self.best_block {
            Some(hash) => Ok(Some(hash)),
            None => self.base.best_block(),
        }
    }

    fn set_best_block(&mut self, hash: block::Hash) -> Result<(), BoxError> {
        self.best_block = Some(hash);
        Ok(())
    }

    fn batch_write(
        &mut self,
        coins: &HashMap<transaction::Hash, Coins>,
        best_block: block::Hash,
    ) -> Result<(), BoxError> {
        for (txid, record) in coins {
            self.read_cache.remove(txid);
            self.cache.insert(*txid, record.clone());
        }
        self.best_block = Some(best_block);
        Ok(())
    }

    fn stats(&mut self) -> Result<CoinsStats, BoxError> {
        self.base.stats()
    }
}

/// A view that brings mempool transactions into sight as fully unspent
/// coins. It does not observe spends made by other mempool transactions.
pub struct MempoolView<'a, V: CoinsView> {
    base: &'a mut V,
    mempool: &'a Mempool,
}

impl<'a, V: CoinsView> MempoolView<'a, V> {
    pub fn new(base: &'a mut V, mempool: &'a Mempool) -> MempoolView<'a, V> {
        MempoolView { base, mempool }
    }
}

impl<'a, V: CoinsView> CoinsView for MempoolView<'a, V> {
    fn coins(&mut self, txid: &transaction::Hash) -> Result<Option<Coins>, BoxError> {
        if let Some(tx) = self.mempool.get(txid) {
            return Ok(Some(Coins::from_tx(tx, MEMPOOL_HEIGHT, 0)));
        }
        self.base.coins(txid)
    }

    fn set_coins(&mut self, txid: &transaction::Hash, coins: Coins) -> Result<(), BoxError> {
        self.base.set_coins(txid, coins)
    }

    fn have_coins(&mut self, txid: &transaction::Hash) -> Result<bool, BoxError> {
        if self.mempool.contains(txid) {
            return Ok(true);
        }
        self.base.have_coins(txid)
    }

    fn best_block(&mut self) -> Result<Option<block::Hash>, BoxError> {
        self.base.best_block()
    }

    fn set_best_block(&mut self, hash: block::Hash) -> Result<(), BoxError> {
        self.base.set_best_block(hash)
    }

    fn batch_write(
        &mut self,
        coins: &HashMap<transaction::Hash, Coins>,
        best_block: block::Hash,
    ) -> Result<(), BoxError> {
        self.base.batch_write(coins, best_block)
    }

    fn stats(&mut self) -> Result<CoinsStats, BoxError> {
        self.base.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vireo_chain::amount::COIN;
    use vireo_chain::transaction::Transaction;
    use vireo_chain::transparent::{Input, OutPoint, Output, Script};

    /// A bare in-memory view for exercising the cache layers.
    #[derive(Default)]
    struct MapView {
        coins: HashMap<transaction::Hash, Coins>,
        best_block: Option<block::Hash>,
        batch_writes: usize,
    }

    impl CoinsView for MapView {
        fn coins(&mut self, txid: &transaction::Hash) -> Result<Option<Coins>, BoxError> {
            Ok(self.coins.get(txid).cloned())
        }

        fn set_coins(&mut self, txid: &transaction::Hash, coins: Coins) -> Result<(), BoxError> {
            self.coins.insert(*txid, coins);
            Ok(())
        }

        fn best_block(&mut self) -> Result<Option<block::Hash>, BoxError> {
            Ok(self.best_block)
        }

        fn set_best_block(&mut self, hash: block::Hash) -> Result<(), BoxError> {
            self.best_block = Some(hash);
            Ok(())
        }

        fn batch_write(
            &mut self,
            coins: &HashMap<transaction::Hash, Coins>,
            best_block: block::Hash,
        ) -> Result<(), BoxError> {
            self.batch_writes += 1;
            for (txid, record) in coins {
                self.coins.insert(*txid, record.clone());
            }
            self.best_block = Some(best_block);
            Ok(())
        }

        fn stats(&mut self) -> Result<CoinsStats, BoxError> {
            Ok(CoinsStats::default())
        }
    }

    fn coinbase(value: i64) -> Transaction {
        Transaction::new(
            1,
            1_600_000_000,
            vec![Input::new(OutPoint::null(), Script(vec![0x01, 0x02]))],
            vec![Output::new(value, Script(vec![0x51]))],
            0,
        )
    }

    #[test]
    fn cached_view_defers_writes_until_flush() {
        let tx = coinbase(10 * COIN);
        let txid = tx.hash();
        let record = Coins::from_tx(&tx, 1, 1_600_000_000);

        let mut cached = CachedView::new(MapView::default());
        cached.set_coins(&txid, record.clone()).unwrap();
        cached.set_best_block(block::Hash([1; 32])).unwrap();

        // Visible through the cache, invisible below.
        assert_eq!(cached.coins(&txid).unwrap(), Some(record.clone()));
        assert!(cached.into_inner().coins.is_empty());

        let mut cached = CachedView::new(MapView::default());
        cached.set_coins(&txid, record.clone()).unwrap();
        cached.set_best_block(block::Hash([1; 32])).unwrap();
        cached.flush().unwrap();
        assert_eq!(cached.cache_size(), 0);

        let mut base = cached.into_inner();
        assert_eq!(base.batch_writes, 1);
        assert_eq!(base.coins.get(&txid), Some(&record));
        assert_eq!(base.best_block, Some(block::Hash([1; 32])));
    }

    #[test]
    fn cached_view_promotes_reads() {
        let tx = coinbase(2 * COIN);
        let txid = tx.hash();
        let record = Coins::from_tx(&tx, 3, 1_600_000_000);

        let mut base = MapView::default();
        base.set_coins(&txid, record.clone()).unwrap();
        let mut cached = CachedView::new(base);
        assert_eq!(cached.coins(&txid).unwrap(), Some(record.clone()));
        assert!(cached.read_cache.contains_key(&txid));
        // A write supersedes the promoted read.
        let mut spent = record;
        spent.outputs[0].set_null();
        spent.cleanup();
        cached.set_coins(&txid, spent.clone()).unwrap();
        assert_eq!(cached.coins(&txid).unwrap(), Some(spent));
    }

    #[test]
    fn flush_without_best_block_is_a_no_op() {
        let mut cached = CachedView::new(MapView::default());
        let tx = coinbase(COIN);
        cached
            .set_coins(&tx.hash(), Coins::from_tx(&tx, 1, 0))
            .unwrap();
        cached.flush().unwrap();
        // No best block was set: the write stays buffered.
        assert_eq!(cached.cache_size(), 1);
        assert_eq!(cached.into_inner().batch_writes, 0);
    }

    #[test]
    fn mempool_view_sees_unconfirmed_transactions() {
        let tx = coinbase(7 * COIN);
        let txid = tx.hash();
        let mut mempool = Mempool::default();
        mempool.insert_unchecked(txid, tx);

        let mut base = MapView::default();
        let mut view = MempoolView::new(&mut base, &mempool);
        let coins = view.coins(&txid).unwrap().expect("mempool tx is visible");
        assert_eq!(coins.height, MEMPOOL_HEIGHT);
        assert!(view.have_coins(&txid).unwrap());

        let unknown = transaction::Hash([0x42; 32]);
        assert_eq!(view.coins(&unknown).unwrap(), None);
    }
}
