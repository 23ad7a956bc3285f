//! The sled-backed persistent view and block-tree store.
//!
//! One ordered keyspace holds everything, distinguished by a single-byte
//! prefix:
//!
//! | key | value |
//! |-----|-------|
//! | `'c' \|\| txid` | compressed coin record |
//! | `'B'` | best-block hash |
//! | `'b' \|\| block-hash` | disk block-index record |
//! | `'f' \|\| file-nr` | block-file statistics |
//! | `'l'` | last block-file number |
//! | `'I'` | best invalid chain trust (MPI) |
//! | `'H'` | sync checkpoint hash |
//! | `'K'` | checkpoint public key |
//! | `'M'` | modifier upgrade timestamp |
//!
//! Coin batches commit through [`sled::Tree::apply_batch`], which is atomic:
//! the best-block key and every coin mutation become visible together or not
//! at all.

use std::collections::HashMap;
use std::path::Path;

use primitive_types::U256;
use tracing::trace;

use vireo_chain::coins::Coins;
use vireo_chain::serialization::mpi;
use vireo_chain::{block, transaction, ChainDeserialize, ChainSerialize};

use crate::disk::{BlockFileInfo, DiskBlockIndex};
use crate::view::{CoinsStats, CoinsView};
use crate::{BoxError, Config};

const KEY_COINS: u8 = b'c';
const KEY_BEST_BLOCK: &[u8] = b"B";
const KEY_BLOCK_INDEX: u8 = b'b';
const KEY_FILE_INFO: u8 = b'f';
const KEY_LAST_FILE: &[u8] = b"l";
const KEY_BEST_INVALID_TRUST: &[u8] = b"I";
const KEY_SYNC_CHECKPOINT: &[u8] = b"H";
const KEY_CHECKPOINT_PUBKEY: &[u8] = b"K";
const KEY_MODIFIER_UPGRADE: &[u8] = b"M";

fn coins_key(txid: &transaction::Hash) -> [u8; 33] {
    let mut key = [0u8; 33];
    key[0] = KEY_COINS;
    key[1..].copy_from_slice(&txid.0);
    key
}

fn block_index_key(hash: &block::Hash) -> [u8; 33] {
    let mut key = [0u8; 33];
    key[0] = KEY_BLOCK_INDEX;
    key[1..].copy_from_slice(&hash.0);
    key
}

fn file_info_key(file: u32) -> [u8; 5] {
    let mut key = [0u8; 5];
    key[0] = KEY_FILE_INFO;
    key[1..].copy_from_slice(&file.to_be_bytes());
    key
}

/// The persistent bottom of the view stack, plus the block-tree keyspace.
///
/// Cloning is cheap and shares the underlying database handle.
#[derive(Clone)]
pub struct StoreView {
    db: sled::Db,
}

impl StoreView {
    /// Open (or create) the store for `network` under `config.cache_dir`.
    pub fn open(config: &Config, network: vireo_chain::parameters::Network) -> Result<StoreView, BoxError> {
        let path = config.coins_dir(network);
        let db = sled::Config::new()
            .path(&path)
            .temporary(config.ephemeral)
            .open()?;
        Ok(StoreView { db })
    }

    /// Open a store at an explicit path; used by tools and tests.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<StoreView, BoxError> {
        Ok(StoreView {
            db: sled::open(path)?,
        })
    }

    fn read<T: ChainDeserialize>(&self, key: &[u8]) -> Result<Option<T>, BoxError> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(T::chain_deserialize(&bytes[..])?)),
            None => Ok(None),
        }
    }

    fn write<T: ChainSerialize>(&self, key: &[u8], value: &T) -> Result<(), BoxError> {
        self.db.insert(key, value.chain_serialize_to_vec()?)?;
        Ok(())
    }

    // --- block tree -------------------------------------------------------

    pub fn write_block_index(&self, index: &DiskBlockIndex) -> Result<(), BoxError> {
        self.write(&block_index_key(&index.block_hash), index)
    }

    /// Load every block-index record, in unspecified order.
    pub fn read_block_index_all(&self) -> Result<Vec<DiskBlockIndex>, BoxError> {
        let mut entries = Vec::new();
        for item in self.db.scan_prefix(&[KEY_BLOCK_INDEX]) {
            let (_, value) = item?;
            entries.push(DiskBlockIndex::chain_deserialize(&value[..])?);
        }
        Ok(entries)
    }

    pub fn write_block_file_info(&self, file: u32, info: &BlockFileInfo) -> Result<(), BoxError> {
        self.write(&file_info_key(file), info)
    }

    pub fn read_block_file_info(&self, file: u32) -> Result<Option<BlockFileInfo>, BoxError> {
        self.read(&file_info_key(file))
    }

    pub fn write_last_block_file(&self, file: u32) -> Result<(), BoxError> {
        self.write(KEY_LAST_FILE, &file)
    }

    pub fn read_last_block_file(&self) -> Result<Option<u32>, BoxError> {
        self.read(KEY_LAST_FILE)
    }

    pub fn write_best_invalid_trust(&self, trust: U256) -> Result<(), BoxError> {
        self.db
            .insert(KEY_BEST_INVALID_TRUST, mpi::encode_mpi(&trust))?;
        Ok(())
    }

    pub fn read_best_invalid_trust(&self) -> Result<Option<U256>, BoxError> {
        match self.db.get(KEY_BEST_INVALID_TRUST)? {
            Some(bytes) => Ok(Some(mpi::decode_mpi(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn write_sync_checkpoint(&self, hash: block::Hash) -> Result<(), BoxError> {
        self.write(KEY_SYNC_CHECKPOINT, &hash)
    }

    pub fn read_sync_checkpoint(&self) -> Result<Option<block::Hash>, BoxError> {
        self.read(KEY_SYNC_CHECKPOINT)
    }

    pub fn write_checkpoint_pubkey(&self, pubkey: &Vec<u8>) -> Result<(), BoxError> {
        self.write(KEY_CHECKPOINT_PUBKEY, pubkey)
    }

    pub fn read_checkpoint_pubkey(&self) -> Result<Option<Vec<u8>>, BoxError> {
        self.read(KEY_CHECKPOINT_PUBKEY)
    }

    pub fn write_modifier_upgrade_time(&self, time: u32) -> Result<(), BoxError> {
        self.write(KEY_MODIFIER_UPGRADE, &time)
    }

    pub fn read_modifier_upgrade_time(&self) -> Result<Option<u32>, BoxError> {
        self.read(KEY_MODIFIER_UPGRADE)
    }

    /// Block until all writes are durable on disk.
    pub fn sync(&self) -> Result<(), BoxError> {
        self.db.flush()?;
        Ok(())
    }
}

impl CoinsView for StoreView {
    fn coins(&mut self, txid: &transaction::Hash) -> Result<Option<Coins>, BoxError> {
        self.read(&coins_key(txid))
    }

    fn set_coins(&mut self, txid: &transaction::Hash, coins: Coins) -> Result<(), BoxError> {
        self.write(&coins_key(txid), &coins)
    }

    fn have_coins(&mut self, txid: &transaction::Hash) -> Result<bool, BoxError> {
        Ok(self.db.contains_key(&coins_key(txid))?)
    }

    fn best_block(&mut self) -> Result<Option<block::Hash>, BoxError> {
        self.read(KEY_BEST_BLOCK)
    }

    fn set_best_block(&mut self, hash: block::Hash) -> Result<(), BoxError> {
        self.write(KEY_BEST_BLOCK, &hash)
    }

    fn batch_write(
        &mut self,
        coins: &HashMap<transaction::Hash, Coins>,
        best_block: block::Hash,
    ) -> Result<(), BoxError> {
        trace!(
            changed = coins.len(),
            best = ?best_block,
            "committing coin changes to the store"
        );
        metrics::counter!("state.store.batch_write", 1);

        let mut batch = sled::Batch::default();
        for (txid, record) in coins {
            // A pruned record with no surviving metadata is the tombstone a
            // disconnect leaves behind: delete the key so the coin set
            // returns to its exact pre-connect state.
            if record.is_pruned() && record.height == 0 && record.time == 0 {
                batch.remove(&coins_key(txid)[..]);
            } else {
                batch.insert(&coins_key(txid)[..], record.chain_serialize_to_vec()?);
            }
        }
        batch.insert(KEY_BEST_BLOCK, best_block.chain_serialize_to_vec()?);
        self.db.apply_batch(batch)?;
        Ok(())
    }

    fn stats(&mut self) -> Result<CoinsStats, BoxError> {
        let mut stats = CoinsStats::default();
        for item in self.db.scan_prefix(&[KEY_COINS]) {
            let (key, value) = item?;
            let coins = Coins::chain_deserialize(&value[..])?;
            if coins.is_pruned() {
                stats.pruned_transactions += 1;
            } else {
                stats.transactions += 1;
                stats.transaction_outputs += coins
                    .outputs
                    .iter()
                    .filter(|out| !out.is_null())
                    .count() as u64;
            }
            stats.serialized_size += (key.len() + value.len()) as u64;
        }
        Ok(stats)
    }
}
