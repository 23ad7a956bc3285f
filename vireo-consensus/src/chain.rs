//! The chain state: block acceptance, connect/disconnect with undo
//! records, and best-chain reorganization.
//!
//! All mutation flows through [`ChainState`] methods; callers serialize
//! access with one coarse lock around the whole value. Coin mutations are
//! buffered in a [`CachedView`] for the duration of a (re)organization and
//! committed through one atomic `batch_write`, so the persistent best block
//! moves exactly once per reorg.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use primitive_types::U256;
use tracing::{debug, info, warn};

use vireo_chain::amount::{money_range, Amount};
use vireo_chain::block::{Block, Header};
use vireo_chain::coins::{BlockUndo, Coins, TxInUndo, TxUndo};
use vireo_chain::parameters::{future_drift, Network, MAX_BLOCK_SIGOPS};
use vireo_chain::script;
use vireo_chain::transaction::Transaction;
use vireo_chain::transparent::{OutPoint, Script};
use vireo_chain::{block, transaction, ChainDeserialize, ChainSerialize};
use vireo_state::{
    BlockFiles, CachedView, CoinsView, Config, FlatFilePos, Mempool, MempoolView, StoreView,
};

use crate::block_index::{BlockIndex, BlockStatus, ChainIndex, ValidityStage};
use crate::checkpoints;
use crate::checks;
use crate::difficulty::next_target_required;
use crate::error::ConsensusError;
use crate::kernel;
use crate::rewards;
use crate::time::NetworkClock;

/// What became of a submitted block.
#[derive(Debug, Eq, PartialEq)]
pub enum ProcessOutcome {
    /// Accepted into the block index (and possibly onto the active chain).
    Accepted,
    /// Parent unknown; held as an orphan until it arrives.
    Orphaned,
    /// Already known, nothing to do.
    AlreadyHave,
}

/// The consensus engine state: block index tree, active chain, stake-seen
/// set, and the storage handles beneath them.
pub struct ChainState {
    network: Network,
    clock: Arc<dyn NetworkClock>,
    index: ChainIndex,
    /// Arena index of the active tip.
    best: Option<usize>,
    genesis: Option<usize>,
    best_invalid_trust: U256,
    /// (prevout, stake time) pairs of every indexed coinstake.
    stake_seen: kernel::StakeSeen,
    /// Blocks whose parents have not arrived, keyed by the missing parent.
    orphans: HashMap<block::Hash, Vec<Block>>,
    orphan_hashes: HashSet<block::Hash>,
    store: StoreView,
    files: BlockFiles,
    mempool: Arc<Mutex<Mempool>>,
}

impl ChainState {
    /// Open the chain state, loading any previously stored block index.
    pub fn open(
        config: &Config,
        network: Network,
        clock: Arc<dyn NetworkClock>,
    ) -> Result<ChainState, ConsensusError> {
        let store = StoreView::open(config, network)?;
        let last_file = store.read_last_block_file()?.unwrap_or(0);
        let info = store
            .read_block_file_info(last_file)?
            .unwrap_or_default();
        let files = BlockFiles::open(config.blocks_dir(network), last_file, info)?;

        let mut state = ChainState {
            network,
            clock,
            index: ChainIndex::default(),
            best: None,
            genesis: None,
            best_invalid_trust: store.read_best_invalid_trust()?.unwrap_or_default(),
            stake_seen: kernel::StakeSeen::new(),
            orphans: HashMap::new(),
            orphan_hashes: HashSet::new(),
            store,
            files,
            mempool: Arc::new(Mutex::new(Mempool::default())),
        };
        state.load_block_index()?;
        Ok(state)
    }

    /// Rebuild the in-memory index from the store's `'b'` records.
    fn load_block_index(&mut self) -> Result<(), ConsensusError> {
        let mut records = self.store.read_block_index_all()?;
        if records.is_empty() {
            return Ok(());
        }
        // Parents always sit at lower heights, so height order makes every
        // parent resolvable when its children arrive.
        records.sort_by_key(|record| record.height);

        for record in records {
            let prev = if record.height == 0 {
                None
            } else {
                Some(self.index.lookup(&record.hash_prev).ok_or_else(|| {
                    ConsensusError::State(format!(
                        "block index parent {} missing from store",
                        record.hash_prev
                    ))
                })?)
            };
            let header = Header {
                version: record.version,
                previous_block_hash: record.hash_prev,
                merkle_root: record.merkle_root,
                time: record.time,
                bits: record.bits,
                nonce: record.nonce,
            };
            let mut node = BlockIndex {
                hash: record.block_hash,
                prev,
                next: None,
                height: record.height,
                file: record.file,
                data_pos: record.data_pos,
                undo_pos: record.undo_pos,
                chain_trust: U256::zero(),
                tx_count: record.tx_count,
                status: BlockStatus(record.status),
                mint: record.mint,
                money_supply: record.money_supply,
                flags: record.flags,
                stake_modifier: record.stake_modifier,
                stake_modifier_checksum: 0,
                prevout_stake: record.prevout_stake,
                stake_time: record.stake_time,
                proof_hash: U256::from_little_endian(&record.proof_hash),
                header,
                sequence: 0,
            };
            node.chain_trust = match prev {
                Some(prev) => self.index.node(prev).chain_trust + node.block_trust(),
                None => node.block_trust(),
            };
            // Recompute the memory-only checksum chain as we go.
            let prev_checksum = prev.map(|p| self.index.node(p).stake_modifier_checksum);
            node.stake_modifier_checksum = kernel::stake_modifier_checksum(
                prev_checksum,
                node.flags,
                node.proof_hash,
                node.stake_modifier,
            );

            if node.is_proof_of_stake() {
                self.stake_seen
                    .insert((node.prevout_stake, node.stake_time));
            }
            let idx = self.index.insert(node);
            if record.height == 0 {
                self.genesis = Some(idx);
            }
        }

        // Restore the active chain from the persistent best block.
        if let Some(best_hash) = self.store.clone().best_block()? {
            let best = self.index.lookup(&best_hash).ok_or_else(|| {
                ConsensusError::State("best block missing from block index".into())
            })?;
            let path: Vec<usize> = self.index.ancestors(best).collect();
            for pair in path.windows(2) {
                self.index.node_mut(pair[1]).next = Some(pair[0]);
            }
            self.best = Some(best);
        }
        info!(
            blocks = self.index.len(),
            height = self.best_height().map(|h| h as i64).unwrap_or(-1),
            "loaded block index"
        );
        Ok(())
    }

    // --- accessors --------------------------------------------------------

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn best_height(&self) -> Option<u32> {
        self.best.map(|idx| self.index.node(idx).height)
    }

    pub fn best_hash(&self) -> Option<block::Hash> {
        self.best.map(|idx| self.index.node(idx).hash)
    }

    pub fn best_chain_trust(&self) -> U256 {
        self.best
            .map(|idx| self.index.node(idx).chain_trust)
            .unwrap_or_default()
    }

    pub fn money_supply(&self) -> Amount {
        self.best
            .map(|idx| self.index.node(idx).money_supply)
            .unwrap_or(0)
    }

    pub fn chain_index(&self) -> &ChainIndex {
        &self.index
    }

    pub fn mempool(&self) -> Arc<Mutex<Mempool>> {
        self.mempool.clone()
    }

    /// A cloned handle to the persistent store, for observers.
    pub fn store_handle(&self) -> StoreView {
        self.store.clone()
    }

    pub fn stake_seen(&self, prevout: &OutPoint, stake_time: u32) -> bool {
        self.stake_seen.contains(&(*prevout, stake_time))
    }

    /// A read-only handle to the coin store.
    pub fn coins(&self, txid: &transaction::Hash) -> Result<Option<Coins>, ConsensusError> {
        Ok(self.store.clone().coins(txid)?)
    }

    // --- genesis ----------------------------------------------------------

    /// Install the compiled-in genesis block into an empty chain state.
    pub fn init_genesis(&mut self, genesis: &Block) -> Result<(), ConsensusError> {
        if !self.index.is_empty() {
            return Ok(());
        }
        checks::check_block(genesis, true, true)?;
        if genesis.hash() != self.network.genesis_hash() {
            warn!(
                hash = %genesis.hash(),
                "genesis block differs from the compiled-in hash"
            );
        }

        let idx = self.attach_block_index(genesis, None)?;
        self.set_best_chain(idx)?;
        self.genesis = Some(idx);
        Ok(())
    }

    // --- block intake -----------------------------------------------------

    /// Validate and file a block arriving from the network, connecting it
    /// (and any orphans it frees) to the best chain when appropriate.
    pub fn process_block(&mut self, block: Block) -> Result<ProcessOutcome, ConsensusError> {
        let hash = block.hash();
        if self.index.contains(&hash) || self.orphan_hashes.contains(&hash) {
            return Ok(ProcessOutcome::AlreadyHave);
        }

        checks::check_block(&block, true, true)?;

        // Duplicate-stake protection across the whole index.
        if let Some((prevout, stake_time)) = block.proof_of_stake() {
            if self.stake_seen.contains(&(prevout, stake_time)) {
                return Err(ConsensusError::DuplicateStake(prevout));
            }
        }

        if self.index.lookup(&block.header.previous_block_hash).is_none() {
            debug!(%hash, parent = %block.header.previous_block_hash, "storing orphan block");
            self.orphan_hashes.insert(hash);
            self.orphans
                .entry(block.header.previous_block_hash)
                .or_insert_with(Vec::new)
                .push(block);
            metrics::gauge!("chain.orphans", self.orphan_hashes.len() as i64);
            return Ok(ProcessOutcome::Orphaned);
        }

        self.accept_block(block)?;

        // Accepting this block may free orphans, recursively.
        let mut work = VecDeque::new();
        work.push_back(hash);
        while let Some(parent_hash) = work.pop_front() {
            for orphan in self.orphans.remove(&parent_hash).unwrap_or_default() {
                let orphan_hash = orphan.hash();
                self.orphan_hashes.remove(&orphan_hash);
                match self.accept_block(orphan) {
                    Ok(_) => work.push_back(orphan_hash),
                    Err(error) => {
                        warn!(hash = %orphan_hash, %error, "orphan block failed acceptance")
                    }
                }
            }
        }
        metrics::gauge!("chain.orphans", self.orphan_hashes.len() as i64);
        Ok(ProcessOutcome::Accepted)
    }

    /// Contextual (tree-stage) validation, filing, and possible chain
    /// switch for a block whose parent is indexed.
    fn accept_block(&mut self, block: Block) -> Result<usize, ConsensusError> {
        let hash = block.hash();
        let parent = self
            .index
            .lookup(&block.header.previous_block_hash)
            .ok_or(ConsensusError::MissingParent(block.header.previous_block_hash))?;
        if self.index.node(parent).status.is_failed() {
            return Err(ConsensusError::FailedParent(
                block.header.previous_block_hash,
            ));
        }
        let height = self.index.node(parent).height + 1;
        let proof_of_stake = block.is_proof_of_stake();

        // Difficulty must be exactly what retargeting demands.
        let required = next_target_required(&self.index, Some(parent), proof_of_stake, self.network);
        if block.header.bits != required {
            return Err(ConsensusError::BadHeader("incorrect difficulty target"));
        }

        // Timestamp window: above the median of the last eleven, not too
        // far past the adjusted clock.
        let median = self.index.median_time_past(parent);
        if block.header.time as i64 <= median {
            return Err(ConsensusError::BadHeader(
                "timestamp not after median of previous blocks",
            ));
        }
        if block.header.time as i64 > future_drift(self.clock.adjusted_time()) {
            return Err(ConsensusError::BadHeader("timestamp too far in the future"));
        }

        // Every transaction must be final at this height and time.
        for tx in &block.transactions {
            if !tx.is_final(height, block.header.time as i64) {
                return Err(ConsensusError::BadTxStructure("non-final transaction"));
            }
        }

        if !checkpoints::check_hardened(self.network, height, &hash) {
            return Err(ConsensusError::CheckpointMismatch(height));
        }

        self.check_block_signature(&block)?;
        let idx = self.attach_block_index(&block, Some(parent))?;

        // Switch chains only when the newcomer's trust strictly exceeds the
        // current tip's; at equal trust the earlier arrival keeps the tip.
        let should_connect = match self.best {
            Some(best) => {
                self.index.node(idx).chain_trust > self.index.node(best).chain_trust
            }
            None => true,
        };
        if should_connect {
            self.set_best_chain(idx)?;
        }
        Ok(idx)
    }

    /// File the block, build its index node (stake modifier included), and
    /// persist the node.
    fn attach_block_index(
        &mut self,
        block: &Block,
        parent: Option<usize>,
    ) -> Result<usize, ConsensusError> {
        let hash = block.hash();
        let height = parent.map(|p| self.index.node(p).height + 1).unwrap_or(0);

        // Kernel admission before anything is written.
        let proof_hash = if block.is_proof_of_stake() {
            let parent = parent.ok_or(ConsensusError::BadPos("proof-of-stake genesis"))?;
            self.check_proof_of_stake(block, parent)?
        } else {
            U256::zero()
        };

        let payload = block.chain_serialize_to_vec()?;
        let (pos, _rotated) = self
            .files
            .append_block(&payload, height, block.header.time as u64)?;
        self.store
            .write_block_file_info(pos.file, self.files.info())?;
        self.store.write_last_block_file(self.files.last_file())?;

        let mut node = BlockIndex {
            hash,
            prev: parent,
            next: None,
            height,
            file: pos.file,
            data_pos: pos.pos,
            undo_pos: 0,
            chain_trust: U256::zero(),
            tx_count: block.transactions.len() as u32,
            status: BlockStatus(0),
            mint: 0,
            money_supply: 0,
            flags: 0,
            stake_modifier: 0,
            stake_modifier_checksum: 0,
            prevout_stake: OutPoint::null(),
            stake_time: 0,
            proof_hash,
            header: block.header,
            sequence: 0,
        };
        if let Some((prevout, stake_time)) = block.proof_of_stake() {
            node.set_proof_of_stake();
            node.prevout_stake = prevout;
            node.stake_time = stake_time;
        }
        node.set_stake_entropy_bit(block.stake_entropy_bit());
        node.chain_trust = match parent {
            Some(parent) => self.index.node(parent).chain_trust + node.block_trust(),
            None => node.block_trust(),
        };

        let (modifier, generated) = kernel::compute_next_stake_modifier(
            &self.index,
            self.network,
            block.header.time,
            parent,
        )?;
        node.set_stake_modifier(modifier, generated);
        let prev_checksum = parent.map(|p| self.index.node(p).stake_modifier_checksum);
        node.stake_modifier_checksum = kernel::stake_modifier_checksum(
            prev_checksum,
            node.flags,
            node.proof_hash,
            node.stake_modifier,
        );
        if !kernel::check_stake_modifier_checkpoint(
            self.network,
            height,
            node.stake_modifier_checksum,
        ) {
            return Err(ConsensusError::ModifierCheckpointMismatch(
                height,
                node.stake_modifier_checksum,
            ));
        }

        node.status.raise(ValidityStage::Transactions);
        node.status.set_have_data();

        let parent_hash = block.header.previous_block_hash;
        let disk = node.to_disk(parent_hash);
        let idx = self.index.insert(node);
        self.store.write_block_index(&disk)?;

        if let Some((prevout, stake_time)) = block.proof_of_stake() {
            self.stake_seen.insert((prevout, stake_time));
        }
        metrics::counter!("chain.blocks.indexed", 1);
        Ok(idx)
    }

    // --- proof of stake ---------------------------------------------------

    /// Verify the coinstake kernel for a block whose parent is `parent`.
    /// Returns the kernel proof hash.
    fn check_proof_of_stake(
        &self,
        block: &Block,
        parent: usize,
    ) -> Result<U256, ConsensusError> {
        let coinstake = &block.transactions[1];
        let prevout = coinstake.inputs[0].prevout;

        // The staked output must already be in the coin set.
        let prev_coins = self
            .store
            .clone()
            .coins(&prevout.hash)?
            .ok_or(ConsensusError::MissingInputs)?;
        if !prev_coins.is_available(prevout.index) {
            return Err(ConsensusError::DoubleSpend(prevout));
        }

        // Locate the block that confirmed the staked output, along this
        // block's own ancestry.
        let from = self
            .index
            .ancestors(parent)
            .find(|&i| self.index.node(i).height == prev_coins.height)
            .ok_or(ConsensusError::MissingInputs)?;
        let from_hash = self.index.node(from).hash;
        let from_block = self.read_block(from)?;
        let (prev_tx, prev_tx_offset) = transaction_offset(&from_block, &prevout.hash)
            .ok_or(ConsensusError::BadPos("stake prevout not in its block"))?;

        // The kernel signature must verify against the staked output.
        script::verify_script(
            &coinstake.inputs[0].script_sig,
            &prev_tx.outputs[prevout.index as usize].script_pubkey,
            coinstake,
            0,
        )
        .map_err(|error| ConsensusError::ScriptFailure(0, error))?;

        let modifier =
            kernel::kernel_stake_modifier(&self.index, &from_hash, self.clock.adjusted_time())?;
        let (proof, _target) = kernel::check_stake_kernel_hash(
            block.header.bits,
            from_block.header.time,
            prev_tx_offset,
            prev_tx.time,
            prev_tx.outputs[prevout.index as usize].value,
            &prevout,
            coinstake.time,
            modifier,
        )?;
        Ok(proof)
    }

    /// Verify the generator signature carried by a proof-of-stake block:
    /// an ECDSA signature over the block hash by the key paid by the
    /// coinstake.
    fn check_block_signature(&self, block: &Block) -> Result<(), ConsensusError> {
        if block.is_proof_of_work() {
            if !block.signature.is_empty() {
                return Err(ConsensusError::BadHeader(
                    "unexpected signature on proof-of-work block",
                ));
            }
            return Ok(());
        }
        let output = &block.transactions[1].outputs[1];
        match script::solver(&output.script_pubkey) {
            Some((script::TemplateKind::PubKey, solutions)) => {
                if script::verify_hash_signature(
                    &block.hash().0,
                    &block.signature,
                    &solutions[0],
                ) {
                    Ok(())
                } else {
                    Err(ConsensusError::BadPos("bad block signature"))
                }
            }
            _ => Err(ConsensusError::BadPos(
                "coinstake pays an unsupported template",
            )),
        }
    }

    // --- connect / disconnect ---------------------------------------------

    fn read_block(&self, idx: usize) -> Result<Block, ConsensusError> {
        let node = self.index.node(idx);
        if !node.status.has_data() {
            return Err(ConsensusError::State(format!(
                "no data for block {}",
                node.hash
            )));
        }
        let payload = self.files.read_block(FlatFilePos {
            file: node.file,
            pos: node.data_pos,
        })?;
        Ok(Block::chain_deserialize(&payload[..])?)
    }

    /// Apply `block` to the coin view, writing its undo record.
    fn connect_block(
        &mut self,
        idx: usize,
        block: &Block,
        view: &mut CachedView<StoreView>,
    ) -> Result<(), ConsensusError> {
        let height = self.index.node(idx).height;
        let block_time = block.header.time;
        let maturity = self.network.coinbase_maturity();

        let mut undo = BlockUndo::default();
        let mut fees: Amount = 0;
        let mut value_in_total: Amount = 0;
        let mut value_out_total: Amount = 0;
        let mut sigops: usize = 0;

        for tx in &block.transactions {
            let txid = tx.hash();
            sigops += checks::legacy_sig_op_count(tx);
            if sigops > MAX_BLOCK_SIGOPS {
                return Err(ConsensusError::BadTxStructure("too many sigops"));
            }

            let value_out = tx.value_out();
            value_out_total += value_out;

            if !tx.is_coinbase() {
                // Resolve every input up front; all later checks use the
                // same snapshot.
                let mut resolved: Vec<(usize, Coins)> = Vec::with_capacity(tx.inputs.len());
                for (input_index, input) in tx.inputs.iter().enumerate() {
                    let coins = view
                        .coins(&input.prevout.hash)?
                        .filter(|coins| coins.is_available(input.prevout.index))
                        .ok_or(ConsensusError::DoubleSpend(input.prevout))?;
                    resolved.push((input_index, coins));
                }

                let mut value_in: Amount = 0;
                for (input_index, coins) in &resolved {
                    let input = &tx.inputs[*input_index];
                    // Generation outputs must mature before being spent.
                    if (coins.coinbase || coins.coinstake)
                        && height < coins.height + maturity
                    {
                        return Err(ConsensusError::ImmatureCoin);
                    }
                    // No spending into the past.
                    if tx.time < coins.time {
                        return Err(ConsensusError::BadTxStructure(
                            "transaction earlier than its input",
                        ));
                    }
                    let value = coins.outputs[input.prevout.index as usize].value;
                    if !money_range(value) {
                        return Err(ConsensusError::BadFee("input exceeds money range"));
                    }
                    value_in += value;
                    if !money_range(value_in) {
                        return Err(ConsensusError::BadFee("input sum exceeds money range"));
                    }
                    sigops += script::p2sh_sig_op_count(
                        &input.script_sig,
                        &coins.outputs[input.prevout.index as usize].script_pubkey,
                    );
                    if sigops > MAX_BLOCK_SIGOPS {
                        return Err(ConsensusError::BadTxStructure("too many sigops"));
                    }
                }

                if tx.is_coinstake() {
                    // The coinstake may mint up to the coin-age interest.
                    let coin_age = rewards::transaction_coin_age(tx, |prevout| {
                        resolved
                            .iter()
                            .find(|(input_index, _)| {
                                tx.inputs[*input_index].prevout == *prevout
                            })
                            .map(|(_, coins)| coins.clone())
                    });
                    let stake_reward = value_out - value_in;
                    let allowed = rewards::proof_of_stake_reward(coin_age);
                    if stake_reward > allowed {
                        return Err(ConsensusError::BadFee("coinstake claims too much"));
                    }
                } else {
                    if value_in < value_out {
                        return Err(ConsensusError::BadFee("inputs below outputs"));
                    }
                    fees += value_in - value_out;
                }
                value_in_total += value_in;

                self.verify_input_scripts(tx, &resolved)?;

                // All checks passed: consume the inputs.
                let mut tx_undo = TxUndo::default();
                for (input_index, _) in &resolved {
                    let input = &tx.inputs[*input_index];
                    let mut coins = view
                        .coins(&input.prevout.hash)?
                        .ok_or(ConsensusError::DoubleSpend(input.prevout))?;
                    let mut entry = TxInUndo::default();
                    if !coins.spend(&input.prevout, &mut entry) {
                        return Err(ConsensusError::DoubleSpend(input.prevout));
                    }
                    view.set_coins(&input.prevout.hash, coins)?;
                    tx_undo.prevouts.push(entry);
                }
                undo.tx_undos.push(tx_undo);
            }

            // Create the new coin record.
            view.set_coins(&txid, Coins::from_tx(tx, height, block_time))?;
        }

        // The coinbase may claim the subsidy plus collected fees.
        if block.is_proof_of_work() {
            let allowed =
                rewards::proof_of_work_reward(block.header.bits, fees, self.network);
            if block.transactions[0].value_out() > allowed {
                return Err(ConsensusError::BadFee("coinbase claims too much"));
            }
        }

        // Write the undo record beside the block data.
        let undo_payload = undo.chain_serialize_to_vec()?;
        let node_file = self.index.node(idx).file;
        let undo_pos = self.files.append_undo(node_file, &undo_payload)?;
        let parent_supply = self.index.node(idx).prev
            .map(|parent| self.index.node(parent).money_supply)
            .unwrap_or(0);
        {
            let prev_hash = self.index.node(idx).header.previous_block_hash;
            let node = self.index.node_mut(idx);
            node.undo_pos = undo_pos.pos;
            node.status.set_have_undo();
            node.status.raise(ValidityStage::Scripts);
            node.mint = value_out_total - value_in_total + fees;
            node.money_supply = parent_supply + value_out_total - value_in_total;
            let disk = node.to_disk(prev_hash);
            self.store.write_block_index(&disk)?;
        }
        self.store
            .write_block_file_info(node_file, self.files.info())?;

        view.set_best_block(self.index.node(idx).hash)?;
        Ok(())
    }

    /// Verify every input script of `tx`, fanning the work out over a
    /// scoped thread per chunk of inputs.
    fn verify_input_scripts(
        &self,
        tx: &Transaction,
        resolved: &[(usize, Coins)],
    ) -> Result<(), ConsensusError> {
        let scripts: Vec<(usize, Script)> = resolved
            .iter()
            .map(|(input_index, coins)| {
                (
                    *input_index,
                    coins.outputs[tx.inputs[*input_index].prevout.index as usize]
                        .script_pubkey
                        .clone(),
                )
            })
            .collect();

        if scripts.len() <= 1 {
            for (input_index, prev_script) in &scripts {
                script::verify_script(
                    &tx.inputs[*input_index].script_sig,
                    prev_script,
                    tx,
                    *input_index,
                )
                .map_err(|error| ConsensusError::ScriptFailure(*input_index, error))?;
            }
            return Ok(());
        }

        let workers = num_cpus::get().max(1);
        let chunk = (scripts.len() + workers - 1) / workers;
        let mut failure: Option<ConsensusError> = None;
        std::thread::scope(|scope| {
            let handles: Vec<_> = scripts
                .chunks(chunk)
                .map(|chunk| {
                    scope.spawn(move || {
                        for (input_index, prev_script) in chunk {
                            script::verify_script(
                                &tx.inputs[*input_index].script_sig,
                                prev_script,
                                tx,
                                *input_index,
                            )
                            .map_err(|error| {
                                ConsensusError::ScriptFailure(*input_index, error)
                            })?;
                        }
                        Ok(())
                    })
                })
                .collect();
            for handle in handles {
                if let Err(error) = handle.join().expect("script worker does not panic") {
                    failure.get_or_insert(error);
                }
            }
        });
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Reverse `block`'s coin mutations using its undo record.
    fn disconnect_block(
        &mut self,
        idx: usize,
        block: &Block,
        view: &mut CachedView<StoreView>,
    ) -> Result<(), ConsensusError> {
        let node = self.index.node(idx);
        if !node.status.has_undo() {
            return Err(ConsensusError::State(format!(
                "no undo data for block {}",
                node.hash
            )));
        }
        let undo_payload = self.files.read_undo(FlatFilePos {
            file: node.file,
            pos: node.undo_pos,
        })?;
        let undo = BlockUndo::chain_deserialize(&undo_payload[..])?;
        if undo.tx_undos.len() + 1 != block.transactions.len() {
            return Err(ConsensusError::State(
                "undo record does not match block".into(),
            ));
        }

        for (tx_index, tx) in block.transactions.iter().enumerate().rev() {
            let txid = tx.hash();
            // Remove the outputs this transaction created.
            view.set_coins(&txid, Coins::pruned())?;

            if tx.is_coinbase() {
                continue;
            }
            let tx_undo = &undo.tx_undos[tx_index - 1];
            if tx_undo.prevouts.len() != tx.inputs.len() {
                return Err(ConsensusError::State(
                    "undo record does not match transaction".into(),
                ));
            }
            for (input_index, input) in tx.inputs.iter().enumerate().rev() {
                let entry = &tx_undo.prevouts[input_index];
                let mut coins = view.coins(&input.prevout.hash)?.unwrap_or_else(Coins::pruned);
                if entry.has_metadata() {
                    // The spend consumed the record entirely; resurrect its
                    // metadata.
                    coins.coinbase = entry.coinbase;
                    coins.coinstake = entry.coinstake;
                    coins.height = entry.height;
                    coins.version = entry.version;
                    coins.time = entry.time;
                    coins.block_time = entry.block_time;
                }
                while coins.outputs.len() <= input.prevout.index as usize {
                    coins.outputs.push(vireo_chain::transparent::Output::null());
                }
                coins.outputs[input.prevout.index as usize] = entry.output.clone();
                view.set_coins(&input.prevout.hash, coins)?;
            }
        }

        view.set_best_block(block.header.previous_block_hash)?;
        Ok(())
    }

    // --- reorganization ---------------------------------------------------

    /// Make `new_best` the active tip: disconnect back to the fork point,
    /// connect forward, and commit the whole coin delta atomically.
    fn set_best_chain(&mut self, new_best: usize) -> Result<(), ConsensusError> {
        let fork = self.find_fork(new_best);

        // Plan the two walks before touching anything.
        let mut to_disconnect: Vec<usize> = Vec::new();
        if let Some(best) = self.best {
            let mut cursor = Some(best);
            while cursor != fork {
                let idx = cursor.expect("fork is an ancestor of the old tip");
                to_disconnect.push(idx);
                cursor = self.index.node(idx).prev;
            }
        }
        let mut to_connect: Vec<usize> = Vec::new();
        {
            let mut cursor = Some(new_best);
            while cursor != fork {
                let idx = cursor.expect("fork is an ancestor of the new tip");
                to_connect.push(idx);
                cursor = self.index.node(idx).prev;
            }
            to_connect.reverse();
        }

        if !to_disconnect.is_empty() {
            info!(
                disconnecting = to_disconnect.len(),
                connecting = to_connect.len(),
                "reorganizing the best chain"
            );
            metrics::counter!("chain.reorganizations", 1);
        }

        // Stage every coin change in one cache over the store.
        let mut view = CachedView::new(self.store.clone());
        for &idx in &to_disconnect {
            let block = self.read_block(idx)?;
            self.disconnect_block(idx, &block, &mut view)?;
        }
        let mut connected: Vec<(usize, Block)> = Vec::new();
        for &idx in &to_connect {
            let block = self.read_block(idx)?;
            if let Err(error) = self.connect_block(idx, &block, &mut view) {
                // The branch is bad from here on; nothing was committed, so
                // the old tip remains intact.
                self.invalid_block_found(idx, &error)?;
                return Err(error);
            }
            connected.push((idx, block));
        }

        // The single externally visible transition.
        view.flush()?;
        self.store.sync()?;

        // Rewire the active-successor pointers.
        for &idx in &to_disconnect {
            self.index.node_mut(idx).next = None;
        }
        let mut previous = fork;
        for &idx in &to_connect {
            if let Some(prev) = previous {
                self.index.node_mut(prev).next = Some(idx);
            }
            previous = Some(idx);
        }
        self.best = Some(new_best);

        // Connected transactions leave the mempool.
        {
            let mut mempool = self.mempool.lock().expect("mempool lock is not poisoned");
            for (_, block) in &connected {
                for tx in &block.transactions {
                    mempool.remove(&tx.hash());
                }
            }
        }

        let tip = self.index.node(new_best);
        info!(
            height = tip.height,
            hash = %tip.hash,
            supply = tip.money_supply,
            "new best chain"
        );
        metrics::gauge!("chain.height", tip.height as i64);
        Ok(())
    }

    /// The lowest common ancestor of the current tip and `candidate`, or
    /// `None` when there is no current tip.
    fn find_fork(&self, candidate: usize) -> Option<usize> {
        let best = self.best?;
        let mut a = best;
        let mut b = candidate;
        while self.index.node(a).height > self.index.node(b).height {
            a = self.index.node(a).prev?;
        }
        while self.index.node(b).height > self.index.node(a).height {
            b = self.index.node(b).prev?;
        }
        while a != b {
            a = self.index.node(a).prev?;
            b = self.index.node(b).prev?;
        }
        Some(a)
    }

    /// Record a consensus failure on `idx` and remember the best invalid
    /// trust seen.
    fn invalid_block_found(&mut self, idx: usize, error: &ConsensusError) -> Result<(), ConsensusError> {
        let prev_hash = self.index.node(idx).header.previous_block_hash;
        let node = self.index.node_mut(idx);
        node.status.set_failed();
        let trust = node.chain_trust;
        let disk = node.to_disk(prev_hash);
        warn!(hash = %disk.block_hash, %error, "marking block invalid");
        self.store.write_block_index(&disk)?;
        if trust > self.best_invalid_trust {
            self.best_invalid_trust = trust;
            self.store.write_best_invalid_trust(trust)?;
        }
        // Descendants already indexed inherit the failure.
        let failed_hash = disk.block_hash;
        let descendants: Vec<usize> = self
            .index
            .iter()
            .filter(|(i, node)| {
                *i != idx
                    && self
                        .index
                        .ancestors(*i)
                        .any(|ancestor| self.index.node(ancestor).hash == failed_hash)
                    && !node.status.is_failed()
            })
            .map(|(i, _)| i)
            .collect();
        for descendant in descendants {
            self.index.node_mut(descendant).status.set_failed_child();
        }
        metrics::counter!("chain.blocks.invalid", 1);
        Ok(())
    }

    // --- mempool admission ------------------------------------------------

    /// Validate `tx` for relay and admit it to the mempool.
    pub fn accept_to_mempool(&mut self, tx: Transaction) -> Result<(), ConsensusError> {
        checks::check_transaction(&tx)?;
        if tx.is_coinbase() {
            return Err(ConsensusError::BadTxStructure("coinbase as free transaction"));
        }
        if tx.is_coinstake() {
            return Err(ConsensusError::BadTxStructure("coinstake as free transaction"));
        }
        let height = self.best_height().map(|h| h + 1).unwrap_or(0);
        if !tx.is_final(height, self.clock.adjusted_time()) {
            return Err(ConsensusError::BadTxStructure("non-final transaction"));
        }
        // Standardness gates relay only; consensus does not require it.
        if !checks::is_standard_tx(&tx) {
            return Err(ConsensusError::BadTxStructure("non-standard transaction"));
        }

        let txid = tx.hash();
        let mempool = self.mempool.clone();
        let mut mempool = mempool.lock().expect("mempool lock is not poisoned");
        if mempool.contains(&txid) {
            return Ok(());
        }
        // Reject conflicts with pending spends.
        for input in &tx.inputs {
            if mempool.spender_of(&input.prevout).is_some() {
                return Err(ConsensusError::DoubleSpend(input.prevout));
            }
        }

        let mut store = self.store.clone();
        let mut view = MempoolView::new(&mut store, &mempool);
        let mut value_in: Amount = 0;
        let mut resolved: Vec<(usize, Coins)> = Vec::with_capacity(tx.inputs.len());
        for (input_index, input) in tx.inputs.iter().enumerate() {
            let coins = view
                .coins(&input.prevout.hash)?
                .filter(|coins| coins.is_available(input.prevout.index))
                .ok_or(ConsensusError::MissingInputs)?;
            value_in += coins.outputs[input.prevout.index as usize].value;
            if !script::is_input_standard(
                &input.script_sig,
                &coins.outputs[input.prevout.index as usize].script_pubkey,
            ) {
                return Err(ConsensusError::BadTxStructure("non-standard input"));
            }
            resolved.push((input_index, coins));
        }
        let value_out = tx.value_out();
        if value_in < value_out {
            return Err(ConsensusError::BadFee("inputs below outputs"));
        }
        let min_fee = (1 + tx.len() as Amount / 1000) * vireo_chain::parameters::MIN_TX_FEE;
        if value_in - value_out < min_fee {
            return Err(ConsensusError::BadFee("fee below relay minimum"));
        }

        for (input_index, coins) in &resolved {
            let input = &tx.inputs[*input_index];
            script::verify_script(
                &input.script_sig,
                &coins.outputs[input.prevout.index as usize].script_pubkey,
                &tx,
                *input_index,
            )
            .map_err(|error| ConsensusError::ScriptFailure(*input_index, error))?;
        }

        debug!(%txid, "accepted to mempool");
        mempool.insert_unchecked(txid, tx);
        Ok(())
    }
}

/// Locate `txid` inside `block`, returning the transaction and its byte
/// offset from the start of the serialized block (the kernel commits to
/// this offset).
fn transaction_offset(block: &Block, txid: &transaction::Hash) -> Option<(Transaction, u32)> {
    let mut offset = Header::len() + vireo_chain::CompactInt::size(block.transactions.len());
    for tx in &block.transactions {
        if tx.hash() == *txid {
            return Some(((**tx).clone(), offset as u32));
        }
        offset += tx.len();
    }
    None
}
