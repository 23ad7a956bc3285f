//! End-to-end chain scenarios over a deterministic test chain.
//!
//! The builder mines real (test-network difficulty) proof-of-work blocks
//! and forges valid proof-of-stake blocks, then drives them through
//! [`ChainState::process_block`] exactly as network blocks would arrive.

use std::sync::Arc;

use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use tempdir::TempDir;

use vireo_chain::amount::{Amount, CENT, COIN};
use vireo_chain::block::{Block, Header};
use vireo_chain::parameters::Network;
use vireo_chain::script;
use vireo_chain::transaction::Transaction;
use vireo_chain::transparent::{Input, OutPoint, Output, Script};
use vireo_state::{CoinsView, Config};

use crate::chain::{ChainState, ProcessOutcome};
use crate::difficulty::next_target_required;
use crate::error::ConsensusError;
use crate::rewards;
use crate::time::FixedClock;

/// Block spacing for the test chain: generous enough that staked outputs
/// age past the thirty-day kernel minimum within a few blocks.
const SPACING: u32 = 15 * 24 * 60 * 60;

const GENESIS_TIME: u32 = 1_600_000_000;

/// A deterministic clock far ahead of every test block.
fn test_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock(3_000_000_000))
}

struct TestChain {
    state: ChainState,
    secret: SecretKey,
    public: PublicKey,
    _dir: TempDir,
}

impl TestChain {
    /// A fresh test-network chain with its genesis connected.
    fn new(name: &str) -> TestChain {
        vireo_test::init();
        let dir = TempDir::new(name).unwrap();
        let config = Config::ephemeral(dir.path().to_path_buf());
        let mut state = ChainState::open(&config, Network::Testnet, test_clock()).unwrap();

        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let public = PublicKey::from_secret_key(&secp, &secret);

        let genesis = {
            let bits = next_target_required(state.chain_index(), None, false, Network::Testnet);
            let coinbase = Transaction::new(
                1,
                GENESIS_TIME,
                vec![Input::new(OutPoint::null(), Script(vec![0x01, 0x02]))],
                vec![Output::new(0, p2pk(&public))],
                0,
            );
            let mut block = assemble(
                vireo_chain::block::Hash::zero(),
                GENESIS_TIME,
                bits,
                vec![coinbase],
            );
            mine(&mut block);
            block
        };
        state.init_genesis(&genesis).unwrap();
        TestChain {
            state,
            secret,
            public,
            _dir: dir,
        }
    }

    fn tip_hash(&self) -> vireo_chain::block::Hash {
        self.state.best_hash().unwrap()
    }

    fn tip_time(&self) -> u32 {
        let idx = self.state.chain_index().lookup(&self.tip_hash()).unwrap();
        self.state.chain_index().node(idx).header.time
    }

    /// Build (but do not submit) a proof-of-work block on `parent` at
    /// `time`, with `marker` distinguishing equal-shape blocks on different
    /// branches.
    fn build_pow(
        &self,
        parent: vireo_chain::block::Hash,
        time: u32,
        marker: u8,
        extra: Vec<Transaction>,
    ) -> Block {
        let parent_idx = self.state.chain_index().lookup(&parent).unwrap();
        let bits = next_target_required(
            self.state.chain_index(),
            Some(parent_idx),
            false,
            Network::Testnet,
        );
        let height = self.state.chain_index().node(parent_idx).height + 1;
        let reward = rewards::proof_of_work_reward(bits, 0, Network::Testnet);
        let mut script_sig = vec![0x05];
        script_sig.extend_from_slice(&height.to_le_bytes());
        script_sig.push(marker);
        let coinbase = Transaction::new(
            1,
            time,
            vec![Input::new(OutPoint::null(), Script(script_sig))],
            vec![Output::new(reward, p2pk(&self.public))],
            0,
        );
        let mut transactions = vec![coinbase];
        transactions.extend(extra);
        let mut block = assemble(parent, time, bits, transactions);
        mine(&mut block);
        block
    }

    /// Extend the active tip with one mined proof-of-work block.
    fn extend_pow(&mut self, marker: u8, extra: Vec<Transaction>) -> Block {
        let block = self.build_pow(self.tip_hash(), self.tip_time() + SPACING, marker, extra);
        assert_eq!(
            self.state.process_block(block.clone()).unwrap(),
            ProcessOutcome::Accepted
        );
        block
    }

    /// Grow the chain by `count` empty proof-of-work blocks.
    fn grow(&mut self, count: usize) -> Vec<Block> {
        (0..count).map(|_| self.extend_pow(0, Vec::new())).collect()
    }

    /// A signed transaction spending output 0 of `prev` back to our key,
    /// leaving `fee` for the block.
    fn spend(&self, prev: &Transaction, time: u32, fee: Amount) -> Transaction {
        let prev_script = p2pk(&self.public);
        let mut tx = Transaction::new(
            1,
            time,
            vec![Input::new(
                OutPoint {
                    hash: prev.hash(),
                    index: 0,
                },
                Script::default(),
            )],
            vec![Output::new(prev.outputs[0].value - fee, prev_script.clone())],
            0,
        );
        tx.inputs[0].script_sig = sign_input(&self.secret, &prev_script, &tx, 0);
        tx
    }

    /// Build (but do not submit) a proof-of-stake block staking output 0 of
    /// `staked`, which must be mature and aged. `marker` varies the
    /// coinbase so otherwise-identical blocks get distinct hashes.
    fn build_pos(
        &self,
        parent: vireo_chain::block::Hash,
        time: u32,
        staked: &Transaction,
        marker: u8,
    ) -> Block {
        let parent_idx = self.state.chain_index().lookup(&parent).unwrap();
        let bits = next_target_required(
            self.state.chain_index(),
            Some(parent_idx),
            true,
            Network::Testnet,
        );
        let height = self.state.chain_index().node(parent_idx).height + 1;

        let mut script_sig = vec![0x05];
        script_sig.extend_from_slice(&height.to_le_bytes());
        script_sig.push(marker);
        let coinbase = Transaction::new(
            1,
            time,
            vec![Input::new(OutPoint::null(), Script(script_sig))],
            vec![Output::empty()],
            0,
        );

        let prev_script = p2pk(&self.public);
        let mut coinstake = Transaction::new(
            1,
            time,
            vec![Input::new(
                OutPoint {
                    hash: staked.hash(),
                    index: 0,
                },
                Script::default(),
            )],
            vec![
                Output::empty(),
                Output::new(staked.outputs[0].value, prev_script.clone()),
            ],
            0,
        );
        coinstake.inputs[0].script_sig = sign_input(&self.secret, &prev_script, &coinstake, 0);

        let mut block = assemble(parent, time, bits, vec![coinbase, coinstake]);
        // The generator signs the block hash with the coinstake key.
        let secp = Secp256k1::new();
        let message = Message::from_slice(&block.hash().0).unwrap();
        block.signature = secp.sign(&message, &self.secret).serialize_der().to_vec();
        block
    }
}

fn p2pk(public: &PublicKey) -> Script {
    let mut script = vec![33];
    script.extend_from_slice(&public.serialize());
    script.push(script::OP_CHECKSIG);
    Script(script)
}

fn sign_input(
    secret: &SecretKey,
    prev_script: &Script,
    tx: &Transaction,
    input_index: usize,
) -> Script {
    let secp = Secp256k1::new();
    let hash = script::signature_hash(prev_script, tx, input_index, script::SIGHASH_ALL);
    let message = Message::from_slice(&hash).unwrap();
    let mut sig = secp.sign(&message, secret).serialize_der().to_vec();
    sig.push(script::SIGHASH_ALL);
    let mut script_sig = vec![sig.len() as u8];
    script_sig.extend_from_slice(&sig);
    Script(script_sig)
}

fn assemble(
    parent: vireo_chain::block::Hash,
    time: u32,
    bits: vireo_chain::work::difficulty::CompactDifficulty,
    transactions: Vec<Transaction>,
) -> Block {
    let transactions: Vec<_> = transactions.into_iter().map(Arc::new).collect();
    let merkle_root = transactions.iter().map(|tx| tx.hash()).collect();
    Block {
        header: Header {
            version: Header::CURRENT_VERSION,
            previous_block_hash: parent,
            merkle_root,
            time,
            bits,
            nonce: 0,
        },
        transactions,
        signature: Vec::new(),
    }
}

/// Grind the nonce until the header hash meets its own target.
fn mine(block: &mut Block) {
    let target = block.header.bits.to_expanded().unwrap();
    while block.hash() > target {
        block.header.nonce += 1;
    }
}

#[test]
fn genesis_acceptance() {
    let chain = TestChain::new("vireo-genesis");
    assert_eq!(chain.state.best_height(), Some(0));
    assert_eq!(chain.state.money_supply(), 0);

    // The coin set holds exactly the genesis coinbase.
    let genesis_idx = chain.state.chain_index().lookup(&chain.tip_hash()).unwrap();
    assert_eq!(chain.state.chain_index().node(genesis_idx).height, 0);
    let genesis = chain.state.chain_index().node(genesis_idx);
    assert!(genesis.is_proof_of_work());
}

#[test]
fn blocks_accumulate_supply_and_height() {
    let mut chain = TestChain::new("vireo-growth");
    let blocks = chain.grow(3);
    assert_eq!(chain.state.best_height(), Some(3));

    // Each block minted the full subsidy.
    let reward = 100 * COIN;
    assert_eq!(chain.state.money_supply(), 3 * reward);

    // Every coinbase is in the coin set, unspent.
    for block in &blocks {
        let coins = chain
            .state
            .coins(&block.transactions[0].hash())
            .unwrap()
            .expect("coinbase in the coin set");
        assert!(coins.is_available(0));
        assert!(coins.coinbase);
    }
}

#[test]
fn orphan_blocks_wait_for_their_parent() {
    let mut chain = TestChain::new("vireo-orphans");
    let tip = chain.tip_hash();
    let t1 = chain.tip_time() + SPACING;
    let block1 = chain.build_pow(tip, t1, 0, Vec::new());
    let block2 = chain.build_pow_on(&block1, t1 + SPACING, 0);

    // The child arrives first and is held.
    assert_eq!(
        chain.state.process_block(block2.clone()).unwrap(),
        ProcessOutcome::Orphaned
    );
    assert_eq!(chain.state.best_height(), Some(0));

    // The parent frees it.
    assert_eq!(
        chain.state.process_block(block1).unwrap(),
        ProcessOutcome::Accepted
    );
    assert_eq!(chain.state.best_height(), Some(2));
    assert_eq!(chain.state.best_hash(), Some(block2.hash()));
}

impl TestChain {
    /// Build a proof-of-work child of an unsubmitted `parent` block.
    fn build_pow_on(&self, parent: &Block, time: u32, marker: u8) -> Block {
        // The parent is not indexed, so derive context from its own chain:
        // on the test network the target pins to the limit and the reward
        // to the cap for this shape of chain.
        let bits = parent.header.bits;
        let parent_height_marker = time.to_le_bytes();
        let mut script_sig = vec![0x05];
        script_sig.extend_from_slice(&parent_height_marker);
        script_sig.push(marker);
        let reward = rewards::proof_of_work_reward(bits, 0, Network::Testnet);
        let coinbase = Transaction::new(
            1,
            time,
            vec![Input::new(OutPoint::null(), Script(script_sig))],
            vec![Output::new(reward, p2pk(&self.public))],
            0,
        );
        let mut block = assemble(parent.hash(), time, bits, vec![coinbase]);
        mine(&mut block);
        block
    }
}

#[test]
fn simple_reorg_switches_to_longer_branch() {
    let mut chain = TestChain::new("vireo-reorg");
    let genesis = chain.tip_hash();
    let base_time = chain.tip_time();

    // Branch A: three blocks on genesis.
    let mut branch_a = Vec::new();
    let mut parent = genesis;
    for i in 1..=3u32 {
        let block = chain.build_pow(parent, base_time + i * SPACING, 0xa0, Vec::new());
        parent = block.hash();
        chain.state.process_block(block.clone()).unwrap();
        branch_a.push(block);
    }
    assert_eq!(chain.state.best_hash(), Some(parent));

    // Branch B: four blocks sharing only genesis. The first three carry no
    // more trust than the tip, so the active chain holds (earlier arrival
    // wins ties).
    let mut branch_b = Vec::new();
    let mut parent_b = genesis;
    for i in 1..=4u32 {
        let block = chain.build_pow(parent_b, base_time + i * SPACING, 0xb0, Vec::new());
        parent_b = block.hash();
        chain.state.process_block(block.clone()).unwrap();
        if i < 4 {
            assert_eq!(chain.state.best_hash(), Some(branch_a[2].hash()));
        }
        branch_b.push(block);
    }

    // The fourth block outweighs the tip: the chain reorganizes.
    assert_eq!(chain.state.best_hash(), Some(branch_b[3].hash()));
    assert_eq!(chain.state.best_height(), Some(4));

    // The coin set reflects branch B alone.
    for block in &branch_a {
        assert_eq!(
            chain.state.coins(&block.transactions[0].hash()).unwrap(),
            None,
            "disconnected coinbase must vanish from the coin set"
        );
    }
    for block in &branch_b {
        let coins = chain
            .state
            .coins(&block.transactions[0].hash())
            .unwrap()
            .expect("connected coinbase in the coin set");
        assert!(coins.is_available(0));
    }

    // Reorganize back: extend branch A past branch B and verify the
    // disconnected records are resurrected byte-for-byte.
    let mut parent_a = branch_a[2].hash();
    for i in 4..=6u32 {
        let block = chain.build_pow(parent_a, base_time + i * SPACING, 0xa0, Vec::new());
        parent_a = block.hash();
        chain.state.process_block(block).unwrap();
    }
    assert_eq!(chain.state.best_height(), Some(6));
    for block in &branch_a {
        let coins = chain
            .state
            .coins(&block.transactions[0].hash())
            .unwrap()
            .expect("reconnected coinbase in the coin set");
        assert!(coins.is_available(0));
        assert!(coins.coinbase);
    }
    for block in &branch_b {
        assert_eq!(chain.state.coins(&block.transactions[0].hash()).unwrap(), None);
    }
}

#[test]
fn double_spend_block_is_rejected() {
    let mut chain = TestChain::new("vireo-doublespend");
    let blocks = chain.grow(8);
    let victim = &blocks[0].transactions[0];

    let time = chain.tip_time() + SPACING;
    let spend_a = chain.spend(victim, time, CENT);
    // Same prevout, different fee: a distinct txid spending the same coin.
    let spend_b = chain.spend(victim, time, 2 * CENT);

    let tip_before = chain.tip_hash();
    let supply_before = chain.state.money_supply();
    let block = chain.build_pow(tip_before, time, 0, vec![spend_a, spend_b]);
    let bad_hash = block.hash();

    match chain.state.process_block(block) {
        Err(ConsensusError::DoubleSpend(outpoint)) => {
            assert_eq!(outpoint.hash, victim.hash());
        }
        other => panic!("expected DoubleSpend, got {:?}", other.map(|_| ())),
    }

    // The offender carries a full denial-of-service score, the chain did
    // not move, and the victim output is untouched.
    assert_eq!(
        ConsensusError::DoubleSpend(OutPoint::null()).dos_score(),
        100
    );
    assert_eq!(chain.state.best_hash(), Some(tip_before));
    assert_eq!(chain.state.money_supply(), supply_before);
    let coins = chain.state.coins(&victim.hash()).unwrap().unwrap();
    assert!(coins.is_available(0));

    // The block is remembered as failed.
    let idx = chain.state.chain_index().lookup(&bad_hash).unwrap();
    assert!(chain.state.chain_index().node(idx).status.is_failed());
}

#[test]
fn immature_generation_spend_is_rejected() {
    let mut chain = TestChain::new("vireo-immature");
    let blocks = chain.grow(8);
    // The block at height 9 may spend generation outputs up to height 3
    // (maturity 6); height 4 is one block short.
    let immature = &blocks[3].transactions[0];

    let time = chain.tip_time() + SPACING;
    let spend = chain.spend(immature, time, CENT);
    let block = chain.build_pow(chain.tip_hash(), time, 0, vec![spend]);

    match chain.state.process_block(block) {
        Err(ConsensusError::ImmatureCoin) => {}
        other => panic!("expected ImmatureCoin, got {:?}", other.map(|_| ())),
    }
    // The coin is still unspent.
    let coins = chain.state.coins(&immature.hash()).unwrap().unwrap();
    assert!(coins.is_available(0));
}

#[test]
fn mature_generation_spend_connects() {
    let mut chain = TestChain::new("vireo-mature");
    let blocks = chain.grow(8);
    let mature = &blocks[2].transactions[0];

    let time = chain.tip_time() + SPACING;
    let spend = chain.spend(mature, time, CENT);
    let spend_hash = spend.hash();
    let block = chain.build_pow(chain.tip_hash(), time, 0, vec![spend]);
    chain.state.process_block(block).unwrap();

    assert_eq!(chain.state.best_height(), Some(9));
    // The old output is spent, the new one exists.
    let old = chain.state.coins(&mature.hash()).unwrap().unwrap();
    assert!(!old.is_available(0));
    let new = chain.state.coins(&spend_hash).unwrap().unwrap();
    assert!(new.is_available(0));
}

#[test]
fn proof_of_stake_block_extends_the_chain() {
    let mut chain = TestChain::new("vireo-stake");
    let blocks = chain.grow(8);
    // Stake the height-1 coinbase: eight spacings old, far past the
    // minimum kernel age, and mature.
    let staked = &blocks[0].transactions[0];

    let time = chain.tip_time() + SPACING;
    let block = chain.build_pos(chain.tip_hash(), time, staked, 0xfe);
    let stake_prevout = OutPoint {
        hash: staked.hash(),
        index: 0,
    };

    assert_eq!(
        chain.state.process_block(block.clone()).unwrap(),
        ProcessOutcome::Accepted
    );
    assert_eq!(chain.state.best_height(), Some(9));
    assert_eq!(chain.state.best_hash(), Some(block.hash()));

    // The stake is recorded against replays.
    assert!(chain.state.stake_seen(&stake_prevout, time));
    let idx = chain.state.chain_index().lookup(&block.hash()).unwrap();
    assert!(chain.state.chain_index().node(idx).is_proof_of_stake());

    // A zero-reward coinstake leaves the supply untouched.
    let reward = 100 * COIN;
    assert_eq!(chain.state.money_supply(), 8 * reward);

    // A different block claiming the same (prevout, stake time) pair is
    // refused outright.
    let replay = chain.build_pos(chain.tip_hash(), time, staked, 0xfd);
    match chain.state.process_block(replay) {
        Err(ConsensusError::DuplicateStake(outpoint)) => {
            assert_eq!(outpoint, stake_prevout)
        }
        other => panic!("expected DuplicateStake, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn mempool_admission_and_conflicts() {
    let mut chain = TestChain::new("vireo-mempool");
    let blocks = chain.grow(8);
    let mature = &blocks[0].transactions[0];

    let time = chain.tip_time() + 100;
    let spend = chain.spend(mature, time, CENT);
    chain.state.accept_to_mempool(spend.clone()).unwrap();
    assert!(chain.state.mempool().lock().unwrap().contains(&spend.hash()));

    // A conflicting spend of the same output is rejected.
    let conflict = chain.spend(mature, time + 1, 2 * CENT);
    match chain.state.accept_to_mempool(conflict) {
        Err(ConsensusError::DoubleSpend(_)) => {}
        other => panic!("expected DoubleSpend, got {:?}", other.map(|_| ())),
    }

    // Connecting a block with the transaction clears it from the pool.
    let block = chain.build_pow(
        chain.tip_hash(),
        chain.tip_time() + SPACING,
        0,
        vec![spend.clone()],
    );
    chain.state.process_block(block).unwrap();
    assert!(!chain.state.mempool().lock().unwrap().contains(&spend.hash()));
}

#[test]
fn fee_floor_gates_the_mempool() {
    let mut chain = TestChain::new("vireo-feefloor");
    let blocks = chain.grow(8);
    let mature = &blocks[0].transactions[0];

    let free_ride = chain.spend(mature, chain.tip_time() + 100, 0);
    match chain.state.accept_to_mempool(free_ride) {
        Err(ConsensusError::BadFee(_)) => {}
        other => panic!("expected BadFee, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn best_block_pointer_is_consistent_with_the_store() {
    let mut chain = TestChain::new("vireo-bestblock");
    chain.grow(2);

    // The persistent best block always matches the in-memory tip: the
    // transition is atomic per (re)organization.
    let mut store = chain.state.store_handle();
    assert_eq!(store.best_block().unwrap(), chain.state.best_hash());
}
