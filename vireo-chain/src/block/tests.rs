use std::sync::Arc;

use super::*;
use crate::transaction::Transaction;
use crate::transparent::{Input, Output, Script};
use crate::work::difficulty::CompactDifficulty;
use crate::ChainDeserializeInto;

fn coinbase(time: u32) -> Transaction {
    Transaction::new(
        1,
        time,
        vec![Input::new(OutPoint::null(), Script(vec![0x01, 0x02]))],
        vec![Output::new(50 * crate::amount::COIN, Script(vec![0x51]))],
        0,
    )
}

fn coinstake(time: u32, prevout: OutPoint) -> Transaction {
    Transaction::new(
        1,
        time,
        vec![Input::new(prevout, Script::default())],
        vec![
            Output::empty(),
            Output::new(50 * crate::amount::COIN, Script(vec![0x51])),
        ],
        0,
    )
}

fn block_with(transactions: Vec<Transaction>) -> Block {
    let transactions: Vec<_> = transactions.into_iter().map(Arc::new).collect();
    let merkle_root = transactions.iter().map(|tx| tx.hash()).collect();
    Block {
        header: Header {
            version: Header::CURRENT_VERSION,
            previous_block_hash: Hash::zero(),
            merkle_root,
            time: 1_600_000_600,
            bits: CompactDifficulty(0x1d00ffff),
            nonce: 0,
        },
        transactions,
        signature: Vec::new(),
    }
}

#[test]
fn proof_type_classification() {
    let pow = block_with(vec![coinbase(1_600_000_600)]);
    assert!(pow.is_proof_of_work());
    assert_eq!(pow.proof_of_stake(), None);

    let parent = coinbase(1_600_000_000);
    let prevout = OutPoint {
        hash: parent.hash(),
        index: 0,
    };
    let pos = block_with(vec![coinbase(1_600_000_600), coinstake(1_600_000_600, prevout)]);
    assert!(pos.is_proof_of_stake());
    assert_eq!(pos.proof_of_stake(), Some((prevout, 1_600_000_600)));
}

#[test]
fn merkle_root_matches_header() {
    let block = block_with(vec![coinbase(1_600_000_600)]);
    assert_eq!(block.merkle_root(), block.header.merkle_root);
}

#[test]
fn roundtrip() {
    let parent = coinbase(1_600_000_000);
    let prevout = OutPoint {
        hash: parent.hash(),
        index: 0,
    };
    let mut block = block_with(vec![coinbase(1_600_000_600), coinstake(1_600_000_600, prevout)]);
    block.signature = vec![0xde, 0xad, 0xbe, 0xef];

    let bytes = block.chain_serialize_to_vec().unwrap();
    let decoded: Block = (&bytes[..]).chain_deserialize_into().unwrap();
    assert_eq!(decoded, block);
    assert_eq!(decoded.hash(), block.hash());
}

#[test]
fn max_transaction_time() {
    let block = block_with(vec![coinbase(1_600_000_600), coinbase(1_600_000_700)]);
    assert_eq!(block.max_transaction_time(), 1_600_000_700);
}
