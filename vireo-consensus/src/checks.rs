//! Context-free consensus check functions.
//!
//! Everything here can be decided from the block or transaction alone:
//! no chain state, no UTXO view. Contextual checks (difficulty, median
//! time, input resolution) live in [`crate::chain`].

use std::collections::HashSet;

use vireo_chain::amount::money_range;
use vireo_chain::block::Block;
use vireo_chain::parameters::{
    MAX_BLOCK_SIGOPS, MAX_BLOCK_SIZE, MAX_COINBASE_SCRIPT_LEN, MIN_COINBASE_SCRIPT_LEN,
};
use vireo_chain::transaction::Transaction;
use vireo_chain::work::difficulty::ExpandedDifficulty;
use vireo_chain::{script, ChainSerialize};

use crate::error::ConsensusError;

/// Context-independent transaction validity.
pub fn check_transaction(tx: &Transaction) -> Result<(), ConsensusError> {
    if tx.inputs.is_empty() {
        return Err(ConsensusError::BadTxStructure("no inputs"));
    }
    if tx.outputs.is_empty() {
        return Err(ConsensusError::BadTxStructure("no outputs"));
    }
    if tx.len() > MAX_BLOCK_SIZE {
        return Err(ConsensusError::BadTxStructure("oversized transaction"));
    }

    let mut value_out: i64 = 0;
    for (index, output) in tx.outputs.iter().enumerate() {
        // The empty first output of a coinstake is the one zero-value
        // output consensus permits.
        if output.is_empty() && !(index == 0 && tx.is_coinstake()) {
            if !tx.is_coinbase() {
                return Err(ConsensusError::BadTxStructure("empty output"));
            }
        }
        if output.value < 0 {
            return Err(ConsensusError::BadTxStructure("negative output value"));
        }
        if !money_range(output.value) {
            return Err(ConsensusError::BadFee("output exceeds money range"));
        }
        value_out = value_out
            .checked_add(output.value)
            .ok_or(ConsensusError::BadFee("output sum overflows"))?;
        if !money_range(value_out) {
            return Err(ConsensusError::BadFee("output sum exceeds money range"));
        }
    }

    let mut seen_prevouts = HashSet::new();
    for input in &tx.inputs {
        if !seen_prevouts.insert(input.prevout) {
            return Err(ConsensusError::BadTxStructure("duplicate input"));
        }
    }

    if tx.is_coinbase() {
        let len = tx.inputs[0].script_sig.len();
        if !(MIN_COINBASE_SCRIPT_LEN..=MAX_COINBASE_SCRIPT_LEN).contains(&len) {
            return Err(ConsensusError::BadTxStructure(
                "coinbase script size out of range",
            ));
        }
    } else {
        for input in &tx.inputs {
            if input.prevout.is_null() {
                return Err(ConsensusError::BadTxStructure("null prevout"));
            }
        }
    }
    Ok(())
}

/// Context-independent block validity.
///
/// `check_pow` is disabled when re-checking blocks already proven from
/// disk.
pub fn check_block(block: &Block, check_pow: bool, check_merkle: bool) -> Result<(), ConsensusError> {
    if block.transactions.is_empty() {
        return Err(ConsensusError::BadHeader("block with no transactions"));
    }
    let serialized_len = block
        .chain_serialize_to_vec()
        .map_err(ConsensusError::from)?
        .len();
    if serialized_len > MAX_BLOCK_SIZE {
        return Err(ConsensusError::BadHeader("oversized block"));
    }

    if check_pow && block.is_proof_of_work() {
        check_proof_of_work(block)?;
    }

    // The first transaction must be coinbase; no other may be.
    if !block.transactions[0].is_coinbase() {
        return Err(ConsensusError::BadTxStructure("first tx is not coinbase"));
    }
    for tx in block.transactions.iter().skip(1) {
        if tx.is_coinbase() {
            return Err(ConsensusError::BadTxStructure("multiple coinbases"));
        }
    }

    // A coinstake may only appear as the second transaction.
    for (index, tx) in block.transactions.iter().enumerate() {
        if tx.is_coinstake() && index != 1 {
            return Err(ConsensusError::BadTxStructure(
                "coinstake in illegal position",
            ));
        }
        // No transaction may postdate its block.
        if (block.header.time as i64) < tx.time as i64 {
            return Err(ConsensusError::BadHeader(
                "block timestamp earlier than transaction",
            ));
        }
        check_transaction(tx)?;
    }

    // Proof-of-stake structure: the coinstake timestamp must match the
    // block, and the coinbase must pay nothing (the coinstake mints).
    if let Some((_, stake_time)) = block.proof_of_stake() {
        if stake_time != block.header.time {
            return Err(ConsensusError::BadPos(
                "coinstake timestamp differs from block",
            ));
        }
        if block.transactions[0].value_out() != 0 {
            return Err(ConsensusError::BadPos(
                "coinbase pays out in proof-of-stake block",
            ));
        }
    }

    let mut seen_txids = HashSet::new();
    for tx in &block.transactions {
        if !seen_txids.insert(tx.hash()) {
            return Err(ConsensusError::DuplicateTx);
        }
    }

    let sigops: usize = block
        .transactions
        .iter()
        .map(|tx| legacy_sig_op_count(tx))
        .sum();
    if sigops > MAX_BLOCK_SIGOPS {
        return Err(ConsensusError::BadTxStructure("too many sigops"));
    }

    if check_merkle && block.merkle_root() != block.header.merkle_root {
        return Err(ConsensusError::BadMerkle);
    }
    Ok(())
}

/// Check that the block hash satisfies the header's claimed target.
pub fn check_proof_of_work(block: &Block) -> Result<(), ConsensusError> {
    let target = block
        .header
        .bits
        .to_expanded()
        .ok_or(ConsensusError::BadHeader("unexpandable difficulty target"))?;
    if block.hash() > target {
        return Err(ConsensusError::BadPow);
    }
    Ok(())
}

/// Check the target against the network limit.
pub fn check_target_limit(
    target: ExpandedDifficulty,
    network: vireo_chain::parameters::Network,
) -> Result<(), ConsensusError> {
    if target > ExpandedDifficulty::target_difficulty_limit(network) {
        return Err(ConsensusError::BadHeader("target above network limit"));
    }
    Ok(())
}

/// Conservative sigop count over all of a transaction's scripts.
pub fn legacy_sig_op_count(tx: &Transaction) -> usize {
    let mut count = 0;
    for input in &tx.inputs {
        count += script::sig_op_count(input.script_sig.as_bytes(), false);
    }
    for output in &tx.outputs {
        count += script::sig_op_count(output.script_pubkey.as_bytes(), false);
    }
    count
}

/// Whether all outputs use standard templates.
pub fn is_standard_tx(tx: &Transaction) -> bool {
    if tx.version > Transaction::CURRENT_VERSION {
        return false;
    }
    tx.outputs
        .iter()
        .enumerate()
        .all(|(index, output)| {
            // The empty coinstake marker is not a template.
            (index == 0 && tx.is_coinstake() && output.is_empty())
                || script::is_standard(&output.script_pubkey)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vireo_chain::amount::COIN;
    use vireo_chain::block::{merkle, Header};
    use vireo_chain::transparent::{Input, OutPoint, Output, Script};
    use vireo_chain::work::difficulty::CompactDifficulty;

    fn coinbase(time: u32) -> Transaction {
        Transaction::new(
            1,
            time,
            vec![Input::new(OutPoint::null(), Script(vec![0x01, 0x02]))],
            vec![Output::new(50 * COIN, Script(vec![0x51]))],
            0,
        )
    }

    fn block_of(transactions: Vec<Transaction>, time: u32) -> Block {
        let transactions: Vec<_> = transactions.into_iter().map(Arc::new).collect();
        let merkle_root = transactions.iter().map(|tx| tx.hash()).collect();
        Block {
            header: Header {
                version: Header::CURRENT_VERSION,
                previous_block_hash: vireo_chain::block::Hash::zero(),
                merkle_root,
                time,
                bits: CompactDifficulty(0x2100ffff),
                nonce: 0,
            },
            transactions,
            signature: Vec::new(),
        }
    }

    #[test]
    fn valid_coinbase_tx_passes() {
        assert!(check_transaction(&coinbase(100)).is_ok());
    }

    #[test]
    fn empty_inputs_rejected() {
        let tx = Transaction::new(1, 100, vec![], vec![Output::new(1, Script(vec![0x51]))], 0);
        assert!(matches!(
            check_transaction(&tx),
            Err(ConsensusError::BadTxStructure("no inputs"))
        ));
    }

    #[test]
    fn coinbase_script_length_bounds() {
        let mut tx = coinbase(100);
        tx.inputs[0].script_sig = Script(vec![0x01]);
        assert!(check_transaction(&tx).is_err());
        tx.inputs[0].script_sig = Script(vec![0x00; 101]);
        assert!(check_transaction(&tx).is_err());
        tx.inputs[0].script_sig = Script(vec![0x00; 100]);
        assert!(check_transaction(&tx).is_ok());
    }

    #[test]
    fn duplicate_inputs_rejected() {
        let prevout = OutPoint {
            hash: vireo_chain::transaction::Hash([1; 32]),
            index: 0,
        };
        let tx = Transaction::new(
            1,
            100,
            vec![
                Input::new(prevout, Script::default()),
                Input::new(prevout, Script::default()),
            ],
            vec![Output::new(1, Script(vec![0x51]))],
            0,
        );
        assert!(matches!(
            check_transaction(&tx),
            Err(ConsensusError::BadTxStructure("duplicate input"))
        ));
    }

    #[test]
    fn coinbase_must_come_first() {
        let prevout = OutPoint {
            hash: vireo_chain::transaction::Hash([1; 32]),
            index: 0,
        };
        let spend = Transaction::new(
            1,
            100,
            vec![Input::new(prevout, Script(vec![0x51]))],
            vec![Output::new(1, Script(vec![0x51]))],
            0,
        );
        let block = block_of(vec![spend], 100);
        assert!(matches!(
            check_block(&block, false, true),
            Err(ConsensusError::BadTxStructure("first tx is not coinbase"))
        ));
    }

    #[test]
    fn merkle_mismatch_rejected() {
        let mut block = block_of(vec![coinbase(100)], 100);
        block.header.merkle_root = merkle::Root([0xff; 32]);
        assert!(matches!(
            check_block(&block, false, true),
            Err(ConsensusError::BadMerkle)
        ));
    }

    #[test]
    fn duplicate_transactions_rejected() {
        let tx = coinbase(100);
        // Two coinbases also trip the single-coinbase rule, so build the
        // duplicate from a regular spend.
        let prevout = OutPoint {
            hash: vireo_chain::transaction::Hash([1; 32]),
            index: 0,
        };
        let spend = Transaction::new(
            1,
            100,
            vec![Input::new(prevout, Script(vec![0x51]))],
            vec![Output::new(1, Script(vec![0x51]))],
            0,
        );
        let block = block_of(vec![tx, spend.clone(), spend], 100);
        assert!(matches!(
            check_block(&block, false, true),
            Err(ConsensusError::DuplicateTx)
        ));
    }

    #[test]
    fn transaction_newer_than_block_rejected() {
        let block = block_of(vec![coinbase(200)], 100);
        assert!(check_block(&block, false, true).is_err());
    }
}
