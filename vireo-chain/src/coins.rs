//! Pruned per-transaction records of unspent outputs, and the undo log that
//! reverses them.
//!
//! Serialized coin-record format:
//!
//! - varint: version
//! - varint: flags (bit 0 coinbase, bit 1 coinstake, bit 2 pruned)
//! - varint: code (unless pruned)
//! - unspentness bitvector for outputs\[2\] and beyond, least significant
//!   byte first
//! - the surviving outputs, in compressed amount+script form
//! - varint: height
//! - varint: transaction timestamp
//! - varint: containing-block timestamp
//!
//! The code value packs the availability of the first two outputs into its
//! low bits: bit 1 set means output 0 survives, bit 2 output 1; the higher
//! bits carry N, the number of non-zero bytes in the bitvector (N-1 when
//! both low bits are clear, as at least one output must survive).
//!
//! Pruned records drop the outputs but keep the metadata so undo can
//! resurrect them.

use std::io;

use crate::amount::{compress_amount, decompress_amount};
use crate::script;
use crate::serialization::varint::{read_varint, write_varint};
use crate::transaction::Transaction;
use crate::transparent::{OutPoint, Output, Script};
use crate::{ChainDeserialize, ChainSerialize, SerializationError};

/// The still-unspent outputs of a single transaction, plus the metadata
/// needed to validate spends of them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Coins {
    /// Whether the transaction was a coinbase.
    pub coinbase: bool,
    /// Whether the transaction was a coinstake.
    pub coinstake: bool,
    /// Unspent outputs; spent positions are null, and trailing null outputs
    /// are dropped by [`Coins::cleanup`].
    pub outputs: Vec<Output>,
    /// Height at which the transaction was included in the active chain.
    pub height: u32,
    /// The transaction's version.
    pub version: i32,
    /// The transaction's timestamp.
    pub time: u32,
    /// The containing block's timestamp.
    pub block_time: u32,
}

impl Coins {
    /// Build the coin record for `tx` as included at `height` in a block
    /// timestamped `block_time`.
    pub fn from_tx(tx: &Transaction, height: u32, block_time: u32) -> Coins {
        Coins {
            coinbase: tx.is_coinbase(),
            coinstake: tx.is_coinstake(),
            outputs: tx.outputs.clone(),
            height,
            version: tx.version,
            time: tx.time,
            block_time,
        }
    }

    /// An empty record, as left behind by a disconnect.
    pub fn pruned() -> Coins {
        Coins {
            coinbase: false,
            coinstake: false,
            outputs: Vec::new(),
            height: 0,
            version: 0,
            time: 0,
            block_time: 0,
        }
    }

    /// Drop spent and empty outputs from the end of the output list.
    pub fn cleanup(&mut self) {
        while self
            .outputs
            .last()
            .map(|out| out.is_null() || out.is_empty())
            .unwrap_or(false)
        {
            self.outputs.pop();
        }
    }

    /// Whether output `index` is present and unspent.
    pub fn is_available(&self, index: u32) -> bool {
        (index as usize) < self.outputs.len() && !self.outputs[index as usize].is_null()
    }

    /// Whether every output has been consumed. Only unpruned records carry
    /// outputs on disk; the metadata stays for undo.
    pub fn is_pruned(&self) -> bool {
        self.outputs.iter().all(|out| out.is_null())
    }

    /// Mark `out` spent and record the information needed to reverse the
    /// spend. Fails when the output is absent or already spent.
    pub fn spend(&mut self, out: &OutPoint, undo: &mut TxInUndo) -> bool {
        if out.index as usize >= self.outputs.len() {
            return false;
        }
        if self.outputs[out.index as usize].is_null() {
            return false;
        }
        *undo = TxInUndo::new(self.outputs[out.index as usize].clone());
        self.outputs[out.index as usize].set_null();
        self.cleanup();
        if self.outputs.is_empty() {
            // This was the last surviving output: the undo entry carries the
            // whole transaction's metadata so the record can be rebuilt.
            undo.height = self.height;
            undo.time = self.time;
            undo.block_time = self.block_time;
            undo.coinbase = self.coinbase;
            undo.coinstake = self.coinstake;
            undo.version = self.version;
        }
        true
    }

    // The number of bitvector bytes written, and how many of them are
    // non-zero. Each bit is the availability of one output, but the first
    // two outputs are encoded in the header code instead.
    fn mask_size(&self) -> (usize, usize) {
        let mut bytes = 0;
        let mut nonzero = 0;
        let mut b = 0;
        while 2 + b * 8 < self.outputs.len() {
            let mut zero = true;
            for i in 0..8 {
                if 2 + b * 8 + i < self.outputs.len() && !self.outputs[2 + b * 8 + i].is_null() {
                    zero = false;
                }
            }
            if !zero {
                bytes = b + 1;
                nonzero += 1;
            }
            b += 1;
        }
        (bytes, nonzero)
    }
}

impl ChainSerialize for Coins {
    fn chain_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        let pruned = self.is_pruned();
        let flags = (self.coinbase as u64)
            | (self.coinstake as u64) << 1
            | (pruned as u64) << 2;

        write_varint(&mut writer, self.version as u64)?;
        write_varint(&mut writer, flags)?;

        if !pruned {
            let (mask_size, mask_code) = self.mask_size();
            let first = !self.outputs.is_empty() && !self.outputs[0].is_null();
            let second = self.outputs.len() > 1 && !self.outputs[1].is_null();
            debug_assert!(first || second || mask_code > 0);

            let code = 8 * (mask_code - if first || second { 0 } else { 1 })
                + if first { 2 } else { 0 }
                + if second { 4 } else { 0 };
            write_varint(&mut writer, code as u64)?;

            for b in 0..mask_size {
                let mut avail = 0u8;
                for i in 0..8 {
                    if 2 + b * 8 + i < self.outputs.len()
                        && !self.outputs[2 + b * 8 + i].is_null()
                    {
                        avail |= 1 << i;
                    }
                }
                writer.write_all(&[avail])?;
            }
            for output in self.outputs.iter().filter(|out| !out.is_null()) {
                write_varint(&mut writer, compress_amount(output.value as u64))?;
                script::write_compressed(&output.script_pubkey, &mut writer)?;
            }
        }
        write_varint(&mut writer, self.height as u64)?;
        write_varint(&mut writer, self.time as u64)?;
        write_varint(&mut writer, self.block_time as u64)?;
        Ok(())
    }
}

impl ChainDeserialize for Coins {
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let version = read_varint(&mut reader)? as i32;
        let flags = read_varint(&mut reader)?;
        let coinbase = flags & 1 != 0;
        let coinstake = flags & 2 != 0;
        let pruned = flags & 4 != 0;

        let mut outputs = Vec::new();
        if !pruned {
            let code = read_varint(&mut reader)?;
            let mut avail = vec![code & 2 != 0, code & 4 != 0];
            let mut mask_code = (code / 8) + if code & 6 != 0 { 0 } else { 1 };
            while mask_code > 0 {
                let mut byte = [0u8; 1];
                reader.read_exact(&mut byte)?;
                for p in 0..8 {
                    avail.push(byte[0] & (1 << p) != 0);
                }
                if byte[0] != 0 {
                    mask_code -= 1;
                }
            }
            outputs = vec![Output::null(); avail.len()];
            for (index, available) in avail.iter().enumerate() {
                if *available {
                    let value = decompress_amount(read_varint(&mut reader)?) as i64;
                    let script_pubkey = script::read_compressed(&mut reader)?;
                    outputs[index] = Output::new(value, script_pubkey);
                }
            }
        }
        let height = read_varint(&mut reader)? as u32;
        let time = read_varint(&mut reader)? as u32;
        let block_time = read_varint(&mut reader)? as u32;

        let mut coins = Coins {
            coinbase,
            coinstake,
            outputs,
            height,
            version,
            time,
            block_time,
        };
        coins.cleanup();
        Ok(coins)
    }
}

/// Undo information for one consumed input: the spent output, plus the
/// transaction's original metadata when it was the last surviving output
/// of its transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxInUndo {
    /// The output data before being spent.
    pub output: Output,
    /// Whether the parent transaction was a coinbase, if this was its last
    /// unspent output.
    pub coinbase: bool,
    pub coinstake: bool,
    /// The parent transaction's height, or zero when no metadata is carried.
    pub height: u32,
    pub version: i32,
    pub time: u32,
    pub block_time: u32,
}

impl TxInUndo {
    pub fn new(output: Output) -> TxInUndo {
        TxInUndo {
            output,
            coinbase: false,
            coinstake: false,
            height: 0,
            version: 0,
            time: 0,
            block_time: 0,
        }
    }

    /// Whether this entry carries the parent transaction's metadata.
    pub fn has_metadata(&self) -> bool {
        self.height > 0
    }
}

impl ChainSerialize for TxInUndo {
    fn chain_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        write_varint(
            &mut writer,
            (self.height as u64) * 2 + self.coinbase as u64,
        )?;
        write_varint(&mut writer, (self.time as u64) * 2 + self.coinstake as u64)?;
        write_varint(&mut writer, self.block_time as u64)?;
        if self.height > 0 {
            write_varint(&mut writer, self.version as u64)?;
        }
        write_varint(&mut writer, compress_amount(self.output.value as u64))?;
        script::write_compressed(&self.output.script_pubkey, &mut writer)?;
        Ok(())
    }
}

impl ChainDeserialize for TxInUndo {
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let code_height = read_varint(&mut reader)?;
        let height = (code_height / 2) as u32;
        let coinbase = code_height & 1 != 0;
        let code_time = read_varint(&mut reader)?;
        let time = (code_time / 2) as u32;
        let coinstake = code_time & 1 != 0;
        let block_time = read_varint(&mut reader)? as u32;
        let version = if height > 0 {
            read_varint(&mut reader)? as i32
        } else {
            0
        };
        let value = decompress_amount(read_varint(&mut reader)?) as i64;
        let script_pubkey = script::read_compressed(&mut reader)?;
        Ok(TxInUndo {
            output: Output::new(value, script_pubkey),
            coinbase,
            coinstake,
            height,
            version,
            time,
            block_time,
        })
    }
}

/// Undo information for all inputs of one transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxUndo {
    pub prevouts: Vec<TxInUndo>,
}

impl ChainSerialize for TxUndo {
    fn chain_serialize<W: io::Write>(&self, writer: W) -> Result<(), io::Error> {
        self.prevouts.chain_serialize(writer)
    }
}

impl ChainDeserialize for TxUndo {
    fn chain_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(TxUndo {
            prevouts: <Vec<TxInUndo>>::chain_deserialize(reader)?,
        })
    }
}

/// Undo information for a whole block: one entry per transaction after the
/// coinbase.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockUndo {
    pub tx_undos: Vec<TxUndo>,
}

impl ChainSerialize for BlockUndo {
    fn chain_serialize<W: io::Write>(&self, writer: W) -> Result<(), io::Error> {
        self.tx_undos.chain_serialize(writer)
    }
}

impl ChainDeserialize for BlockUndo {
    fn chain_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(BlockUndo {
            tx_undos: <Vec<TxUndo>>::chain_deserialize(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::COIN;
    use crate::ChainDeserializeInto;

    fn p2pkh_output(value: i64, hash_byte: u8) -> Output {
        let mut script = vec![0x76, 0xa9, 0x14];
        script.extend_from_slice(&[hash_byte; 20]);
        script.extend_from_slice(&[0x88, 0xac]);
        Output::new(value, Script(script))
    }

    fn roundtrip(coins: &Coins) -> Coins {
        let bytes = coins.chain_serialize_to_vec().unwrap();
        (&bytes[..]).chain_deserialize_into().unwrap()
    }

    fn varint_bytes(n: u64) -> Vec<u8> {
        let mut out = Vec::new();
        write_varint(&mut out, n).unwrap();
        out
    }

    /// A record whose only survivor is output 1: the header code is 4 and
    /// the bitvector is empty. Field values follow the worked example in the
    /// original format notes.
    #[test]
    fn decode_record_with_second_output() {
        // version 1 | flags 0 | code 4 | amount 8358 (600 BTC-units
        // compressed) | script code 00 (pay-to-pubkey-hash) + hash160 |
        // height | tx time | block time.
        let mut bytes = hex::decode("010004835800816115944e077fe7c803cfa57f29b36bf87c1d35")
            .unwrap();
        bytes.extend_from_slice(&varint_bytes(203998));
        bytes.extend_from_slice(&varint_bytes(1389883712));
        bytes.extend_from_slice(&varint_bytes(1389883712));

        let coins: Coins = (&bytes[..]).chain_deserialize_into().unwrap();

        assert!(!coins.coinbase);
        assert!(!coins.coinstake);
        assert_eq!(coins.version, 1);
        assert_eq!(coins.height, 203998);
        assert_eq!(coins.time, 1389883712);
        assert_eq!(coins.block_time, 1389883712);
        assert_eq!(coins.outputs.len(), 2);
        assert!(coins.outputs[0].is_null());
        assert_eq!(coins.outputs[1].value, 60_000_000_000);
        assert_eq!(
            hex::encode(&coins.outputs[1].script_pubkey.0),
            "76a914816115944e077fe7c803cfa57f29b36bf87c1d3588ac"
        );
        assert_eq!(coins.chain_serialize_to_vec().unwrap(), bytes);
    }

    /// A coinbase whose outputs 4 and 16 survive, encoded through the
    /// unspentness bitvector: code 8 means two non-zero bitvector bytes and
    /// neither of the first two outputs.
    #[test]
    fn decode_record_with_bitvector() {
        let mut bytes = hex::decode("010108").unwrap();
        // Bits 2 and 14 of the bitvector: outputs 4 and 16.
        bytes.extend_from_slice(&[0x04, 0x40]);
        bytes.extend_from_slice(
            &hex::decode("86ef97d5790061b01caab50f1b8e9c50a5057eb43c2d9563a4ee").unwrap(),
        );
        bytes.extend_from_slice(
            &hex::decode("bbd123008c988f1a4a4de2161e0f50aac7f17e7f9555caa4").unwrap(),
        );
        bytes.extend_from_slice(&varint_bytes(120891));
        bytes.extend_from_slice(&varint_bytes(1389883712));
        bytes.extend_from_slice(&varint_bytes(1389883712));

        let coins: Coins = (&bytes[..]).chain_deserialize_into().unwrap();

        assert!(coins.coinbase);
        assert!(!coins.coinstake);
        assert_eq!(coins.height, 120891);
        assert_eq!(coins.outputs.len(), 17);
        assert!(coins.is_available(4));
        assert!(coins.is_available(16));
        assert_eq!(coins.outputs[4].value, 234_925_952);
        assert_eq!(coins.outputs[16].value, 110_397);
        for index in (0..17).filter(|i| *i != 4 && *i != 16) {
            assert!(!coins.is_available(index));
        }
        assert_eq!(coins.chain_serialize_to_vec().unwrap(), bytes);
    }

    /// A fully pruned coinstake record: flags 6, no outputs, metadata only.
    #[test]
    fn decode_pruned_record() {
        let mut bytes = hex::decode("0106").unwrap();
        bytes.extend_from_slice(&varint_bytes(120891));
        bytes.extend_from_slice(&varint_bytes(1389883712));
        bytes.extend_from_slice(&varint_bytes(1389883712));

        let coins: Coins = (&bytes[..]).chain_deserialize_into().unwrap();

        assert!(coins.is_pruned());
        assert!(!coins.coinbase);
        assert!(coins.coinstake);
        assert_eq!(coins.height, 120891);
        assert_eq!(coins.time, 1389883712);
        assert_eq!(coins.block_time, 1389883712);
        assert_eq!(coins.chain_serialize_to_vec().unwrap(), bytes);
    }

    #[test]
    fn single_output_at_index_zero_uses_code_two() {
        let coins = Coins {
            coinbase: false,
            coinstake: false,
            outputs: vec![p2pkh_output(5 * COIN, 0xaa)],
            height: 7,
            version: 1,
            time: 100,
            block_time: 100,
        };
        let bytes = coins.chain_serialize_to_vec().unwrap();
        // version, flags, then the header code.
        assert_eq!(bytes[2], 2);
        assert_eq!(roundtrip(&coins), coins);
    }

    #[test]
    fn spend_tracks_undo_metadata() {
        let mut coins = Coins {
            coinbase: true,
            coinstake: false,
            outputs: vec![p2pkh_output(5 * COIN, 0xaa), p2pkh_output(3 * COIN, 0xbb)],
            height: 10,
            version: 1,
            time: 1000,
            block_time: 1001,
        };

        let mut undo = TxInUndo::default();
        assert!(coins.spend(
            &OutPoint {
                hash: crate::transaction::Hash([0; 32]),
                index: 1
            },
            &mut undo
        ));
        // Not the last output: no metadata carried.
        assert!(!undo.has_metadata());
        assert_eq!(undo.output.value, 3 * COIN);
        // Trailing null dropped.
        assert_eq!(coins.outputs.len(), 1);

        let mut undo_last = TxInUndo::default();
        assert!(coins.spend(
            &OutPoint {
                hash: crate::transaction::Hash([0; 32]),
                index: 0
            },
            &mut undo_last
        ));
        assert!(undo_last.has_metadata());
        assert!(undo_last.coinbase);
        assert_eq!(undo_last.height, 10);
        assert!(coins.is_pruned());

        // Double spends are rejected.
        let mut undo_again = TxInUndo::default();
        assert!(!coins.spend(
            &OutPoint {
                hash: crate::transaction::Hash([0; 32]),
                index: 0
            },
            &mut undo_again
        ));
    }

    #[test]
    fn undo_roundtrip() {
        let mut with_metadata = TxInUndo::new(p2pkh_output(7 * COIN, 0xcc));
        with_metadata.height = 55;
        with_metadata.coinbase = true;
        with_metadata.time = 1234;
        with_metadata.block_time = 1235;
        with_metadata.version = 1;

        let undo = BlockUndo {
            tx_undos: vec![TxUndo {
                prevouts: vec![TxInUndo::new(p2pkh_output(COIN, 0xdd)), with_metadata],
            }],
        };
        let bytes = undo.chain_serialize_to_vec().unwrap();
        let decoded: BlockUndo = (&bytes[..]).chain_deserialize_into().unwrap();
        assert_eq!(decoded, undo);
    }

    #[test]
    fn cleanup_prunes_all_null() {
        let mut coins = Coins {
            coinbase: false,
            coinstake: false,
            outputs: vec![Output::null(), Output::null()],
            height: 1,
            version: 1,
            time: 0,
            block_time: 0,
        };
        coins.cleanup();
        assert!(coins.outputs.is_empty());
        assert!(coins.is_pruned());
    }
}
