//! On-disk record types: flat-file positions, per-file statistics, and the
//! serialized block-index entry stored under the `'b'` key prefix.

use std::io;

use vireo_chain::block;
use vireo_chain::serialization::varint::{read_varint, write_varint};
use vireo_chain::transparent::OutPoint;
use vireo_chain::work::difficulty::CompactDifficulty;
use vireo_chain::{ChainDeserialize, ChainSerialize, SerializationError};

/// Validation-status bits shared between the disk record and the in-memory
/// block index. The low three bits carry the monotonic validation stage;
/// the rest are independent flags.
pub const BLOCK_VALID_HEADER: u32 = 1;
pub const BLOCK_VALID_TREE: u32 = 2;
pub const BLOCK_VALID_TRANSACTIONS: u32 = 3;
pub const BLOCK_VALID_CHAIN: u32 = 4;
pub const BLOCK_VALID_SCRIPTS: u32 = 5;
pub const BLOCK_VALID_MASK: u32 = 7;
pub const BLOCK_HAVE_DATA: u32 = 8;
pub const BLOCK_HAVE_UNDO: u32 = 16;
pub const BLOCK_FAILED_VALID: u32 = 32;
pub const BLOCK_FAILED_CHILD: u32 = 64;
pub const BLOCK_FAILED_MASK: u32 = BLOCK_FAILED_VALID | BLOCK_FAILED_CHILD;

/// Block-index flag bits.
pub const FLAG_PROOF_OF_STAKE: u32 = 1 << 0;
pub const FLAG_STAKE_ENTROPY: u32 = 1 << 1;
pub const FLAG_STAKE_MODIFIER: u32 = 1 << 2;

/// A position inside a numbered block or undo file.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FlatFilePos {
    /// Which `blk?????.dat` / `rev?????.dat` file.
    pub file: u32,
    /// Byte offset of the record payload within the file.
    pub pos: u32,
}

impl ChainSerialize for FlatFilePos {
    fn chain_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        write_varint(&mut writer, self.file as u64)?;
        write_varint(&mut writer, self.pos as u64)
    }
}

impl ChainDeserialize for FlatFilePos {
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(FlatFilePos {
            file: read_varint(&mut reader)? as u32,
            pos: read_varint(&mut reader)? as u32,
        })
    }
}

/// Statistics for one block file, stored under the `'f'` key prefix.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockFileInfo {
    /// Number of blocks stored in the file.
    pub blocks: u32,
    /// Number of used bytes of the block file.
    pub size: u32,
    /// Number of used bytes of the undo file.
    pub undo_size: u32,
    /// Lowest height of a block in the file.
    pub height_first: u32,
    /// Highest height of a block in the file.
    pub height_last: u32,
    /// Earliest block time in the file.
    pub time_first: u64,
    /// Latest block time in the file.
    pub time_last: u64,
}

impl BlockFileInfo {
    /// Update statistics for a newly stored block (does not update `size`).
    pub fn add_block(&mut self, height: u32, time: u64) {
        if self.blocks == 0 || self.height_first > height {
            self.height_first = height;
        }
        if self.blocks == 0 || self.time_first > time {
            self.time_first = time;
        }
        self.blocks += 1;
        if height > self.height_last {
            self.height_last = height;
        }
        if time > self.time_last {
            self.time_last = time;
        }
    }
}

impl ChainSerialize for BlockFileInfo {
    fn chain_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        write_varint(&mut writer, self.blocks as u64)?;
        write_varint(&mut writer, self.size as u64)?;
        write_varint(&mut writer, self.undo_size as u64)?;
        write_varint(&mut writer, self.height_first as u64)?;
        write_varint(&mut writer, self.height_last as u64)?;
        write_varint(&mut writer, self.time_first)?;
        write_varint(&mut writer, self.time_last)
    }
}

impl ChainDeserialize for BlockFileInfo {
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(BlockFileInfo {
            blocks: read_varint(&mut reader)? as u32,
            size: read_varint(&mut reader)? as u32,
            undo_size: read_varint(&mut reader)? as u32,
            height_first: read_varint(&mut reader)? as u32,
            height_last: read_varint(&mut reader)? as u32,
            time_first: read_varint(&mut reader)?,
            time_last: read_varint(&mut reader)?,
        })
    }
}

/// The persisted form of a block-index node.
///
/// Pointer fields of the in-memory node become hashes here; the cached
/// header is stored in full so the index can be rebuilt without touching
/// the block files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiskBlockIndex {
    pub height: u32,
    pub status: u32,
    pub tx_count: u32,
    pub file: u32,
    pub data_pos: u32,
    pub undo_pos: u32,
    /// Coins minted by this block.
    pub mint: i64,
    /// Total coins in circulation after this block.
    pub money_supply: i64,
    /// Proof-of-stake / entropy / modifier-generation flags.
    pub flags: u32,
    pub stake_modifier: u64,
    /// The staked prevout, for proof-of-stake blocks.
    pub prevout_stake: OutPoint,
    pub stake_time: u32,
    /// The coinstake kernel hash, little-endian.
    pub proof_hash: [u8; 32],
    /// This block's own hash, cached so index loads avoid re-hashing.
    pub block_hash: block::Hash,
    /// The block header fields.
    pub version: i32,
    pub hash_prev: block::Hash,
    pub merkle_root: block::merkle::Root,
    pub time: u32,
    pub bits: CompactDifficulty,
    pub nonce: u32,
}

impl DiskBlockIndex {
    pub fn is_proof_of_stake(&self) -> bool {
        self.flags & FLAG_PROOF_OF_STAKE != 0
    }
}

impl ChainSerialize for DiskBlockIndex {
    fn chain_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        write_varint(&mut writer, self.version as u64)?;
        write_varint(&mut writer, self.height as u64)?;
        write_varint(&mut writer, self.status as u64)?;
        write_varint(&mut writer, self.tx_count as u64)?;
        if self.status & (BLOCK_HAVE_DATA | BLOCK_HAVE_UNDO) != 0 {
            write_varint(&mut writer, self.file as u64)?;
        }
        if self.status & BLOCK_HAVE_DATA != 0 {
            write_varint(&mut writer, self.data_pos as u64)?;
        }
        if self.status & BLOCK_HAVE_UNDO != 0 {
            write_varint(&mut writer, self.undo_pos as u64)?;
        }
        self.mint.chain_serialize(&mut writer)?;
        self.money_supply.chain_serialize(&mut writer)?;
        self.flags.chain_serialize(&mut writer)?;
        self.stake_modifier.chain_serialize(&mut writer)?;
        if self.is_proof_of_stake() {
            self.prevout_stake.chain_serialize(&mut writer)?;
            self.stake_time.chain_serialize(&mut writer)?;
            self.proof_hash.chain_serialize(&mut writer)?;
        }
        self.block_hash.chain_serialize(&mut writer)?;

        self.version.chain_serialize(&mut writer)?;
        self.hash_prev.chain_serialize(&mut writer)?;
        self.merkle_root.chain_serialize(&mut writer)?;
        self.time.chain_serialize(&mut writer)?;
        self.bits.chain_serialize(&mut writer)?;
        self.nonce.chain_serialize(&mut writer)
    }
}

impl ChainDeserialize for DiskBlockIndex {
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let _version = read_varint(&mut reader)?;
        let height = read_varint(&mut reader)? as u32;
        let status = read_varint(&mut reader)? as u32;
        let tx_count = read_varint(&mut reader)? as u32;
        let file = if status & (BLOCK_HAVE_DATA | BLOCK_HAVE_UNDO) != 0 {
            read_varint(&mut reader)? as u32
        } else {
            0
        };
        let data_pos = if status & BLOCK_HAVE_DATA != 0 {
            read_varint(&mut reader)? as u32
        } else {
            0
        };
        let undo_pos = if status & BLOCK_HAVE_UNDO != 0 {
            read_varint(&mut reader)? as u32
        } else {
            0
        };
        let mint = i64::chain_deserialize(&mut reader)?;
        let money_supply = i64::chain_deserialize(&mut reader)?;
        let flags = u32::chain_deserialize(&mut reader)?;
        let stake_modifier = u64::chain_deserialize(&mut reader)?;
        let (prevout_stake, stake_time, proof_hash) = if flags & FLAG_PROOF_OF_STAKE != 0 {
            (
                OutPoint::chain_deserialize(&mut reader)?,
                u32::chain_deserialize(&mut reader)?,
                <[u8; 32]>::chain_deserialize(&mut reader)?,
            )
        } else {
            (OutPoint::null(), 0, [0u8; 32])
        };
        let block_hash = block::Hash::chain_deserialize(&mut reader)?;
        let version = i32::chain_deserialize(&mut reader)?;
        let hash_prev = block::Hash::chain_deserialize(&mut reader)?;
        let merkle_root = block::merkle::Root::chain_deserialize(&mut reader)?;
        let time = u32::chain_deserialize(&mut reader)?;
        let bits = CompactDifficulty::chain_deserialize(&mut reader)?;
        let nonce = u32::chain_deserialize(&mut reader)?;
        Ok(DiskBlockIndex {
            height,
            status,
            tx_count,
            file,
            data_pos,
            undo_pos,
            mint,
            money_supply,
            flags,
            stake_modifier,
            prevout_stake,
            stake_time,
            proof_hash,
            block_hash,
            version,
            hash_prev,
            merkle_root,
            time,
            bits,
            nonce,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vireo_chain::ChainDeserializeInto;

    fn example_index(proof_of_stake: bool) -> DiskBlockIndex {
        DiskBlockIndex {
            height: 1234,
            status: BLOCK_VALID_SCRIPTS | BLOCK_HAVE_DATA | BLOCK_HAVE_UNDO,
            tx_count: 3,
            file: 0,
            data_pos: 8193,
            undo_pos: 42,
            mint: 50_000_000,
            money_supply: 1_000_000_000,
            flags: if proof_of_stake {
                FLAG_PROOF_OF_STAKE | FLAG_STAKE_MODIFIER
            } else {
                0
            },
            stake_modifier: 0xdead_beef_0bad_f00d,
            prevout_stake: if proof_of_stake {
                OutPoint {
                    hash: vireo_chain::transaction::Hash([5; 32]),
                    index: 1,
                }
            } else {
                OutPoint::null()
            },
            stake_time: if proof_of_stake { 1_600_000_000 } else { 0 },
            proof_hash: if proof_of_stake { [9; 32] } else { [0; 32] },
            block_hash: block::Hash([2; 32]),
            version: 6,
            hash_prev: block::Hash([3; 32]),
            merkle_root: block::merkle::Root([4; 32]),
            time: 1_600_000_600,
            bits: CompactDifficulty(0x1d00ffff),
            nonce: 77,
        }
    }

    #[test]
    fn roundtrip_proof_of_work() {
        let index = example_index(false);
        let bytes = index.chain_serialize_to_vec().unwrap();
        let decoded: DiskBlockIndex = (&bytes[..]).chain_deserialize_into().unwrap();
        assert_eq!(decoded, index);
    }

    #[test]
    fn roundtrip_proof_of_stake() {
        let index = example_index(true);
        let bytes = index.chain_serialize_to_vec().unwrap();
        let decoded: DiskBlockIndex = (&bytes[..]).chain_deserialize_into().unwrap();
        assert_eq!(decoded, index);
        assert!(decoded.is_proof_of_stake());
    }

    #[test]
    fn stake_fields_omitted_for_proof_of_work() {
        let pos_len = example_index(true)
            .chain_serialize_to_vec()
            .unwrap()
            .len();
        let pow_len = example_index(false)
            .chain_serialize_to_vec()
            .unwrap()
            .len();
        // Outpoint (36) + stake time (4) + proof hash (32).
        assert_eq!(pos_len - pow_len, 72);
    }

    #[test]
    fn file_info_tracks_ranges() {
        let mut info = BlockFileInfo::default();
        info.add_block(10, 1000);
        info.add_block(8, 1200);
        info.add_block(12, 900);
        assert_eq!(info.blocks, 3);
        assert_eq!(info.height_first, 8);
        assert_eq!(info.height_last, 12);
        assert_eq!(info.time_first, 900);
        assert_eq!(info.time_last, 1200);

        let bytes = info.chain_serialize_to_vec().unwrap();
        let decoded: BlockFileInfo = (&bytes[..]).chain_deserialize_into().unwrap();
        assert_eq!(decoded, info);
    }
}
