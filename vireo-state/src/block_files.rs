//! Append-only flat files holding raw blocks (`blk?????.dat`) and undo
//! records (`rev?????.dat`).
//!
//! Each record is `magic(4) | size(4) | payload`. Files rotate once they
//! would exceed [`MAX_BLOCKFILE_SIZE`] and are preallocated in chunks so
//! appends rarely grow the file inode.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use tracing::debug;

use crate::disk::{BlockFileInfo, FlatFilePos};
use crate::BoxError;

/// Maximum payload bytes per block file before rotating to the next.
pub const MAX_BLOCKFILE_SIZE: u32 = 0x800_0000; // 128 MiB

/// Preallocation chunk for block files.
pub const BLOCKFILE_CHUNK_SIZE: u32 = 0x100_0000; // 16 MiB

/// Preallocation chunk for undo files.
pub const UNDOFILE_CHUNK_SIZE: u32 = 0x10_0000; // 1 MiB

/// The magic bytes separating records within the flat files.
pub const FILE_MAGIC: [u8; 4] = [0xe4, 0xd9, 0xc5, 0xb1];

/// Manager for the numbered block/undo file pairs in one directory.
pub struct BlockFiles {
    dir: PathBuf,
    /// The file currently accepting appends.
    last_file: u32,
    /// Statistics for the current file.
    info: BlockFileInfo,
}

impl BlockFiles {
    /// Open the manager over `dir`, resuming at `last_file` with its
    /// recorded statistics (both from the store, zero on first run).
    pub fn open(dir: PathBuf, last_file: u32, info: BlockFileInfo) -> Result<BlockFiles, BoxError> {
        std::fs::create_dir_all(&dir)?;
        Ok(BlockFiles {
            dir,
            last_file,
            info,
        })
    }

    pub fn last_file(&self) -> u32 {
        self.last_file
    }

    pub fn info(&self) -> &BlockFileInfo {
        &self.info
    }

    fn block_path(&self, file: u32) -> PathBuf {
        self.dir.join(format!("blk{:05}.dat", file))
    }

    fn undo_path(&self, file: u32) -> PathBuf {
        self.dir.join(format!("rev{:05}.dat", file))
    }

    /// Append a block, rotating to a fresh file pair when the current one is
    /// full. Returns where the payload starts, and whether rotation happened
    /// (so the caller can persist the retiring file's statistics).
    pub fn append_block(
        &mut self,
        payload: &[u8],
        height: u32,
        time: u64,
    ) -> Result<(FlatFilePos, bool), BoxError> {
        let record_len = 8 + payload.len() as u32;
        let mut rotated = false;
        if self.info.size > 0 && self.info.size + record_len > MAX_BLOCKFILE_SIZE {
            debug!(file = self.last_file, "block file full, rotating");
            self.last_file += 1;
            self.info = BlockFileInfo::default();
            rotated = true;
        }

        let pos = append_record(
            &self.block_path(self.last_file),
            self.info.size,
            payload,
            BLOCKFILE_CHUNK_SIZE,
        )?;
        self.info.size += record_len;
        self.info.add_block(height, time);
        Ok((
            FlatFilePos {
                file: self.last_file,
                pos,
            },
            rotated,
        ))
    }

    /// Append an undo record next to its block file.
    pub fn append_undo(&mut self, file: u32, payload: &[u8]) -> Result<FlatFilePos, BoxError> {
        let undo_size = if file == self.last_file {
            self.info.undo_size
        } else {
            // Undo data for an older file appends at its recorded end;
            // callers track that file's info themselves. Fall back to the
            // physical end of file.
            std::fs::metadata(self.undo_path(file))
                .map(|meta| meta.len() as u32)
                .unwrap_or(0)
        };
        let pos = append_record(&self.undo_path(file), undo_size, payload, UNDOFILE_CHUNK_SIZE)?;
        if file == self.last_file {
            self.info.undo_size += 8 + payload.len() as u32;
        }
        Ok(FlatFilePos { file, pos })
    }

    /// Read back the record payload at `pos`.
    pub fn read_block(&self, pos: FlatFilePos) -> Result<Vec<u8>, BoxError> {
        read_record(&self.block_path(pos.file), pos)
    }

    pub fn read_undo(&self, pos: FlatFilePos) -> Result<Vec<u8>, BoxError> {
        read_record(&self.undo_path(pos.file), pos)
    }
}

/// Write `magic | size | payload` at `offset`, preallocating ahead in
/// `chunk`-sized steps. Returns the offset of the payload.
fn append_record(
    path: &PathBuf,
    offset: u32,
    payload: &[u8],
    chunk: u32,
) -> Result<u32, BoxError> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)?;

    let end = offset as u64 + 8 + payload.len() as u64;
    let allocated = file.metadata()?.len();
    if end > allocated {
        // Round the new allocation up to the next chunk boundary.
        let target = (end + chunk as u64 - 1) / chunk as u64 * chunk as u64;
        file.set_len(target)?;
    }

    file.seek(SeekFrom::Start(offset as u64))?;
    file.write_all(&FILE_MAGIC)?;
    file.write_all(&(payload.len() as u32).to_le_bytes())?;
    let payload_pos = offset + 8;
    file.write_all(payload)?;
    file.flush()?;
    Ok(payload_pos)
}

fn read_record(path: &PathBuf, pos: FlatFilePos) -> Result<Vec<u8>, BoxError> {
    let mut file = File::open(path)?;
    if pos.pos < 8 {
        return Err("record position overlaps file header".into());
    }
    file.seek(SeekFrom::Start(pos.pos as u64 - 8))?;
    let mut header = [0u8; 8];
    file.read_exact(&mut header)?;
    if header[0..4] != FILE_MAGIC {
        return Err("bad record magic in block file".into());
    }
    let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    let mut payload = vec![0u8; size as usize];
    file.read_exact(&mut payload)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn append_then_read_back() {
        vireo_test::init();
        let dir = TempDir::new("vireo-blockfiles").unwrap();
        let mut files = BlockFiles::open(
            dir.path().to_path_buf(),
            0,
            BlockFileInfo::default(),
        )
        .unwrap();

        let (pos_a, rotated) = files.append_block(b"first block", 1, 1000).unwrap();
        assert!(!rotated);
        let (pos_b, _) = files.append_block(b"second block", 2, 1001).unwrap();

        assert_eq!(files.read_block(pos_a).unwrap(), b"first block");
        assert_eq!(files.read_block(pos_b).unwrap(), b"second block");
        assert_eq!(files.info().blocks, 2);
        assert_eq!(files.info().height_first, 1);
        assert_eq!(files.info().height_last, 2);
    }

    #[test]
    fn undo_records_live_beside_blocks() {
        vireo_test::init();
        let dir = TempDir::new("vireo-undofiles").unwrap();
        let mut files = BlockFiles::open(
            dir.path().to_path_buf(),
            0,
            BlockFileInfo::default(),
        )
        .unwrap();

        let (block_pos, _) = files.append_block(b"block", 1, 1000).unwrap();
        let undo_pos = files.append_undo(block_pos.file, b"undo data").unwrap();
        assert_eq!(files.read_undo(undo_pos).unwrap(), b"undo data");
        assert_eq!(files.info().undo_size, 8 + 9);
    }

    #[test]
    fn files_preallocate_in_chunks() {
        vireo_test::init();
        let dir = TempDir::new("vireo-prealloc").unwrap();
        let mut files = BlockFiles::open(
            dir.path().to_path_buf(),
            0,
            BlockFileInfo::default(),
        )
        .unwrap();
        files.append_block(b"tiny", 1, 1000).unwrap();
        let len = std::fs::metadata(dir.path().join("blk00000.dat"))
            .unwrap()
            .len();
        assert_eq!(len, BLOCKFILE_CHUNK_SIZE as u64);
    }
}
