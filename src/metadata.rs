//! Metadata table: a small mmapped manifest recording the segment directory.
//! Acts as both the crash-recovery manifest and the offset-to-segment index.

use std::path::Path;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::mmap::MmapFile;

pub const ROW_SIZE: usize = 40;
pub const HEADER_SIZE: usize = 256;
pub const DEFAULT_META_FILE_SIZE: usize = 1024 * 1024;
pub const META_FILE_NAME: &str = "qm";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileMeta {
    pub start_offset: i64,
    pub end_offset: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub msg_count: u64,
}

impl FileMeta {
    fn from_bytes(b: &[u8]) -> Self {
        Self {
            start_offset: i64::from_be_bytes(b[0..8].try_into().unwrap()),
            end_offset: i64::from_be_bytes(b[8..16].try_into().unwrap()),
            start_time: i64::from_be_bytes(b[16..24].try_into().unwrap()),
            end_time: i64::from_be_bytes(b[24..32].try_into().unwrap()),
            msg_count: u64::from_be_bytes(b[32..40].try_into().unwrap()),
        }
    }

    fn write_to(&self, b: &mut [u8]) {
        b[0..8].copy_from_slice(&self.start_offset.to_be_bytes());
        b[8..16].copy_from_slice(&self.end_offset.to_be_bytes());
        b[16..24].copy_from_slice(&self.start_time.to_be_bytes());
        b[24..32].copy_from_slice(&self.end_time.to_be_bytes());
        b[32..40].copy_from_slice(&self.msg_count.to_be_bytes());
    }
}

pub struct MetaFile {
    mmap: RwLock<MmapFile>,
    max_rows: usize,
}

impl MetaFile {
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(META_FILE_NAME);
        let existed = path.exists();
        let mmap = if existed {
            let len = std::fs::metadata(&path)?.len();
            MmapFile::open(&path, len)?
        } else {
            MmapFile::create(&path, DEFAULT_META_FILE_SIZE as u64)?
        };
        mmap.mlock()?;

        let max_rows = (mmap.len() - HEADER_SIZE) / ROW_SIZE;
        let meta = Self { mmap: RwLock::new(mmap), max_rows };
        if !existed {
            meta.write_file_count(0);
            meta.write_min_valid_index(0);
        }
        Ok(meta)
    }

    pub fn num_files(&self) -> u32 {
        self.read_file_count()
    }

    pub fn stat(&self) -> (u32, u32) {
        let guard = self.mmap.read().unwrap();
        (Self::file_count_of(&guard), Self::min_valid_of(&guard))
    }

    pub fn file_meta(&self, idx: u32) -> Result<FileMeta> {
        let guard = self.mmap.read().unwrap();
        let count = Self::file_count_of(&guard);
        if idx >= count {
            return Err(Error::InvalidOffset);
        }
        Ok(Self::row_of(&guard, idx))
    }

    pub fn add_file(&self, row: FileMeta) -> Result<u32> {
        let mut guard = self.mmap.write().unwrap();
        let count = Self::file_count_of(&guard);
        if count as usize >= self.max_rows {
            return Err(Error::Corrupt("metadata table is full"));
        }
        let start = HEADER_SIZE + count as usize * ROW_SIZE;
        row.write_to(guard.range_mut(start, start + ROW_SIZE));
        let count_bytes = (count + 1).to_be_bytes();
        guard.range_mut(0, 4).copy_from_slice(&count_bytes);
        Ok(count)
    }

    /// Advances `end_offset`/`end_time` monotonically and adds
    /// `delta_msg_count` to `msg_count`. `start_time` is set on first write.
    pub fn update_file_stat(&self, idx: u32, delta_msg_count: u64, new_end_offset: i64, end_time: i64) -> Result<()> {
        let mut guard = self.mmap.write().unwrap();
        let count = Self::file_count_of(&guard);
        if idx >= count {
            return Err(Error::InvalidOffset);
        }
        let mut row = Self::row_of(&guard, idx);
        if row.start_time == 0 {
            row.start_time = end_time;
        }
        if new_end_offset > row.end_offset {
            row.end_offset = new_end_offset;
        }
        if end_time > row.end_time {
            row.end_time = end_time;
        }
        row.msg_count += delta_msg_count;
        let start = HEADER_SIZE + idx as usize * ROW_SIZE;
        row.write_to(guard.range_mut(start, start + ROW_SIZE));
        Ok(())
    }

    pub fn update_min_valid_index(&self, idx: u32) -> Result<()> {
        let mut guard = self.mmap.write().unwrap();
        guard.range_mut(4, 8).copy_from_slice(&idx.to_be_bytes());
        Ok(())
    }

    /// Binary search over the rows for the one whose half-open
    /// `[start_offset, end_offset)` range contains `offset`. Never returns
    /// an index below `min_valid_index`.
    pub fn locate_file(&self, offset: i64) -> Option<u32> {
        let guard = self.mmap.read().unwrap();
        let count = Self::file_count_of(&guard);
        let min_valid = Self::min_valid_of(&guard);
        if count == 0 || min_valid >= count {
            return None;
        }
        let (mut lo, mut hi) = (min_valid, count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let row = Self::row_of(&guard, mid);
            if offset < row.start_offset {
                hi = mid;
            } else if offset >= row.end_offset {
                lo = mid + 1;
            } else {
                return Some(mid);
            }
        }
        None
    }

    pub fn sync(&self) -> Result<()> {
        self.mmap.read().unwrap().sync()
    }

    pub fn close(&self) -> Result<()> {
        self.sync()
    }

    fn read_file_count(&self) -> u32 {
        Self::file_count_of(&self.mmap.read().unwrap())
    }

    fn write_file_count(&self, v: u32) {
        self.mmap.write().unwrap().range_mut(0, 4).copy_from_slice(&v.to_be_bytes());
    }

    fn write_min_valid_index(&self, v: u32) {
        self.mmap.write().unwrap().range_mut(4, 8).copy_from_slice(&v.to_be_bytes());
    }

    fn file_count_of(mmap: &MmapFile) -> u32 {
        u32::from_be_bytes(mmap.as_slice()[0..4].try_into().unwrap())
    }

    fn min_valid_of(mmap: &MmapFile) -> u32 {
        u32::from_be_bytes(mmap.as_slice()[4..8].try_into().unwrap())
    }

    fn row_of(mmap: &MmapFile, idx: u32) -> FileMeta {
        let start = HEADER_SIZE + idx as usize * ROW_SIZE;
        FileMeta::from_bytes(&mmap.as_slice()[start..start + ROW_SIZE])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn add_and_read_rows() {
        let dir = tempdir().unwrap();
        let meta = MetaFile::open(dir.path()).unwrap();
        let idx = meta
            .add_file(FileMeta { start_offset: 0, end_offset: 0, start_time: 0, end_time: 0, msg_count: 0 })
            .unwrap();
        assert_eq!(idx, 0);
        assert_eq!(meta.num_files(), 1);

        meta.update_file_stat(0, 3, 60, 1000).unwrap();
        let row = meta.file_meta(0).unwrap();
        assert_eq!(row.msg_count, 3);
        assert_eq!(row.end_offset, 60);
        assert_eq!(row.start_time, 1000);
    }

    #[test]
    fn locate_file_binary_search() {
        let dir = tempdir().unwrap();
        let meta = MetaFile::open(dir.path()).unwrap();
        meta.add_file(FileMeta { start_offset: 0, end_offset: 100, start_time: 1, end_time: 2, msg_count: 5 }).unwrap();
        meta.add_file(FileMeta { start_offset: 100, end_offset: 200, start_time: 2, end_time: 3, msg_count: 5 }).unwrap();
        assert_eq!(meta.locate_file(0), Some(0));
        assert_eq!(meta.locate_file(99), Some(0));
        assert_eq!(meta.locate_file(100), Some(1));
        assert_eq!(meta.locate_file(200), None);
    }

    #[test]
    fn locate_file_respects_min_valid_index() {
        let dir = tempdir().unwrap();
        let meta = MetaFile::open(dir.path()).unwrap();
        meta.add_file(FileMeta { start_offset: 0, end_offset: 100, start_time: 1, end_time: 2, msg_count: 5 }).unwrap();
        meta.add_file(FileMeta { start_offset: 100, end_offset: 200, start_time: 2, end_time: 3, msg_count: 5 }).unwrap();
        meta.update_min_valid_index(1).unwrap();
        assert_eq!(meta.locate_file(50), None);
        assert_eq!(meta.locate_file(150), Some(1));
    }

    #[test]
    fn reopen_preserves_rows() {
        let dir = tempdir().unwrap();
        {
            let meta = MetaFile::open(dir.path()).unwrap();
            meta.add_file(FileMeta { start_offset: 0, end_offset: 40, start_time: 1, end_time: 2, msg_count: 2 }).unwrap();
        }
        let meta = MetaFile::open(dir.path()).unwrap();
        assert_eq!(meta.num_files(), 1);
        assert_eq!(meta.file_meta(0).unwrap().msg_count, 2);
    }
}
