//! Segment (`qfile`): one preallocated, memory-mapped file holding a
//! contiguous range of the logical offset stream.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{Error, Result};
use crate::mmap::MmapFile;

pub const SEGMENT_DIR: &str = "qf";

pub fn segment_path(dir: &Path, start_offset: i64) -> PathBuf {
    dir.join(SEGMENT_DIR).join(format!("{start_offset:020}"))
}

/// One mmapped segment file. The writer task is the sole mutator of
/// `wrote_position`/`commit_position`; readers take the mapping's rw-lock in
/// read mode for the duration of each extraction, and resize/shrink takes it
/// in write mode.
pub struct Segment {
    pub idx: u32,
    pub start_offset: i64,
    max_file_size: u64,
    write_mmap: bool,
    mmap: RwLock<MmapFile>,
    wrote_position: AtomicI64,
    commit_position: AtomicI64,
    ref_count: AtomicI64,
    path: PathBuf,
    buffer: Option<Mutex<Vec<u8>>>,
    closed: AtomicBool,
}

impl Segment {
    pub fn create(
        dir: &Path,
        idx: u32,
        start_offset: i64,
        max_file_size: u64,
        write_mmap: bool,
        buffered: bool,
    ) -> Result<Self> {
        std::fs::create_dir_all(dir.join(SEGMENT_DIR))?;
        let path = segment_path(dir, start_offset);
        let mmap = MmapFile::create(&path, max_file_size)?;
        Ok(Self::from_parts(idx, start_offset, max_file_size, write_mmap, buffered, mmap, path, 0))
    }

    pub fn open(
        dir: &Path,
        idx: u32,
        start_offset: i64,
        max_file_size: u64,
        write_mmap: bool,
        buffered: bool,
        used: u64,
    ) -> Result<Self> {
        let path = segment_path(dir, start_offset);
        let mmap = MmapFile::open(&path, max_file_size)?;
        Ok(Self::from_parts(idx, start_offset, max_file_size, write_mmap, buffered, mmap, path, used as i64))
    }

    #[allow(clippy::too_many_arguments)]
    fn from_parts(
        idx: u32,
        start_offset: i64,
        max_file_size: u64,
        write_mmap: bool,
        buffered: bool,
        mmap: MmapFile,
        path: PathBuf,
        initial_pos: i64,
    ) -> Self {
        Self {
            idx,
            start_offset,
            max_file_size,
            write_mmap,
            mmap: RwLock::new(mmap),
            wrote_position: AtomicI64::new(initial_pos),
            commit_position: AtomicI64::new(initial_pos),
            ref_count: AtomicI64::new(1),
            path,
            buffer: if buffered { Some(Mutex::new(Vec::new())) } else { None },
            closed: AtomicBool::new(false),
        }
    }

    pub fn wrote_position(&self) -> i64 {
        self.wrote_position.load(Ordering::Acquire)
    }

    pub fn commit_position(&self) -> i64 {
        self.commit_position.load(Ordering::Acquire)
    }

    /// `commit_position` when write-buffering is enabled, else `wrote_position`.
    pub fn read_position(&self) -> i64 {
        if self.buffer.is_some() {
            self.commit_position()
        } else {
            self.wrote_position()
        }
    }

    pub fn end_offset(&self) -> i64 {
        self.start_offset + self.wrote_position()
    }

    /// Total bytes this segment's file can ever hold.
    pub fn capacity(&self) -> u64 {
        self.max_file_size
    }

    /// Appends `chunks` (a scatter-gather list) to the segment. Fails with
    /// `WriteBeyond` if the batch would exceed `max_file_size`.
    pub fn write_buffers(&self, chunks: &[&[u8]]) -> Result<i64> {
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        let wrote = self.wrote_position();
        if wrote as u64 + total as u64 > self.max_file_size {
            return Err(Error::WriteBeyond);
        }

        if let Some(buffer) = &self.buffer {
            let mut buf = buffer.lock().unwrap();
            for c in chunks {
                buf.extend_from_slice(c);
            }
        } else {
            self.write_direct(wrote as usize, chunks)?;
            self.commit_position.fetch_add(total as i64, Ordering::AcqRel);
        }
        self.wrote_position.fetch_add(total as i64, Ordering::AcqRel);
        Ok(total as i64)
    }

    /// Moves any buffered bytes into the mapping/file. No-op for
    /// non-buffered segments. Returns the new absolute commit offset.
    pub fn commit(&self) -> Result<i64> {
        if let Some(buffer) = &self.buffer {
            let mut buf = buffer.lock().unwrap();
            if !buf.is_empty() {
                let commit_pos = self.commit_position() as usize;
                self.write_direct(commit_pos, &[&buf[..]])?;
                let moved = buf.len();
                buf.clear();
                self.commit_position.fetch_add(moved as i64, Ordering::AcqRel);
            }
        }
        Ok(self.start_offset + self.commit_position())
    }

    /// Finalizes a segment that is being retired as tail: one last commit.
    pub fn done_write(&self) -> Result<i64> {
        self.commit()
    }

    fn write_direct(&self, pos: usize, chunks: &[&[u8]]) -> Result<()> {
        if self.write_mmap {
            let mut guard = self.mmap.write().unwrap();
            let mut p = pos;
            for c in chunks {
                guard.range_mut(p, p + c.len()).copy_from_slice(c);
                p += c.len();
            }
        } else {
            use std::os::unix::fs::FileExt;
            let guard = self.mmap.read().unwrap();
            let mut p = pos as u64;
            for c in chunks {
                guard.file().write_at(c, p)?;
                p += c.len() as u64;
            }
        }
        Ok(())
    }

    /// Copies `out.len()` bytes starting at `file_offset` into `out`. Fails
    /// with `ReadBeyond` when the requested range has not been committed.
    pub fn read_locked(&self, file_offset: usize, out: &mut [u8]) -> Result<()> {
        let guard = self.mmap.read().unwrap();
        let read_pos = self.read_position() as usize;
        if file_offset.saturating_add(out.len()) > read_pos {
            return Err(Error::ReadBeyond);
        }
        out.copy_from_slice(&guard.as_slice()[file_offset..file_offset + out.len()]);
        Ok(())
    }

    /// Increments the ref count, returning the new value.
    pub fn incr_ref(&self) -> i64 {
        self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the ref count; closes and unlinks the file once it reaches
    /// zero. Failures here are logged, never propagated: the segment must
    /// not leak even if cleanup fails.
    pub fn decr_ref(&self) {
        let prev = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            if let Err(err) = self.close_and_unlink() {
                log::warn!("segment {} cleanup failed: {err}", self.idx);
            }
        }
    }

    fn close_and_unlink(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        {
            let guard = self.mmap.write().unwrap();
            guard.sync()?;
        }
        std::fs::remove_file(&self.path)?;
        Ok(())
    }

    /// Resizes a non-tail segment down to its exact used size and remaps it.
    pub fn shrink(&self, used: u64) -> Result<()> {
        let mut guard = self.mmap.write().unwrap();
        guard.sync()?;
        guard.truncate(used)?;
        *guard = MmapFile::open(&self.path, used)?;
        Ok(())
    }
}

/// Stateful cursor for sequential reads across one segment, blocking on the
/// watermark at the tail when data has not yet been committed.
pub struct SegmentSizeReader {
    segment: Arc<Segment>,
    offset: usize,
}

impl SegmentSizeReader {
    pub fn new(segment: Arc<Segment>, offset: usize) -> Self {
        Self { segment, offset }
    }

    pub fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }

    pub fn next_offset(&self) -> i64 {
        self.segment.start_offset + self.offset as i64
    }

    /// Reads exactly `buf.len()` bytes.
    ///
    /// If the segment reports `ReadBeyond` and the segment is not the tail,
    /// returns `ReadBeyond` (the caller should switch to the next segment).
    /// If it is the tail and `watermark` is `None`, returns `ReadBeyond`
    /// immediately (not yet committed, caller does not want to wait). If it
    /// is the tail and `watermark` is `Some`, blocks for the required commit
    /// offset and retries exactly once; a second failure means the segment
    /// rolled over beneath the cursor.
    pub fn read_blocking(
        &mut self,
        buf: &mut [u8],
        is_tail: &dyn Fn() -> bool,
        watermark: Option<&crate::watermark::Watermark>,
        cancel: &dyn Fn() -> bool,
    ) -> Result<()> {
        match self.segment.read_locked(self.offset, buf) {
            Ok(()) => {
                self.offset += buf.len();
                Ok(())
            }
            Err(Error::ReadBeyond) => {
                if !is_tail() {
                    return Err(Error::ReadBeyond);
                }
                let watermark = match watermark {
                    Some(wm) => wm,
                    None => return Err(Error::ReadBeyond),
                };
                let target = self.segment.start_offset + self.offset as i64 + buf.len() as i64;
                watermark.wait(target, cancel)?;
                match self.segment.read_locked(self.offset, buf) {
                    Ok(()) => {
                        self.offset += buf.len();
                        Ok(())
                    }
                    Err(_) => Err(Error::ReadBeyond),
                }
            }
            Err(e) => Err(e),
        }
    }
}
