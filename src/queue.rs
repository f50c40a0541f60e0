//! Queue coordinator: the public entry point tying together segments,
//! metadata, the watermark, and the writer/commit/GC tasks.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};

use crate::clock::MonotonicClock;
use crate::closer::Closer;
use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::metadata::{FileMeta, MetaFile};
use crate::reader::{self, OffsetStreamReader, StreamReader};
use crate::segment::Segment;
use crate::watermark::Watermark;
use crate::writer::{self, PutRequest, WriterCommand};

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// A cooperative cancellation flag shared between a caller and the blocking
/// read it issued. Cloning shares the same underlying flag.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// State shared between the `Queue` handle and its background tasks.
pub(crate) struct Shared {
    pub config: QueueConfig,
    pub meta: MetaFile,
    pub segments: RwLock<Vec<Arc<Segment>>>,
    pub min_valid_index: AtomicU32,
    pub clock: MonotonicClock,
    pub watermark: Watermark,
    pub state: AtomicU8,
}

impl Shared {
    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) != STATE_OPEN
    }
}

/// A durable, memory-mapped, append-only disk queue.
pub struct Queue {
    shared: Arc<Shared>,
    closer: Arc<Closer>,
    putting: AtomicUsize,
    gc_in_progress: AtomicBool,
    cmd_tx: Sender<WriterCommand>,
    writer_handle: Option<JoinHandle<()>>,
    commit_handle: Option<JoinHandle<()>>,
}

impl Queue {
    /// Opens (creating if necessary) the queue rooted at `config.directory`.
    pub fn open(config: QueueConfig) -> Result<Self> {
        if config.directory.as_os_str().is_empty() {
            return Err(Error::EmptyDirectory);
        }
        std::fs::create_dir_all(&config.directory)?;

        let meta = MetaFile::open(&config.directory)?;
        let file_count = meta.num_files();

        let mut segments = Vec::new();
        if file_count == 0 {
            let seg = Segment::create(
                &config.directory,
                0,
                0,
                config.max_file_size,
                config.write_mmap,
                config.enable_write_buffer,
            )?;
            meta.add_file(FileMeta { start_offset: 0, end_offset: 0, start_time: 0, end_time: 0, msg_count: 0 })?;
            segments.push(Arc::new(seg));
        } else {
            let (_, min_valid) = meta.stat();
            for idx in min_valid..file_count {
                let row = meta.file_meta(idx)?;
                let used = (row.end_offset - row.start_offset) as u64;
                let is_tail = idx == file_count - 1;
                let file_len = if is_tail { config.max_file_size } else { used };
                let seg = Segment::open(
                    &config.directory,
                    idx,
                    row.start_offset,
                    file_len,
                    config.write_mmap,
                    config.enable_write_buffer,
                    used,
                )?;
                segments.push(Arc::new(seg));
            }
        }

        let (_, min_valid_index) = meta.stat();
        let tail_end = segments.last().expect("at least the tail segment always exists").end_offset();

        let watermark = Watermark::new();
        watermark.done(tail_end);

        let shared = Arc::new(Shared {
            config,
            meta,
            segments: RwLock::new(segments),
            min_valid_index: AtomicU32::new(min_valid_index),
            clock: MonotonicClock::new(),
            watermark,
            state: AtomicU8::new(STATE_OPEN),
        });

        let closer = Arc::new(Closer::new());
        let (cmd_tx, cmd_rx) = mpsc::channel();

        closer.add(1)?;
        let writer_shared = shared.clone();
        let writer_closer = closer.clone();
        let writer_handle = thread::Builder::new()
            .name("ledgerq-writer".into())
            .spawn(move || {
                writer::run(writer_shared, cmd_rx);
                let _ = writer_closer.add(-1);
            })
            .expect("spawn writer thread");

        let commit_handle = if shared.config.enable_write_buffer {
            closer.add(1)?;
            let commit_shared = shared.clone();
            let commit_closer = closer.clone();
            Some(
                thread::Builder::new()
                    .name("ledgerq-commit".into())
                    .spawn(move || {
                        writer::run_commit_loop(commit_shared, commit_closer.clone());
                        let _ = commit_closer.add(-1);
                    })
                    .expect("spawn commit thread"),
            )
        } else {
            None
        };

        Ok(Self {
            shared,
            closer,
            putting: AtomicUsize::new(0),
            gc_in_progress: AtomicBool::new(false),
            cmd_tx,
            writer_handle: Some(writer_handle),
            commit_handle,
        })
    }

    /// Appends `payload`, returning its absolute offset once durably
    /// ordered (not necessarily fsynced, unless buffering is disabled and
    /// the platform honors mmap writes as durable).
    pub fn put(&self, payload: Vec<u8>) -> Result<i64> {
        if self.shared.is_closed() {
            return Err(Error::AlreadyClosed);
        }
        if payload.len() > self.shared.config.max_msg_size {
            return Err(Error::MsgTooLarge);
        }

        let prev = self.putting.fetch_add(1, Ordering::AcqRel);
        if prev >= self.shared.config.max_putting {
            self.putting.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::MaxPutting);
        }

        let outcome = (|| {
            let (reply_tx, reply_rx) = mpsc::channel();
            self.cmd_tx
                .send(WriterCommand::Put(PutRequest { payload, reply: reply_tx }))
                .map_err(|_| Error::AlreadyClosed)?;
            reply_rx.recv().map_err(|_| Error::AlreadyClosed)?
        })();
        self.putting.fetch_sub(1, Ordering::AcqRel);
        outcome
    }

    /// Reads exactly one record at `offset`.
    pub fn read(&self, offset: i64, cancel: &CancelToken) -> Result<Vec<u8>> {
        reader::read_one(&self.shared, offset, cancel)
    }

    /// Opens a sequential reader starting at `offset`, following the tail as
    /// new records are appended.
    pub fn stream_read(&self, offset: i64, cancel: CancelToken) -> Result<StreamReader> {
        StreamReader::new(self.shared.clone(), offset, cancel)
    }

    /// Opens a reader that fetches records for offsets arriving on an
    /// external channel, rather than sequentially.
    pub fn stream_offset_read(&self, offsets: Receiver<i64>, cancel: CancelToken) -> OffsetStreamReader {
        OffsetStreamReader::new(self.shared.clone(), offsets, cancel)
    }

    /// Runs one GC pass, retiring segments older than `persist_duration`.
    /// Returns the number of segments removed. Rejects concurrent GC calls.
    pub fn gc(&self) -> Result<u32> {
        if self
            .gc_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::GCing);
        }
        let (tx, rx) = mpsc::channel();
        let outcome = match self.cmd_tx.send(WriterCommand::Gc(tx)) {
            Ok(()) => rx.recv().unwrap_or(Err(Error::AlreadyClosed)),
            Err(_) => Err(Error::AlreadyClosed),
        };
        self.gc_in_progress.store(false, Ordering::Release);
        outcome
    }

    /// Number of segment files the metadata table currently tracks,
    /// including ones already retired by GC (use with `file_meta` starting
    /// from the index `file_meta` itself rejects to find the live range).
    pub fn num_files(&self) -> u32 {
        self.shared.meta.num_files()
    }

    /// Per-segment metadata row for `idx`, for inspecting durability and
    /// retention state directly.
    pub fn file_meta(&self, idx: u32) -> Result<FileMeta> {
        self.shared.meta.file_meta(idx)
    }

    /// Approximate live record count, summed from per-segment metadata.
    pub fn approx_len(&self) -> u64 {
        let (file_count, min_valid) = self.shared.meta.stat();
        (min_valid..file_count).filter_map(|idx| self.shared.meta.file_meta(idx).ok()).map(|row| row.msg_count).sum()
    }

    /// The highest offset durably published to readers.
    pub fn tail_offset(&self) -> i64 {
        self.shared.watermark.done_offset()
    }

    /// Signals shutdown, drains the writer/commit tasks, and flushes
    /// metadata. Idempotent: calling it more than once is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self
            .shared
            .state
            .compare_exchange(STATE_OPEN, STATE_CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let _ = self.cmd_tx.send(WriterCommand::Shutdown);
        self.closer.signal_and_wait();
        if let Some(h) = self.writer_handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.commit_handle.take() {
            let _ = h.join();
        }

        for attempt in 0..3 {
            match self.shared.meta.sync() {
                Ok(()) => break,
                Err(e) if attempt < 2 => log::warn!("metadata flush retry after failure: {e}"),
                Err(e) => log::error!("metadata flush failed after retries: {e}"),
            }
        }

        self.shared.state.store(STATE_CLOSED, Ordering::Release);
        Ok(())
    }

    /// Closes the queue and removes every segment and metadata file on disk.
    pub fn delete(mut self) -> Result<()> {
        self.close()?;
        {
            let segments = self.shared.segments.read().unwrap();
            for seg in segments.iter() {
                seg.decr_ref();
            }
        }
        std::fs::remove_dir_all(&self.shared.config.directory)?;
        Ok(())
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if self.shared.state.load(Ordering::Acquire) != STATE_CLOSED {
            let _ = self.close();
        }
    }
}
