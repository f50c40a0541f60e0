//! A durable, append-only, memory-mapped disk queue.
//!
//! Records are appended by a single dedicated writer task that batches
//! concurrent producers onto the current tail segment, and read back either
//! one offset at a time or as a sequential stream that blocks for new data.
//! Segments are mmapped files that concatenate into one logical absolute
//! offset space; a small on-disk metadata table tracks which segment owns
//! which offset range and survives process restarts.

mod clock;
mod closer;
mod config;
mod error;
mod framing;
mod gc;
mod metadata;
mod mmap;
mod queue;
mod reader;
mod segment;
mod watermark;
mod writer;

pub use config::{
    QueueConfig, DEFAULT_COMMIT_INTERVAL, DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_MSG_SIZE, DEFAULT_MAX_PUTTING,
    DEFAULT_PERSIST_DURATION, DEFAULT_WRITE_BATCH, MIN_COMMIT_INTERVAL, MIN_PERSIST_DURATION,
};
pub use error::{Error, Result};
pub use framing::{DecodeOutcome, Decoder, FixedWidthDecoder};
pub use metadata::FileMeta;
pub use queue::{CancelToken, Queue};
pub use reader::{OffsetStreamReader, StreamReader};
