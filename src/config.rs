//! Queue configuration. A plain field bag with defaults, constructed
//! programmatically — parsing it from a file or environment is the excluded
//! CLI layer's job.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::framing::Decoder;

pub const DEFAULT_WRITE_BATCH: usize = 100;
pub const DEFAULT_MAX_MSG_SIZE: usize = 512 * 1024 * 1024;
pub const DEFAULT_MAX_PUTTING: usize = 200_000;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_COMMIT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_PERSIST_DURATION: Duration = Duration::from_secs(72 * 3600);
pub const MIN_COMMIT_INTERVAL: Duration = Duration::from_secs(1);
pub const MIN_PERSIST_DURATION: Duration = Duration::from_secs(3600);

#[derive(Clone)]
pub struct QueueConfig {
    pub directory: PathBuf,
    pub write_batch: usize,
    pub max_msg_size: usize,
    pub max_putting: usize,
    pub max_file_size: u64,
    pub write_mmap: bool,
    pub enable_write_buffer: bool,
    pub commit_interval: Duration,
    pub persist_duration: Duration,
    pub custom_decoder: Option<Arc<dyn Decoder>>,
}

impl QueueConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            write_batch: DEFAULT_WRITE_BATCH,
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
            max_putting: DEFAULT_MAX_PUTTING,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            write_mmap: false,
            enable_write_buffer: false,
            commit_interval: DEFAULT_COMMIT_INTERVAL,
            persist_duration: DEFAULT_PERSIST_DURATION,
            custom_decoder: None,
        }
    }

    pub fn with_write_batch(mut self, write_batch: usize) -> Self {
        self.write_batch = write_batch.max(1);
        self
    }

    pub fn with_max_msg_size(mut self, max_msg_size: usize) -> Self {
        self.max_msg_size = max_msg_size;
        self
    }

    pub fn with_max_putting(mut self, max_putting: usize) -> Self {
        self.max_putting = max_putting;
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn with_write_mmap(mut self, write_mmap: bool) -> Self {
        self.write_mmap = write_mmap;
        self
    }

    pub fn with_write_buffer(mut self, enable: bool) -> Self {
        self.enable_write_buffer = enable;
        self
    }

    /// Sets the buffered-write commit interval. Values below
    /// `MIN_COMMIT_INTERVAL` are accepted verbatim (tests rely on this to
    /// force deterministic timing) but are not the recommended range.
    pub fn with_commit_interval(mut self, interval: Duration) -> Self {
        self.commit_interval = interval;
        self
    }

    /// Sets the GC eligibility threshold. Values below `MIN_PERSIST_DURATION`
    /// are accepted verbatim — e.g. `Duration::ZERO` makes every non-tail
    /// segment immediately GC-eligible, as used by scenario tests.
    pub fn with_persist_duration(mut self, duration: Duration) -> Self {
        self.persist_duration = duration;
        self
    }

    pub fn with_custom_decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.custom_decoder = Some(decoder);
        self
    }
}

impl fmt::Debug for QueueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConfig")
            .field("directory", &self.directory)
            .field("write_batch", &self.write_batch)
            .field("max_msg_size", &self.max_msg_size)
            .field("max_putting", &self.max_putting)
            .field("max_file_size", &self.max_file_size)
            .field("write_mmap", &self.write_mmap)
            .field("enable_write_buffer", &self.enable_write_buffer)
            .field("commit_interval", &self.commit_interval)
            .field("persist_duration", &self.persist_duration)
            .field("custom_decoder", &self.custom_decoder.is_some())
            .finish()
    }
}
