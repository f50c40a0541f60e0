//! Segment acquisition and the two read paths: single-offset `read` and the
//! sequential/offset-driven streaming readers.

use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::framing::{decode_record, DecodeOutcome};
use crate::queue::{CancelToken, Shared};
use crate::segment::{Segment, SegmentSizeReader};

const OFFSET_RECV_POLL: Duration = Duration::from_millis(20);

/// Resolves `offset` to its owning segment and bumps its ref count for the
/// duration of the caller's read. Returns the segment and whether it is
/// currently the tail.
pub(crate) fn acquire_segment(shared: &Arc<Shared>, offset: i64) -> Result<(Arc<Segment>, bool)> {
    let idx = shared.meta.locate_file(offset).ok_or(Error::InvalidOffset)?;
    let segments = shared.segments.read().unwrap();
    let min_valid = shared.min_valid_index.load(Ordering::Acquire);
    if idx < min_valid {
        return Err(Error::InvalidOffset);
    }
    let pos = (idx - min_valid) as usize;
    let segment = segments.get(pos).cloned().ok_or(Error::InvalidOffset)?;
    let is_tail = pos == segments.len() - 1;
    drop(segments);
    // A post-increment count of 1 means GC's decr_ref already tore this
    // segment down between us cloning the Arc and bumping the count: the
    // file is gone, this is not a live handle.
    if segment.incr_ref() == 1 {
        return Err(Error::InvalidOffset);
    }
    Ok((segment, is_tail))
}

/// Decrements a segment's ref count when the holding reader is done with it.
struct SegmentRef(Arc<Segment>);

impl Drop for SegmentRef {
    fn drop(&mut self) {
        self.0.decr_ref();
    }
}

/// Reads exactly one record at `offset`. Does not cross a segment boundary:
/// a record that was somehow split across segments is reported as corrupt
/// rather than stitched back together.
pub fn read_one(shared: &Arc<Shared>, offset: i64, cancel: &CancelToken) -> Result<Vec<u8>> {
    let (segment, is_tail) = acquire_segment(shared, offset)?;
    let _guard = SegmentRef(segment.clone());
    let file_offset = (offset - segment.start_offset) as usize;
    let mut cursor = SegmentSizeReader::new(segment, file_offset);
    let is_tail_fn = || is_tail;
    let cancel_fn = || cancel.is_cancelled() || shared.is_closed();

    match decode_record(
        &mut cursor,
        shared.config.max_msg_size,
        &is_tail_fn,
        Some(&shared.watermark),
        &cancel_fn,
        shared.config.custom_decoder.as_deref(),
    )? {
        DecodeOutcome::Record(payload) => Ok(payload),
        DecodeOutcome::SwitchSegment => Err(Error::Corrupt("record split across segment boundary")),
    }
}

/// Sequential reader over the logical offset stream starting at a given
/// offset, transparently advancing across segment boundaries and blocking on
/// the watermark at the tail.
pub struct StreamReader {
    shared: Arc<Shared>,
    segment: Arc<Segment>,
    is_tail: bool,
    cursor: SegmentSizeReader,
    cancel: CancelToken,
}

impl StreamReader {
    pub(crate) fn new(shared: Arc<Shared>, offset: i64, cancel: CancelToken) -> Result<Self> {
        let (segment, is_tail) = acquire_segment(&shared, offset)?;
        let file_offset = (offset - segment.start_offset) as usize;
        let cursor = SegmentSizeReader::new(segment.clone(), file_offset);
        Ok(Self { shared, segment, is_tail, cursor, cancel })
    }

    /// Returns the next record, or `None` once the stream has been cancelled
    /// or the queue has closed.
    pub fn next(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let is_tail = self.is_tail;
            let shared = &self.shared;
            let cancel = &self.cancel;
            let is_tail_fn = || is_tail;
            let cancel_fn = || cancel.is_cancelled() || shared.is_closed();

            match decode_record(
                &mut self.cursor,
                self.shared.config.max_msg_size,
                &is_tail_fn,
                Some(&self.shared.watermark),
                &cancel_fn,
                self.shared.config.custom_decoder.as_deref(),
            ) {
                Ok(DecodeOutcome::Record(payload)) => return Ok(Some(payload)),
                Ok(DecodeOutcome::SwitchSegment) => self.advance_segment()?,
                Err(Error::Cancelled) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    /// Moves to the segment following the one the cursor just exhausted.
    /// Increments the next segment's ref count before releasing the current
    /// one so the handed-off segment is never briefly unreferenced.
    fn advance_segment(&mut self) -> Result<()> {
        let (next_segment, next_is_tail) = {
            let segments = self.shared.segments.read().unwrap();
            let min_valid = self.shared.min_valid_index.load(Ordering::Acquire);
            let cur_pos = (self.segment.idx - min_valid) as usize;
            let next_pos = cur_pos + 1;
            let next = segments.get(next_pos).cloned().ok_or(Error::InvalidOffset)?;
            (next, next_pos == segments.len() - 1)
        };
        if next_segment.incr_ref() == 1 {
            return Err(Error::InvalidOffset);
        }

        let old = std::mem::replace(&mut self.segment, next_segment.clone());
        old.decr_ref();
        self.is_tail = next_is_tail;
        self.cursor = SegmentSizeReader::new(next_segment, 0);
        Ok(())
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.segment.decr_ref();
    }
}

/// Reads records for offsets pulled from an external channel, rather than
/// sequentially. Used by consumers that already track their own cursor
/// (e.g. replaying a stored checkpoint list).
pub struct OffsetStreamReader {
    shared: Arc<Shared>,
    offsets: Receiver<i64>,
    cancel: CancelToken,
}

impl OffsetStreamReader {
    pub(crate) fn new(shared: Arc<Shared>, offsets: Receiver<i64>, cancel: CancelToken) -> Self {
        Self { shared, offsets, cancel }
    }

    /// Returns the next requested record, or `None` once the offset channel
    /// closes or the reader is cancelled.
    pub fn next(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            match self.offsets.recv_timeout(OFFSET_RECV_POLL) {
                Ok(offset) => return read_one(&self.shared, offset, &self.cancel).map(Some),
                Err(RecvTimeoutError::Timeout) => {
                    if self.cancel.is_cancelled() || self.shared.is_closed() {
                        return Ok(None);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
    }
}
