//! Record framing: the default 4-byte length-prefixed format, plus the
//! injectable-decoder escape hatch for callers that want raw, unframed
//! payloads.

use crate::error::{Error, Result};
use crate::segment::SegmentSizeReader;
use crate::watermark::Watermark;

pub const LENGTH_PREFIX_SIZE: usize = 4;

pub enum DecodeOutcome {
    Record(Vec<u8>),
    /// The reader hit `ReadBeyond` on a non-tail segment: the caller should
    /// advance to the next segment and retry there.
    SwitchSegment,
}

/// A pluggable record boundary detector. Implementations must be pure
/// functions over the reader's cursor plus the cancellation predicate; they
/// must not retain references to segment memory past return.
pub trait Decoder: Send + Sync {
    fn decode(
        &self,
        reader: &mut SegmentSizeReader,
        is_tail: &dyn Fn() -> bool,
        watermark: Option<&Watermark>,
        cancel: &dyn Fn() -> bool,
    ) -> Result<DecodeOutcome>;
}

/// Frames a payload as `[4-byte big-endian length][payload]` for the
/// writer's scatter-gather write.
pub fn frame_default(payload: &[u8]) -> [u8; LENGTH_PREFIX_SIZE] {
    (payload.len() as u32).to_be_bytes()
}

/// Decodes one record using either the configured custom decoder or the
/// default length-prefixed framing.
pub fn decode_record(
    reader: &mut SegmentSizeReader,
    max_msg_size: usize,
    is_tail: &dyn Fn() -> bool,
    watermark: Option<&Watermark>,
    cancel: &dyn Fn() -> bool,
    custom: Option<&dyn Decoder>,
) -> Result<DecodeOutcome> {
    if let Some(decoder) = custom {
        return decoder.decode(reader, is_tail, watermark, cancel);
    }

    let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
    match reader.read_blocking(&mut len_buf, is_tail, watermark, cancel) {
        Ok(()) => {}
        Err(Error::ReadBeyond) if !is_tail() => return Ok(DecodeOutcome::SwitchSegment),
        Err(e) => return Err(e),
    }

    let size = u32::from_be_bytes(len_buf) as usize;
    if size > max_msg_size {
        return Err(Error::InvalidOffset);
    }

    let mut payload = vec![0u8; size];
    reader.read_blocking(&mut payload, is_tail, watermark, cancel)?;
    Ok(DecodeOutcome::Record(payload))
}

/// A decoder for fixed-width, unframed records (no length prefix at all).
/// Grounded in scenario S6: custom-decoder queues storing raw fixed records.
pub struct FixedWidthDecoder {
    pub record_len: usize,
}

impl Decoder for FixedWidthDecoder {
    fn decode(
        &self,
        reader: &mut SegmentSizeReader,
        is_tail: &dyn Fn() -> bool,
        watermark: Option<&Watermark>,
        cancel: &dyn Fn() -> bool,
    ) -> Result<DecodeOutcome> {
        let mut payload = vec![0u8; self.record_len];
        match reader.read_blocking(&mut payload, is_tail, watermark, cancel) {
            Ok(()) => Ok(DecodeOutcome::Record(payload)),
            Err(Error::ReadBeyond) if !is_tail() => Ok(DecodeOutcome::SwitchSegment),
            Err(e) => Err(e),
        }
    }
}
