//! Single dedicated writer task: batches concurrent producers onto the tail
//! segment with one vectored write per batch, and the periodic commit task
//! used when write-buffering is enabled.

use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use crate::closer::Closer;
use crate::error::{Error, Result};
use crate::framing::frame_default;
use crate::metadata::FileMeta;
use crate::queue::Shared;
use crate::segment::Segment;

pub struct PutRequest {
    pub payload: Vec<u8>,
    pub reply: Sender<Result<i64>>,
}

pub enum WriterCommand {
    Put(PutRequest),
    Gc(Sender<Result<u32>>),
    Shutdown,
}

const IO_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// The writer task's run loop: block for work, batch, write, reply, repeat.
/// On `Shutdown`, drains whatever remains queued so no accepted `put` is lost.
pub(crate) fn run(shared: Arc<Shared>, rx: Receiver<WriterCommand>) {
    loop {
        let cmd = match rx.recv() {
            Ok(c) => c,
            Err(_) => break,
        };
        match cmd {
            WriterCommand::Shutdown => break,
            WriterCommand::Gc(reply) => {
                let _ = reply.send(crate::gc::run_gc(&shared));
            }
            WriterCommand::Put(first) => {
                let mut batch = vec![first];
                let mut deferred = None;
                while batch.len() < shared.config.write_batch {
                    match rx.try_recv() {
                        Ok(WriterCommand::Put(req)) => batch.push(req),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                    }
                }
                write_batch(&shared, batch);
                match deferred {
                    Some(WriterCommand::Gc(reply)) => {
                        let _ = reply.send(crate::gc::run_gc(&shared));
                    }
                    Some(WriterCommand::Shutdown) => break,
                    _ => {}
                }
            }
        }
    }

    // Final drain: anything still queued must still be written before the
    // thread exits.
    while let Ok(cmd) = rx.try_recv() {
        match cmd {
            WriterCommand::Put(req) => write_batch(&shared, vec![req]),
            WriterCommand::Gc(reply) => {
                let _ = reply.send(crate::gc::run_gc(&shared));
            }
            WriterCommand::Shutdown => {}
        }
    }
}

/// Writes `batch` to the tail, rolling over as many times as needed. A
/// batch that would overflow the tail's remaining capacity is split: the
/// longest prefix that fits lands in the old tail, the rest is retried
/// against the freshly rolled tail. Only a batch whose first record does
/// not fit at all skips straight to rolling.
fn write_batch(shared: &Arc<Shared>, mut batch: Vec<PutRequest>) {
    if batch.is_empty() {
        return;
    }
    let use_framing = shared.config.custom_decoder.is_none();

    while !batch.is_empty() {
        let tail = {
            let segments = shared.segments.read().unwrap();
            segments.last().expect("writer invariant: tail segment always present").clone()
        };

        let remaining = tail.capacity().saturating_sub(tail.wrote_position() as u64);
        let mut fit = 0;
        let mut used = 0u64;
        for req in &batch {
            let size = req.payload.len() as u64 + if use_framing { 4 } else { 0 };
            if used + size > remaining {
                break;
            }
            used += size;
            fit += 1;
        }

        if fit == 0 {
            if let Err(e) = roll_segment(shared, &tail) {
                log::error!("segment rollover failed, retrying in {IO_RETRY_BACKOFF:?}: {e}");
                std::thread::sleep(IO_RETRY_BACKOFF);
            }
            continue;
        }

        let remainder = batch.split_off(fit);
        let admitted = std::mem::replace(&mut batch, remainder);

        match write_admitted(shared, &tail, use_framing, admitted) {
            Ok(()) => {
                if batch.is_empty() {
                    return;
                }
                if let Err(e) = roll_segment(shared, &tail) {
                    log::error!("segment rollover failed, retrying in {IO_RETRY_BACKOFF:?}: {e}");
                    std::thread::sleep(IO_RETRY_BACKOFF);
                }
            }
            Err((admitted, e)) => {
                log::error!("segment write failed, retrying in {IO_RETRY_BACKOFF:?}: {e}");
                std::thread::sleep(IO_RETRY_BACKOFF);
                let mut retry = admitted;
                retry.append(&mut batch);
                batch = retry;
            }
        }
    }
}

/// Writes exactly the records in `admitted` (already known to fit in
/// `tail`'s remaining capacity) and replies to each with its offset. On
/// failure, hands `admitted` back unconsumed so the caller can retry it.
fn write_admitted(
    shared: &Arc<Shared>,
    tail: &Arc<Segment>,
    use_framing: bool,
    mut admitted: Vec<PutRequest>,
) -> std::result::Result<(), (Vec<PutRequest>, Error)> {
    let mut length_prefixes: Vec<[u8; 4]> = Vec::with_capacity(if use_framing { admitted.len() } else { 0 });
    if use_framing {
        for req in &admitted {
            length_prefixes.push(frame_default(&req.payload));
        }
    }
    let mut chunks: Vec<&[u8]> = Vec::with_capacity(admitted.len() * 2);
    for (i, req) in admitted.iter().enumerate() {
        if use_framing {
            chunks.push(&length_prefixes[i]);
        }
        chunks.push(&req.payload);
    }

    let pre_wrote = tail.wrote_position();

    match tail.write_buffers(&chunks) {
        Ok(_bytes_written) => {
            let now = shared.clock.now_nano();
            let new_end_offset = tail.end_offset();
            let tail_meta_idx =
                shared.min_valid_index.load(Ordering::Acquire) + (shared.segments.read().unwrap().len() as u32 - 1);
            if let Err(e) = shared.meta.update_file_stat(tail_meta_idx, admitted.len() as u64, new_end_offset, now) {
                log::error!("metadata update failed: {e}");
            }

            if !shared.config.enable_write_buffer {
                shared.watermark.done(new_end_offset);
            }

            let mut cursor = tail.start_offset + pre_wrote;
            for req in admitted.drain(..) {
                let offset = cursor;
                let framed_len = req.payload.len() as i64 + if use_framing { 4 } else { 0 };
                cursor += framed_len;
                let _ = req.reply.send(Ok(offset));
            }
            Ok(())
        }
        Err(e) => Err((admitted, e)),
    }
}

/// Finalizes the current tail, publishes its commit offset, and creates a
/// fresh tail segment. Rollover is atomic w.r.t. readers: the old tail's
/// commit offset is published to the watermark before the new tail's first
/// byte is appended.
fn roll_segment(shared: &Arc<Shared>, old_tail: &Arc<Segment>) -> Result<()> {
    let mut segments = shared.segments.write().unwrap();

    let commit_offset = old_tail.done_write()?;
    shared.watermark.done(commit_offset);

    let new_start_offset = old_tail.end_offset();
    let new_idx = shared.meta.num_files();
    let new_segment = Segment::create(
        &shared.config.directory,
        new_idx,
        new_start_offset,
        shared.config.max_file_size,
        shared.config.write_mmap,
        shared.config.enable_write_buffer,
    )?;
    shared.meta.add_file(FileMeta {
        start_offset: new_start_offset,
        end_offset: new_start_offset,
        start_time: 0,
        end_time: 0,
        msg_count: 0,
    })?;
    old_tail.shrink(old_tail.wrote_position() as u64)?;

    segments.push(Arc::new(new_segment));
    Ok(())
}

/// Periodic commit task: moves the tail's write buffer into the
/// mapping/file on a fixed interval, only run when `enable_write_buffer`.
pub(crate) fn run_commit_loop(shared: Arc<Shared>, closer: Arc<Closer>) {
    let interval = shared.config.commit_interval;
    let slice = Duration::from_millis(50).min(interval.max(Duration::from_millis(1)));

    'outer: loop {
        let mut waited = Duration::ZERO;
        while waited < interval {
            if closer.is_closing() {
                break 'outer;
            }
            std::thread::sleep(slice);
            waited += slice;
        }
        if closer.is_closing() {
            break;
        }

        let tail = {
            let segments = shared.segments.read().unwrap();
            segments.last().cloned()
        };
        if let Some(tail) = tail {
            match tail.commit() {
                Ok(commit_offset) => shared.watermark.done(commit_offset),
                Err(e) => log::warn!("periodic commit failed: {e}"),
            }
        }
    }
}
