//! GC algorithm: segment-granular, time-based. Runs on the writer task's
//! channel so it never mutates the segment list while a write is in flight.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::error::Result;
use crate::queue::Shared;

pub(crate) fn run_gc(shared: &Arc<Shared>) -> Result<u32> {
    let now = shared.clock.now_nano();
    let persist_ns = shared.config.persist_duration.as_nanos() as i64;
    let mut removed = 0u32;

    loop {
        let mut segments = shared.segments.write().unwrap();
        let file_count = shared.meta.num_files();
        let min_valid = shared.min_valid_index.load(Ordering::Acquire);

        // Never touch the tail: stop once only the tail row remains below
        // file_count, i.e. min_valid_index would reach file_count - 1.
        if min_valid + 1 >= file_count {
            break;
        }

        let row = shared.meta.file_meta(min_valid)?;
        if now - row.end_time < persist_ns {
            break;
        }

        let new_min_valid = min_valid + 1;
        let retired = segments.remove(0);
        shared.min_valid_index.store(new_min_valid, Ordering::Release);
        shared.meta.update_min_valid_index(new_min_valid)?;
        drop(segments);

        retired.decr_ref();
        removed += 1;
    }

    Ok(removed)
}
