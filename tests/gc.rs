//! Segment-granular garbage collection and the ref-counting handoff that
//! keeps a retired segment's file alive while a reader still holds it.

use std::thread;
use std::time::Duration;

use ledgerq::{CancelToken, Queue, QueueConfig};
use tempfile::tempdir;

fn segment_file_count(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir.join("qf")).map(|rd| rd.count()).unwrap_or(0)
}

#[test]
fn gc_retires_expired_non_tail_segments() {
    let dir = tempdir().unwrap();
    let queue = Queue::open(
        QueueConfig::new(dir.path())
            .with_write_mmap(true)
            .with_max_file_size(64)
            .with_write_batch(1)
            .with_persist_duration(Duration::ZERO),
    )
    .unwrap();

    let cancel = CancelToken::new();
    let mut offsets = Vec::with_capacity(100);
    for _ in 0..100 {
        offsets.push(queue.put(vec![0u8; 16]).unwrap());
    }
    assert!(queue.num_files() >= 3, "expected rollover to have produced multiple segments");

    let removed = queue.gc().unwrap();
    assert_eq!(removed, queue.num_files() - 1);

    let tail_start = queue.file_meta(queue.num_files() - 1).unwrap().start_offset;
    for offset in &offsets {
        let result = queue.read(*offset, &cancel);
        if *offset < tail_start {
            assert!(matches!(result, Err(ledgerq::Error::InvalidOffset)));
        } else {
            assert!(result.is_ok());
        }
    }
}

#[test]
fn retired_segment_file_survives_until_reader_drops() {
    let dir = tempdir().unwrap();
    let queue = Queue::open(
        QueueConfig::new(dir.path())
            .with_write_mmap(true)
            .with_max_file_size(64)
            .with_write_batch(1)
            .with_persist_duration(Duration::ZERO),
    )
    .unwrap();

    for _ in 0..20 {
        queue.put(vec![0u8; 16]).unwrap();
    }
    assert!(queue.num_files() >= 2);

    let cancel = CancelToken::new();
    let reader = queue.stream_read(0, cancel).unwrap();
    let before = segment_file_count(dir.path());

    queue.gc().unwrap();
    let during = segment_file_count(dir.path());
    assert_eq!(during, before, "segment 0's file must survive while the reader still holds it");

    drop(reader);
    thread::sleep(Duration::from_millis(50));
    let after = segment_file_count(dir.path());
    assert!(after < before, "segment 0's file should be unlinked once the reader releases it");
}
