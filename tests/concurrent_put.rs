//! Concurrent producers: every offset handed back is distinct, and the
//! union of read-backs matches the union of inputs.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use ledgerq::{CancelToken, Queue, QueueConfig};
use tempfile::tempdir;

#[test]
fn concurrent_producers_yield_distinct_ascending_offsets() {
    let dir = tempdir().unwrap();
    let queue = Arc::new(Queue::open(QueueConfig::new(dir.path()).with_write_mmap(true)).unwrap());

    const PRODUCERS: usize = 8;
    const PUTS_PER_PRODUCER: usize = 200;

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut results = Vec::with_capacity(PUTS_PER_PRODUCER);
                for i in 0..PUTS_PER_PRODUCER {
                    let payload = format!("producer-{p}-record-{i}").into_bytes();
                    let offset = queue.put(payload.clone()).unwrap();
                    results.push((offset, payload));
                }
                results
            })
        })
        .collect();

    let mut all: Vec<(i64, Vec<u8>)> = Vec::new();
    for h in handles {
        all.extend(h.join().unwrap());
    }

    assert_eq!(all.len(), PRODUCERS * PUTS_PER_PRODUCER);
    let offsets: HashSet<i64> = all.iter().map(|(o, _)| *o).collect();
    assert_eq!(offsets.len(), all.len(), "every offset must be distinct");

    let cancel = CancelToken::new();
    let mut expected: HashSet<Vec<u8>> = all.iter().map(|(_, p)| p.clone()).collect();
    for (offset, payload) in &all {
        assert_eq!(&queue.read(*offset, &cancel).unwrap(), payload);
        expected.remove(payload);
    }
    assert!(expected.is_empty());
}
