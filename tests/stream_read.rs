//! Sequential streaming: in-order delivery, tail-blocking, and cancellation.

use std::thread;
use std::time::Duration;

use ledgerq::{CancelToken, Queue, QueueConfig};
use tempfile::tempdir;

#[test]
fn stream_read_delivers_in_order() {
    let dir = tempdir().unwrap();
    let queue = Queue::open(QueueConfig::new(dir.path()).with_write_mmap(true)).unwrap();

    for i in 0..200u32 {
        queue.put(i.to_be_bytes().to_vec()).unwrap();
    }

    let cancel = CancelToken::new();
    let mut reader = queue.stream_read(0, cancel).unwrap();
    for i in 0..200u32 {
        let payload = reader.next().unwrap().expect("stream should not end early");
        assert_eq!(payload, i.to_be_bytes());
    }
}

#[test]
fn stream_read_blocks_at_tail_then_unblocks_on_put() {
    let dir = tempdir().unwrap();
    let queue = Queue::open(QueueConfig::new(dir.path()).with_write_mmap(true)).unwrap();

    for _ in 0..1000 {
        queue.put(b"abcd".to_vec()).unwrap();
    }

    let cancel = CancelToken::new();
    let mut reader = queue.stream_read(0, cancel.clone()).unwrap();
    for _ in 0..1000 {
        assert_eq!(reader.next().unwrap().unwrap(), b"abcd");
    }

    let waiter = thread::spawn(move || reader.next());

    // Give the blocked reader time to register with the watermark before we
    // publish the record it is waiting on.
    thread::sleep(Duration::from_millis(100));
    queue.put(b"efgh".to_vec()).unwrap();

    let result = waiter.join().unwrap();
    assert_eq!(result.unwrap().unwrap(), b"efgh");
}

#[test]
fn cancelling_unblocks_a_pending_stream_read() {
    let dir = tempdir().unwrap();
    let queue = Queue::open(QueueConfig::new(dir.path()).with_write_mmap(true)).unwrap();
    queue.put(b"only".to_vec()).unwrap();

    let cancel = CancelToken::new();
    let mut reader = queue.stream_read(0, cancel.clone()).unwrap();
    assert_eq!(reader.next().unwrap().unwrap(), b"only");

    let waiter = thread::spawn(move || reader.next());
    thread::sleep(Duration::from_millis(50));
    cancel.cancel();

    let result = waiter.join().unwrap();
    assert_eq!(result.unwrap(), None);
}
