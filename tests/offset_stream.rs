//! Offset-channel-driven reads: arbitrary order, terminates when the
//! offset channel closes.

use std::sync::mpsc;
use std::thread;

use ledgerq::{CancelToken, Queue, QueueConfig};
use tempfile::tempdir;

#[test]
fn stream_offset_read_follows_requested_order() {
    let dir = tempdir().unwrap();
    let queue = Queue::open(QueueConfig::new(dir.path()).with_write_mmap(true)).unwrap();

    let mut offsets = Vec::with_capacity(1000);
    for _ in 0..1000 {
        offsets.push(queue.put(b"abcd".to_vec()).unwrap());
    }

    let (tx, rx) = mpsc::channel();
    let cancel = CancelToken::new();
    let mut reader = queue.stream_offset_read(rx, cancel);

    let requested = offsets.clone();
    let sender = thread::spawn(move || {
        for offset in requested {
            tx.send(offset).unwrap();
        }
        // Dropping tx closes the channel, ending the stream.
    });

    for _ in 0..1000 {
        assert_eq!(reader.next().unwrap().unwrap(), b"abcd");
    }
    sender.join().unwrap();
    assert_eq!(reader.next().unwrap(), None);
}

#[test]
fn stream_offset_read_honors_reverse_permutation() {
    let dir = tempdir().unwrap();
    let queue = Queue::open(QueueConfig::new(dir.path()).with_write_mmap(true)).unwrap();

    let mut offsets = Vec::with_capacity(20);
    for i in 0..20u8 {
        offsets.push((queue.put(vec![i]).unwrap(), i));
    }

    let (tx, rx) = mpsc::channel();
    let cancel = CancelToken::new();
    let mut reader = queue.stream_offset_read(rx, cancel);

    let reversed: Vec<_> = offsets.iter().rev().cloned().collect();
    for (offset, _) in &reversed {
        tx.send(*offset).unwrap();
    }
    drop(tx);

    for (_, expected) in reversed {
        assert_eq!(reader.next().unwrap().unwrap(), vec![expected]);
    }
    assert_eq!(reader.next().unwrap(), None);
}
