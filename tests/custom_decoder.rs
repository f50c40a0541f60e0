//! A custom fixed-width decoder bypasses the default length-prefix framing
//! entirely; read/stream_read/stream_offset_read must all still work.

use std::sync::mpsc;
use std::sync::Arc;

use ledgerq::{CancelToken, FixedWidthDecoder, Queue, QueueConfig};
use tempfile::tempdir;

#[test]
fn fixed_width_records_round_trip() {
    let dir = tempdir().unwrap();
    let decoder = Arc::new(FixedWidthDecoder { record_len: 4 });
    let queue = Queue::open(QueueConfig::new(dir.path()).with_write_mmap(true).with_custom_decoder(decoder)).unwrap();

    let cancel = CancelToken::new();
    let mut offsets = Vec::with_capacity(1000);
    for _ in 0..1000 {
        offsets.push(queue.put(b"abcd".to_vec()).unwrap());
    }

    // No 4-byte length prefix: consecutive offsets are exactly 4 apart.
    for w in offsets.windows(2) {
        assert_eq!(w[1] - w[0], 4);
    }

    for offset in &offsets {
        assert_eq!(queue.read(*offset, &cancel).unwrap(), b"abcd");
    }

    let mut stream = queue.stream_read(0, cancel.clone()).unwrap();
    for _ in 0..1000 {
        assert_eq!(stream.next().unwrap().unwrap(), b"abcd");
    }
    drop(stream);

    let (tx, rx) = mpsc::channel();
    let mut offset_reader = queue.stream_offset_read(rx, cancel);
    for offset in &offsets {
        tx.send(*offset).unwrap();
    }
    drop(tx);
    for _ in 0..1000 {
        assert_eq!(offset_reader.next().unwrap().unwrap(), b"abcd");
    }
    assert_eq!(offset_reader.next().unwrap(), None);
}
