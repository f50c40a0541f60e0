//! Minimal open -> put -> stream_read walkthrough.
//!
//! Run with: cargo run --example basic_queue

use ledgerq::{CancelToken, Queue, QueueConfig};

fn main() -> ledgerq::Result<()> {
    env_logger::init();

    let dir = std::env::temp_dir().join(format!("ledgerq-demo-{}", std::process::id()));
    let config = QueueConfig::new(&dir);
    let mut queue = Queue::open(config)?;

    for i in 0..5 {
        let offset = queue.put(format!("message {i}").into_bytes())?;
        println!("put message {i} at offset {offset}");
    }

    let cancel = CancelToken::new();
    let mut reader = queue.stream_read(0, cancel.clone())?;
    for _ in 0..5 {
        match reader.next()? {
            Some(payload) => println!("read: {}", String::from_utf8_lossy(&payload)),
            None => break,
        }
    }

    cancel.cancel();
    drop(reader);
    queue.delete()?;
    Ok(())
}
