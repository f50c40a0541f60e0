//! Strictly monotonic nanosecond clock.
//!
//! Wall-clock time can jump backward (NTP step, leap seconds). `start_time`/
//! `end_time` on metadata rows must be non-decreasing (invariant I2), so every
//! timestamp handed out by this clock is guaranteed greater than the last one.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct MonotonicClock {
    last: Mutex<i64>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { last: Mutex::new(0) }
    }

    /// Returns a nanosecond timestamp strictly greater than every value
    /// previously returned by this clock instance.
    pub fn now_nano(&self) -> i64 {
        let wall = wall_clock_nanos();
        let mut last = self.last.lock().unwrap();
        let next = wall.max(*last + 1);
        *last = next;
        next
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

fn wall_clock_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_nanos() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn strictly_increasing_single_thread() {
        let clock = MonotonicClock::new();
        let mut prev = clock.now_nano();
        for _ in 0..1000 {
            let next = clock.now_nano();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn strictly_increasing_across_threads() {
        let clock = Arc::new(MonotonicClock::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let clock = clock.clone();
            handles.push(thread::spawn(move || {
                let mut stamps = Vec::with_capacity(500);
                for _ in 0..500 {
                    stamps.push(clock.now_nano());
                }
                stamps
            }));
        }
        let mut all = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 8 * 500, "every timestamp must be unique");
    }
}
