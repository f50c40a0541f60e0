//! Strict close/drain coordinator.
//!
//! Shared by the writer task, the commit task, and (indirectly, via the
//! queue's closed-state flag) stream readers. Registered work must finish
//! before `signal_and_wait` returns; once shutdown has been signaled, new
//! work may not register.

use std::sync::{Condvar, Mutex};

use crate::error::{Error, Result};

struct State {
    count: i64,
    closing: bool,
    signaled: bool,
}

pub struct Closer {
    state: Mutex<State>,
    cond: Condvar,
}

impl Closer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State { count: 0, closing: false, signaled: false }),
            cond: Condvar::new(),
        }
    }

    /// Register (`delta > 0`) or unregister (`delta < 0`) outstanding work.
    ///
    /// Registering after shutdown has been signaled is an error rather than
    /// a panic, so callers on the hot path can fail gracefully instead of
    /// crashing the process.
    pub fn add(&self, delta: i64) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        if delta > 0 && s.closing {
            return Err(Error::AlreadyClosing);
        }
        s.count += delta;
        if s.count == 0 {
            self.cond.notify_all();
        }
        Ok(())
    }

    pub fn is_closing(&self) -> bool {
        self.state.lock().unwrap().closing
    }

    /// Publish the close signal and block until all registered work drains.
    ///
    /// Calling this twice on the same `Closer` is a programming error.
    pub fn signal_and_wait(&self) {
        let mut s = self.state.lock().unwrap();
        if s.signaled {
            panic!("signal_and_wait called twice on the same closer");
        }
        s.signaled = true;
        s.closing = true;
        while s.count > 0 {
            s = self.cond.wait(s).unwrap();
        }
    }
}

impl Default for Closer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn add_after_close_is_rejected() {
        let closer = Closer::new();
        closer.signal_and_wait();
        assert!(matches!(closer.add(1), Err(Error::AlreadyClosing)));
    }

    #[test]
    #[should_panic]
    fn double_signal_panics() {
        let closer = Closer::new();
        closer.signal_and_wait();
        closer.signal_and_wait();
    }

    #[test]
    fn waits_for_registered_work() {
        let closer = Arc::new(Closer::new());
        closer.add(1).unwrap();
        let worker = {
            let closer = closer.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                closer.add(-1).unwrap();
            })
        };
        closer.signal_and_wait();
        worker.join().unwrap();
    }
}
