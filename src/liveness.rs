//! Peer-liveness latch gating sender progress.

use crate::protocol::timing::STRIDE_MS;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// A single shared boolean: true while the peer is believed reachable.
/// Received acknowledgments and metadata set it; sender retry exhaustion
/// clears it, pausing transfers until the peer is heard from again.
pub struct Liveness {
    alive: Mutex<bool>,
}

impl Liveness {
    pub fn new(alive: bool) -> Self {
        Liveness {
            alive: Mutex::new(alive),
        }
    }

    /// The peer was heard from.
    pub fn signal(&self) {
        *self.alive.lock() = true;
    }

    /// Retries exhausted; latch progress off until the peer speaks again.
    pub fn interrupt(&self) {
        *self.alive.lock() = false;
    }

    pub fn is_alive(&self) -> bool {
        *self.alive.lock()
    }

    /// Poll until the peer is alive. Returns false if the running flag was
    /// cleared while waiting.
    pub fn wait_alive(&self, running: &AtomicBool) -> bool {
        while running.load(Ordering::Relaxed) {
            if *self.alive.lock() {
                return true;
            }
            thread::sleep(Duration::from_millis(STRIDE_MS));
        }
        false
    }
}

/// Sleep in `STRIDE_MS` increments so shutdown is observed promptly.
/// Returns false if the running flag was cleared mid-sleep.
pub fn sleep_cancellable(running: &AtomicBool, ms: u64) -> bool {
    let mut slept = 0;
    while slept < ms {
        if !running.load(Ordering::Relaxed) {
            return false;
        }
        thread::sleep(Duration::from_millis(STRIDE_MS.min(ms - slept)));
        slept += STRIDE_MS;
    }
    running.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_latch_toggles() {
        let latch = Liveness::new(false);
        assert!(!latch.is_alive());
        latch.signal();
        assert!(latch.is_alive());
        latch.interrupt();
        assert!(!latch.is_alive());
    }

    #[test]
    fn test_wait_alive_unblocks_on_signal() {
        let latch = Arc::new(Liveness::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let waiter = {
            let latch = latch.clone();
            let running = running.clone();
            thread::spawn(move || latch.wait_alive(&running))
        };
        thread::sleep(Duration::from_millis(50));
        latch.signal();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_wait_alive_aborts_on_shutdown() {
        let latch = Arc::new(Liveness::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let waiter = {
            let latch = latch.clone();
            let running = running.clone();
            thread::spawn(move || latch.wait_alive(&running))
        };
        thread::sleep(Duration::from_millis(50));
        running.store(false, Ordering::Relaxed);
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn test_sleep_cancellable_cut_short() {
        let running = AtomicBool::new(false);
        assert!(!sleep_cancellable(&running, 10_000));
    }
}
