//! Per-file acknowledgment bookkeeping for the send window.

use crate::checksum::FileKey;
use crate::packet::Packet;
use crate::protocol::INIT_SEQ_NUMBER;
use parking_lot::Mutex;
use std::collections::HashMap;

/// In-flight state of one file transfer.
///
/// `current` is the sender's cursor: the lowest unacknowledged seqnum and
/// therefore the next chunk to (re)send. `biggest` is the highest seqnum
/// ever recorded. Invariants: `current <= biggest + 1`, and every seqnum
/// in `sent` lies within `[current, biggest]`.
struct AckTracker {
    sent: HashMap<u16, Packet>,
    current: u16,
    biggest: u16,
}

impl AckTracker {
    fn new() -> Self {
        AckTracker {
            sent: HashMap::new(),
            current: INIT_SEQ_NUMBER,
            biggest: INIT_SEQ_NUMBER,
        }
    }
}

/// Table of ack trackers, one per file committed to the current send set.
/// Every operation takes the table lock, so they are atomic with respect
/// to one another.
pub struct AckTable {
    inner: Mutex<HashMap<FileKey, AckTracker>>,
}

impl AckTable {
    pub fn new() -> Self {
        AckTable {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new send phase: drop every tracker and create a fresh one
    /// for each key of the new send set.
    pub fn reset<I: IntoIterator<Item = FileKey>>(&self, keys: I) {
        let mut table = self.inner.lock();
        table.clear();
        for key in keys {
            table.insert(key, AckTracker::new());
        }
    }

    /// Drop one tracker after an aborted transfer; the file reappears in a
    /// later send set if still locally present and still missing remotely.
    pub fn release(&self, key: &FileKey) {
        self.inner.lock().remove(key);
    }

    /// Cache an outbound chunk until it is acknowledged. Retransmissions
    /// reuse the cached packet verbatim.
    pub fn record_sent(&self, key: &FileKey, seq: u16, packet: Packet) {
        let mut table = self.inner.lock();
        if let Some(t) = table.get_mut(key) {
            t.sent.insert(seq, packet);
            t.biggest = t.biggest.max(seq);
        }
    }

    /// Mark one chunk acknowledged and advance the cursor past the
    /// contiguous acknowledged prefix. Idempotent for a seqnum already
    /// acknowledged or never recorded.
    pub fn acknowledge(&self, key: &FileKey, seq: u16) {
        let mut table = self.inner.lock();
        let Some(t) = table.get_mut(key) else { return };
        if t.sent.remove(&seq).is_none() {
            return;
        }
        while !t.sent.contains_key(&t.current) && t.current <= t.biggest {
            t.current = t.current.wrapping_add(1);
        }
    }

    /// The sender's cursor for `key`; `INIT_SEQ_NUMBER` if untracked.
    pub fn current(&self, key: &FileKey) -> u16 {
        self.inner
            .lock()
            .get(key)
            .map(|t| t.current)
            .unwrap_or(INIT_SEQ_NUMBER)
    }

    /// True when nothing is awaiting acknowledgment for `key`.
    pub fn is_empty(&self, key: &FileKey) -> bool {
        self.inner
            .lock()
            .get(key)
            .map(|t| t.sent.is_empty())
            .unwrap_or(true)
    }

    /// The cached outbound packet for `(key, seq)`, if still in flight.
    pub fn cached(&self, key: &FileKey, seq: u16) -> Option<Packet> {
        self.inner
            .lock()
            .get(key)
            .and_then(|t| t.sent.get(&seq).cloned())
    }

    /// Width of the in-flight window (`biggest - current`).
    pub fn window(&self, key: &FileKey) -> u16 {
        self.inner
            .lock()
            .get(key)
            .map(|t| t.biggest.saturating_sub(t.current))
            .unwrap_or(0)
    }
}

impl Default for AckTable {
    fn default() -> Self {
        Self::new()
    }
}
