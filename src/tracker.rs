//! Directory-state tracking: the local inventory, the peer's announced
//! inventory, and the ack bookkeepers for the current send set.
//!
//! Lock order is local -> remote -> ack. Multi-lock paths release an
//! earlier lock before acquiring the next, and `send_set` waits on the
//! remote-batch condition with only the remote lock held.

use crate::ack::AckTable;
use crate::checksum::FileKey;
use crate::fs_enum::{scan_directory, MetaRecord};
use crate::logger::EventLog;
use crate::protocol::timing;
use anyhow::Result;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

struct RemoteView {
    files: HashMap<FileKey, MetaRecord>,
    /// true while a metadata batch is still being received
    in_batch: bool,
}

pub struct FileTracker {
    dir: PathBuf,
    local: Mutex<HashMap<FileKey, MetaRecord>>,
    remote: Mutex<RemoteView>,
    batch_done: Condvar,
    acks: AckTable,
}

impl FileTracker {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileTracker {
            dir: dir.into(),
            local: Mutex::new(HashMap::new()),
            remote: Mutex::new(RemoteView {
                files: HashMap::new(),
                in_batch: false,
            }),
            batch_done: Condvar::new(),
            acks: AckTable::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn acks(&self) -> &AckTable {
        &self.acks
    }

    /// Rebuild the local inventory from a fresh directory listing. The
    /// listing runs outside the lock; clear-and-repopulate runs under it.
    pub fn rescan(&self) -> Result<()> {
        let records = scan_directory(&self.dir)?;
        let mut local = self.local.lock();
        local.clear();
        for rec in records {
            local.insert(rec.key, rec);
        }
        Ok(())
    }

    /// Absorb one record of the peer's metadata batch. The first record
    /// after a terminated batch clears the previous remote view; the
    /// terminator wakes every `send_set` waiter.
    pub fn ingest_remote(&self, rec: MetaRecord) {
        let mut remote = self.remote.lock();
        if !remote.in_batch {
            remote.files.clear();
        }
        remote.in_batch = rec.has_next;
        let ends_batch = !rec.has_next;
        remote.files.insert(rec.key, rec);
        if ends_batch {
            self.batch_done.notify_all();
        }
    }

    /// Empty-folder sentinel: the peer announced it has no files at all.
    pub fn note_remote_empty(&self) {
        let mut remote = self.remote.lock();
        remote.files.clear();
        remote.in_batch = false;
        self.batch_done.notify_all();
    }

    /// Filename the peer announced for `key`, if any.
    pub fn remote_filename(&self, key: &FileKey) -> Option<String> {
        self.remote.lock().files.get(key).map(|r| r.filename.clone())
    }

    /// Snapshot of the local inventory with the batch terminator ordered
    /// last, ready for the sender's metadata phase.
    pub fn send_metadata_list(&self) -> Vec<MetaRecord> {
        let mut list: Vec<MetaRecord> = self.local.lock().values().cloned().collect();
        list.sort_by(|a, b| b.has_next.cmp(&a.has_next).then(a.filename.cmp(&b.filename)));
        list
    }

    /// Compute the send set: local files the peer has not announced.
    /// Blocks until any remote batch in progress completes, then swaps in
    /// fresh ack trackers for every file of the set. Returns an empty set
    /// if the running flag clears while waiting.
    pub fn send_set(&self, running: &AtomicBool) -> Vec<MetaRecord> {
        let snapshot: Vec<MetaRecord> = self.local.lock().values().cloned().collect();
        let mut remote = self.remote.lock();
        while remote.in_batch {
            if !running.load(Ordering::Relaxed) {
                return Vec::new();
            }
            let _ = self
                .batch_done
                .wait_for(&mut remote, Duration::from_millis(10 * timing::STRIDE_MS));
        }
        let set: Vec<MetaRecord> = snapshot
            .into_iter()
            .filter(|r| !remote.files.contains_key(&r.key))
            .collect();
        self.acks.reset(set.iter().map(|r| r.key));
        set
    }

    /// Monitor loop: rescan every `SECONDS_OF_SLEEP`, polling the running
    /// flag at `STRIDE_MS` so interruption terminates the loop cleanly.
    pub fn run_monitor(&self, running: &AtomicBool, logger: &dyn EventLog) {
        let period_ms = timing::SECONDS_OF_SLEEP * 1000;
        let mut elapsed = 0u64;
        while running.load(Ordering::Relaxed) {
            if elapsed == 0 {
                if let Err(e) = self.rescan() {
                    logger.error("rescan", &e.to_string());
                }
            }
            elapsed += timing::STRIDE_MS;
            if elapsed >= period_ms {
                elapsed = 0;
            }
            thread::sleep(Duration::from_millis(timing::STRIDE_MS));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(name: &str, has_next: bool) -> MetaRecord {
        MetaRecord::remote(FileKey::from_metadata(name, 1), name.into(), has_next)
    }

    fn tracker_with_files(names: &[&str]) -> (TempDir, FileTracker) {
        let dir = TempDir::new().unwrap();
        for name in names {
            std::fs::write(dir.path().join(name), b"payload").unwrap();
        }
        let tracker = FileTracker::new(dir.path());
        tracker.rescan().unwrap();
        (dir, tracker)
    }

    #[test]
    fn test_rescan_rebuilds_from_scratch() {
        let (dir, tracker) = tracker_with_files(&["a.txt", "b.txt"]);
        assert_eq!(tracker.send_metadata_list().len(), 2);

        std::fs::remove_file(dir.path().join("a.txt")).unwrap();
        tracker.rescan().unwrap();
        let list = tracker.send_metadata_list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].filename, "b.txt");
        assert!(!list[0].has_next);
    }

    #[test]
    fn test_metadata_list_orders_terminator_last() {
        let (_dir, tracker) = tracker_with_files(&["a.txt", "b.txt", "c.txt"]);
        let list = tracker.send_metadata_list();
        assert_eq!(list.len(), 3);
        assert!(list[0].has_next);
        assert!(list[1].has_next);
        assert!(!list[2].has_next);
    }

    #[test]
    fn test_batch_accumulates_until_terminator() {
        let tracker = FileTracker::new("unused");
        tracker.ingest_remote(record("x", true));
        tracker.ingest_remote(record("y", true));
        tracker.ingest_remote(record("z", false));
        for name in ["x", "y", "z"] {
            assert_eq!(
                tracker.remote_filename(&FileKey::from_metadata(name, 1)),
                Some(name.to_string())
            );
        }
    }

    #[test]
    fn test_new_batch_clears_previous_view() {
        let tracker = FileTracker::new("unused");
        tracker.ingest_remote(record("old", false));
        tracker.ingest_remote(record("new", false));
        assert_eq!(
            tracker.remote_filename(&FileKey::from_metadata("old", 1)),
            None
        );
        assert!(tracker
            .remote_filename(&FileKey::from_metadata("new", 1))
            .is_some());
    }

    #[test]
    fn test_reingest_within_batch_does_not_split_it() {
        let tracker = FileTracker::new("unused");
        tracker.ingest_remote(record("x", true));
        tracker.ingest_remote(record("x", true));
        tracker.ingest_remote(record("y", false));
        // had the duplicate split the batch, "x" would have been cleared
        assert!(tracker
            .remote_filename(&FileKey::from_metadata("x", 1))
            .is_some());
        assert!(tracker
            .remote_filename(&FileKey::from_metadata("y", 1))
            .is_some());
    }

    #[test]
    fn test_send_set_is_local_minus_remote() {
        let (_dir, tracker) = tracker_with_files(&["x.txt", "y.txt", "z.txt"]);
        let running = AtomicBool::new(true);

        let y_key = tracker
            .send_metadata_list()
            .iter()
            .find(|r| r.filename == "y.txt")
            .map(|r| r.key)
            .unwrap();
        tracker.ingest_remote(MetaRecord::remote(y_key, "y.txt".into(), false));

        let set = tracker.send_set(&running);
        let mut names: Vec<String> = set.iter().map(|r| r.filename.clone()).collect();
        names.sort();
        assert_eq!(names, ["x.txt", "z.txt"]);

        // fresh trackers exist exactly for the send set
        let x_key = set.iter().find(|r| r.filename == "x.txt").unwrap().key;
        let probe = crate::packet::Packet::Data {
            key: x_key,
            seq: 5,
            has_next: true,
            payload: Vec::new(),
        };
        tracker.acks().record_sent(&x_key, 5, probe.clone());
        assert_eq!(tracker.acks().window(&x_key), 5);
        tracker.acks().record_sent(&y_key, 5, probe);
        assert_eq!(tracker.acks().window(&y_key), 0);
    }

    #[test]
    fn test_send_set_waits_for_batch_terminator() {
        let (_dir, tracker) = tracker_with_files(&["x.txt"]);
        let tracker = Arc::new(tracker);
        let running = Arc::new(AtomicBool::new(true));

        tracker.ingest_remote(record("partial", true));
        let waiter = {
            let tracker = tracker.clone();
            let running = running.clone();
            thread::spawn(move || tracker.send_set(&running))
        };
        thread::sleep(Duration::from_millis(100));
        assert!(!waiter.is_finished());

        tracker.ingest_remote(record("partial2", false));
        let set = waiter.join().unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].filename, "x.txt");
    }

    #[test]
    fn test_empty_sentinel_wakes_waiters_and_clears_view() {
        let (_dir, tracker) = tracker_with_files(&["x.txt"]);
        let tracker = Arc::new(tracker);
        let running = Arc::new(AtomicBool::new(true));

        tracker.ingest_remote(record("partial", true));
        let waiter = {
            let tracker = tracker.clone();
            let running = running.clone();
            thread::spawn(move || tracker.send_set(&running))
        };
        thread::sleep(Duration::from_millis(50));
        tracker.note_remote_empty();
        let set = waiter.join().unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(
            tracker.remote_filename(&FileKey::from_metadata("partial", 1)),
            None
        );
    }
}
