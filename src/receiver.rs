//! Receiver loop: demultiplexes incoming datagrams by opcode and applies
//! them to the shared directory state.
//!
//! A single thread blocks on the UDP socket; each datagram is handed to a
//! worker pool sized to the CPU count. Per-file reassembly state is
//! guarded by one lock, so handlers never race on the open file.

use crate::checksum::FileKey;
use crate::fs_enum::MetaRecord;
use crate::liveness::Liveness;
use crate::log::{TransferLog, TransferLogEntry};
use crate::logger::EventLog;
use crate::packet::{now_ms, Packet};
use crate::protocol::{timing, MAX_PACKET_SIZE};
use crate::tracker::FileTracker;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const PART_SUFFIX: &str = ".part";

/// Reassembly state of one inbound file. Chunks arriving ahead of the
/// contiguous prefix wait in `pending` until the gap fills.
struct ReceiveState {
    key: FileKey,
    filename: String,
    part_path: PathBuf,
    file: BufWriter<File>,
    next_seq: u16,
    bytes: u64,
    pending: BTreeMap<u16, (Vec<u8>, bool)>,
}

pub struct Receiver {
    socket: UdpSocket,
    peer: SocketAddr,
    secret: Vec<u8>,
    tracker: Arc<FileTracker>,
    liveness: Arc<Liveness>,
    logger: Arc<dyn EventLog>,
    translog: TransferLog,
    inbox: Mutex<HashMap<FileKey, ReceiveState>>,
    malformed: AtomicU64,
    pool: rayon::ThreadPool,
}

impl Receiver {
    pub fn new(
        socket: UdpSocket,
        peer: SocketAddr,
        secret: Vec<u8>,
        tracker: Arc<FileTracker>,
        liveness: Arc<Liveness>,
        logger: Arc<dyn EventLog>,
    ) -> Result<Self> {
        socket
            .set_read_timeout(Some(Duration::from_millis(timing::RECV_TIMEOUT_MS)))
            .context("set receive timeout")?;
        let workers = thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("drift-rx-{i}"))
            .build()
            .context("build receive worker pool")?;
        let translog = TransferLog::new(tracker.dir());
        Ok(Receiver {
            socket,
            peer,
            secret,
            tracker,
            liveness,
            logger,
            translog,
            inbox: Mutex::new(HashMap::new()),
            malformed: AtomicU64::new(0),
            pool,
        })
    }

    /// Datagrams dropped as undecodable so far.
    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Block on the socket until shutdown, dispatching each datagram to
    /// the worker pool.
    pub fn run(self: &Arc<Self>, running: &AtomicBool) {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        while running.load(Ordering::Relaxed) {
            let n = match self.socket.recv_from(&mut buf) {
                Ok((n, _from)) => n,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) => {
                    self.logger.error("recv", &e.to_string());
                    break;
                }
            };
            let datagram = buf[..n].to_vec();
            let me = Arc::clone(self);
            self.pool.spawn(move || me.handle_datagram(&datagram));
        }
    }

    fn handle_datagram(&self, datagram: &[u8]) {
        match Packet::decode(datagram, &self.secret) {
            Ok(Packet::FileMeta {
                key,
                filename,
                has_next,
            }) => {
                self.tracker
                    .ingest_remote(MetaRecord::remote(key, filename, has_next));
                self.liveness.signal();
            }
            Ok(Packet::Ack { key, seq, .. }) => {
                if seq == crate::protocol::EMPTY_DIR_SEQ && key == FileKey::RESERVED {
                    self.tracker.note_remote_empty();
                } else {
                    self.tracker.acks().acknowledge(&key, seq);
                }
                self.liveness.signal();
            }
            Ok(Packet::Data {
                key,
                seq,
                has_next,
                payload,
            }) => {
                if let Err(e) = self.handle_data(key, seq, has_next, payload) {
                    self.logger
                        .error("receive", &format!("chunk {seq} of {key}: {e}"));
                }
            }
            Err(_) => {
                let total = self.malformed.fetch_add(1, Ordering::Relaxed) + 1;
                self.logger.malformed_dropped(total);
            }
        }
    }

    /// Buffer the chunk, flush the contiguous prefix to the part file, ack
    /// the receipt, and finalize once the terminal chunk has been flushed.
    fn handle_data(&self, key: FileKey, seq: u16, has_next: bool, payload: Vec<u8>) -> Result<()> {
        let mut inbox = self.inbox.lock();
        let finished = {
            let state = match inbox.entry(key) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(slot) => {
                    // only keys the peer has announced are accepted
                    let Some(filename) = self.tracker.remote_filename(&key) else {
                        return Ok(());
                    };
                    let Some(name) = sanitize_filename(&filename) else {
                        return Ok(());
                    };
                    let part_path = self.tracker.dir().join(format!(".{name}{PART_SUFFIX}"));
                    let file = BufWriter::new(
                        File::create(&part_path).context("create part file")?,
                    );
                    slot.insert(ReceiveState {
                        key,
                        filename: name.to_owned(),
                        part_path,
                        file,
                        next_seq: crate::protocol::INIT_SEQ_NUMBER,
                        bytes: 0,
                        pending: BTreeMap::new(),
                    })
                }
            };
            if seq >= state.next_seq {
                state.pending.entry(seq).or_insert((payload, has_next));
            }
            let mut done = false;
            while let Some((bytes, hn)) = state.pending.remove(&state.next_seq) {
                state.file.write_all(&bytes).context("write chunk")?;
                state.bytes += bytes.len() as u64;
                state.next_seq = state.next_seq.wrapping_add(1);
                if !hn {
                    done = true;
                    break;
                }
            }
            done
        };

        // acks are non-cumulative: every received chunk is acknowledged,
        // retransmissions of already-flushed chunks included
        self.send_ack(key, seq)?;

        if finished {
            if let Some(state) = inbox.remove(&key) {
                drop(inbox);
                self.finalize(state)?;
            }
        }
        Ok(())
    }

    fn send_ack(&self, key: FileKey, seq: u16) -> Result<()> {
        let ack = Packet::Ack {
            key,
            seq,
            timestamp_ms: now_ms(),
        };
        let buf = ack.encode(&self.secret)?;
        self.socket.send_to(&buf, self.peer).context("send ack")?;
        Ok(())
    }

    fn finalize(&self, mut state: ReceiveState) -> Result<()> {
        state.file.flush().context("flush part file")?;
        let final_path = self.tracker.dir().join(&state.filename);
        fs::rename(&state.part_path, &final_path).context("rename into place")?;
        self.logger
            .file_received(&state.filename, &state.key, state.bytes);
        if let Err(e) = self.translog.add_entry(TransferLogEntry::received(
            &state.filename,
            &state.key.to_string(),
            state.bytes,
        )) {
            self.logger.error("translog", &e.to_string());
        }
        Ok(())
    }
}

/// Reject announced filenames that could escape the watched directory.
fn sanitize_filename(name: &str) -> Option<&str> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return None;
    }
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a.txt"), Some("a.txt"));
        assert_eq!(sanitize_filename("has space.bin"), Some("has space.bin"));
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename("."), None);
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename("../escape"), None);
        assert_eq!(sanitize_filename("dir/file"), None);
        assert_eq!(sanitize_filename("dir\\file"), None);
        assert_eq!(sanitize_filename("nul\0byte"), None);
    }
}
