//! Sender loop: announce the local inventory, then stream missing files
//! as acknowledged chunk sequences.
//!
//! Each tick runs a metadata phase followed by a data phase. The data
//! phase drives one file at a time: resend the earliest unacknowledged
//! chunk until the cursor advances, read a fresh chunk once it does, and
//! latch the liveness flag off after three rounds without progress.

use crate::checksum::FileKey;
use crate::chunk::ChunkReader;
use crate::error::SyncError;
use crate::fs_enum::MetaRecord;
use crate::liveness::{sleep_cancellable, Liveness};
use crate::log::{TransferLog, TransferLogEntry};
use crate::logger::EventLog;
use crate::packet::{now_ms, Packet};
use crate::protocol::{timing, DATA_SIZE, INIT_SEQ_NUMBER, MAX_INFLIGHT};
use crate::tracker::FileTracker;
use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub struct Sender {
    socket: UdpSocket,
    peer: SocketAddr,
    secret: Vec<u8>,
    tracker: Arc<FileTracker>,
    liveness: Arc<Liveness>,
    logger: Arc<dyn EventLog>,
    translog: TransferLog,
}

impl Sender {
    pub fn new(
        peer: SocketAddr,
        secret: Vec<u8>,
        tracker: Arc<FileTracker>,
        liveness: Arc<Liveness>,
        logger: Arc<dyn EventLog>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).context("bind send socket")?;
        let translog = TransferLog::new(tracker.dir());
        Ok(Sender {
            socket,
            peer,
            secret,
            tracker,
            liveness,
            logger,
            translog,
        })
    }

    /// Drive ticks until shutdown.
    pub fn run(&self, running: &AtomicBool) {
        if !sleep_cancellable(running, timing::SENDER_WARMUP_MS) {
            return;
        }
        let mut elapsed = 0u64;
        while running.load(Ordering::Relaxed) {
            if elapsed == 0 {
                if let Err(e) = self.send_metadata(running) {
                    self.logger.error("metadata", &e.to_string());
                }
                self.send_data(running);
            }
            elapsed += timing::STRIDE_MS;
            if elapsed >= timing::MILLIS_OF_SLEEP {
                elapsed = 0;
            }
            thread::sleep(Duration::from_millis(timing::STRIDE_MS));
        }
    }

    /// Metadata phase: announce the local inventory, or the empty-folder
    /// sentinel when there is nothing to announce.
    fn send_metadata(&self, running: &AtomicBool) -> Result<()> {
        let list = self.tracker.send_metadata_list();
        let packets: Vec<Packet> = if list.is_empty() {
            vec![Packet::empty_dir_sentinel(now_ms())]
        } else {
            list.iter()
                .map(|r| Packet::FileMeta {
                    key: r.key,
                    filename: r.filename.clone(),
                    has_next: r.has_next,
                })
                .collect()
        };

        let last = packets.len() - 1;
        for (i, packet) in packets.iter().enumerate() {
            // pause so the peer absorbs each record, longest before the
            // terminator so the batch settles before data transfer begins
            let gap = if i == last {
                timing::META_LAST_GAP_MS
            } else {
                timing::META_GAP_MS
            };
            if !sleep_cancellable(running, gap) {
                return Ok(());
            }
            let buf = match packet.encode(&self.secret) {
                Ok(b) => b,
                Err(e) => {
                    self.logger.error("metadata", &e.to_string());
                    continue;
                }
            };
            self.socket.send_to(&buf, self.peer).context("send metadata")?;
            match packet {
                Packet::FileMeta { filename, key, .. } => self.logger.meta_sent(filename, key),
                _ => self.logger.empty_signal_sent(),
            }
            if !self.liveness.is_alive() && !self.liveness.wait_alive(running) {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Data phase: stream every file the peer is missing.
    fn send_data(&self, running: &AtomicBool) {
        let set = self.tracker.send_set(running);
        for rec in set {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            match self.transfer_file(&rec, running) {
                Ok(true) => {
                    self.logger.file_sent(&rec.filename, &rec.key);
                    let bytes = fs::metadata(self.tracker.dir().join(&rec.filename))
                        .map(|m| m.len())
                        .unwrap_or(0);
                    if let Err(e) = self.translog.add_entry(TransferLogEntry::sent(
                        &rec.filename,
                        &rec.key.to_string(),
                        bytes,
                    )) {
                        self.logger.error("translog", &e.to_string());
                    }
                }
                Ok(false) => {
                    // stalled; the file reappears in a later send set
                }
                Err(SyncError::Unavailable) => return,
                Err(e) => {
                    self.tracker.acks().release(&rec.key);
                    self.logger
                        .error("transfer", &format!("{}: {}", rec.filename, e));
                    if let Err(e) = self.translog.add_entry(TransferLogEntry::failed(
                        &rec.filename,
                        &rec.key.to_string(),
                        e.to_string(),
                    )) {
                        self.logger.error("translog", &e.to_string());
                    }
                }
            }
        }
    }

    /// Drive one file to completion. Returns `Ok(true)` when every chunk
    /// was sent and acknowledged, `Ok(false)` when the per-file loop broke
    /// without finishing.
    fn transfer_file(&self, rec: &MetaRecord, running: &AtomicBool) -> Result<bool, SyncError> {
        let path = self.tracker.dir().join(&rec.filename);
        let size = fs::metadata(&path)
            .map_err(|e| map_open_error(e, &rec.filename))?
            .len();
        // the 16-bit sequence space cannot number more chunks than this
        if size / DATA_SIZE as u64 + 1 > u16::MAX as u64 {
            return Err(SyncError::TooManyChunks(rec.filename.clone()));
        }

        let mut reader =
            ChunkReader::open(&path).map_err(|e| map_open_error(e, &rec.filename))?;
        let acks = self.tracker.acks();
        let mut seq = INIT_SEQ_NUMBER;
        let mut tries = 0u32;

        while !reader.finished() || !acks.is_empty(&rec.key) {
            if !self.liveness.wait_alive(running) {
                return Err(SyncError::Unavailable);
            }
            let current = acks.current(&rec.key);
            if seq == current {
                tries = 0;
            } else {
                // fall back to the earliest unacknowledged chunk
                seq = current;
            }
            let sent = self.transmit(&rec.key, seq, &mut reader)?;
            if sent == seq {
                break;
            }
            seq = sent;
            tries += 1;
            if tries == 3 {
                self.liveness.interrupt();
                tries = 0;
            } else if !sleep_cancellable(running, timing::ESTIMATED_RTT_MS) {
                return Err(SyncError::Unavailable);
            }
        }
        Ok(reader.finished() && acks.is_empty(&rec.key))
    }

    /// Send the chunk at `seq`: a cached in-flight packet verbatim, or a
    /// fresh one pulled from the reader. Returns the seqnum after the
    /// send, or `seq` unchanged when nothing could be produced.
    fn transmit(
        &self,
        key: &FileKey,
        seq: u16,
        reader: &mut ChunkReader,
    ) -> Result<u16, SyncError> {
        let acks = self.tracker.acks();
        let packet = match acks.cached(key, seq) {
            Some(p) => p,
            None => {
                if acks.window(key) >= MAX_INFLIGHT {
                    // hold off new reads until the window drains
                    return Ok(seq);
                }
                match reader.next_chunk()? {
                    Some(payload) => {
                        let p = Packet::Data {
                            key: *key,
                            seq,
                            has_next: !reader.finished(),
                            payload,
                        };
                        acks.record_sent(key, seq, p.clone());
                        p
                    }
                    None => return Ok(seq),
                }
            }
        };
        let buf = packet.encode(&self.secret)?;
        self.socket.send_to(&buf, self.peer)?;
        self.logger.chunk_sent(key, seq);
        Ok(seq.wrapping_add(1))
    }
}

fn map_open_error(e: std::io::Error, filename: &str) -> SyncError {
    if e.kind() == ErrorKind::NotFound {
        SyncError::NoSuchFile(filename.to_owned())
    } else {
        SyncError::Io(e)
    }
}
