//! User-visible event sinks for protocol activity.

use crate::checksum::FileKey;
use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Sink for user-visible protocol events. Default methods are no-ops so
/// implementations pick the events they care about.
pub trait EventLog: Send + Sync {
    fn meta_sent(&self, _filename: &str, _key: &FileKey) {}
    fn empty_signal_sent(&self) {}
    fn chunk_sent(&self, _key: &FileKey, _seq: u16) {}
    fn file_sent(&self, _filename: &str, _key: &FileKey) {}
    fn file_received(&self, _filename: &str, _key: &FileKey, _bytes: u64) {}
    fn malformed_dropped(&self, _total: u64) {}
    fn error(&self, _context: &str, _msg: &str) {}
}

pub struct NoopLogger;
impl EventLog for NoopLogger {}

/// Writes one timestamped line per event to stdout.
pub struct ConsoleLogger;

impl ConsoleLogger {
    fn line(&self, s: &str) {
        println!("[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl EventLog for ConsoleLogger {
    fn meta_sent(&self, filename: &str, key: &FileKey) {
        self.line(&format!("META_SENT file={filename} key={key}"));
    }
    fn empty_signal_sent(&self) {
        self.line("EMPTY_SIGNAL_SENT");
    }
    fn chunk_sent(&self, key: &FileKey, seq: u16) {
        self.line(&format!("CHUNK_SENT key={key} seq={seq}"));
    }
    fn file_sent(&self, filename: &str, key: &FileKey) {
        self.line(&format!("FILE_SENT file={filename} key={key}"));
    }
    fn file_received(&self, filename: &str, key: &FileKey, bytes: u64) {
        self.line(&format!("FILE_RECEIVED file={filename} key={key} bytes={bytes}"));
    }
    fn malformed_dropped(&self, total: u64) {
        self.line(&format!("MALFORMED_DROPPED total={total}"));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={context} msg={msg}"));
    }
}

/// Appends the same lines to a file instead of stdout.
pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl EventLog for TextLogger {
    fn meta_sent(&self, filename: &str, key: &FileKey) {
        self.line(&format!("META_SENT file={filename} key={key}"));
    }
    fn empty_signal_sent(&self) {
        self.line("EMPTY_SIGNAL_SENT");
    }
    fn chunk_sent(&self, key: &FileKey, seq: u16) {
        self.line(&format!("CHUNK_SENT key={key} seq={seq}"));
    }
    fn file_sent(&self, filename: &str, key: &FileKey) {
        self.line(&format!("FILE_SENT file={filename} key={key}"));
    }
    fn file_received(&self, filename: &str, key: &FileKey, bytes: u64) {
        self.line(&format!("FILE_RECEIVED file={filename} key={key} bytes={bytes}"));
    }
    fn malformed_dropped(&self, total: u64) {
        self.line(&format!("MALFORMED_DROPPED total={total}"));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={context} msg={msg}"));
    }
}
