//! Persistent JSONL history of completed and failed transfers.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Sent,
    Received,
    Failed,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TransferLogEntry {
    pub timestamp: String,
    pub filename: String,
    pub key: String,
    pub bytes: u64,
    pub status: TransferStatus,
    pub error: Option<String>,
}

impl TransferLogEntry {
    fn new(filename: &str, key: &str, bytes: u64, status: TransferStatus) -> Self {
        TransferLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            filename: filename.to_owned(),
            key: key.to_owned(),
            bytes,
            status,
            error: None,
        }
    }

    pub fn sent(filename: &str, key: &str, bytes: u64) -> Self {
        Self::new(filename, key, bytes, TransferStatus::Sent)
    }

    pub fn received(filename: &str, key: &str, bytes: u64) -> Self {
        Self::new(filename, key, bytes, TransferStatus::Received)
    }

    pub fn failed(filename: &str, key: &str, error: String) -> Self {
        let mut entry = Self::new(filename, key, 0, TransferStatus::Failed);
        entry.error = Some(error);
        entry
    }
}

/// Append-only transfer history kept alongside the synced files. The
/// filename is hidden so the inventory scan never announces it.
pub struct TransferLog {
    log_file_path: PathBuf,
}

impl TransferLog {
    pub const FILENAME: &'static str = ".driftsync_transfer.jsonl";

    pub fn new(watched_root: &Path) -> Self {
        TransferLog {
            log_file_path: watched_root.join(Self::FILENAME),
        }
    }

    pub fn add_entry(&self, entry: TransferLogEntry) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .context("open transfer log for append")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_log(&self) -> Result<Vec<TransferLogEntry>> {
        if !self.log_file_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.log_file_path).context("open transfer log for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}
