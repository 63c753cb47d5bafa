//! Inventory enumeration of the watched directory (top level only).

use crate::checksum::FileKey;
use anyhow::Result;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

/// One file's announced metadata. Immutable once inserted into an
/// inventory; `has_next == false` marks the last record of a batch.
#[derive(Debug, Clone)]
pub struct MetaRecord {
    pub key: FileKey,
    pub filename: String,
    pub created_ms: u64,
    pub modified_ms: u64,
    pub has_next: bool,
}

impl MetaRecord {
    /// Record reconstructed from a peer's FILE_META announcement. The wire
    /// layout carries no timestamps.
    pub fn remote(key: FileKey, filename: String, has_next: bool) -> Self {
        MetaRecord {
            key,
            filename,
            created_ms: 0,
            modified_ms: 0,
            has_next,
        }
    }
}

fn system_time_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// List the regular files at the top level of `root`, stamped with their
/// content-addressed keys, in filename order with the final record marked
/// as the batch terminator. An empty directory yields no records.
///
/// Hidden names are skipped: in-flight `.part` receives and the transfer
/// log both live in the watched directory and must not be announced.
pub fn scan_directory(root: &Path) -> Result<Vec<MetaRecord>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = match entry.file_name().to_str() {
            Some(n) => n.to_owned(),
            None => continue,
        };
        if name.starts_with('.') {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        let created = meta
            .created()
            .or_else(|_| meta.modified())
            .map(system_time_ms)
            .unwrap_or(0);
        let modified = meta.modified().map(system_time_ms).unwrap_or(created);
        files.push(MetaRecord {
            key: FileKey::from_metadata(&name, created),
            filename: name,
            created_ms: created,
            modified_ms: modified,
            has_next: true,
        });
    }
    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    if let Some(last) = files.last_mut() {
        last.has_next = false;
    }
    Ok(files)
}
