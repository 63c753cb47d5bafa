//! Content-addressed file identity: MD5 over filename and creation time.

use crate::error::SyncError;
use crate::protocol::HASH_SIZE;
use std::fmt;

/// 16-byte identity of a file within a peer pair. Transmitted as 32 hex
/// lowercase characters in logs; raw bytes on the wire.
///
/// Collisions are treated as identity: the same name and creation time
/// mean the same logical file on both peers.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileKey([u8; HASH_SIZE]);

impl FileKey {
    /// The reserved key carried by the empty-folder sentinel ACK
    /// (`abcdef0123456789abcdef0123456789`).
    pub const RESERVED: FileKey = FileKey([
        0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67,
        0x89,
    ]);

    /// Derive the key from a filename and its creation time in millis
    /// since the epoch.
    pub fn from_metadata(filename: &str, created_ms: u64) -> Self {
        let mut buf = Vec::with_capacity(filename.len() + 20);
        buf.extend_from_slice(filename.as_bytes());
        buf.extend_from_slice(created_ms.to_string().as_bytes());
        FileKey(md5::compute(&buf).0)
    }

    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        FileKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Parse a 32-character lowercase hex representation.
    pub fn from_hex(s: &str) -> Result<Self, SyncError> {
        if s.len() != HASH_SIZE * 2 || !s.is_ascii() {
            return Err(SyncError::MalformedPacket("bad key length"));
        }
        let mut bytes = [0u8; HASH_SIZE];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| SyncError::MalformedPacket("bad key digit"))?;
        }
        Ok(FileKey(bytes))
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileKey({})", self)
    }
}
