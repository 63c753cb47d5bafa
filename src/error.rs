//! Error taxonomy for the sync protocol.

use thiserror::Error;

/// Protocol-level failures.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Undecodable datagram: unknown opcode, a length field exceeding the
    /// buffer, or an HMAC mismatch. Dropped silently by the receiver.
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),

    /// Socket or file I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A file scheduled for transfer vanished before it could be read.
    #[error("no such file: {0}")]
    NoSuchFile(String),

    /// A file needs more chunks than a 16-bit sequence space can number.
    #[error("file too large to sequence: {0}")]
    TooManyChunks(String),

    /// Progress gated off: the peer is not currently reachable or the
    /// process is shutting down.
    #[error("peer unavailable")]
    Unavailable,
}

pub type SyncResult<T> = Result<T, SyncError>;
