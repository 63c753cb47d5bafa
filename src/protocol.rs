//! Shared wire-protocol constants for the datagram sync protocol

/// Total length of every datagram; logical content is zero-padded to this.
pub const MAX_PACKET_SIZE: usize = 1500;

// Field widths
pub const OPCODE_SIZE: usize = 1;
pub const HASH_SIZE: usize = 16;
pub const HMAC_SIZE: usize = 20;
pub const SEQ_NUM_SIZE: usize = 2;
pub const DATA_SIZE_SIZE: usize = 2;
pub const NAME_SIZE_SIZE: usize = 4;
pub const TIMESTAMP_SIZE: usize = 8;

/// Fixed header of a DATA_TRANSFER: opcode | seqnum | hash | has_next | length
pub const DATA_HEADER_SIZE: usize = OPCODE_SIZE + SEQ_NUM_SIZE + HASH_SIZE + 1 + DATA_SIZE_SIZE;

/// Maximum payload carried by one DATA_TRANSFER datagram.
pub const DATA_SIZE: usize = MAX_PACKET_SIZE - DATA_HEADER_SIZE;

/// Longest filename (in bytes) a FILE_META can carry and still fit its HMAC.
pub const MAX_NAME_LEN: usize =
    MAX_PACKET_SIZE - (OPCODE_SIZE + HASH_SIZE + NAME_SIZE_SIZE + 1 + HMAC_SIZE);

/// First sequence number of every chunk stream.
pub const INIT_SEQ_NUMBER: u16 = 0;

/// Sequence number carried by the empty-folder sentinel ACK.
pub const EMPTY_DIR_SEQ: u16 = INIT_SEQ_NUMBER.wrapping_sub(1);

/// Reserved file key (hex) carried by the empty-folder sentinel ACK.
pub const EMPTY_DIR_KEY: &str = "abcdef0123456789abcdef0123456789";

/// New chunks are not read from disk while this many are unacknowledged.
pub const MAX_INFLIGHT: u16 = 64;

/// Built-in shared HMAC secret. Override with --key for real deployments.
pub const DEFAULT_KEY: &str = "driftsync-shared-secret";

// Opcode IDs (keep numeric values stable across peers)
pub mod opcode {
    pub const FILE_META: u8 = 0x01;
    pub const DATA_TRANSFER: u8 = 0x02;
    pub const ACK: u8 = 0x03;
}

// Centralized timing constants for the monitor/sender/receiver loops
pub mod timing {
    /// Directory rescan interval (monitor loop), seconds
    pub const SECONDS_OF_SLEEP: u64 = 5;

    /// Sender tick interval, milliseconds
    pub const MILLIS_OF_SLEEP: u64 = 5000;

    /// Per-chunk wait for acknowledgments after a send, milliseconds
    pub const ESTIMATED_RTT_MS: u64 = 500;

    /// Poll stride for the liveness latch and cancellation-aware sleeps
    pub const STRIDE_MS: u64 = 10;

    /// Pause before each metadata packet of a batch
    pub const META_GAP_MS: u64 = 100;

    /// Pause before the final metadata packet, letting the peer absorb the
    /// batch before data transfer begins
    pub const META_LAST_GAP_MS: u64 = 300;

    /// Receive timeout so the receiver loop can observe shutdown
    pub const RECV_TIMEOUT_MS: u64 = 200;

    /// Delay before the sender's first tick, letting the peer's listener
    /// come up
    pub const SENDER_WARMUP_MS: u64 = 1000;
}
