//! Wire codec for the three datagram kinds.
//!
//! Every datagram is exactly `MAX_PACKET_SIZE` bytes with trailing zeros
//! after the logical end. Multi-byte fields are big-endian. FILE_META and
//! ACK carry an HMAC-SHA1 computed over the full buffer with the HMAC
//! region and padding zeroed; DATA_TRANSFER is unauthenticated, bounded by
//! the authenticated FILE_META that announced the file and by the
//! key-addressed ack loop.

use crate::checksum::FileKey;
use crate::error::SyncError;
use crate::protocol::{
    opcode, DATA_SIZE, EMPTY_DIR_SEQ, HASH_SIZE, HMAC_SIZE, MAX_NAME_LEN, MAX_PACKET_SIZE,
    NAME_SIZE_SIZE, SEQ_NUM_SIZE, TIMESTAMP_SIZE,
};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha1 = Hmac<Sha1>;

/// Milliseconds since the epoch, for ACK timestamps.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A decoded protocol datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Announces one entry of the sender's inventory. `has_next == false`
    /// terminates the batch.
    FileMeta {
        key: FileKey,
        filename: String,
        has_next: bool,
    },
    /// One chunk of a file's byte stream. `has_next == false` on the final
    /// chunk.
    Data {
        key: FileKey,
        seq: u16,
        has_next: bool,
        payload: Vec<u8>,
    },
    /// Acknowledges one received chunk (non-cumulative). Also reused as the
    /// empty-folder sentinel: seq `EMPTY_DIR_SEQ` with the reserved key.
    Ack {
        key: FileKey,
        seq: u16,
        timestamp_ms: u64,
    },
}

impl Packet {
    /// The "my directory is empty" signal.
    pub fn empty_dir_sentinel(timestamp_ms: u64) -> Self {
        Packet::Ack {
            key: FileKey::RESERVED,
            seq: EMPTY_DIR_SEQ,
            timestamp_ms,
        }
    }

    pub fn is_empty_dir_sentinel(&self) -> bool {
        matches!(self, Packet::Ack { key, seq, .. }
            if *seq == EMPTY_DIR_SEQ && *key == FileKey::RESERVED)
    }

    /// Serialize into a full-size datagram, authenticating control packets
    /// with the shared secret.
    pub fn encode(&self, secret: &[u8]) -> Result<Vec<u8>, SyncError> {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        match self {
            Packet::FileMeta {
                key,
                filename,
                has_next,
            } => {
                let name = filename.as_bytes();
                if name.len() > MAX_NAME_LEN {
                    return Err(SyncError::MalformedPacket("filename too long"));
                }
                buf[0] = opcode::FILE_META;
                let mut pos = 1;
                buf[pos..pos + HASH_SIZE].copy_from_slice(key.as_bytes());
                pos += HASH_SIZE;
                buf[pos..pos + NAME_SIZE_SIZE].copy_from_slice(&(name.len() as u32).to_be_bytes());
                pos += NAME_SIZE_SIZE;
                buf[pos..pos + name.len()].copy_from_slice(name);
                pos += name.len();
                buf[pos] = u8::from(*has_next);
                pos += 1;
                // HMAC over the buffer with its own region still zeroed
                let tag = compute_hmac(secret, &buf);
                buf[pos..pos + HMAC_SIZE].copy_from_slice(&tag);
            }
            Packet::Data {
                key,
                seq,
                has_next,
                payload,
            } => {
                if payload.len() > DATA_SIZE {
                    return Err(SyncError::MalformedPacket("payload too long"));
                }
                buf[0] = opcode::DATA_TRANSFER;
                let mut pos = 1;
                buf[pos..pos + SEQ_NUM_SIZE].copy_from_slice(&seq.to_be_bytes());
                pos += SEQ_NUM_SIZE;
                buf[pos..pos + HASH_SIZE].copy_from_slice(key.as_bytes());
                pos += HASH_SIZE;
                buf[pos] = u8::from(*has_next);
                pos += 1;
                buf[pos..pos + 2].copy_from_slice(&(payload.len() as u16).to_be_bytes());
                pos += 2;
                buf[pos..pos + payload.len()].copy_from_slice(payload);
            }
            Packet::Ack {
                key,
                seq,
                timestamp_ms,
            } => {
                buf[0] = opcode::ACK;
                let mut pos = 1;
                buf[pos..pos + SEQ_NUM_SIZE].copy_from_slice(&seq.to_be_bytes());
                pos += SEQ_NUM_SIZE;
                buf[pos..pos + HASH_SIZE].copy_from_slice(key.as_bytes());
                pos += HASH_SIZE;
                buf[pos..pos + TIMESTAMP_SIZE].copy_from_slice(&timestamp_ms.to_be_bytes());
                pos += TIMESTAMP_SIZE;
                let tag = compute_hmac(secret, &buf);
                buf[pos..pos + HMAC_SIZE].copy_from_slice(&tag);
            }
        }
        Ok(buf)
    }

    /// Decode a received datagram, verifying the HMAC on control packets.
    /// Datagrams shorter than `MAX_PACKET_SIZE` are treated as zero-padded.
    pub fn decode(datagram: &[u8], secret: &[u8]) -> Result<Packet, SyncError> {
        if datagram.is_empty() || datagram.len() > MAX_PACKET_SIZE {
            return Err(SyncError::MalformedPacket("bad datagram length"));
        }
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        buf[..datagram.len()].copy_from_slice(datagram);

        match buf[0] {
            opcode::FILE_META => {
                let mut pos = 1;
                let key = read_key(&buf, &mut pos);
                let name_len =
                    u32::from_be_bytes(fixed(&buf[pos..pos + NAME_SIZE_SIZE])) as usize;
                pos += NAME_SIZE_SIZE;
                if name_len > MAX_NAME_LEN {
                    return Err(SyncError::MalformedPacket("name length exceeds buffer"));
                }
                let filename = std::str::from_utf8(&buf[pos..pos + name_len])
                    .map_err(|_| SyncError::MalformedPacket("filename not utf-8"))?
                    .to_owned();
                pos += name_len;
                let has_next = buf[pos] != 0;
                pos += 1;
                verify_trailing_hmac(secret, &mut buf, pos)?;
                Ok(Packet::FileMeta {
                    key,
                    filename,
                    has_next,
                })
            }
            opcode::DATA_TRANSFER => {
                let mut pos = 1;
                let seq = u16::from_be_bytes(fixed(&buf[pos..pos + SEQ_NUM_SIZE]));
                pos += SEQ_NUM_SIZE;
                let key = read_key(&buf, &mut pos);
                let has_next = buf[pos] != 0;
                pos += 1;
                let len = u16::from_be_bytes(fixed(&buf[pos..pos + 2])) as usize;
                pos += 2;
                if len > DATA_SIZE {
                    return Err(SyncError::MalformedPacket("data length exceeds buffer"));
                }
                Ok(Packet::Data {
                    key,
                    seq,
                    has_next,
                    payload: buf[pos..pos + len].to_vec(),
                })
            }
            opcode::ACK => {
                let mut pos = 1;
                let seq = u16::from_be_bytes(fixed(&buf[pos..pos + SEQ_NUM_SIZE]));
                pos += SEQ_NUM_SIZE;
                let key = read_key(&buf, &mut pos);
                let timestamp_ms = u64::from_be_bytes(fixed(&buf[pos..pos + TIMESTAMP_SIZE]));
                pos += TIMESTAMP_SIZE;
                verify_trailing_hmac(secret, &mut buf, pos)?;
                Ok(Packet::Ack {
                    key,
                    seq,
                    timestamp_ms,
                })
            }
            _ => Err(SyncError::MalformedPacket("unknown opcode")),
        }
    }
}

fn read_key(buf: &[u8], pos: &mut usize) -> FileKey {
    let mut bytes = [0u8; HASH_SIZE];
    bytes.copy_from_slice(&buf[*pos..*pos + HASH_SIZE]);
    *pos += HASH_SIZE;
    FileKey::from_bytes(bytes)
}

fn fixed<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}

fn compute_hmac(secret: &[u8], buf: &[u8]) -> [u8; HMAC_SIZE] {
    let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(buf);
    let out = mac.finalize().into_bytes();
    let mut tag = [0u8; HMAC_SIZE];
    tag.copy_from_slice(&out);
    tag
}

/// Extract the HMAC at `pos`, zero-normalize it and the padding behind it,
/// and verify the tag over the whole buffer in constant time.
fn verify_trailing_hmac(secret: &[u8], buf: &mut [u8], pos: usize) -> Result<(), SyncError> {
    let mut tag = [0u8; HMAC_SIZE];
    tag.copy_from_slice(&buf[pos..pos + HMAC_SIZE]);
    buf[pos..].fill(0);
    let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(buf);
    mac.verify_slice(&tag)
        .map_err(|_| SyncError::MalformedPacket("hmac mismatch"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::protocol::INIT_SEQ_NUMBER;

    const SECRET: &[u8] = b"test-secret";

    fn key() -> FileKey {
        FileKey::from_metadata("a.txt", 1_700_000_000_000)
    }

    #[test]
    fn test_file_meta_round_trip() {
        let p = Packet::FileMeta {
            key: key(),
            filename: "a.txt".into(),
            has_next: true,
        };
        let wire = p.encode(SECRET).unwrap();
        assert_eq!(wire.len(), MAX_PACKET_SIZE);
        assert_eq!(Packet::decode(&wire, SECRET).unwrap(), p);
    }

    #[test]
    fn test_data_round_trip() {
        let p = Packet::Data {
            key: key(),
            seq: 7,
            has_next: false,
            payload: (0..17u8).collect(),
        };
        let wire = p.encode(SECRET).unwrap();
        assert_eq!(Packet::decode(&wire, SECRET).unwrap(), p);
    }

    #[test]
    fn test_empty_payload_round_trip() {
        let p = Packet::Data {
            key: key(),
            seq: 3,
            has_next: false,
            payload: Vec::new(),
        };
        let wire = p.encode(SECRET).unwrap();
        assert_eq!(Packet::decode(&wire, SECRET).unwrap(), p);
    }

    #[test]
    fn test_ack_round_trip() {
        let p = Packet::Ack {
            key: key(),
            seq: 42,
            timestamp_ms: 1_700_000_000_123,
        };
        let wire = p.encode(SECRET).unwrap();
        assert_eq!(Packet::decode(&wire, SECRET).unwrap(), p);
    }

    #[test]
    fn test_tampered_meta_fails_hmac() {
        let p = Packet::FileMeta {
            key: key(),
            filename: "a.txt".into(),
            has_next: false,
        };
        let mut wire = p.encode(SECRET).unwrap();
        // flip one bit inside the filename
        wire[22] ^= 0x01;
        assert!(matches!(
            Packet::decode(&wire, SECRET),
            Err(SyncError::MalformedPacket("hmac mismatch"))
        ));
    }

    #[test]
    fn test_tampered_ack_fails_hmac() {
        let p = Packet::Ack {
            key: key(),
            seq: 1,
            timestamp_ms: 99,
        };
        let mut wire = p.encode(SECRET).unwrap();
        // flip one bit of the timestamp
        wire[20] ^= 0x80;
        assert!(Packet::decode(&wire, SECRET).is_err());
    }

    #[test]
    fn test_wrong_secret_fails_hmac() {
        let p = Packet::FileMeta {
            key: key(),
            filename: "a.txt".into(),
            has_next: false,
        };
        let wire = p.encode(SECRET).unwrap();
        assert!(Packet::decode(&wire, b"other-secret").is_err());
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let mut wire = vec![0u8; MAX_PACKET_SIZE];
        wire[0] = 0x7f;
        assert!(matches!(
            Packet::decode(&wire, SECRET),
            Err(SyncError::MalformedPacket("unknown opcode"))
        ));
    }

    #[test]
    fn test_oversized_name_length_rejected() {
        let p = Packet::FileMeta {
            key: key(),
            filename: "a.txt".into(),
            has_next: false,
        };
        let mut wire = p.encode(SECRET).unwrap();
        wire[17..21].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(Packet::decode(&wire, SECRET).is_err());
    }

    #[test]
    fn test_oversized_data_length_rejected() {
        let p = Packet::Data {
            key: key(),
            seq: 0,
            has_next: true,
            payload: vec![1, 2, 3],
        };
        let mut wire = p.encode(SECRET).unwrap();
        wire[20..22].copy_from_slice(&u16::MAX.to_be_bytes());
        assert!(Packet::decode(&wire, SECRET).is_err());
    }

    #[test]
    fn test_sentinel_identity() {
        let p = Packet::empty_dir_sentinel(5);
        assert!(p.is_empty_dir_sentinel());
        let wire = p.encode(SECRET).unwrap();
        let back = Packet::decode(&wire, SECRET).unwrap();
        assert!(back.is_empty_dir_sentinel());
        let normal = Packet::Ack {
            key: key(),
            seq: INIT_SEQ_NUMBER,
            timestamp_ms: 5,
        };
        assert!(!normal.is_empty_dir_sentinel());
    }

    #[test]
    fn test_encode_rejects_oversized_fields() {
        let long_name = "x".repeat(MAX_NAME_LEN + 1);
        let p = Packet::FileMeta {
            key: key(),
            filename: long_name,
            has_next: false,
        };
        assert!(p.encode(SECRET).is_err());

        let p = Packet::Data {
            key: key(),
            seq: 0,
            has_next: true,
            payload: vec![0u8; DATA_SIZE + 1],
        };
        assert!(p.encode(SECRET).is_err());
    }
}
