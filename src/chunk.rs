//! Chunked file reads for the sender's data phase.

use crate::protocol::DATA_SIZE;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Streams a file as a finite sequence of payloads of at most `DATA_SIZE`
/// bytes. The reader is finished once it has produced a payload shorter
/// than `DATA_SIZE`, so a file of exactly `n * DATA_SIZE` bytes yields
/// `n + 1` payloads with an empty final one, and an empty file yields a
/// single empty payload.
pub struct ChunkReader {
    reader: BufReader<File>,
    finished: bool,
}

impl ChunkReader {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        Ok(ChunkReader {
            reader: BufReader::new(File::open(path)?),
            finished: false,
        })
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    /// The next payload, or `None` once the stream is exhausted.
    pub fn next_chunk(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }
        let mut buf = vec![0u8; DATA_SIZE];
        let mut filled = 0;
        while filled < DATA_SIZE {
            let n = self.reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        if filled < DATA_SIZE {
            self.finished = true;
        }
        Ok(Some(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn file_of(dir: &TempDir, name: &str, size: usize) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        let bytes: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        f.write_all(&bytes).unwrap();
        path
    }

    fn drain(path: &Path) -> Vec<Vec<u8>> {
        let mut reader = ChunkReader::open(path).unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = reader.next_chunk().unwrap() {
            chunks.push(chunk);
        }
        assert!(reader.finished());
        chunks
    }

    #[test]
    fn test_empty_file_yields_one_empty_chunk() {
        let dir = TempDir::new().unwrap();
        let path = file_of(&dir, "empty", 0);
        let chunks = drain(&path);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }

    #[test]
    fn test_partial_tail_chunk() {
        let dir = TempDir::new().unwrap();
        let path = file_of(&dir, "f", 3 * DATA_SIZE + 17);
        let chunks = drain(&path);
        assert_eq!(chunks.len(), 4);
        assert!(chunks[..3].iter().all(|c| c.len() == DATA_SIZE));
        assert_eq!(chunks[3].len(), 17);
    }

    #[test]
    fn test_exact_multiple_yields_empty_final_chunk() {
        let dir = TempDir::new().unwrap();
        let path = file_of(&dir, "f", 2 * DATA_SIZE);
        let chunks = drain(&path);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), DATA_SIZE);
        assert_eq!(chunks[1].len(), DATA_SIZE);
        assert!(chunks[2].is_empty());
    }

    #[test]
    fn test_chunks_reassemble_to_file() {
        let dir = TempDir::new().unwrap();
        let path = file_of(&dir, "f", DATA_SIZE + 100);
        let chunks = drain(&path);
        let joined: Vec<u8> = chunks.concat();
        assert_eq!(joined, std::fs::read(&path).unwrap());
    }
}
