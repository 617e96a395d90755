use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use crate::TransferError;

/// A seekable byte source with a known total length.
///
/// The engine reads one window at a time from a blocking thread, so
/// implementations only need to be `Send`.
pub trait UploadSource: Send {
    /// Total size of the source in bytes.
    fn total_bytes(&self) -> u64;

    /// Reads up to `max_len` bytes starting at `offset`.
    ///
    /// Returns fewer bytes only when the source ends before `offset + max_len`.
    fn read_window(&mut self, offset: u64, max_len: usize) -> Result<Vec<u8>, TransferError>;
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads fixed windows from any `Read + Seek` source.
pub struct ChunkReader<R = File> {
    reader: R,
    offset: u64,
    len: u64,
}

impl ChunkReader<File> {
    /// Opens `path` for windowed reading.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self::from_reader(file, len))
    }
}

impl ChunkReader<Cursor<Vec<u8>>> {
    /// Wraps an in-memory buffer.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let len = data.len() as u64;
        Self::from_reader(Cursor::new(data), len)
    }
}

impl<R: Read + Seek> ChunkReader<R> {
    /// Wraps `reader`, whose total length must be `len`.
    pub fn from_reader(reader: R, len: u64) -> Self {
        Self {
            reader,
            offset: 0,
            len,
        }
    }

    /// Seeks to the given byte offset (for resume).
    pub fn seek_to(&mut self, offset: u64) -> Result<(), TransferError> {
        if offset > self.len {
            return Err(TransferError::OffsetOverflow {
                offset,
                total: self.len,
            });
        }
        self.reader.seek(SeekFrom::Start(offset))?;
        self.offset = offset;
        Ok(())
    }

    /// Reads the next window of at most `max_len` bytes from the current
    /// offset. Returns an empty buffer at EOF.
    pub fn read_next(&mut self, max_len: usize) -> Result<Vec<u8>, TransferError> {
        let remaining = self.remaining();
        let read_size = std::cmp::min(remaining, max_len as u64) as usize;
        let mut buf = vec![0u8; read_size];
        self.reader.read_exact(&mut buf)?;
        self.offset += read_size as u64;
        Ok(buf)
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.len - self.offset
    }
}

impl<R: Read + Seek + Send> UploadSource for ChunkReader<R> {
    fn total_bytes(&self) -> u64 {
        self.len
    }

    fn read_window(&mut self, offset: u64, max_len: usize) -> Result<Vec<u8>, TransferError> {
        if offset != self.offset {
            self.seek_to(offset)?;
        }
        self.read_next(max_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn open_reports_file_size() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "clip.mp4", &[7u8; 1500]);
        let reader = ChunkReader::open(&path).unwrap();
        assert_eq!(reader.total_bytes(), 1500);
        assert_eq!(reader.remaining(), 1500);
    }

    #[test]
    fn open_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let result = ChunkReader::open(&dir.path().join("missing.mp4"));
        assert!(matches!(result, Err(TransferError::Io(_))));
    }

    #[test]
    fn sequential_windows_cover_source() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut reader = ChunkReader::from_bytes(data.clone());

        let mut collected = Vec::new();
        let mut offset = 0u64;
        let mut windows = 0;
        loop {
            let window = reader.read_window(offset, 300).unwrap();
            if window.is_empty() {
                break;
            }
            offset += window.len() as u64;
            collected.extend_from_slice(&window);
            windows += 1;
        }

        // 300 + 300 + 300 + 100
        assert_eq!(windows, 4);
        assert_eq!(collected, data);
    }

    #[test]
    fn read_window_seeks_backwards_after_partial_write() {
        let data: Vec<u8> = (0..100u8).collect();
        let mut reader = ChunkReader::from_bytes(data);

        let first = reader.read_window(0, 40).unwrap();
        assert_eq!(first.len(), 40);

        // Server only kept 25 bytes; the next window restarts there.
        let again = reader.read_window(25, 40).unwrap();
        assert_eq!(again[0], 25);
        assert_eq!(again.len(), 40);
        assert_eq!(reader.offset(), 65);
    }

    #[test]
    fn read_window_from_file_resume_offset() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "clip.mp4", b"0123456789");
        let mut reader = ChunkReader::open(&path).unwrap();

        let window = reader.read_window(5, 1024).unwrap();
        assert_eq!(window, b"56789");
        assert!(reader.read_window(10, 1024).unwrap().is_empty());
    }

    #[test]
    fn seek_beyond_end_rejected() {
        let mut reader = ChunkReader::from_bytes(vec![0u8; 10]);
        let err = reader.seek_to(11).unwrap_err();
        assert!(matches!(
            err,
            TransferError::OffsetOverflow {
                offset: 11,
                total: 10
            }
        ));
    }

    #[test]
    fn empty_source_yields_empty_window() {
        let mut reader = ChunkReader::from_bytes(Vec::new());
        assert_eq!(reader.total_bytes(), 0);
        assert!(reader.read_window(0, 8).unwrap().is_empty());
    }
}
