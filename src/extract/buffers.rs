//! In-memory sinks shared between a session's background tasks and its caller.
//!
//! Each buffer has exactly one writer task while a session runs; the caller
//! reads it after the record stream ends. Handles are cheap clones of the same
//! underlying storage.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct ArchiveState {
    /// Live encoder; `None` once the gzip member has been finalized
    encoder: Option<GzEncoder<Vec<u8>>>,
    /// Finalized gzip bytes
    finished: Vec<u8>,
    raw_len: u64,
}

/// Append-only gzip archive of the raw feed.
///
/// Decompressing the finished archive yields exactly the bytes passed to
/// [`append`](Self::append), in order, as a single gzip member.
#[derive(Debug, Clone)]
pub struct CompressedBuffer {
    state: Arc<Mutex<ArchiveState>>,
}

impl Default for CompressedBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressedBuffer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ArchiveState {
                encoder: Some(GzEncoder::new(Vec::new(), Compression::default())),
                finished: Vec::new(),
                raw_len: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ArchiveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Compresses `chunk` into the archive.
    ///
    /// # Errors
    ///
    /// Fails if the archive was already finalized or the encoder fails.
    pub fn append(&self, chunk: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        let encoder = state.encoder.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "archive already finalized")
        })?;
        encoder.write_all(chunk)?;
        state.raw_len += chunk.len() as u64;
        Ok(())
    }

    /// Writes the gzip trailer. Calling it again is a no-op.
    pub fn finish(&self) -> io::Result<()> {
        let mut state = self.lock();
        if let Some(encoder) = state.encoder.take() {
            state.finished = encoder.finish()?;
        }
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.lock().encoder.is_none()
    }

    /// Number of raw bytes appended so far.
    pub fn raw_len(&self) -> u64 {
        self.lock().raw_len
    }

    /// Number of compressed bytes currently held.
    pub fn compressed_len(&self) -> usize {
        let state = self.lock();
        match &state.encoder {
            Some(encoder) => encoder.get_ref().len(),
            None => state.finished.len(),
        }
    }

    /// Copies out the compressed bytes. Before [`finish`](Self::finish) this
    /// is an unterminated gzip member.
    pub fn to_bytes(&self) -> Vec<u8> {
        let state = self.lock();
        match &state.encoder {
            Some(encoder) => encoder.get_ref().clone(),
            None => state.finished.clone(),
        }
    }

    /// Decompresses the finalized archive back into the raw feed.
    pub fn decompress(&self) -> io::Result<Vec<u8>> {
        if !self.is_finished() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive has not been finalized",
            ));
        }
        let compressed = self.to_bytes();
        let mut raw = Vec::new();
        GzDecoder::new(compressed.as_slice()).read_to_end(&mut raw)?;
        Ok(raw)
    }
}

/// Captured diagnostic output of one external process.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl DiagnosticBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn extend(&self, chunk: &[u8]) {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(chunk);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Captured output decoded lossily as UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.to_bytes()).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_decompresses_to_appended_bytes() {
        let archive = CompressedBuffer::new();
        archive.append(b"hello ").unwrap();
        archive.append(b"world").unwrap();
        archive.finish().unwrap();

        assert!(archive.is_finished());
        assert_eq!(archive.raw_len(), 11);
        assert_eq!(archive.decompress().unwrap(), b"hello world");
    }

    #[test]
    fn test_empty_archive_is_valid_gzip() {
        let archive = CompressedBuffer::new();
        archive.finish().unwrap();

        let bytes = archive.to_bytes();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
        assert!(archive.decompress().unwrap().is_empty());
    }

    #[test]
    fn test_finish_is_idempotent_and_seals_archive() {
        let archive = CompressedBuffer::new();
        archive.append(b"abc").unwrap();
        archive.finish().unwrap();
        let sealed = archive.to_bytes();

        archive.finish().unwrap();
        assert_eq!(archive.to_bytes(), sealed);
        assert!(archive.append(b"more").is_err());
        assert_eq!(archive.decompress().unwrap(), b"abc");
    }

    #[test]
    fn test_decompress_requires_finished_archive() {
        let archive = CompressedBuffer::new();
        archive.append(b"abc").unwrap();
        assert!(archive.decompress().is_err());
    }

    #[test]
    fn test_clones_share_storage() {
        let archive = CompressedBuffer::new();
        let writer = archive.clone();
        writer.append(b"shared").unwrap();
        writer.finish().unwrap();
        assert_eq!(archive.decompress().unwrap(), b"shared");

        let diagnostics = DiagnosticBuffer::new();
        diagnostics.clone().extend(b"warn: \xffx");
        assert!(!diagnostics.is_empty());
        assert_eq!(diagnostics.text(), "warn: \u{fffd}x");
    }
}
