//! Tunables for an extraction session.

use std::time::Duration;

/// Chunk size used when copying the raw feed (256 KiB).
pub const DEFAULT_TEE_CHUNK_SIZE: usize = 256 * 1024;

/// Chunk size used when capturing diagnostic streams (16 KiB).
pub const DEFAULT_DIAGNOSTIC_CHUNK_SIZE: usize = 16 * 1024;

/// Longest accepted transformer output line (16 MiB).
pub const DEFAULT_MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Session configuration.
///
/// Default configuration:
/// - Tee chunk size: 256 KiB
/// - Diagnostic chunk size: 16 KiB
/// - Max record line: 16 MiB
/// - Settle timeout: 30 seconds
/// - Empty output grace: 2 seconds
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Bytes read from the raw feed per chunk. This also bounds how much of
    /// the feed is held for the forwarding pipe at any time.
    pub tee_chunk_size: usize,

    /// Bytes read from a diagnostic stream per chunk
    pub diagnostic_chunk_size: usize,

    /// Maximum length of a single record line, newline excluded
    pub max_record_len: usize,

    /// How long end-of-stream waits for helpers and the transformer's exit
    pub settle_timeout: Duration,

    /// How long the watchdog waits, after the producer exited, for the tee's
    /// first read before reporting empty output. A descendant holding the
    /// producer's stdout open can otherwise delay the check indefinitely.
    pub empty_output_grace: Duration,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            tee_chunk_size: DEFAULT_TEE_CHUNK_SIZE,
            diagnostic_chunk_size: DEFAULT_DIAGNOSTIC_CHUNK_SIZE,
            max_record_len: DEFAULT_MAX_RECORD_LEN,
            settle_timeout: Duration::from_secs(30),
            empty_output_grace: Duration::from_secs(2),
        }
    }
}

impl ExtractorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the raw feed chunk size. Zero is clamped to one byte.
    pub fn with_tee_chunk_size(mut self, size: usize) -> Self {
        self.tee_chunk_size = size.max(1);
        self
    }

    /// Sets the diagnostic capture chunk size. Zero is clamped to one byte.
    pub fn with_diagnostic_chunk_size(mut self, size: usize) -> Self {
        self.diagnostic_chunk_size = size.max(1);
        self
    }

    pub fn with_max_record_len(mut self, len: usize) -> Self {
        self.max_record_len = len;
        self
    }

    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    pub fn with_empty_output_grace(mut self, grace: Duration) -> Self {
        self.empty_output_grace = grace;
        self
    }
}
