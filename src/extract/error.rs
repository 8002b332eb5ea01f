//! Fault taxonomy for extraction sessions.

use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by an [`ExtractionSession`](crate::extract::ExtractionSession)
/// and the executor driving it.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// The session was already consumed; no process was started
    #[error("extraction session has already been consumed")]
    Reused,

    /// A required external tool could not be spawned
    #[error("failed to spawn {tool} process: {source}")]
    ToolUnavailable {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A spawned process did not expose a piped stream
    #[error("{tool} process has no {pipe} pipe")]
    MissingPipe {
        tool: &'static str,
        pipe: &'static str,
    },

    /// The producer exited without writing a single byte
    #[error("producer process exited without writing any bytes")]
    EmptyProducerOutput,

    /// The transformer's input broke; raised after the raw feed was archived
    #[error("failed to forward raw feed to transformer: {0}")]
    ForwardingFailure(#[source] std::io::Error),

    /// Reading the raw feed failed
    #[error("failed to read raw feed: {0}")]
    SourceRead(#[source] std::io::Error),

    /// Writing into the compressed archive failed
    #[error("failed to write archive: {0}")]
    Archive(#[source] std::io::Error),

    /// Reading a record line from the transformer failed
    #[error("failed to read record from transformer: {0}")]
    RecordRead(#[source] std::io::Error),

    /// A transformer output line exceeded the configured limit
    #[error("record line exceeds {limit} bytes")]
    RecordTooLong { limit: usize },

    /// A transformer output line is not a `{path, package}` record
    #[error("malformed record ({reason}): {line}")]
    MalformedRecord { line: String, reason: String },

    /// The transformer exited unsuccessfully after end-of-stream
    #[error("{tool} exited with {status}: {diagnostics}")]
    ToolExit {
        tool: &'static str,
        status: ExitStatus,
        diagnostics: String,
    },

    /// End-of-stream settling did not finish in time
    #[error("{waiting_on} still running {timeout:?} after end-of-stream")]
    SettleTimeout {
        waiting_on: &'static str,
        timeout: Duration,
    },

    /// A background task panicked
    #[error("background task failed: {0}")]
    TaskFailed(String),

    /// The downstream sink rejected data
    #[error("sink error: {0}")]
    Sink(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Executor bookkeeping failed
    #[error("executor error: {0}")]
    Executor(String),
}

impl ExtractError {
    /// Builds a [`ExtractError::MalformedRecord`], truncating long lines.
    pub(crate) fn malformed(line: &[u8], reason: impl Into<String>) -> Self {
        const PREVIEW: usize = 256;
        let mut shown = String::from_utf8_lossy(&line[..line.len().min(PREVIEW)]).into_owned();
        if line.len() > PREVIEW {
            shown.push_str("...");
        }
        Self::MalformedRecord {
            line: shown,
            reason: reason.into(),
        }
    }
}
