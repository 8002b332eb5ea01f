//! Extraction module - drives the external unpacker and captures its output.
//!
//! This module provides:
//! - **Controller**: [`ExtractionSession`] and its lazy [`RecordStream`]
//! - **Tools**: the [`UnpackerTool`] capability and the [`UnpackerCli`] implementation
//! - **Buffers**: the gzip [`CompressedBuffer`] archive and [`DiagnosticBuffer`]s
//! - **Errors**: the [`ExtractError`] fault taxonomy

pub mod buffers;
pub mod config;
pub mod error;
pub mod session;
pub mod tool;

mod drain;
mod process;
mod tee;
mod watchdog;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use buffers::{CompressedBuffer, DiagnosticBuffer};
pub use config::ExtractorConfig;
pub use error::ExtractError;
pub use session::{ExtractionSession, RawSource, RecordStream, SessionState};
pub use tool::{UnpackerCli, UnpackerTool};
