use crate::label::BuildLabel;
use crate::model::PackageRecord;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to store record {path}: {reason}")]
    Record { path: String, reason: String },
    #[error("Failed to store archive: {0}")]
    Archive(String),
}

/// Durable destination for the output of an extraction.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Stores one decoded record under the build it was extracted from.
    async fn store_record(&self, label: &BuildLabel, record: PackageRecord)
        -> Result<(), SinkError>;

    /// Stores the gzip archive of the raw feed. Only called after a
    /// complete extraction.
    async fn store_archive(&self, label: &BuildLabel, archive: Vec<u8>) -> Result<(), SinkError>;
}
