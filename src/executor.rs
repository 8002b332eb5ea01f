use crate::extract::{ExtractError, ExtractionSession, ExtractorConfig, RawSource, UnpackerTool};
use crate::label::BuildLabel;
use crate::traits::RecordSink;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

/// Summary of one completed extraction.
#[derive(Debug, Clone)]
pub struct ExtractionReport {
    pub label: BuildLabel,
    pub records: usize,
    pub raw_bytes: u64,
    pub archive_bytes: usize,
    pub duration_ms: u64,
}

/// Runs extraction sessions with bounded concurrency and drains them into a
/// [`RecordSink`].
pub struct ExtractionExecutor<T: UnpackerTool> {
    tool: Arc<T>,
    config: ExtractorConfig,
    semaphore: Arc<Semaphore>,
}

impl<T: UnpackerTool> ExtractionExecutor<T> {
    pub fn new(tool: Arc<T>, concurrency_limit: usize) -> Self {
        Self {
            tool,
            config: ExtractorConfig::default(),
            semaphore: Arc::new(Semaphore::new(concurrency_limit)),
        }
    }

    pub fn with_config(mut self, config: ExtractorConfig) -> Self {
        self.config = config;
        self
    }

    /// Extracts one feed in a fresh session, storing every record and, on
    /// success, the archive.
    #[instrument(skip(self, source, sink), fields(label = %label))]
    pub async fn execute<S>(
        &self,
        label: BuildLabel,
        source: Option<RawSource>,
        sink: &S,
    ) -> Result<ExtractionReport, ExtractError>
    where
        S: RecordSink + ?Sized,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| ExtractError::Executor(format!("Semaphore error: {}", e)))?;

        let start = Instant::now();
        let mut session =
            ExtractionSession::new(self.tool.clone()).with_config(self.config.clone());

        info!("Starting extraction");
        let mut records = 0;
        {
            let mut stream = session.extract(source).await?;
            while let Some(record) = stream.next().await {
                let stored = sink.store_record(&label, record?).await;
                if let Err(e) = stored {
                    stream.close().await;
                    return Err(ExtractError::Sink(Box::new(e)));
                }
                records += 1;
            }
        }

        let archive = session.archive().to_bytes();
        let report = ExtractionReport {
            label: label.clone(),
            records,
            raw_bytes: session.archive().raw_len(),
            archive_bytes: archive.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        if session.successfully_extracted() {
            sink.store_archive(&label, archive)
                .await
                .map_err(|e| ExtractError::Sink(Box::new(e)))?;
        } else {
            warn!(
                raw_bytes = report.raw_bytes,
                "raw feed incomplete, archive not stored"
            );
        }

        info!(
            records = report.records,
            raw_bytes = report.raw_bytes,
            archive_bytes = report.archive_bytes,
            duration_ms = report.duration_ms,
            "Finished extraction"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::test_support::ScriptTool;
    use crate::model::PackageRecord;
    use crate::traits::SinkError;
    use async_trait::async_trait;
    use std::io::{Cursor, Read};
    use tokio::io::AsyncWriteExt;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MemorySink {
        records: Mutex<Vec<(String, PackageRecord)>>,
        archives: Mutex<Vec<Vec<u8>>>,
        reject_after: Option<usize>,
    }

    #[async_trait]
    impl RecordSink for MemorySink {
        async fn store_record(
            &self,
            label: &BuildLabel,
            record: PackageRecord,
        ) -> Result<(), SinkError> {
            let mut records = self.records.lock().await;
            if Some(records.len()) == self.reject_after {
                return Err(SinkError::Record {
                    path: record.path,
                    reason: "storage full".to_string(),
                });
            }
            records.push((label.to_string(), record));
            Ok(())
        }

        async fn store_archive(
            &self,
            _label: &BuildLabel,
            archive: Vec<u8>,
        ) -> Result<(), SinkError> {
            self.archives.lock().await.push(archive);
            Ok(())
        }
    }

    fn label() -> BuildLabel {
        "2023.10.25.17.48/abc".parse().unwrap()
    }

    fn executor() -> ExtractionExecutor<ScriptTool> {
        let tool = ScriptTool::new(
            "printf 'packages'",
            r#"cat > /dev/null
printf '%s\n' '{"path":"/a","package":1}' '{"path":"/b","package":2}'"#,
        );
        ExtractionExecutor::new(Arc::new(tool), 2)
    }

    #[tokio::test]
    async fn test_execute_stores_records_and_archive() {
        let sink = MemorySink::default();

        let report = executor().execute(label(), None, &sink).await.unwrap();

        assert_eq!(report.records, 2);
        assert_eq!(report.raw_bytes, 8);
        let records = sink.records.lock().await;
        assert_eq!(records[0].0, "2023.10.25.17.48/abc");
        assert_eq!(records[1].1.path, "/b");

        let archives = sink.archives.lock().await;
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].len(), report.archive_bytes);
        let mut raw = Vec::new();
        flate2::read::GzDecoder::new(archives[0].as_slice())
            .read_to_end(&mut raw)
            .unwrap();
        assert_eq!(raw, b"packages");
    }

    #[tokio::test]
    async fn test_execute_with_uploaded_source() {
        let sink = MemorySink::default();
        let source: RawSource = Box::new(Cursor::new(b"uploaded".to_vec()));

        let report = executor()
            .execute(label(), Some(source), &sink)
            .await
            .unwrap();

        assert_eq!(report.records, 2);
        assert_eq!(report.raw_bytes, 8);
    }

    #[tokio::test]
    async fn test_sink_failure_skips_archive() {
        let sink = MemorySink {
            reject_after: Some(1),
            ..Default::default()
        };

        let err = executor().execute(label(), None, &sink).await.unwrap_err();

        assert!(matches!(err, ExtractError::Sink(_)));
        assert_eq!(sink.records.lock().await.len(), 1);
        assert!(sink.archives.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_extraction_failure_skips_archive() {
        let tool = ScriptTool::new("exit 0", "cat > /dev/null");
        let executor = ExtractionExecutor::new(Arc::new(tool), 1);
        let sink = MemorySink::default();

        let err = executor.execute(label(), None, &sink).await.unwrap_err();

        assert!(matches!(err, ExtractError::EmptyProducerOutput));
        assert!(sink.archives.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_forwarding_skips_archive() {
        let tool = ScriptTool::new("exit 1", "head -c 1 > /dev/null");
        let executor = ExtractionExecutor::new(Arc::new(tool), 1).with_config(
            ExtractorConfig::new().with_settle_timeout(std::time::Duration::from_millis(200)),
        );
        let (mut writer, reader) = tokio::io::duplex(64);
        let trickle = tokio::spawn(async move {
            for byte in b"slow feed bytes" {
                writer.write_all(&[*byte]).await.unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        });
        let sink = MemorySink::default();

        let err = executor
            .execute(label(), Some(Box::new(reader)), &sink)
            .await
            .unwrap_err();
        trickle.await.unwrap();

        assert!(matches!(err, ExtractError::ForwardingFailure(_)));
        assert!(sink.archives.lock().await.is_empty());
    }
}
