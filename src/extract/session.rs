//! Extraction session controller.
//!
//! An [`ExtractionSession`] spawns the producer (unless the caller supplies
//! the raw feed), always spawns the transformer, and wires them together:
//!
//! ```text
//! raw feed ──► ByteTee ──► transformer stdin ──► transformer stdout ──► records
//!                 │
//!                 └──────► CompressedBuffer (gzip)
//! producer stderr / transformer stderr ──► DiagnosticBuffer
//! producer exit ──► watchdog
//! ```
//!
//! Every helper runs as a tokio task for the whole session. Running them one
//! after another would deadlock once the transformer's stdin fills while the
//! caller is blocked on its stdout.

use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::ChildStdout;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, instrument, warn};

use crate::extract::buffers::{CompressedBuffer, DiagnosticBuffer};
use crate::extract::config::ExtractorConfig;
use crate::extract::drain::drain_stream;
use crate::extract::error::ExtractError;
use crate::extract::process::ProcessHandle;
use crate::extract::tee::{ByteTee, FeedFlags, TeeProgress};
use crate::extract::tool::UnpackerTool;
use crate::extract::watchdog::watch_producer;
use crate::model::PackageRecord;

/// A caller-supplied raw feed, e.g. an uploaded file.
pub type RawSource = Box<dyn AsyncRead + Send + Unpin>;

/// Lifecycle of an [`ExtractionSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Fresh,
    Consumed,
    CleanedUp,
}

/// Single-use extraction controller.
///
/// [`extract`](Self::extract) may be called once. The archive and both
/// diagnostic buffers stay readable after the record stream ends, whether it
/// ended normally, early, or on a fault.
///
/// # Example
///
/// ```ignore
/// use package_extractor::{ExtractionSession, UnpackerCli};
/// use std::sync::Arc;
///
/// let mut session = ExtractionSession::new(Arc::new(UnpackerCli::default()));
/// let mut records = session.extract(None).await?;
/// while let Some(record) = records.next().await {
///     println!("{}", record?.path);
/// }
/// let archive = session.archive().to_bytes();
/// ```
pub struct ExtractionSession<T: UnpackerTool> {
    tool: Arc<T>,
    config: ExtractorConfig,
    state: SessionState,
    producer: Option<ProcessHandle>,
    transformer: Option<ProcessHandle>,
    tasks: JoinSet<Result<(), ExtractError>>,
    archive: CompressedBuffer,
    producer_diagnostics: DiagnosticBuffer,
    transformer_diagnostics: DiagnosticBuffer,
    flags: Arc<FeedFlags>,
    tee_progress: Option<watch::Receiver<TeeProgress>>,
}

impl<T: UnpackerTool> ExtractionSession<T> {
    pub fn new(tool: Arc<T>) -> Self {
        Self {
            tool,
            config: ExtractorConfig::default(),
            state: SessionState::Fresh,
            producer: None,
            transformer: None,
            tasks: JoinSet::new(),
            archive: CompressedBuffer::new(),
            producer_diagnostics: DiagnosticBuffer::new(),
            transformer_diagnostics: DiagnosticBuffer::new(),
            flags: Arc::new(FeedFlags::default()),
            tee_progress: None,
        }
    }

    pub fn with_config(mut self, config: ExtractorConfig) -> Self {
        self.config = config;
        self
    }

    /// Starts the pipeline and returns the lazy record stream.
    ///
    /// With `source = None` the producer is spawned and pulls the feed from
    /// the remote origin; otherwise `source` is the raw feed.
    ///
    /// # Errors
    ///
    /// - [`ExtractError::Reused`] on a second call; nothing is started
    /// - [`ExtractError::ToolUnavailable`] when a process cannot be spawned;
    ///   anything already spawned is cleaned up
    #[instrument(skip(self, source), fields(external_source = source.is_some()))]
    pub async fn extract(
        &mut self,
        source: Option<RawSource>,
    ) -> Result<RecordStream<'_, T>, ExtractError> {
        if self.state != SessionState::Fresh {
            return Err(ExtractError::Reused);
        }
        self.state = SessionState::Consumed;

        match self.start(source) {
            Ok(stdout) => {
                info!(tasks = self.tasks.len(), "extraction started");
                Ok(RecordStream {
                    reader: BufReader::new(stdout),
                    line: Vec::new(),
                    records: 0,
                    finished: false,
                    session: self,
                })
            }
            Err(e) => {
                warn!(error = %e, "failed to start extraction");
                self.cleanup().await;
                Err(e)
            }
        }
    }

    fn start(&mut self, source: Option<RawSource>) -> Result<ChildStdout, ExtractError> {
        let mut producer_pipes = None;
        if source.is_none() {
            let (handle, pipes) = ProcessHandle::spawn("producer", self.tool.producer(), false)?;
            self.producer = Some(handle);
            producer_pipes = Some(pipes);
        }

        let (transformer, pipes) =
            ProcessHandle::spawn("transformer", self.tool.transformer(), true)?;
        self.transformer = Some(transformer);
        let stdin = pipes.stdin.ok_or(ExtractError::MissingPipe {
            tool: "transformer",
            pipe: "stdin",
        })?;

        let (progress, progress_rx) = watch::channel(TeeProgress::Waiting);
        self.tee_progress = Some(progress_rx.clone());
        let (raw, producer_stderr): (RawSource, _) = match (source, producer_pipes) {
            (Some(source), _) => (source, None),
            (None, Some(pipes)) => (Box::new(pipes.stdout) as RawSource, Some(pipes.stderr)),
            (None, None) => {
                return Err(ExtractError::MissingPipe {
                    tool: "producer",
                    pipe: "stdout",
                })
            }
        };

        self.tasks.spawn(
            ByteTee::new(
                raw,
                stdin,
                self.archive.clone(),
                self.flags.clone(),
                progress,
                self.config.tee_chunk_size,
            )
            .run(),
        );
        self.tasks.spawn(drain_stream(
            pipes.stderr,
            self.transformer_diagnostics.clone(),
            self.config.diagnostic_chunk_size,
            "transformer",
        ));

        if let (Some(stderr), Some(producer)) = (producer_stderr, &self.producer) {
            self.tasks.spawn(drain_stream(
                stderr,
                self.producer_diagnostics.clone(),
                self.config.diagnostic_chunk_size,
                "producer",
            ));
            self.tasks.spawn(watch_producer(
                producer.exit_watch(),
                self.flags.clone(),
                progress_rx,
                self.config.empty_output_grace,
            ));
        }

        Ok(pipes.stdout)
    }
}

impl<T: UnpackerTool> ExtractionSession<T> {
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of process handles the session still owns.
    pub fn live_processes(&self) -> usize {
        usize::from(self.producer.is_some()) + usize::from(self.transformer.is_some())
    }

    /// Number of background tasks the session still tracks.
    pub fn tracked_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the raw feed delivered at least one byte.
    pub fn byte_observed(&self) -> bool {
        self.flags.byte_observed()
    }

    /// Whether the raw feed reached end-of-input, i.e. the archive holds the
    /// complete feed.
    pub fn successfully_extracted(&self) -> bool {
        self.flags.successfully_extracted()
    }

    pub fn archive(&self) -> &CompressedBuffer {
        &self.archive
    }

    pub fn producer_diagnostics(&self) -> &DiagnosticBuffer {
        &self.producer_diagnostics
    }

    pub fn transformer_diagnostics(&self) -> &DiagnosticBuffer {
        &self.transformer_diagnostics
    }

    /// Waits for the tee to consume the whole feed, then (bounded by
    /// `settle_timeout`) for the other helpers and the transformer to finish
    /// after natural end-of-stream, surfacing the first fault.
    ///
    /// The tee is not bounded: the archive must hold the complete feed before
    /// the stream may end.
    async fn settle(&mut self) -> Result<(), ExtractError> {
        if let Some(progress) = self.tee_progress.as_mut() {
            // A closed channel means the tee task already returned.
            let _ = progress
                .wait_for(|state| *state == TeeProgress::Ended)
                .await;
        }

        let limit = self.config.settle_timeout;
        let tasks = &mut self.tasks;
        let joined = tokio::time::timeout(limit, async {
            while let Some(joined) = tasks.join_next().await {
                task_outcome(joined)?;
            }
            Ok::<(), ExtractError>(())
        })
        .await;
        if let Ok(result) = joined {
            result?;
        } else {
            warn!(
                pending = self.tasks.len(),
                "helpers still running after end-of-stream"
            );
            return Err(ExtractError::SettleTimeout {
                waiting_on: "helpers",
                timeout: limit,
            });
        }

        if let Some(transformer) = &self.transformer {
            match transformer.wait_timeout(limit).await {
                Some(status) if !status.success() => {
                    return Err(ExtractError::ToolExit {
                        tool: transformer.tool(),
                        status,
                        diagnostics: self.transformer_diagnostics.text(),
                    });
                }
                Some(_) => {}
                None => {
                    warn!("transformer did not exit after end-of-stream");
                    return Err(ExtractError::SettleTimeout {
                        waiting_on: transformer.tool(),
                        timeout: limit,
                    });
                }
            }
        }
        Ok(())
    }

    /// Cancels every task, kills and reaps every process, and seals the
    /// archive. Safe to call more than once.
    async fn cleanup(&mut self) {
        if self.state == SessionState::CleanedUp {
            return;
        }

        self.tasks.abort_all();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = task_outcome(joined) {
                debug!(error = %e, "helper fault discarded during cleanup");
            }
        }

        let handles: Vec<ProcessHandle> = [self.producer.take(), self.transformer.take()]
            .into_iter()
            .flatten()
            .collect();
        for handle in &handles {
            handle.signal().await;
        }
        for handle in &handles {
            handle.reap().await;
        }

        self.seal_archive();
        self.state = SessionState::CleanedUp;
        debug!("session cleaned up");
    }

    /// Cleanup for a record stream dropped before it finished.
    fn abandon(&mut self) {
        if self.state == SessionState::CleanedUp {
            return;
        }
        // Dropping the set aborts every task.
        drop(std::mem::take(&mut self.tasks));
        for handle in [self.producer.take(), self.transformer.take()]
            .into_iter()
            .flatten()
        {
            handle.abandon();
        }
        self.seal_archive();
        self.state = SessionState::CleanedUp;
        debug!("session abandoned");
    }

    fn seal_archive(&self) {
        if let Err(e) = self.archive.finish() {
            warn!(error = %e, "failed to finalize archive");
        }
    }
}

fn task_outcome(
    joined: Result<Result<(), ExtractError>, JoinError>,
) -> Result<(), ExtractError> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(ExtractError::TaskFailed(e.to_string())),
    }
}

/// Lazy, forward-only stream of [`PackageRecord`]s from one session.
///
/// The session is cleaned up when the stream ends, fails, is closed with
/// [`close`](Self::close), or is dropped early.
pub struct RecordStream<'a, T: UnpackerTool> {
    session: &'a mut ExtractionSession<T>,
    reader: BufReader<ChildStdout>,
    line: Vec<u8>,
    records: usize,
    finished: bool,
}

impl<T: UnpackerTool> RecordStream<'_, T> {
    /// Pulls the next record.
    ///
    /// Returns `None` at end-of-stream. A fault is returned once, after which
    /// the stream yields `None`.
    pub async fn next(&mut self) -> Option<Result<PackageRecord, ExtractError>> {
        if self.finished {
            return None;
        }
        match self.next_record().await {
            Ok(Some(record)) => {
                self.records += 1;
                Some(Ok(record))
            }
            Ok(None) => {
                info!(
                    records = self.records,
                    raw_bytes = self.session.archive.raw_len(),
                    "extraction finished"
                );
                self.finish().await;
                None
            }
            Err(e) => {
                warn!(error = %e, records = self.records, "extraction failed");
                self.finish().await;
                Some(Err(e))
            }
        }
    }

    /// Records yielded so far.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Stops consuming and cleans up the session.
    pub async fn close(mut self) {
        if !self.finished {
            debug!(records = self.records, "record stream closed early");
            self.finish().await;
        }
    }

    async fn finish(&mut self) {
        self.finished = true;
        self.session.cleanup().await;
    }

    async fn next_record(&mut self) -> Result<Option<PackageRecord>, ExtractError> {
        let max_len = self.session.config.max_record_len;
        loop {
            let tasks = &mut self.session.tasks;
            tokio::select! {
                biased;
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    task_outcome(joined)?;
                }
                line = read_line(&mut self.reader, &mut self.line, max_len) => {
                    if !line? {
                        self.session.settle().await?;
                        return Ok(None);
                    }
                    let record = PackageRecord::from_line(&self.line)
                        .map_err(|reason| ExtractError::malformed(&self.line, reason));
                    self.line.clear();
                    return record.map(Some);
                }
            }
        }
    }
}

impl<T: UnpackerTool> Drop for RecordStream<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            self.session.abandon();
        }
    }
}

/// Reads one newline-terminated line into `line`, newline stripped.
///
/// Returns `false` at end-of-stream with nothing buffered. Partial lines stay
/// in `line`, so the read can be cancelled and resumed.
async fn read_line<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    max_len: usize,
) -> Result<bool, ExtractError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await.map_err(ExtractError::RecordRead)?;
        if available.is_empty() {
            return Ok(!line.is_empty());
        }

        let (taken, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => {
                line.extend_from_slice(&available[..i]);
                (i + 1, true)
            }
            None => {
                line.extend_from_slice(available);
                (available.len(), false)
            }
        };
        reader.consume(taken);

        if line.len() > max_len {
            return Err(ExtractError::RecordTooLong { limit: max_len });
        }
        if complete {
            return Ok(true);
        }
    }
}
