//! Duplicates the raw feed into the archive and the transformer's input.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::extract::buffers::CompressedBuffer;
use crate::extract::error::ExtractError;

/// Where the tee is in the raw feed, published for the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TeeProgress {
    /// No read has completed yet
    Waiting,
    /// At least one byte was read
    Flowing,
    /// The tee stopped, at end-of-input or on a fault
    Ended,
}

/// Flags describing the raw feed, shared by the tee, watchdog and session.
#[derive(Debug, Default)]
pub(crate) struct FeedFlags {
    byte_observed: AtomicBool,
    successfully_extracted: AtomicBool,
}

impl FeedFlags {
    pub(crate) fn byte_observed(&self) -> bool {
        self.byte_observed.load(Ordering::SeqCst)
    }

    pub(crate) fn successfully_extracted(&self) -> bool {
        self.successfully_extracted.load(Ordering::SeqCst)
    }

    /// Records that a byte was read. Returns `true` for the first one.
    pub(crate) fn observe_byte(&self) -> bool {
        !self.byte_observed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn mark_extracted(&self) {
        self.successfully_extracted.store(true, Ordering::SeqCst);
    }
}

/// Copies a raw feed chunk by chunk into a [`CompressedBuffer`] and a
/// forwarding pipe.
///
/// Every chunk reaches the archive before it is forwarded. The next chunk is
/// read only once the pipe accepted the current one, so a slow reader
/// throttles the feed. A broken pipe does not stop archiving: the rest of
/// the feed is still compressed and [`ExtractError::ForwardingFailure`] is
/// returned afterwards.
pub(crate) struct ByteTee<R, W> {
    source: R,
    forward: Option<W>,
    forward_error: Option<io::Error>,
    archive: CompressedBuffer,
    flags: Arc<FeedFlags>,
    progress: watch::Sender<TeeProgress>,
    chunk: Vec<u8>,
}

impl<R, W> ByteTee<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub(crate) fn new(
        source: R,
        forward: W,
        archive: CompressedBuffer,
        flags: Arc<FeedFlags>,
        progress: watch::Sender<TeeProgress>,
        chunk_size: usize,
    ) -> Self {
        Self {
            source,
            forward: Some(forward),
            forward_error: None,
            archive,
            flags,
            progress,
            chunk: vec![0u8; chunk_size.max(1)],
        }
    }

    pub(crate) async fn run(mut self) -> Result<(), ExtractError> {
        let result = self.pump().await;

        // Close the pipe on every path so the transformer sees end-of-stream.
        if let Some(mut sink) = self.forward.take() {
            if let Err(e) = sink.shutdown().await {
                debug!(error = %e, "closing forwarding pipe failed");
            }
        }
        self.progress.send_replace(TeeProgress::Ended);

        result?;
        match self.forward_error.take() {
            Some(e) => Err(ExtractError::ForwardingFailure(e)),
            None => Ok(()),
        }
    }

    async fn pump(&mut self) -> Result<(), ExtractError> {
        let mut forwarded: u64 = 0;
        loop {
            let n = self
                .source
                .read(&mut self.chunk)
                .await
                .map_err(ExtractError::SourceRead)?;

            if n == 0 {
                self.flags.mark_extracted();
                self.archive.finish().map_err(ExtractError::Archive)?;
                debug!(
                    raw_bytes = self.archive.raw_len(),
                    forwarded_bytes = forwarded,
                    "raw feed exhausted"
                );
                return Ok(());
            }

            if self.flags.observe_byte() {
                self.progress.send_replace(TeeProgress::Flowing);
            }

            let chunk = &self.chunk[..n];
            self.archive.append(chunk).map_err(ExtractError::Archive)?;

            if let Some(sink) = self.forward.as_mut() {
                let written = match sink.write_all(chunk).await {
                    Ok(()) => sink.flush().await,
                    Err(e) => Err(e),
                };
                match written {
                    Ok(()) => forwarded += n as u64,
                    Err(e) => {
                        warn!(
                            error = %e,
                            forwarded_bytes = forwarded,
                            "forwarding pipe broke, archiving remaining feed"
                        );
                        self.forward = None;
                        self.forward_error = Some(e);
                    }
                }
            }
        }
    }
}
