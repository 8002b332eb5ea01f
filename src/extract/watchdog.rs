//! Detects a producer that exits without emitting any data.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::extract::error::ExtractError;
use crate::extract::process::ExitWatch;
use crate::extract::tee::{FeedFlags, TeeProgress};

/// Awaits the producer's exit and fails with
/// [`ExtractError::EmptyProducerOutput`] if the tee never saw a byte.
///
/// Returns early once a byte was observed. After the exit, the check waits
/// up to `grace` for the tee to leave [`TeeProgress::Waiting`] so bytes still
/// sitting in the pipe are counted.
pub(crate) async fn watch_producer(
    exit: ExitWatch,
    flags: Arc<FeedFlags>,
    mut progress: watch::Receiver<TeeProgress>,
    grace: Duration,
) -> Result<(), ExtractError> {
    {
        // A closed channel disables the first branch; the exit decides.
        let observed = progress.wait_for(|_| flags.byte_observed());
        tokio::select! {
            biased;
            Ok(_) = observed => {
                debug!("producer output observed");
                return Ok(());
            }
            status = exit.wait() => match status {
                Ok(status) => debug!(%status, "producer exited"),
                Err(e) => warn!(error = %e, "failed to observe producer exit"),
            },
        }
    }

    let settled = progress.wait_for(|state| *state != TeeProgress::Waiting);
    if tokio::time::timeout(grace, settled).await.is_err() {
        debug!(?grace, "producer stdout still open after exit");
    }

    if !flags.byte_observed() {
        warn!("producer exited without writing any bytes");
        return Err(ExtractError::EmptyProducerOutput);
    }
    Ok(())
}
