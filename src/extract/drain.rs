//! Captures a process's diagnostic stream.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::extract::buffers::DiagnosticBuffer;
use crate::extract::error::ExtractError;

/// Copies `stream` into `buffer` until end-of-stream.
///
/// I/O faults are logged and swallowed; diagnostic capture never fails a
/// session. The `Result` return only lets the drain share the session's task
/// set with the other helpers.
pub(crate) async fn drain_stream<R>(
    mut stream: R,
    buffer: DiagnosticBuffer,
    chunk_size: usize,
    label: &'static str,
) -> Result<(), ExtractError>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; chunk_size.max(1)];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buffer.extend(&chunk[..n]),
            Err(e) => {
                debug!(stream = label, error = %e, "diagnostic capture stopped");
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::test_support::FailingReader;
    use std::io;

    #[tokio::test]
    async fn test_drain_captures_stream_in_chunks() {
        let buffer = DiagnosticBuffer::new();
        let text = b"INFO loading toc\nINFO done\n".to_vec();

        drain_stream(io::Cursor::new(text.clone()), buffer.clone(), 4, "test")
            .await
            .unwrap();

        assert_eq!(buffer.to_bytes(), text);
    }

    #[tokio::test]
    async fn test_drain_swallows_read_errors() {
        let buffer = DiagnosticBuffer::new();
        let reader = FailingReader::new(b"partial");

        let result = drain_stream(reader, buffer.clone(), 16, "test").await;

        assert!(result.is_ok());
        assert_eq!(buffer.text(), "partial");
    }
}
