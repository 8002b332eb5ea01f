//! Shell-script stand-ins for the unpacker executables.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::Command;

use crate::extract::tool::UnpackerTool;

/// Runs each side as `sh -c <script>`.
#[derive(Debug, Clone)]
pub(crate) struct ScriptTool {
    producer: String,
    transformer: String,
    transformer_program: Option<String>,
}

impl ScriptTool {
    pub(crate) fn new(producer: &str, transformer: &str) -> Self {
        Self {
            producer: producer.to_string(),
            transformer: transformer.to_string(),
            transformer_program: None,
        }
    }

    /// Replaces the transformer with a bare program, e.g. a missing binary.
    pub(crate) fn with_transformer_program(mut self, program: &str) -> Self {
        self.transformer_program = Some(program.to_string());
        self
    }
}

fn sh(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    command
}

impl UnpackerTool for ScriptTool {
    fn producer(&self) -> Command {
        sh(&self.producer)
    }

    fn transformer(&self) -> Command {
        match &self.transformer_program {
            Some(program) => Command::new(program),
            None => sh(&self.transformer),
        }
    }
}

/// Yields `prefix` once, then fails every read.
pub(crate) struct FailingReader {
    prefix: Option<Vec<u8>>,
}

impl FailingReader {
    pub(crate) fn new(prefix: &[u8]) -> Self {
        Self {
            prefix: Some(prefix.to_vec()),
        }
    }
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.prefix.take() {
            Some(prefix) => {
                buf.put_slice(&prefix);
                Poll::Ready(Ok(()))
            }
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "feed interrupted",
            ))),
        }
    }
}
