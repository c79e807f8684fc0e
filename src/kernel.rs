//! Interpreter seam for execution sessions.
//!
//! A session owns exactly one [`Kernel`] and never shares it. The kernel keeps
//! the bindings produced by earlier cells, streams output through an
//! [`OutputSender`] while it runs, and checks a [`CancelFlag`] so a dropped
//! connection can stop it.

mod eval;
mod lexer;
mod parser;
mod script;

pub use eval::{Environment, Value};
pub use script::ScriptKernel;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Trait for interpreters that run submitted cells.
#[async_trait]
pub trait Kernel: Send {
    /// Run one cell against the kernel's persistent state.
    ///
    /// Output must be sent through `output` as it is produced. An error
    /// raised by the code is returned as [`ExecutionError`]; the caller
    /// reports it as ordinary stderr text.
    async fn execute(
        &mut self,
        code: &str,
        output: OutputSender,
        cancel: CancelFlag,
    ) -> Result<(), ExecutionError>;
}

/// Output stream a chunk was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Payload of an output chunk.
///
/// Text is already decoded. Bytes are raw program output that the session
/// decodes once, as UTF-8, on its way to the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkData {
    Text(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: Stream,
    pub data: ChunkData,
}

/// Handle a running cell writes its output through.
#[derive(Debug, Clone)]
pub struct OutputSender {
    tx: mpsc::UnboundedSender<OutputChunk>,
}

impl OutputSender {
    pub const fn new(tx: mpsc::UnboundedSender<OutputChunk>) -> Self {
        Self { tx }
    }

    /// Create a sender together with the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutputChunk>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn text(&self, stream: Stream, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.send(stream, ChunkData::Text(text));
        }
    }

    pub fn bytes(&self, stream: Stream, bytes: impl Into<Vec<u8>>) {
        let bytes = bytes.into();
        if !bytes.is_empty() {
            self.send(stream, ChunkData::Bytes(bytes));
        }
    }

    pub fn stdout(&self, text: impl Into<String>) {
        self.text(Stream::Stdout, text);
    }

    pub fn stderr(&self, text: impl Into<String>) {
        self.text(Stream::Stderr, text);
    }

    fn send(&self, stream: Stream, data: ChunkData) {
        // A closed receiver means the session is gone; the cancel flag stops the run.
        let _ = self.tx.send(OutputChunk { stream, data });
    }
}

/// Shared flag asking a running cell to stop.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Python-style exception classes raised by executed code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SyntaxError,
    NameError,
    TypeError,
    ValueError,
    IndexError,
    ZeroDivisionError,
    OverflowError,
    MemoryError,
    KeyboardInterrupt,
    InternalError,
}

impl ErrorKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::SyntaxError => "SyntaxError",
            Self::NameError => "NameError",
            Self::TypeError => "TypeError",
            Self::ValueError => "ValueError",
            Self::IndexError => "IndexError",
            Self::ZeroDivisionError => "ZeroDivisionError",
            Self::OverflowError => "OverflowError",
            Self::MemoryError => "MemoryError",
            Self::KeyboardInterrupt => "KeyboardInterrupt",
            Self::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An error raised by the code under execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Error in lines {}-{}\n{kind}: {message}", .lines.0, .lines.1)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    /// First and last source line of the failing statement.
    pub lines: (usize, usize),
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, lines: (usize, usize)) -> Self {
        Self {
            kind,
            message: message.into(),
            lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_error_renders_like_a_traceback_tail() {
        let err = ExecutionError::new(ErrorKind::NameError, "name 'x' is not defined", (2, 2));
        assert_eq!(
            err.to_string(),
            "Error in lines 2-2\nNameError: name 'x' is not defined"
        );
    }

    #[test]
    fn output_sender_drops_empty_chunks() {
        let (out, mut rx) = OutputSender::channel();
        out.stdout("");
        out.bytes(Stream::Stderr, Vec::new());
        out.stdout("hi\n");
        out.bytes(Stream::Stderr, vec![0xE1]);
        drop(out);

        let mut chunks = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            chunks.push(chunk);
        }
        assert_eq!(
            chunks,
            vec![
                OutputChunk {
                    stream: Stream::Stdout,
                    data: ChunkData::Text("hi\n".into()),
                },
                OutputChunk {
                    stream: Stream::Stderr,
                    data: ChunkData::Bytes(vec![0xE1]),
                },
            ]
        );
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }
}
