//! Protocol-level error types.
//!
//! Execution failures are not protocol errors: they travel to the client as
//! ordinary `stderr` text followed by `done` (see [`crate::kernel::ExecutionError`]).

use thiserror::Error;

/// Errors raised by the message codec and the framed transport.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The bytes on the wire do not form a valid message. The stream is
    /// considered desynchronised and the connection should be closed.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The peer went away, or the socket failed mid-frame.
    #[error("Connection lost: {0}")]
    ConnectionLost(#[from] std::io::Error),
}

impl ProtocolError {
    pub(crate) fn malformed(reason: impl std::fmt::Display) -> Self {
        Self::MalformedMessage(reason.to_string())
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        Self::malformed(e)
    }
}
