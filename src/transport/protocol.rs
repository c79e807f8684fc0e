//! Worksheet protocol message types.
//!
//! Every record is a self-describing JSON object tagged by `type` and
//! carrying the correlation `id` of the request it belongs to.
//! Messages are framed as: [4-byte BE length][JSON payload]

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A single protocol record, in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Client → worker: run `code` in the session.
    ExecuteRequest { id: u64, code: String },
    /// A chunk of standard output produced while running request `id`.
    Stdout { id: u64, payload: String },
    /// A chunk of standard error (lint findings, tracebacks, program output).
    Stderr { id: u64, payload: String },
    /// Terminal record: request `id` has finished.
    #[serde(alias = "blank")]
    Done { id: u64 },
    /// Terminal record: request `id` was rejected by the worker.
    Error { id: u64, payload: String },
}

impl Message {
    /// Correlation id this record belongs to.
    pub const fn id(&self) -> u64 {
        match self {
            Self::ExecuteRequest { id, .. }
            | Self::Stdout { id, .. }
            | Self::Stderr { id, .. }
            | Self::Done { id }
            | Self::Error { id, .. } => *id,
        }
    }

    /// Whether this record closes the response stream for its id.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Wire tag, as it appears in the `type` field.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::ExecuteRequest { .. } => "execute_request",
            Self::Stdout { .. } => "stdout",
            Self::Stderr { .. } => "stderr",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

/// Serialize a message to its JSON wire form (UTF-8).
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(message)?)
}

/// Parse a message from its wire form.
///
/// This is the only place where transport bytes become text. Invalid UTF-8,
/// invalid JSON, an unknown `type` or a missing field all yield
/// [`ProtocolError::MalformedMessage`].
pub fn decode(bytes: &[u8]) -> Result<Message, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}
