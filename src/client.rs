//! Client side of the worksheet protocol.
//!
//! `WorksheetClient` assigns increasing request ids, and demultiplexes the
//! response stream by id: records for other requests are kept in a backlog
//! until somebody asks for them.

use std::collections::VecDeque;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::error::ProtocolError;
use crate::transport::{framed, Message, MessageReader, MessageWriter};

/// Everything the server sent back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellOutput {
    pub id: u64,
    /// Concatenated `stdout` payloads.
    pub stdout: String,
    /// Concatenated `stderr` payloads.
    pub stderr: String,
    /// Non-terminal records in arrival order.
    pub records: Vec<Message>,
    /// The closing `done` or `error` record.
    pub terminal: Message,
}

impl CellOutput {
    pub const fn is_done(&self) -> bool {
        matches!(self.terminal, Message::Done { .. })
    }
}

pub struct WorksheetClient<S> {
    reader: MessageReader<ReadHalf<S>>,
    writer: MessageWriter<WriteHalf<S>>,
    next_id: u64,
    backlog: VecDeque<Message>,
}

impl WorksheetClient<TcpStream> {
    /// Connect to a running server.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .context("Failed to connect to worksheet server")?;
        stream.set_nodelay(true).context("Failed to set TCP_NODELAY")?;
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite> WorksheetClient<S> {
    pub fn new(stream: S) -> Self {
        let (reader, writer) = framed(stream);
        Self {
            reader,
            writer,
            next_id: 1,
            backlog: VecDeque::new(),
        }
    }

    /// Send a cell without waiting for its output. Returns the request id.
    pub async fn submit(&mut self, code: &str) -> Result<u64, ProtocolError> {
        let id = self.next_id;
        self.next_id += 1;
        self.send(&Message::ExecuteRequest {
            id,
            code: code.to_string(),
        })
        .await?;
        debug!(id, "Submitted request");
        Ok(id)
    }

    /// Send an arbitrary message. Later `submit` ids stay above any id sent here.
    pub async fn send(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        self.next_id = self.next_id.max(msg.id().saturating_add(1));
        self.writer.send(msg).await
    }

    /// Next record in arrival order, regardless of id.
    pub async fn next_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        if let Some(msg) = self.backlog.pop_front() {
            return Ok(Some(msg));
        }
        self.reader.recv().await
    }

    /// Next record for request `id`. Records for other ids are set aside.
    pub async fn recv_for(&mut self, id: u64) -> Result<Option<Message>, ProtocolError> {
        if let Some(pos) = self.backlog.iter().position(|m| m.id() == id) {
            return Ok(self.backlog.remove(pos));
        }
        loop {
            match self.reader.recv().await? {
                Some(msg) if msg.id() == id => return Ok(Some(msg)),
                Some(other) => self.backlog.push_back(other),
                None => return Ok(None),
            }
        }
    }

    /// Read records for `id` up to and including its terminal record.
    pub async fn collect(&mut self, id: u64) -> Result<CellOutput> {
        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut records = Vec::new();
        loop {
            let Some(msg) = self.recv_for(id).await? else {
                bail!("Connection closed before request {id} finished");
            };
            match &msg {
                Message::Stdout { payload, .. } => stdout.push_str(payload),
                Message::Stderr { payload, .. } => stderr.push_str(payload),
                Message::Done { .. } | Message::Error { .. } => {
                    return Ok(CellOutput {
                        id,
                        stdout,
                        stderr,
                        records,
                        terminal: msg,
                    });
                }
                Message::ExecuteRequest { .. } => {
                    bail!("Server sent an execute_request for id {id}");
                }
            }
            records.push(msg);
        }
    }

    /// Submit a cell and wait for all of its output.
    pub async fn execute(&mut self, code: &str) -> Result<CellOutput> {
        let id = self.submit(code).await?;
        self.collect(id).await
    }
}
