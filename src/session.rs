//! Per-connection execution sessions.
//!
//! A session owns one kernel, so bindings made by one request are visible to
//! the next. Requests run strictly one at a time; anything that arrives while
//! a request is running is queued in arrival order. Output is forwarded while
//! the kernel is still running, and the connection is watched the whole time
//! so a disconnect can cancel the cell.

use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::config::LintConfig;
use crate::encoding::Utf8StreamDecoder;
use crate::error::ProtocolError;
use crate::kernel::{CancelFlag, ChunkData, Kernel, OutputChunk, OutputSender, Stream};
use crate::lint::{LintOutcome, Linter};
use crate::transport::{Message, MessageReader, MessageWriter};

type Inbound = Result<Message, ProtocolError>;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running { request_id: u64 },
    Closed,
}

/// Result of a finished session, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSummary {
    /// Requests that ran to their terminal `done`.
    pub requests_completed: u64,
    /// The connection went away while a request was running.
    pub aborted: bool,
}

/// What the main loop does after handling one message.
enum Flow {
    Continue,
    Disconnected,
}

/// An execution session bound to one connection.
pub struct Session {
    id: u64,
    kernel: Box<dyn Kernel>,
    linter: Linter,
    last_request_id: Option<u64>,
    state: SessionState,
    summary: SessionSummary,
}

impl Session {
    pub fn new(id: u64, kernel: Box<dyn Kernel>, lint: LintConfig) -> Self {
        Self {
            id,
            kernel,
            linter: Linter::new(lint),
            last_request_id: None,
            state: SessionState::Idle,
            summary: SessionSummary::default(),
        }
    }

    pub const fn id(&self) -> u64 {
        self.id
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Serve requests until the peer disconnects.
    ///
    /// End of stream on the read side counts as a disconnect, including a
    /// client that only shut down its write half. If a request is running
    /// at that point its kernel is cancelled, no `done` is sent for it, and
    /// requests queued behind it are dropped unexecuted. A client that wants
    /// every answer must read them all before closing.
    ///
    /// Returns an error if the peer sends a malformed message or the
    /// connection fails mid-frame. The session is `Closed` afterwards in
    /// every case.
    #[instrument(skip_all, fields(session = self.id))]
    pub async fn run<R, W>(
        &mut self,
        reader: MessageReader<R>,
        mut writer: MessageWriter<W>,
    ) -> Result<SessionSummary, ProtocolError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send,
    {
        let (tx, mut inbound) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(read_loop(reader, tx));
        let result = self.serve(&mut inbound, &mut writer).await;
        reader_task.abort();
        self.state = SessionState::Closed;

        match &result {
            Ok(summary) => info!(
                requests = summary.requests_completed,
                aborted = summary.aborted,
                "Session closed"
            ),
            Err(e) => warn!(error = %e, "Session closed with error"),
        }
        result
    }

    async fn serve<W>(
        &mut self,
        inbound: &mut mpsc::UnboundedReceiver<Inbound>,
        writer: &mut MessageWriter<W>,
    ) -> Result<SessionSummary, ProtocolError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut pending = VecDeque::new();
        loop {
            let msg = match pending.pop_front() {
                Some(msg) => msg,
                None => match inbound.recv().await {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => return Err(e),
                    None => break,
                },
            };

            let flow = match msg {
                Message::ExecuteRequest { id, code } => {
                    self.handle_execute(id, &code, inbound, &mut pending, writer)
                        .await?
                }
                other => {
                    let id = other.id();
                    warn!(id, tag = other.tag(), "Rejecting non-request message");
                    writer
                        .send(&Message::Error {
                            id,
                            payload: format!("unexpected '{}' message from client", other.tag()),
                        })
                        .await?;
                    Flow::Continue
                }
            };

            if let Flow::Disconnected = flow {
                self.summary.aborted = true;
                break;
            }
        }
        Ok(self.summary)
    }

    async fn handle_execute<W>(
        &mut self,
        id: u64,
        code: &str,
        inbound: &mut mpsc::UnboundedReceiver<Inbound>,
        pending: &mut VecDeque<Message>,
        writer: &mut MessageWriter<W>,
    ) -> Result<Flow, ProtocolError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        if let Some(last) = self.last_request_id.filter(|last| id <= *last) {
            warn!(id, last, "Rejecting out-of-order request id");
            writer
                .send(&Message::Error {
                    id,
                    payload: format!("request id {id} must be greater than {last}"),
                })
                .await?;
            return Ok(Flow::Continue);
        }
        self.last_request_id = Some(id);
        self.state = SessionState::Running { request_id: id };
        debug!(id, code_len = code.len(), "Running request");

        let LintOutcome { code, findings } = self.linter.check(code);
        for finding in &findings {
            writer
                .send(&Message::Stderr {
                    id,
                    payload: format!("{finding}\n"),
                })
                .await?;
        }

        let (output, mut chunks) = OutputSender::channel();
        let cancel = CancelFlag::new();
        let _guard = CancelOnDrop(cancel.clone());
        let mut decoders = StreamDecoders::default();

        let result = {
            let exec = self.kernel.execute(&code, output, cancel.clone());
            tokio::pin!(exec);
            loop {
                tokio::select! {
                    biased;
                    Some(chunk) = chunks.recv() => {
                        forward_chunk(writer, &mut decoders, id, chunk).await?;
                    }
                    result = &mut exec => break result,
                    msg = inbound.recv() => match msg {
                        Some(Ok(msg)) => pending.push_back(msg),
                        Some(Err(e)) => {
                            cancel.cancel();
                            return Err(e);
                        }
                        None => {
                            info!(id, "Connection lost while running; cancelling");
                            cancel.cancel();
                            return Ok(Flow::Disconnected);
                        }
                    },
                }
            }
        };

        while let Ok(chunk) = chunks.try_recv() {
            forward_chunk(writer, &mut decoders, id, chunk).await?;
        }
        for stream in [Stream::Stdout, Stream::Stderr] {
            let tail = decoders.get(stream).finish();
            send_output(writer, id, stream, tail).await?;
        }

        if let Err(e) = result {
            debug!(id, kind = %e.kind, "Request raised");
            send_output(writer, id, Stream::Stderr, format!("{e}\n")).await?;
        }
        writer.send(&Message::Done { id }).await?;

        self.state = SessionState::Idle;
        self.summary.requests_completed += 1;
        Ok(Flow::Continue)
    }
}

/// Forward decoded frames until the peer closes or sends garbage.
async fn read_loop<R>(mut reader: MessageReader<R>, tx: mpsc::UnboundedSender<Inbound>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match reader.recv().await {
            Ok(Some(msg)) => {
                if tx.send(Ok(msg)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
}

/// Cancels the running cell if the request is abandoned.
struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

#[derive(Default)]
struct StreamDecoders {
    stdout: Utf8StreamDecoder,
    stderr: Utf8StreamDecoder,
}

impl StreamDecoders {
    fn get(&mut self, stream: Stream) -> &mut Utf8StreamDecoder {
        match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        }
    }
}

async fn forward_chunk<W>(
    writer: &mut MessageWriter<W>,
    decoders: &mut StreamDecoders,
    id: u64,
    chunk: OutputChunk,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin + Send,
{
    let decoder = decoders.get(chunk.stream);
    let text = match chunk.data {
        ChunkData::Bytes(bytes) => decoder.push(&bytes),
        ChunkData::Text(text) => {
            // Bytes still waiting for a continuation go out first.
            let mut flushed = decoder.finish();
            flushed.push_str(&text);
            flushed
        }
    };
    send_output(writer, id, chunk.stream, text).await
}

async fn send_output<W>(
    writer: &mut MessageWriter<W>,
    id: u64,
    stream: Stream,
    payload: String,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin + Send,
{
    if payload.is_empty() {
        return Ok(());
    }
    let msg = match stream {
        Stream::Stdout => Message::Stdout { id, payload },
        Stream::Stderr => Message::Stderr { id, payload },
    };
    writer.send(&msg).await
}
