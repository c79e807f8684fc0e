//! Typed message halves over any byte stream.
//!
//! `framed` splits an `AsyncRead + AsyncWrite` stream (a TCP socket in
//! production, an in-memory duplex in tests) into a reader and a writer
//! that exchange whole [`Message`]s.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::trace;

use super::protocol::{decode, encode, Message};
use super::{recv_frame, send_frame};
use crate::error::ProtocolError;

/// Receiving half: one frame in, one decoded message out.
pub struct MessageReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub const fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next message. `Ok(None)` means the peer closed cleanly.
    pub async fn recv(&mut self) -> Result<Option<Message>, ProtocolError> {
        let Some(frame) = recv_frame(&mut self.inner).await? else {
            return Ok(None);
        };
        let msg = decode(&frame)?;
        trace!(tag = msg.tag(), id = msg.id(), "Received message");
        Ok(Some(msg))
    }
}

/// Sending half: one message in, one frame out.
pub struct MessageWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub const fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        let bytes = encode(msg)?;
        send_frame(&mut self.inner, &bytes).await?;
        trace!(tag = msg.tag(), id = msg.id(), "Sent message");
        Ok(())
    }

    /// Close the sending direction. The peer sees a clean end of stream.
    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Split a bidirectional stream into message halves.
pub fn framed<S>(stream: S) -> (MessageReader<ReadHalf<S>>, MessageWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (read, write) = tokio::io::split(stream);
    (MessageReader::new(read), MessageWriter::new(write))
}
