//! Transport layer for client ↔ worker communication.
//!
//! Provides length-prefixed framing and the typed `MessageReader` /
//! `MessageWriter` halves that the session and the client talk through.

pub mod protocol;
pub mod stream;

pub use protocol::{decode, encode, Message};
pub use stream::{framed, MessageReader, MessageWriter};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::ProtocolError;

/// Maximum message size (64 MB). Safety valve against malformed messages.
pub const MAX_MESSAGE_SIZE: u32 = 64 * 1024 * 1024;

/// Write a length-prefixed frame to a writer.
///
/// Format: [4-byte big-endian length][payload bytes]
pub async fn send_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), ProtocolError> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_MESSAGE_SIZE)
        .ok_or_else(|| {
            ProtocolError::malformed(format!(
                "Message exceeds max size: {} > {MAX_MESSAGE_SIZE}",
                payload.len()
            ))
        })?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a length-prefixed frame from a reader.
///
/// Returns `Ok(None)` when the peer closes the stream cleanly between frames.
/// EOF inside a frame is [`ProtocolError::ConnectionLost`]; an oversized
/// length prefix is [`ProtocolError::MalformedMessage`].
pub async fn recv_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::malformed(format!(
            "Message exceeds max size: {len} > {MAX_MESSAGE_SIZE}"
        )));
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_framing() {
        let payload = b"hello world";
        let mut buf = Vec::new();

        send_frame(&mut buf, payload).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let received = recv_frame(&mut cursor).await.unwrap();
        assert_eq!(received.as_deref(), Some(&payload[..]));
    }

    #[tokio::test]
    async fn empty_payload() {
        let mut buf = Vec::new();
        send_frame(&mut buf, b"").await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let received = recv_frame(&mut cursor).await.unwrap();
        assert_eq!(received, Some(Vec::new()));
    }

    #[tokio::test]
    async fn clean_eof_between_frames() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(recv_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_inside_frame_is_connection_lost() {
        let mut bytes = 10u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"abc");
        let mut cursor = std::io::Cursor::new(bytes);
        let err = recv_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionLost(_)));
    }

    #[tokio::test]
    async fn length_prefix_split_across_reads() {
        // The prefix arrives in two pieces; the reader must keep filling it.
        let mut reader = tokio_test::io::Builder::new()
            .read(&[0, 0])
            .read(&[0, 2])
            .read(b"ok")
            .build();
        let received = recv_frame(&mut reader).await.unwrap();
        assert_eq!(received.as_deref(), Some(&b"ok"[..]));
    }

    #[tokio::test]
    async fn oversized_length_is_malformed() {
        let bytes = (MAX_MESSAGE_SIZE + 1).to_be_bytes().to_vec();
        let mut cursor = std::io::Cursor::new(bytes);
        let err = recv_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedMessage(_)));
    }
}
