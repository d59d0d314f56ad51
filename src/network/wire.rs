//! Length-prefixed framing for [`WireMessage`] over an async byte stream.
//!
//! Frame format: `[4-byte length (u32 big-endian)][encoded WireMessage]`.
//! Maximum frame size is `MAX_BLOCK_BYTES + 4 + 1`, generous enough for
//! a `BlockResponse` carrying the largest allowed block plus its own framing
//! overhead.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::MAX_BLOCK_BYTES;
use crate::error::CoreError;
use crate::network::message::WireMessage;

pub const MAX_FRAME_SIZE: u32 = (MAX_BLOCK_BYTES + 4 + 1) as u32;

/// Encode a message and write it as a length-prefixed frame.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &WireMessage,
) -> Result<(), CoreError> {
    let payload = message.encode();
    let len = payload.len() as u32;
    if len > MAX_FRAME_SIZE {
        return Err(CoreError::Codec(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("message too large: {len} bytes (max {MAX_FRAME_SIZE})"),
        )));
    }

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Pre-encode a message into a length-prefixed frame, for fan-out broadcast
/// where the same bytes go to many peers.
pub fn serialize_frame(message: &WireMessage) -> Result<Vec<u8>, CoreError> {
    let payload = message.encode();
    let len = payload.len() as u32;
    if len > MAX_FRAME_SIZE {
        return Err(CoreError::Codec(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("message too large: {len} bytes (max {MAX_FRAME_SIZE})"),
        )));
    }
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Read a length-prefixed frame and decode it. Returns `Ok(None)` on clean
/// EOF (the peer closed the connection).
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<WireMessage>, CoreError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(CoreError::Codec(e)),
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(CoreError::Codec(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes (max {MAX_FRAME_SIZE})"),
        )));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;

    let message = WireMessage::decode(&payload)?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_message_through_the_frame() {
        let msg = WireMessage::StatusResponse {
            height: 100,
            base: 1,
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &msg).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_message(&mut cursor).await.unwrap().unwrap();
        assert_eq!(result, msg);
    }

    #[tokio::test]
    async fn eof_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let result = read_message(&mut cursor).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let len = (MAX_FRAME_SIZE + 1).to_be_bytes();
        let mut cursor = std::io::Cursor::new(len.to_vec());
        let result = read_message(&mut cursor).await;
        assert!(result.is_err());
    }
}
