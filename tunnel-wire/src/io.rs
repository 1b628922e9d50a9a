//! Frame encode/decode over any `tokio` byte stream.
//!
//! Each frame is `tag(1) ++ len(4, big-endian) ++ payload(len bytes of
//! JSON)`. Readers are typed: each expects a specific tag and treats a
//! mismatch as a protocol violation, terminal for the connection.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::frame::{Frame, RequestFrame, ResponseFrame};

const TAG_READY: u8 = 0x00;
const TAG_REQUEST: u8 = 0x01;
const TAG_RESPONSE: u8 = 0x02;

/// Largest payload either side will encode or accept. A length prefix
/// above this is treated as a protocol violation rather than honored,
/// so a malformed or hostile peer can't force an outsized allocation
/// before a single payload byte has been read.
const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected frame tag: expected {expected:#04x}, got {got:#04x}")]
    UnexpectedTag { expected: u8, got: u8 },

    #[error("malformed frame payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}

/// Writes any [`Frame`] variant. Always writes exactly `1 + 4 + len(payload)`
/// bytes and flushes before returning.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let payload = match frame {
        Frame::Ready => Vec::new(),
        Frame::Request(req) => serde_json::to_vec(req)?,
        Frame::Response(resp) => serde_json::to_vec(resp)?,
    };
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge(payload.len()))?;

    writer.write_u8(frame.tag()).await?;
    writer.write_u32(len).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_tagged<R>(reader: &mut R, expected: u8) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let tag = reader.read_u8().await?;
    if tag != expected {
        return Err(FrameError::UnexpectedTag { expected, got: tag });
    }
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_PAYLOAD {
        return Err(FrameError::PayloadTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Reads one frame, requiring it to be tagged `Ready`. No partial state
/// beyond the 5-byte header is consumed if the tag mismatches.
pub async fn read_ready<R>(reader: &mut R) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    read_tagged(reader, TAG_READY).await?;
    Ok(())
}

/// Reads one frame, requiring it to be tagged `Request`.
pub async fn read_request<R>(reader: &mut R) -> Result<RequestFrame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let payload = read_tagged(reader, TAG_REQUEST).await?;
    Ok(serde_json::from_slice(&payload)?)
}

/// Reads one frame, requiring it to be tagged `Response`.
pub async fn read_response<R>(reader: &mut R) -> Result<ResponseFrame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let payload = read_tagged(reader, TAG_RESPONSE).await?;
    Ok(serde_json::from_slice(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::HeaderMap;

    #[tokio::test]
    async fn ready_round_trips() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, &Frame::Ready).await.unwrap();
        read_ready(&mut b).await.unwrap();
    }

    #[tokio::test]
    async fn request_round_trips_bit_for_bit() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let mut headers = HeaderMap::new();
        headers.append("accept", "text/plain");
        headers.append("accept", "application/json");
        let req = RequestFrame {
            id: "req-1".into(),
            method: "GET".into(),
            path: "/api/test".into(),
            headers,
            body: b"hello from local".to_vec(),
        };
        write_frame(&mut a, &Frame::Request(req.clone())).await.unwrap();
        let decoded = read_request(&mut b).await.unwrap();
        assert_eq!(decoded, req);
    }

    #[tokio::test]
    async fn tag_mismatch_is_a_protocol_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, &Frame::Ready).await.unwrap();
        let err = read_request(&mut b).await.unwrap_err();
        assert!(matches!(err, FrameError::UnexpectedTag { expected: TAG_REQUEST, got: TAG_READY }));
    }

    #[tokio::test]
    async fn short_read_is_an_io_error() {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_u8(TAG_RESPONSE).await.unwrap();
        a.write_u32(10).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);
        let mut b = b;
        let err = read_response(&mut b).await.unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected_before_allocating() {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_u8(TAG_REQUEST).await.unwrap();
        a.write_u32(MAX_FRAME_PAYLOAD as u32 + 1).await.unwrap();
        drop(a);
        let mut b = b;
        let err = read_request(&mut b).await.unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge(len) if len == MAX_FRAME_PAYLOAD + 1));
    }
}
