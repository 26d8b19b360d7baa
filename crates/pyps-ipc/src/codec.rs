//! Length-prefixed framing shared by client and server.

use crate::IpcError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame body size (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Read one frame body; `None` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, IpcError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(IpcError::MessageTooLarge);
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// Encode `message` and write it as one frame.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = crate::encode(message)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(IpcError::MessageTooLarge);
    }

    writer.write_all(&(body.len() as u32).to_le_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Decode a frame body: MessagePack first, JSON as a fallback.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, IpcError> {
    match rmp_serde::from_slice(body) {
        Ok(message) => Ok(message),
        Err(e) => serde_json::from_slice(body).map_err(|_| IpcError::Deserialize(e)),
    }
}
