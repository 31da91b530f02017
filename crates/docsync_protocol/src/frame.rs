//! Length-prefixed framing.
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes.

use crate::error::{ProtocolError, ProtocolResult};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default upper bound on a single frame (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Reads one frame.
///
/// Returns `Ok(None)` if the stream ends cleanly before a new frame.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> ProtocolResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_len {
        return Err(ProtocolError::FrameTooLarge { len, max: max_len });
    }

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

/// Writes one frame and flushes.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8], max_len: usize) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    if frame.len() > max_len || frame.len() > u32::MAX as usize {
        return Err(ProtocolError::FrameTooLarge {
            len: frame.len(),
            max: max_len,
        });
    }
    writer.write_all(&(frame.len() as u32).to_be_bytes()).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}
