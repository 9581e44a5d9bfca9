//! Length-prefixed chunk framing for the bulk snapshot stream.
//!
//! Wire format: `len:u32 | bytes[len]`, big-endian. A zero length ends the
//! stream, so a real chunk is never empty.
//!
//! Chunks share the transport with control messages. There is no tag to tell
//! them apart; the protocol sequence decides which one comes next.

use crate::error::ReplicationError;
use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum chunk size (64MB) - a corrupted length must not trigger a huge allocation
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Read until `buf` is full or the reader reaches EOF. Returns bytes read.
pub(crate) async fn read_full<R: AsyncRead + Unpin>(
    r: &mut R,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Write one chunk.
pub async fn write_chunk<W: AsyncWrite + Unpin>(w: &mut W, bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Err(ReplicationError::EmptyChunk.into());
    }
    if bytes.len() > MAX_CHUNK_SIZE {
        return Err(ReplicationError::TooLarge {
            what: "chunk",
            size: bytes.len(),
            limit: MAX_CHUNK_SIZE,
        }
        .into());
    }

    w.write_u32(bytes.len() as u32)
        .await
        .context("Failed to write chunk length")?;
    w.write_all(bytes).await.context("Failed to write chunk")?;
    Ok(())
}

/// Write the end-of-stream marker.
pub async fn close_stream<W: AsyncWrite + Unpin>(w: &mut W) -> Result<()> {
    w.write_u32(0)
        .await
        .context("Failed to write end of stream")?;
    Ok(())
}

/// Read a chunk length prefix.
///
/// Returns `None` for the end-of-stream marker. The length is checked
/// against [`MAX_CHUNK_SIZE`] before anything is allocated for the body.
pub async fn read_chunk_len<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<usize>> {
    let mut len_buf = [0u8; 4];
    let got = read_full(r, &mut len_buf)
        .await
        .context("Failed to read chunk length")?;
    if got < len_buf.len() {
        return Err(ReplicationError::TruncatedStream { expected: 4, got }.into());
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Ok(None);
    }
    if len > MAX_CHUNK_SIZE {
        return Err(ReplicationError::TooLarge {
            what: "chunk",
            size: len,
            limit: MAX_CHUNK_SIZE,
        }
        .into());
    }
    Ok(Some(len))
}

/// Read one chunk into `buf`.
///
/// Returns `Some(len)` with `buf` holding exactly the chunk, or `None` once
/// the end-of-stream marker is read. A transport that closes before the
/// marker is a truncated stream.
pub async fn read_chunk<R: AsyncRead + Unpin>(
    r: &mut R,
    buf: &mut Vec<u8>,
) -> Result<Option<usize>> {
    buf.clear();
    let Some(len) = read_chunk_len(r).await? else {
        return Ok(None);
    };

    buf.resize(len, 0);
    let got = read_full(r, buf).await.context("Failed to read chunk")?;
    if got < len {
        return Err(ReplicationError::TruncatedStream { expected: len, got }.into());
    }
    Ok(Some(len))
}
