// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire format encoding/decoding.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload.
//! The same framing serves socket traffic (async) and the init pipe
//! between the node-agent and a just-forked step-agent (sync, because
//! the step-agent reads its bootstrap data before any runtime exists).

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Protocol errors
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,
}

/// Maximum message size (64 MB: file-broadcast blocks are the largest
/// payloads that legitimately cross this protocol).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Default socket timeout for a single request or reply.
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Encode a message to JSON bytes (without length prefix).
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, WireError> {
    let json = serde_json::to_vec(msg)?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(WireError::MessageTooLarge {
            size: json.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(json)
}

/// Decode a message from its JSON payload.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Read a length-prefixed message from an async reader.
pub async fn read_message<R: tokio::io::AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Vec<u8>, WireError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(WireError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write a length-prefixed message to an async writer.
pub async fn write_message<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), WireError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(WireError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    writer.write_all(&(data.len() as u32).to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and decode a frame with a timeout.
pub async fn read_frame<T, R>(reader: &mut R, timeout: std::time::Duration) -> Result<T, WireError>
where
    T: DeserializeOwned,
    R: tokio::io::AsyncReadExt + Unpin,
{
    let bytes = tokio::time::timeout(timeout, read_message(reader))
        .await
        .map_err(|_| WireError::Timeout)??;
    decode(&bytes)
}

/// Encode and write a frame with a timeout.
pub async fn write_frame<T, W>(
    writer: &mut W,
    msg: &T,
    timeout: std::time::Duration,
) -> Result<(), WireError>
where
    T: Serialize,
    W: tokio::io::AsyncWriteExt + Unpin,
{
    let data = encode(msg)?;
    tokio::time::timeout(timeout, write_message(writer, &data))
        .await
        .map_err(|_| WireError::Timeout)?
}

/// Read and decode a frame from a blocking reader (init-pipe side).
pub fn read_frame_sync<T, R>(reader: &mut R) -> Result<T, WireError>
where
    T: DeserializeOwned,
    R: std::io::Read,
{
    use std::io::Read;
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(WireError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }
    let mut buf = vec![0u8; len];
    Read::read_exact(reader, &mut buf)?;
    decode(&buf)
}

/// Encode and write a frame to a blocking writer (init-pipe side).
pub fn write_frame_sync<T, W>(writer: &mut W, msg: &T) -> Result<(), WireError>
where
    T: Serialize,
    W: std::io::Write,
{
    let data = encode(msg)?;
    writer.write_all(&(data.len() as u32).to_be_bytes())?;
    writer.write_all(&data)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
