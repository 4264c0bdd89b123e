//! Wire protocol: typed request/response messages serialized with bincode
//! inside u32-length-prefixed frames.
//!
//! The protocol mirrors the `RemoteStorage` capability one call per frame;
//! storage-level write rejection travels as `Version(-1)`, transport and
//! dispatch failures as `Error`.

pub mod client;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::remote::FileAttr;

/// Upper bound on a single frame; comfortably above the largest data chunk.
pub const MAX_FRAME: u32 = 8 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub enum Request {
    Metadata { path: String },
    Create { path: String },
    Fetch { path: String, len: u32, offset: u64 },
    WriteChunk {
        path: String,
        writer: u64,
        offset: u64,
        is_final: bool,
        data: Vec<u8>,
    },
    Remove { path: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    Metadata(FileAttr),
    Created,
    Chunk(Vec<u8>),
    Version(i32),
    Removed(bool),
    Error(String),
}

pub async fn write_frame<W, T>(w: &mut W, msg: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body =
        bincode::serialize(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if body.len() > MAX_FRAME as usize {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }
    w.write_all(&(body.len() as u32).to_be_bytes()).await?;
    w.write_all(&body).await?;
    w.flush().await
}

/// Reads one frame; `Ok(None)` on a clean end of stream.
pub async fn read_frame<R, T>(r: &mut R) -> io::Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame exceeds limit"));
    }
    let mut body = vec![0u8; len as usize];
    r.read_exact(&mut body).await?;
    bincode::deserialize(&body)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
