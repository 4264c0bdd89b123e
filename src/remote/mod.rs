//! Remote storage capability.
//!
//! The proxy core consumes only this trait; the concrete transport behind it
//! is interchangeable. `FileStore` implements it in-process for tests and
//! single-process deployments, `TcpRemoteClient` speaks the wire protocol to
//! a remote server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Largest number of bytes moved by a single `fetch` call.
pub const FETCH_CHUNK: u32 = 2_000_000;

/// Upload chunk size used by write-back on close.
pub const UPLOAD_CHUNK: usize = 1_000_000;

/// Metadata snapshot for one remote path.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FileAttr {
    pub exists: bool,
    pub is_dir: bool,
    pub length: u64,
    pub version: i32,
}

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("remote I/O failure: {0}")]
    Io(#[from] io::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("server error: {0}")]
    Server(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Abstract remote-procedure boundary to the storage server.
///
/// `write_chunk` carries the writer's descriptor id so the server can tell
/// concurrent uploads to the same path apart and hold one write transaction
/// per upload. A negative returned version signals a rejected write-back.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    async fn metadata(&self, path: &str) -> RemoteResult<FileAttr>;

    async fn create(&self, path: &str) -> RemoteResult<()>;

    async fn fetch(&self, path: &str, len: u32, offset: u64) -> RemoteResult<Vec<u8>>;

    async fn write_chunk(
        &self,
        path: &str,
        writer: u64,
        data: &[u8],
        offset: u64,
        is_final: bool,
    ) -> RemoteResult<i32>;

    async fn remove(&self, path: &str) -> RemoteResult<bool>;
}
