//! TCP client side of the wire protocol.

use async_trait::async_trait;
use std::io;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Request, Response, read_frame, write_frame};
use crate::remote::{FileAttr, RemoteError, RemoteResult, RemoteStorage};

/// `RemoteStorage` over a persistent TCP connection.
///
/// One in-flight request at a time; the connection is re-established on the
/// next call after a transport failure.
pub struct TcpRemoteClient {
    addr: String,
    conn: Mutex<Option<TcpStream>>,
}

impl TcpRemoteClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn: Mutex::new(None),
        }
    }

    async fn call(&self, req: Request) -> RemoteResult<Response> {
        let mut conn = self.conn.lock().await;
        let mut stream = match conn.take() {
            Some(s) => s,
            None => {
                debug!(addr = %self.addr, "connecting to storage server");
                TcpStream::connect(&self.addr).await?
            }
        };

        write_frame(&mut stream, &req).await?;
        let resp = read_frame::<_, Response>(&mut stream).await?.ok_or_else(|| {
            RemoteError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            ))
        })?;

        // Keep the connection only after a full round trip.
        *conn = Some(stream);
        match resp {
            Response::Error(msg) => Err(RemoteError::Server(msg)),
            other => Ok(other),
        }
    }
}

#[async_trait]
impl RemoteStorage for TcpRemoteClient {
    async fn metadata(&self, path: &str) -> RemoteResult<FileAttr> {
        match self.call(Request::Metadata { path: path.into() }).await? {
            Response::Metadata(attr) => Ok(attr),
            other => Err(RemoteError::Protocol(format!("unexpected reply {other:?}"))),
        }
    }

    async fn create(&self, path: &str) -> RemoteResult<()> {
        match self.call(Request::Create { path: path.into() }).await? {
            Response::Created => Ok(()),
            other => Err(RemoteError::Protocol(format!("unexpected reply {other:?}"))),
        }
    }

    async fn fetch(&self, path: &str, len: u32, offset: u64) -> RemoteResult<Vec<u8>> {
        let req = Request::Fetch {
            path: path.into(),
            len,
            offset,
        };
        match self.call(req).await? {
            Response::Chunk(data) => Ok(data),
            other => Err(RemoteError::Protocol(format!("unexpected reply {other:?}"))),
        }
    }

    async fn write_chunk(
        &self,
        path: &str,
        writer: u64,
        data: &[u8],
        offset: u64,
        is_final: bool,
    ) -> RemoteResult<i32> {
        let req = Request::WriteChunk {
            path: path.into(),
            writer,
            offset,
            is_final,
            data: data.to_vec(),
        };
        match self.call(req).await? {
            Response::Version(v) => Ok(v),
            other => Err(RemoteError::Protocol(format!("unexpected reply {other:?}"))),
        }
    }

    async fn remove(&self, path: &str) -> RemoteResult<bool> {
        match self.call(Request::Remove { path: path.into() }).await? {
            Response::Removed(removed) => Ok(removed),
            other => Err(RemoteError::Protocol(format!("unexpected reply {other:?}"))),
        }
    }
}
