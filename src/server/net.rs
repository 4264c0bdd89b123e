//! TCP serve loop: one task per connection, one frame per storage call.

use std::io;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use super::store::FileStore;
use crate::remote::RemoteStorage;
use crate::wire::{Request, Response, read_frame, write_frame};

pub async fn serve(listener: TcpListener, store: Arc<FileStore>) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "storage server listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let store = store.clone();
        tokio::spawn(async move {
            debug!(%peer, "client connected");
            if let Err(e) = handle_conn(stream, store).await {
                debug!(%peer, "connection ended: {e}");
            }
        });
    }
}

async fn handle_conn(mut stream: TcpStream, store: Arc<FileStore>) -> io::Result<()> {
    loop {
        let Some(req) = read_frame::<_, Request>(&mut stream).await? else {
            return Ok(());
        };
        let resp = dispatch(&store, req).await;
        write_frame(&mut stream, &resp).await?;
    }
}

async fn dispatch(store: &FileStore, req: Request) -> Response {
    match req {
        Request::Metadata { path } => match store.metadata(&path).await {
            Ok(attr) => Response::Metadata(attr),
            Err(e) => Response::Error(e.to_string()),
        },
        Request::Create { path } => match store.create(&path).await {
            Ok(()) => Response::Created,
            Err(e) => Response::Error(e.to_string()),
        },
        Request::Fetch { path, len, offset } => match store.fetch(&path, len, offset).await {
            Ok(data) => Response::Chunk(data),
            Err(e) => Response::Error(e.to_string()),
        },
        Request::WriteChunk {
            path,
            writer,
            offset,
            is_final,
            data,
        } => match store.write_chunk(&path, writer, &data, offset, is_final).await {
            Ok(version) => Response::Version(version),
            Err(e) => Response::Error(e.to_string()),
        },
        Request::Remove { path } => match store.remove(&path).await {
            Ok(removed) => Response::Removed(removed),
            Err(e) => Response::Error(e.to_string()),
        },
    }
}
