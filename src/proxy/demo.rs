//! Minimal end-to-end walkthrough: create, write, close, reopen, verify,
//! seek, unlink — against whatever `RemoteStorage` it is handed.

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use super::service::{FileProxy, OpenMode, SeekWhence};
use crate::remote::RemoteStorage;

pub async fn round_trip_demo(
    remote: Arc<dyn RemoteStorage>,
    cache_dir: &Path,
    capacity: u64,
) -> Result<(), Box<dyn Error>> {
    let proxy = FileProxy::new(remote, cache_dir, capacity).await?;

    // 1) Create a file and write through a private working copy.
    let fd = proxy.open("demo/hello.txt", OpenMode::Create).await?;
    let payload = b"hello from relayfs";
    proxy.write(fd, payload).await?;
    proxy.close(fd).await?;

    // 2) Reopen and verify close-to-open visibility.
    let fd = proxy.open("demo/hello.txt", OpenMode::Read).await?;
    let back = proxy.read(fd, payload.len()).await?;
    if back != payload {
        return Err("read-back mismatch".into());
    }

    // 3) Seek from the end and re-read the tail.
    let pos = proxy.lseek(fd, 7, SeekWhence::End).await?;
    let tail = proxy.read(fd, 7).await?;
    if tail != b"relayfs" {
        return Err(format!("tail mismatch at {pos}").into());
    }
    proxy.close(fd).await?;

    // 4) Unlink and confirm the file is gone.
    proxy.unlink("demo/hello.txt").await?;
    if proxy.open("demo/hello.txt", OpenMode::Read).await.is_ok() {
        return Err("file survived unlink".into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::store::FileStore;

    #[tokio::test]
    async fn demo_runs_against_in_process_store() {
        let server_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn RemoteStorage> = Arc::new(FileStore::new(server_dir.path()));
        round_trip_demo(store, cache_dir.path(), 1 << 20)
            .await
            .expect("demo should succeed");
    }
}
