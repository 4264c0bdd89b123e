//! End-to-end tests: proxies talking to a live storage server over TCP.

use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;

use relayfs::error::FsError;
use relayfs::proxy::service::{FileProxy, OpenMode};
use relayfs::remote::{RemoteStorage, RemoteResult, FileAttr};
use relayfs::server::net;
use relayfs::server::store::FileStore;
use relayfs::wire::client::TcpRemoteClient;

async fn spawn_server() -> (TempDir, SocketAddr) {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(root.path()));
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(net::serve(listener, store));
    (root, addr)
}

async fn proxy_at(addr: SocketAddr, capacity: u64) -> (TempDir, Arc<FileProxy>) {
    let cache = tempfile::tempdir().unwrap();
    let remote: Arc<dyn RemoteStorage> = Arc::new(TcpRemoteClient::new(addr.to_string()));
    let proxy = FileProxy::new(remote, cache.path(), capacity).await.unwrap();
    (cache, Arc::new(proxy))
}

async fn write_file(proxy: &FileProxy, path: &str, data: &[u8]) {
    let fd = proxy.open(path, OpenMode::Create).await.unwrap();
    proxy.write(fd, data).await.unwrap();
    proxy.close(fd).await.unwrap();
}

async fn read_file(proxy: &FileProxy, path: &str, len: usize) -> Vec<u8> {
    let fd = proxy.open(path, OpenMode::Read).await.unwrap();
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        let chunk = proxy.read(fd, len - out.len()).await.unwrap();
        if chunk.is_empty() {
            break;
        }
        out.extend_from_slice(&chunk);
    }
    proxy.close(fd).await.unwrap();
    out
}

fn metadata_client(addr: SocketAddr) -> TcpRemoteClient {
    TcpRemoteClient::new(addr.to_string())
}

async fn stat(client: &TcpRemoteClient, path: &str) -> RemoteResult<FileAttr> {
    client.metadata(path).await
}

#[tokio::test]
async fn versions_increment_per_write_back_and_stay_independent() {
    let (_root, addr) = spawn_server().await;
    let (_c, proxy) = proxy_at(addr, 1 << 20).await;
    let client = metadata_client(addr);

    write_file(&proxy, "a.txt", b"one").await;
    assert_eq!(stat(&client, "a.txt").await.unwrap().version, 2);

    write_file(&proxy, "a.txt", b"two").await;
    assert_eq!(stat(&client, "a.txt").await.unwrap().version, 3);

    write_file(&proxy, "b.txt", b"other").await;
    assert_eq!(stat(&client, "b.txt").await.unwrap().version, 2);
    assert_eq!(stat(&client, "a.txt").await.unwrap().version, 3);
}

#[tokio::test]
async fn close_to_open_consistency_across_proxies() {
    let (_root, addr) = spawn_server().await;
    let (_c1, writer) = proxy_at(addr, 1 << 20).await;
    let (_c2, reader) = proxy_at(addr, 1 << 20).await;

    write_file(&writer, "shared.txt", b"first draft").await;
    assert_eq!(read_file(&reader, "shared.txt", 11).await, b"first draft");

    // The reader has the old version cached; a committed rewrite must be
    // visible on its next open.
    let fd = writer.open("shared.txt", OpenMode::Write).await.unwrap();
    writer.write(fd, b"final draft").await.unwrap();
    writer.close(fd).await.unwrap();

    assert_eq!(read_file(&reader, "shared.txt", 11).await, b"final draft");
}

#[tokio::test]
async fn eviction_under_pressure_respects_references() {
    let (_root, addr) = spawn_server().await;
    let (_ca, a) = proxy_at(addr, 10).await;
    let (_cb, b) = proxy_at(addr, 1 << 20).await;

    // Fill proxy A's cache with the freshly promoted X (8 of 10 bytes).
    write_file(&a, "x.bin", b"xxxxxxxx").await;
    // Y exists remotely but is not cached at A.
    write_file(&b, "y.bin", b"yyyyyyyy").await;

    // Opening Y evicts the unreferenced X and succeeds.
    assert_eq!(read_file(&a, "y.bin", 8).await, b"yyyyyyyy");

    // Re-cache X and keep it referenced: now Y cannot fit.
    let held = a.open("x.bin", OpenMode::Read).await.unwrap();
    let err = a.open("y.bin", OpenMode::Read).await.unwrap_err();
    assert!(matches!(err, FsError::OutOfSpace(_)));

    // Dropping the reference unblocks the same sequence.
    a.close(held).await.unwrap();
    assert_eq!(read_file(&a, "y.bin", 8).await, b"yyyyyyyy");
}

#[tokio::test]
async fn chunked_transfers_survive_round_trip() {
    let (_root, addr) = spawn_server().await;
    let (_c1, writer) = proxy_at(addr, 8 << 20).await;
    let (_c2, reader) = proxy_at(addr, 8 << 20).await;

    // Crosses both the upload chunk (1 MB) and fetch chunk (2 MB) bounds.
    let len = 2_500_000usize;
    let mut data = vec![0u8; len];
    for (i, byte) in data.iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }

    write_file(&writer, "big/blob.bin", &data).await;
    let back = read_file(&reader, "big/blob.bin", len).await;
    assert_eq!(back.len(), len);
    assert_eq!(back, data);
}

#[tokio::test]
async fn writers_to_different_paths_do_not_block_each_other() {
    let (_root, addr) = spawn_server().await;
    let (_c1, p1) = proxy_at(addr, 1 << 20).await;
    let (_c2, p2) = proxy_at(addr, 1 << 20).await;

    let t1 = {
        let p1 = p1.clone();
        tokio::spawn(async move { write_file(&p1, "left.txt", b"left").await })
    };
    let t2 = {
        let p2 = p2.clone();
        tokio::spawn(async move { write_file(&p2, "right.txt", b"right").await })
    };
    t1.await.unwrap();
    t2.await.unwrap();

    assert_eq!(read_file(&p1, "right.txt", 5).await, b"right");
    assert_eq!(read_file(&p2, "left.txt", 4).await, b"left");
}

#[tokio::test]
async fn unlink_is_visible_to_other_proxies() {
    let (_root, addr) = spawn_server().await;
    let (_c1, p1) = proxy_at(addr, 1 << 20).await;
    let (_c2, p2) = proxy_at(addr, 1 << 20).await;

    write_file(&p1, "gone.txt", b"bye").await;
    assert_eq!(read_file(&p2, "gone.txt", 3).await, b"bye");

    p2.unlink("gone.txt").await.unwrap();
    assert!(matches!(
        p1.open("gone.txt", OpenMode::Read).await.unwrap_err(),
        FsError::NotFound(_)
    ));
}
