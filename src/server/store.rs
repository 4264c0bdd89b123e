//! Versioned backing storage.
//!
//! The store is the durability authority: it owns the file bytes under its
//! root, a per-path monotonic version counter, and per-path write locks.
//! Versions are lazily initialized to 1 on the first metadata query and
//! bumped exactly once per committed write-back.
//!
//! A multi-chunk upload is one write transaction: the first chunk of an
//! upload takes the path's lock and the final chunk (or an aborting I/O
//! error) releases it, so two writers to the same path can never interleave
//! chunks. Uploads are keyed by (path, writer id); the writer id is the
//! proxy-side descriptor id, unique per open.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::paths::normalize_rel;
use crate::remote::{FileAttr, RemoteResult, RemoteStorage};

type UploadKey = (String, u64);

pub struct FileStore {
    root: PathBuf,
    versions: StdMutex<HashMap<String, i32>>,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    uploads: Mutex<HashMap<UploadKey, OwnedMutexGuard<()>>>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            versions: StdMutex::new(HashMap::new()),
            locks: StdMutex::new(HashMap::new()),
            uploads: Mutex::new(HashMap::new()),
        }
    }

    fn full_path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Lazily created per-path write lock; the entry is dropped on `remove`.
    fn path_lock(&self, rel: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(rel.to_string())
            .or_default()
            .clone()
    }

    fn rel_of(path: &str) -> io::Result<String> {
        normalize_rel(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path escapes storage root"))
    }

    async fn stat_inner(&self, rel: &str) -> io::Result<FileAttr> {
        let version = *self
            .versions
            .lock()
            .unwrap()
            .entry(rel.to_string())
            .or_insert(1);
        match fs::metadata(self.full_path(rel)).await {
            Ok(md) => Ok(FileAttr {
                exists: true,
                is_dir: md.is_dir(),
                length: md.len(),
                version,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FileAttr {
                exists: false,
                is_dir: false,
                length: 0,
                version,
            }),
            Err(e) => Err(e),
        }
    }

    async fn create_inner(&self, rel: &str) -> io::Result<()> {
        let full = self.full_path(rel);
        if let Some(dir) = full.parent() {
            fs::create_dir_all(dir).await?;
        }
        // Open-with-create keeps existing content, making this idempotent.
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(&full)
            .await?;
        debug!(path = rel, "created backing file");
        Ok(())
    }

    async fn fetch_inner(&self, rel: &str, len: u32, offset: u64) -> io::Result<Vec<u8>> {
        let mut file = fs::File::open(self.full_path(rel)).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    async fn write_chunk_txn(
        &self,
        rel: &str,
        writer: u64,
        data: &[u8],
        offset: u64,
        is_final: bool,
    ) -> io::Result<i32> {
        let key: UploadKey = (rel.to_string(), writer);
        let held = self.uploads.lock().await.contains_key(&key);
        if !held {
            // First chunk of this upload: take the path lock for the whole
            // transaction. Blocks until any other upload to the path commits.
            let guard = self.path_lock(rel).lock_owned().await;
            self.uploads.lock().await.insert(key.clone(), guard);
        }

        let result: io::Result<i32> = async {
            let full = self.full_path(rel);
            if let Some(dir) = full.parent() {
                fs::create_dir_all(dir).await?;
            }
            let mut file = fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&full)
                .await?;
            file.seek(SeekFrom::Start(offset)).await?;
            file.write_all(data).await?;
            file.flush().await?;

            let mut versions = self.versions.lock().unwrap();
            let v = versions.entry(rel.to_string()).or_insert(0);
            if is_final {
                *v += 1;
                debug!(path = rel, version = *v, "write-back committed");
            }
            Ok(*v)
        }
        .await;

        if is_final || result.is_err() {
            self.uploads.lock().await.remove(&key);
        }
        result
    }

    async fn remove_inner(&self, rel: &str) -> io::Result<bool> {
        let lock = self.path_lock(rel);
        let _guard = lock.lock().await;
        self.versions.lock().unwrap().remove(rel);
        self.locks.lock().unwrap().remove(rel);
        match fs::remove_file(self.full_path(rel)).await {
            Ok(()) => {
                debug!(path = rel, "removed backing file");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl RemoteStorage for FileStore {
    async fn metadata(&self, path: &str) -> RemoteResult<FileAttr> {
        let rel = Self::rel_of(path)?;
        Ok(self.stat_inner(&rel).await?)
    }

    async fn create(&self, path: &str) -> RemoteResult<()> {
        let rel = Self::rel_of(path)?;
        Ok(self.create_inner(&rel).await?)
    }

    async fn fetch(&self, path: &str, len: u32, offset: u64) -> RemoteResult<Vec<u8>> {
        let rel = Self::rel_of(path)?;
        Ok(self.fetch_inner(&rel, len, offset).await?)
    }

    async fn write_chunk(
        &self,
        path: &str,
        writer: u64,
        data: &[u8],
        offset: u64,
        is_final: bool,
    ) -> RemoteResult<i32> {
        // Rejections are part of the protocol: report -1 instead of failing
        // the call, and let the proxy abandon the write-back.
        let Some(rel) = normalize_rel(path) else {
            return Ok(-1);
        };
        match self.write_chunk_txn(&rel, writer, data, offset, is_final).await {
            Ok(v) => Ok(v),
            Err(e) => {
                warn!(path = %rel, "write-back chunk failed: {e}");
                Ok(-1)
            }
        }
    }

    async fn remove(&self, path: &str) -> RemoteResult<bool> {
        let rel = Self::rel_of(path)?;
        Ok(self.remove_inner(&rel).await?)
    }
}
