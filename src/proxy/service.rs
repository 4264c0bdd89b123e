//! Proxy file service: the open/close/unlink state machine.
//!
//! `open` resolves remote metadata into a cached local copy and hands out a
//! descriptor; `read`/`write`/`lseek` run against the descriptor's private
//! handle; `close` of a writer uploads the working copy in chunks and
//! promotes it into the cache as the new version. Open, close, and unlink
//! serialize on the cache lock; descriptor I/O proceeds independently.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::fd::{FIRST_FD, FdTable, OpenDescriptor};
use crate::cache::PathCache;
use crate::error::{FsError, FsResult};
use crate::paths::normalize_rel;
use crate::remote::{RemoteStorage, UPLOAD_CHUNK};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    Create,
    CreateExclusive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekWhence {
    Start,
    Current,
    End,
}

pub struct FileProxy {
    remote: Arc<dyn RemoteStorage>,
    cache: Mutex<PathCache>,
    fds: FdTable,
    next_fd: AtomicU64,
}

impl FileProxy {
    pub async fn new(
        remote: Arc<dyn RemoteStorage>,
        cache_root: impl Into<PathBuf>,
        capacity: u64,
    ) -> std::io::Result<Self> {
        Ok(Self {
            remote,
            cache: Mutex::new(PathCache::new(cache_root, capacity).await?),
            fds: FdTable::new(),
            next_fd: AtomicU64::new(FIRST_FD),
        })
    }

    pub async fn open(&self, path: &str, mode: OpenMode) -> FsResult<u64> {
        if path.is_empty() {
            return Err(FsError::InvalidArgument);
        }
        let rel = normalize_rel(path).ok_or_else(|| FsError::PermissionDenied(path.to_string()))?;
        let mut cache = self.cache.lock().await;

        let attr = match self.remote.metadata(path).await {
            Ok(attr) => attr,
            Err(e) => {
                warn!(path, "metadata query failed: {e}");
                return Err(FsError::InvalidArgument);
            }
        };
        let writable = mode != OpenMode::Read;

        if attr.is_dir && writable {
            return Err(FsError::IsDirectory(path.to_string()));
        }

        let mut size = attr.length;
        if !attr.is_dir {
            if attr.exists {
                if mode == OpenMode::CreateExclusive {
                    return Err(FsError::AlreadyExists(path.to_string()));
                }
            } else {
                match mode {
                    OpenMode::Read | OpenMode::Write => {
                        return Err(FsError::NotFound(path.to_string()));
                    }
                    OpenMode::Create | OpenMode::CreateExclusive => {
                        self.remote
                            .create(path)
                            .await
                            .map_err(|e| FsError::Busy(e.to_string()))?;
                        size = 0;
                    }
                }
            }
        }

        let fd = self.next_fd.fetch_add(1, Ordering::SeqCst);

        if attr.is_dir {
            let local = cache.read_path(&rel, attr.version);
            drop(cache);
            self.fds.insert(OpenDescriptor {
                fd,
                rel_path: rel,
                local_path: local,
                is_dir: true,
                writable: false,
                file: None,
            });
            debug!(path, fd, "opened directory");
            return Ok(fd);
        }

        cache
            .ensure_read_entry(self.remote.as_ref(), &rel, attr.version, size)
            .await?;
        let local = if writable {
            cache.prepare_write_copy(&rel, attr.version, size, fd).await?
        } else {
            cache.read_path(&rel, attr.version)
        };

        let file = match tokio::fs::OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&local)
            .await
        {
            Ok(file) => file,
            Err(e) => {
                warn!(path, "failed to open local copy: {e}");
                if writable {
                    cache.abort_write_copy(&local).await;
                }
                return Err(FsError::NotFound(path.to_string()));
            }
        };
        cache.pin(&local);
        drop(cache);

        self.fds.insert(OpenDescriptor {
            fd,
            rel_path: rel,
            local_path: local,
            is_dir: false,
            writable,
            file: Some(Arc::new(Mutex::new(file))),
        });
        debug!(path, fd, version = attr.version, writable, "opened file");
        Ok(fd)
    }

    pub async fn close(&self, fd: u64) -> FsResult<()> {
        let desc = self.fds.get(fd).ok_or(FsError::BadDescriptor(fd))?;
        if desc.is_dir {
            self.fds.remove(fd);
            return Ok(());
        }

        let mut cache = self.cache.lock().await;
        if desc.writable {
            // Any failure here leaves the descriptor alive so the caller can
            // retry the whole close.
            let (new_version, size) = self.upload_working_copy(&desc).await?;
            cache.unpin(&desc.local_path);
            cache.remove_entry(&desc.local_path);
            cache.invalidate_older(&desc.rel_path, new_version).await;
            cache
                .promote(&desc.rel_path, new_version, &desc.local_path, size)
                .await;
            debug!(fd, path = %desc.rel_path, version = new_version, "writer closed");
        } else {
            cache.touch(&desc.local_path);
            cache.unpin(&desc.local_path);
        }
        drop(cache);

        self.fds.remove(fd);
        Ok(())
    }

    /// Pushes the working copy to the server in bounded chunks; the final
    /// chunk commits and yields the new version.
    async fn upload_working_copy(&self, desc: &OpenDescriptor) -> FsResult<(i32, u64)> {
        let Some(handle) = desc.file.clone() else {
            return Err(FsError::BadDescriptor(desc.fd));
        };
        let mut file = handle.lock().await;
        let size = file.metadata().await?.len();
        file.seek(SeekFrom::Start(0)).await?;

        let mut offset: u64 = 0;
        loop {
            let take = ((size - offset) as usize).min(UPLOAD_CHUNK);
            let mut buf = vec![0u8; take];
            file.read_exact(&mut buf).await?;
            let is_final = offset + take as u64 >= size;
            let version = self
                .remote
                .write_chunk(&desc.rel_path, desc.fd, &buf, offset, is_final)
                .await
                .map_err(|e| FsError::Busy(e.to_string()))?;
            if version < 0 {
                return Err(FsError::WriteRejected(desc.rel_path.clone()));
            }
            offset += take as u64;
            if is_final {
                return Ok((version, size));
            }
        }
    }

    pub async fn read(&self, fd: u64, len: usize) -> FsResult<Vec<u8>> {
        let desc = self.fds.get(fd).ok_or(FsError::BadDescriptor(fd))?;
        if desc.is_dir {
            return Err(FsError::IsDirectory(desc.rel_path));
        }
        let Some(handle) = desc.file else {
            return Err(FsError::BadDescriptor(fd));
        };
        let mut file = handle.lock().await;
        let mut buf = vec![0u8; len];
        let n = file.read(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    pub async fn write(&self, fd: u64, data: &[u8]) -> FsResult<usize> {
        let desc = self.fds.get(fd).ok_or(FsError::BadDescriptor(fd))?;
        if desc.is_dir {
            return Err(FsError::IsDirectory(desc.rel_path));
        }
        if !desc.writable {
            return Err(FsError::BadDescriptor(fd));
        }
        let Some(handle) = desc.file else {
            return Err(FsError::BadDescriptor(fd));
        };
        let mut file = handle.lock().await;
        file.write_all(data).await?;
        Ok(data.len())
    }

    pub async fn lseek(&self, fd: u64, offset: i64, whence: SeekWhence) -> FsResult<u64> {
        let desc = self.fds.get(fd).ok_or(FsError::BadDescriptor(fd))?;
        if desc.is_dir {
            return Err(FsError::IsDirectory(desc.rel_path));
        }
        let Some(handle) = desc.file else {
            return Err(FsError::BadDescriptor(fd));
        };
        let mut file = handle.lock().await;
        let target = match whence {
            SeekWhence::Start => offset,
            SeekWhence::Current => file.stream_position().await? as i64 + offset,
            // Seeking from the end lands at `length - offset`.
            SeekWhence::End => file.metadata().await?.len() as i64 - offset,
        };
        if target < 0 {
            return Err(FsError::Busy(format!("seek to negative position {target}")));
        }
        file.seek(SeekFrom::Start(target as u64)).await?;
        Ok(target as u64)
    }

    pub async fn unlink(&self, path: &str) -> FsResult<()> {
        if path.is_empty() {
            return Err(FsError::InvalidArgument);
        }
        let rel = normalize_rel(path).ok_or_else(|| FsError::PermissionDenied(path.to_string()))?;

        let mut cache = self.cache.lock().await;
        let attr = self
            .remote
            .metadata(path)
            .await
            .map_err(|_| FsError::InvalidArgument)?;
        if attr.is_dir {
            return Err(FsError::IsDirectory(path.to_string()));
        }
        // Drop the cached copy now if nothing holds it; a referenced copy is
        // left behind and collected by later invalidate or evict passes.
        cache.drop_unreferenced(&rel, attr.version).await;
        drop(cache);

        match self.remote.remove(path).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(FsError::NotFound(path.to_string())),
            Err(e) => {
                warn!(path, "remote remove failed: {e}");
                Err(FsError::NotFound(path.to_string()))
            }
        }
    }

    pub fn open_descriptors(&self) -> usize {
        self.fds.len()
    }
}
