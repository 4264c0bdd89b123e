//! Bounded on-disk cache of remote file content.
//!
//! One entry per cached local file: either the canonical read copy of a
//! (path, version) or a writer's private working copy. The index is an
//! ordered map in LRU order; capacity accounting is exact and an entry is
//! only ever removed at reference count zero. All mutation happens inside
//! the proxy's open/close critical section.

use lru::LruCache;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{FsError, FsResult};
use crate::paths;
use crate::remote::{FETCH_CHUNK, RemoteStorage};

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub rel_path: String,
    pub version: i32,
    pub size: u64,
    pub refs: u32,
}

pub struct PathCache {
    root: PathBuf,
    capacity: u64,
    free: u64,
    /// Keyed by local file path; `lru` keeps insertion/touch order for us.
    index: LruCache<PathBuf, CacheEntry>,
}

impl PathCache {
    pub async fn new(root: impl Into<PathBuf>, capacity: u64) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            capacity,
            free: capacity,
            index: LruCache::unbounded(),
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn free_bytes(&self) -> u64 {
        self.free
    }

    pub fn read_path(&self, rel: &str, version: i32) -> PathBuf {
        paths::read_copy_path(&self.root, rel, version)
    }

    pub fn write_path(&self, rel: &str, version: i32, fd: u64) -> PathBuf {
        paths::write_copy_path(&self.root, rel, version, fd)
    }

    pub fn entry(&self, local: &Path) -> Option<&CacheEntry> {
        self.index.peek(local)
    }

    /// Marks the entry as used by one more open descriptor.
    pub fn pin(&mut self, local: &Path) {
        if let Some(e) = self.index.peek_mut(local) {
            e.refs += 1;
        }
    }

    pub fn unpin(&mut self, local: &Path) {
        if let Some(e) = self.index.peek_mut(local) {
            e.refs = e.refs.saturating_sub(1);
        }
    }

    /// Moves the entry to most-recently-used position.
    pub fn touch(&mut self, local: &Path) {
        self.index.get(local);
    }

    fn insert(&mut self, local: PathBuf, entry: CacheEntry) {
        self.free -= entry.size;
        self.index.push(local, entry);
    }

    /// Drops the entry from index and accounting; the file stays on disk.
    pub fn remove_entry(&mut self, local: &Path) -> Option<CacheEntry> {
        let entry = self.index.pop(local)?;
        self.free += entry.size;
        Some(entry)
    }

    /// Frees least-recently-used unreferenced entries until `required` bytes
    /// fit. Entries with live descriptors are skipped, never evicted.
    pub async fn evict(&mut self, required: u64) -> bool {
        if self.free >= required {
            return true;
        }
        // MRU-first iteration order; pop from the back for LRU-first victims.
        let mut candidates: Vec<PathBuf> = self
            .index
            .iter()
            .filter(|(_, e)| e.refs == 0)
            .map(|(k, _)| k.clone())
            .collect();
        while self.free < required {
            let Some(local) = candidates.pop() else {
                break;
            };
            if let Some(entry) = self.index.pop(&local) {
                self.free += entry.size;
                debug!(path = %local.display(), size = entry.size, "evicted cache entry");
                if let Err(e) = fs::remove_file(&local).await {
                    warn!(path = %local.display(), "failed to delete evicted file: {e}");
                }
            }
        }
        self.free >= required
    }

    /// Deletes cached versions of `rel` older than `current` that nothing
    /// references.
    pub async fn invalidate_older(&mut self, rel: &str, current: i32) {
        let stale: Vec<PathBuf> = self
            .index
            .iter()
            .filter(|(_, e)| e.rel_path == rel && e.version < current && e.refs == 0)
            .map(|(k, _)| k.clone())
            .collect();
        for local in stale {
            if let Some(entry) = self.index.pop(&local) {
                self.free += entry.size;
                debug!(path = %local.display(), version = entry.version, "invalidated stale version");
                let _ = fs::remove_file(&local).await;
            }
        }
    }

    /// Guarantees a canonical read copy of `(rel, version)` on disk and in
    /// the index, fetching from the server if absent. The returned entry is
    /// unreferenced; the caller pins it once a handle is open.
    pub async fn ensure_read_entry(
        &mut self,
        remote: &dyn RemoteStorage,
        rel: &str,
        version: i32,
        size: u64,
    ) -> FsResult<PathBuf> {
        let local = self.read_path(rel, version);
        if self.index.contains(&local) {
            return Ok(local);
        }
        if size > self.capacity {
            return Err(FsError::OutOfSpace(size));
        }
        self.invalidate_older(rel, version).await;
        if !self.evict(size).await {
            return Err(FsError::OutOfSpace(size));
        }
        if let Some(dir) = local.parent() {
            fs::create_dir_all(dir).await?;
        }
        self.fetch_into(remote, rel, &local, size).await?;
        debug!(path = rel, version, size, "cached read copy");
        self.insert(
            local.clone(),
            CacheEntry {
                rel_path: rel.to_string(),
                version,
                size,
                refs: 0,
            },
        );
        Ok(local)
    }

    async fn fetch_into(
        &self,
        remote: &dyn RemoteStorage,
        rel: &str,
        local: &Path,
        size: u64,
    ) -> FsResult<()> {
        let mut file = fs::File::create(local).await?;
        let mut offset: u64 = 0;
        while offset < size {
            let want = (size - offset).min(FETCH_CHUNK as u64) as u32;
            let data = match remote.fetch(rel, want, offset).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = rel, "fetch failed: {e}");
                    let _ = fs::remove_file(local).await;
                    return Err(FsError::InvalidArgument);
                }
            };
            if data.is_empty() {
                let _ = fs::remove_file(local).await;
                return Err(FsError::Busy(format!("short fetch of {rel} at {offset}")));
            }
            file.write_all(&data).await?;
            offset += data.len() as u64;
        }
        file.flush().await?;
        Ok(())
    }

    /// Duplicates the current read copy into a private working copy for one
    /// writer, separately accounted so in-flight writes never touch the
    /// last-known-good read bytes.
    pub async fn prepare_write_copy(
        &mut self,
        rel: &str,
        version: i32,
        size: u64,
        fd: u64,
    ) -> FsResult<PathBuf> {
        let read = self.read_path(rel, version);
        let local = self.write_path(rel, version, fd);
        if !self.evict(size).await {
            return Err(FsError::OutOfSpace(size));
        }
        fs::copy(&read, &local).await?;
        self.insert(
            local.clone(),
            CacheEntry {
                rel_path: rel.to_string(),
                version,
                size,
                refs: 0,
            },
        );
        Ok(local)
    }

    /// Backs out a freshly prepared working copy after a failed open.
    pub async fn abort_write_copy(&mut self, local: &Path) {
        if self.remove_entry(local).is_some() {
            let _ = fs::remove_file(local).await;
        }
    }

    /// Installs a committed working file as the canonical read copy of the
    /// new version. Falls back to deleting the working file when the cache
    /// cannot make room; the next open re-fetches from the server.
    pub async fn promote(
        &mut self,
        rel: &str,
        new_version: i32,
        working: &Path,
        size: u64,
    ) -> bool {
        if self.evict(size).await {
            let dest = self.read_path(rel, new_version);
            if let Some(dir) = dest.parent() {
                let _ = fs::create_dir_all(dir).await;
            }
            match fs::rename(working, &dest).await {
                Ok(()) => {
                    debug!(path = rel, version = new_version, "promoted working copy");
                    self.insert(
                        dest,
                        CacheEntry {
                            rel_path: rel.to_string(),
                            version: new_version,
                            size,
                            refs: 0,
                        },
                    );
                    return true;
                }
                Err(e) => warn!(path = rel, "promote rename failed: {e}"),
            }
        } else {
            debug!(path = rel, version = new_version, "no room to cache new version");
        }
        let _ = fs::remove_file(working).await;
        false
    }

    /// Unlink-time cleanup: drops the cached copy of `(rel, version)` only
    /// when nothing references it. A referenced entry is left in place and
    /// not revisited; later invalidate or evict passes collect it.
    pub async fn drop_unreferenced(&mut self, rel: &str, version: i32) {
        let local = self.read_path(rel, version);
        let removable = matches!(self.index.peek(&local), Some(e) if e.refs == 0);
        if removable {
            if let Some(entry) = self.index.pop(&local) {
                self.free += entry.size;
                let _ = fs::remove_file(&local).await;
            }
        }
    }
}
