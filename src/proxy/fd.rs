//! Descriptor table: maps descriptor ids to open-file state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::fs::File;

/// Descriptor ids below this are reserved, matching POSIX stdio.
pub const FIRST_FD: u64 = 3;

/// State behind one successful `open()`.
///
/// The file handle is shared behind its own lock so read/write/lseek on
/// different descriptors never contend with each other or with open/close.
#[derive(Clone)]
pub struct OpenDescriptor {
    pub fd: u64,
    pub rel_path: String,
    pub local_path: PathBuf,
    pub is_dir: bool,
    pub writable: bool,
    pub file: Option<Arc<tokio::sync::Mutex<File>>>,
}

#[derive(Default)]
pub struct FdTable {
    map: Mutex<HashMap<u64, OpenDescriptor>>,
}

impl FdTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, desc: OpenDescriptor) {
        self.map.lock().unwrap().insert(desc.fd, desc);
    }

    pub fn get(&self, fd: u64) -> Option<OpenDescriptor> {
        self.map.lock().unwrap().get(&fd).cloned()
    }

    pub fn remove(&self, fd: u64) -> Option<OpenDescriptor> {
        self.map.lock().unwrap().remove(&fd)
    }

    pub fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().unwrap().is_empty()
    }
}
