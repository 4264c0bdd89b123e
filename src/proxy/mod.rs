//! Client-side proxy: descriptor table, the file service state machine, and
//! a scripted end-to-end demo.

pub mod demo;
pub mod fd;
pub mod service;

pub use fd::{FdTable, OpenDescriptor};
pub use service::{FileProxy, OpenMode, SeekWhence};
