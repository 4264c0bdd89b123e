// Library crate for RelayFS: re-export internal modules for reuse by
// integration tests and external bins.

pub mod cache;
pub mod error;
pub mod paths;
pub mod proxy;
pub mod remote;
pub mod server;
pub mod wire;
