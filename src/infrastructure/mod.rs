//! Adapters for the domain ports: projection stores and the local directory
//! backend.

pub mod in_memory;
pub mod local;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
