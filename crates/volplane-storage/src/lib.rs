//! Volplane Storage - Key-value persistence for volume records
//!
//! This crate provides:
//! - KVStore trait for storage abstraction (get/put with TTL/delete)
//! - redb-based and in-memory implementations
//! - Key encoding and the locator-name index
//! - VolumeStateStore, the per-driver namespaced record adapter

pub mod encoding;
pub mod error;
pub mod kv;
pub mod memory;
pub mod redb_backend;
pub mod state;

// Re-export commonly used types
pub use encoding::{IndexKey, KeyEncoder};
pub use error::{Result, StorageError};
pub use kv::{KVStore, Transaction, NO_EXPIRY};
pub use memory::MemoryBackend;
pub use redb_backend::RedbBackend;
pub use state::VolumeStateStore;
