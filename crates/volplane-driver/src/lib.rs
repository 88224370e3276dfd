// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

//! Volplane Driver - Volume driver contract, registry and reference backend
//!
//! This crate provides:
//! - VolumeDriver, the lifecycle contract, plus optional capability traits
//! - DriverRegistry with single-flight initialization and ordered shutdown
//! - Keyed locks, the operation gate and deadlines shared by every backend
//! - The Mounter primitive with system and in-memory implementations
//! - NfsDriver, the reference network-export backend

pub mod command;
pub mod deadline;
pub mod error;
pub mod lock;
pub mod mount;
pub mod nfs;
pub mod params;
pub mod registry;
pub mod traits;

// Re-export primary types
pub use deadline::with_deadline;
pub use error::{RegistryError, Result};
pub use lock::{KeyedGuard, KeyedLock, OperationGate, OperationPermit};
pub use mount::{MockMounter, MountRequest, Mounter, SystemMounter};
pub use nfs::{NfsConfig, NfsDriver, NFS_DRIVER_NAME};
pub use params::DriverParams;
pub use registry::{DriverRegistry, InitFn};
pub use traits::{BlockDriver, SnapshotDriver, StatsDriver, VolumeDriver};
