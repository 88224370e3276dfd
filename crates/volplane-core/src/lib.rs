//! Volplane Core - Volume model and error taxonomy shared by every driver
//!
//! This crate provides:
//! - Volume identity, locator, spec and the persisted `VolumeRecord`
//! - The lifecycle state machine encoded on `VolumeRecord`
//! - Storage pool descriptions used for resize conflict reporting
//! - `VolumeError`, the typed failures every driver and the registry surface

pub mod error;
pub mod pool;
pub mod record;
pub mod types;

// Re-export commonly used types
pub use error::{Result, VolumeError};
pub use pool::{PoolOperationStatus, PoolOperationType, StoragePool, StoragePoolOperation};
pub use record::{VolumeRecord, VolumeState, RECORD_SCHEMA_VERSION};
pub use types::{
    AlertSeverity, CreateOptions, DriverCategory, Labels, SnapId, Volume, VolumeAlert,
    VolumeAlerts, VolumeId, VolumeLocator, VolumeSnap, VolumeSpec, VolumeStats, GIB,
};
