use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::{Result, VolumeError};
use crate::types::{Volume, VolumeId, VolumeLocator, VolumeSpec};

/// Current on-disk schema of `VolumeRecord`
pub const RECORD_SCHEMA_VERSION: u32 = 1;

/// Lifecycle state derived from a record's flags
///
/// A deleted volume has no record, so there is no `Deleted` state here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeState {
    /// Storage allocated, no device resolvable yet
    Created,
    /// Device resolvable, not mounted
    Attached,
    /// Device mounted at `mount_path`
    Mounted,
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VolumeState::Created => "created",
            VolumeState::Attached => "attached",
            VolumeState::Mounted => "mounted",
        };
        write!(f, "{}", s)
    }
}

/// Persisted lifecycle state of a single volume
///
/// Owned by the driver that created it. Every mutation is written back to
/// the state store before the operation that made it returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub schema_version: u32,
    pub id: VolumeId,
    pub locator: VolumeLocator,
    pub spec: VolumeSpec,
    pub formatted: bool,
    pub attached: bool,
    pub mounted: bool,
    /// Device path or backend handle; empty until attached
    pub device: String,
    /// Mount point; empty unless mounted
    pub mount_path: String,
    pub created_at: DateTime<Utc>,
}

impl VolumeRecord {
    /// Build the initial record for a freshly created volume
    pub fn new(id: VolumeId, locator: VolumeLocator, spec: VolumeSpec) -> Self {
        Self {
            schema_version: RECORD_SCHEMA_VERSION,
            id,
            locator,
            spec,
            formatted: false,
            attached: false,
            mounted: false,
            device: String::new(),
            mount_path: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn state(&self) -> VolumeState {
        if self.mounted {
            VolumeState::Mounted
        } else if self.attached {
            VolumeState::Attached
        } else {
            VolumeState::Created
        }
    }

    /// Record that the backend device is resolvable at `device`
    pub fn mark_attached(&mut self, device: impl Into<String>) -> Result<()> {
        let device = device.into();
        if device.is_empty() {
            return Err(VolumeError::invalid_argument(format!(
                "attach of volume {} reported an empty device",
                self.id
            )));
        }
        if self.mounted && device != self.device {
            return Err(self.transition_error(VolumeState::Attached));
        }
        self.device = device;
        self.attached = true;
        Ok(())
    }

    /// Record that the device is no longer resolvable
    pub fn mark_detached(&mut self) -> Result<()> {
        if self.mounted {
            return Err(self.transition_error(VolumeState::Created));
        }
        self.attached = false;
        self.device.clear();
        Ok(())
    }

    /// Record a successful mount at `path`
    ///
    /// Mounting again at the same path is a no-op; a different path fails.
    pub fn mark_mounted(&mut self, path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(VolumeError::invalid_argument(format!(
                "mount of volume {} requires a target path",
                self.id
            )));
        }
        if !self.attached {
            return Err(self.transition_error(VolumeState::Mounted));
        }
        if self.mounted {
            if self.mount_path == path {
                return Ok(());
            }
            return Err(VolumeError::invalid_state_transition(
                self.id.as_str(),
                format!("mounted at {}", self.mount_path),
                format!("mounted at {}", path),
            ));
        }
        self.mount_path = path.to_string();
        self.mounted = true;
        Ok(())
    }

    /// Record a successful unmount of `path`
    pub fn mark_unmounted(&mut self, path: &str) -> Result<()> {
        if !self.mounted {
            return Err(VolumeError::invalid_state_transition(
                self.id.as_str(),
                self.state().to_string(),
                "unmounted",
            ));
        }
        if !path.is_empty() && path != self.mount_path {
            return Err(VolumeError::invalid_argument(format!(
                "volume {} is mounted at {}, not {}",
                self.id, self.mount_path, path
            )));
        }
        self.mount_path.clear();
        self.mounted = false;
        Ok(())
    }

    /// Fail unless the volume may be deleted
    pub fn ensure_deletable(&self) -> Result<()> {
        if self.mounted {
            return Err(VolumeError::invalid_state_transition(
                self.id.as_str(),
                VolumeState::Mounted.to_string(),
                "deleted",
            ));
        }
        Ok(())
    }

    /// Project the record into the caller-facing view
    pub fn to_volume(&self, driver: &str) -> Volume {
        Volume {
            id: self.id.clone(),
            locator: self.locator.clone(),
            spec: self.spec.clone(),
            state: self.state(),
            formatted: self.formatted,
            device: self.device.clone(),
            mount_path: if self.mounted {
                Some(PathBuf::from(&self.mount_path))
            } else {
                None
            },
            driver: driver.to_string(),
            created_at: self.created_at,
        }
    }

    fn transition_error(&self, to: VolumeState) -> VolumeError {
        VolumeError::invalid_state_transition(
            self.id.as_str(),
            self.state().to_string(),
            to.to_string(),
        )
    }
}
