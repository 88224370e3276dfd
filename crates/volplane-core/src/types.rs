use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::record::VolumeState;

/// One gibibyte in bytes
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Unordered key/value labels attached to volumes and snapshots
pub type Labels = BTreeMap<String, String>;

/// VolumeId uniquely identifies a volume for its whole lifetime
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeId(String);

impl VolumeId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VolumeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for VolumeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for VolumeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// SnapId identifies a point-in-time derivative of a volume
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapId(String);

impl SnapId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User-facing name plus labels, used for enumeration
///
/// Unlike `VolumeId` the name is not required to be unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeLocator {
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
}

impl VolumeLocator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: Labels::new(),
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Check whether this locator satisfies an enumeration filter
    ///
    /// An empty filter name matches every volume. Every label in the filter
    /// and in `extra_labels` must be present with the same value.
    pub fn matches(&self, filter: &VolumeLocator, extra_labels: &Labels) -> bool {
        if !filter.name.is_empty() && filter.name != self.name {
            return false;
        }

        filter
            .labels
            .iter()
            .chain(extra_labels.iter())
            .all(|(k, v)| self.labels.get(k) == Some(v))
    }
}

/// Backend-agnostic request parameters, immutable once the volume exists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Requested size in bytes
    pub size: u64,
    /// Desired filesystem type (e.g. "ext4"); empty means the backend default
    #[serde(default)]
    pub format: String,
    /// Backend-specific options
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl VolumeSpec {
    pub fn new(size: u64, format: impl Into<String>) -> Self {
        Self {
            size,
            format: format.into(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Per-call creation options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {
    /// Reject the request if a volume with the same locator name exists,
    /// regardless of the driver's uniqueness policy
    #[serde(default)]
    pub fail_if_exists: bool,
}

/// Declared category of a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverCategory {
    /// Block devices that need attach/format before mounting
    Block,
    /// File exports (NFS and friends)
    File,
    /// Object stores exposed as volumes
    ObjectStore,
    /// Clustered storage spanning nodes
    Clustered,
}

impl DriverCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverCategory::Block => "block",
            DriverCategory::File => "file",
            DriverCategory::ObjectStore => "object_store",
            DriverCategory::Clustered => "clustered",
        }
    }
}

impl fmt::Display for DriverCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only projection of a volume returned by inspect/enumerate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    pub locator: VolumeLocator,
    pub spec: VolumeSpec,
    pub state: VolumeState,
    pub formatted: bool,
    pub device: String,
    pub mount_path: Option<PathBuf>,
    /// Name of the driver that owns the volume
    pub driver: String,
    pub created_at: DateTime<Utc>,
}

/// A point-in-time snapshot of a volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSnap {
    pub id: SnapId,
    pub volume_id: VolumeId,
    pub labels: Labels,
    pub created_at: DateTime<Utc>,
}

/// I/O counters reported by a backend
///
/// Counters the backend does not track stay at zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeStats {
    pub reads: u64,
    pub read_ms: u64,
    pub read_bytes: u64,
    pub writes: u64,
    pub write_ms: u64,
    pub write_bytes: u64,
    pub io_progress: u64,
    pub io_ms: u64,
    pub bytes_used: u64,
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Notify,
    Warning,
    Alarm,
}

/// A single backend alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeAlert {
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Alerts raised against a volume; empty when nothing is wrong
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeAlerts {
    pub alerts: Vec<VolumeAlert>,
}
