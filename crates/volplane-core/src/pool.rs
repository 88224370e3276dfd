use serde::{Deserialize, Serialize};

use crate::error::{Result, VolumeError};
use crate::types::Labels;

/// Kind of long-running operation recorded against a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolOperationType {
    Resize,
    Rebalance,
}

/// Progress of a pool operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolOperationStatus {
    Pending,
    InProgress,
    Successful,
    Failed,
}

impl PoolOperationStatus {
    /// Whether the operation still holds the pool
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PoolOperationStatus::Pending | PoolOperationStatus::InProgress
        )
    }
}

/// The last operation a pool ran, with its operator-facing progress text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePoolOperation {
    pub op_type: PoolOperationType,
    /// Human-readable progress message (e.g. "expanding")
    pub msg: String,
    /// Operation parameters as the operator supplied them (e.g. "+50GiB")
    pub params: String,
    pub status: PoolOperationStatus,
}

/// A backend storage pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePool {
    pub uuid: String,
    #[serde(default)]
    pub labels: Labels,
    pub total_size: u64,
    pub used: u64,
    pub last_operation: Option<StoragePoolOperation>,
}

impl StoragePool {
    pub fn new(uuid: impl Into<String>, total_size: u64) -> Self {
        Self {
            uuid: uuid.into(),
            labels: Labels::new(),
            total_size,
            used: 0,
            last_operation: None,
        }
    }

    /// Whether a resize is pending or running against this pool
    pub fn resize_in_progress(&self) -> bool {
        self.last_operation
            .as_ref()
            .map(|op| op.op_type == PoolOperationType::Resize && op.status.is_active())
            .unwrap_or(false)
    }

    /// Fail with `ResizeInProgress` if another resize holds the pool
    pub fn check_resize_allowed(&self) -> Result<()> {
        if self.resize_in_progress() {
            return Err(VolumeError::resize_in_progress(self.clone()));
        }
        Ok(())
    }

    /// Record the start of a resize, failing if one is already active
    pub fn begin_resize(
        &mut self,
        msg: impl Into<String>,
        params: impl Into<String>,
    ) -> Result<()> {
        self.check_resize_allowed()?;
        self.last_operation = Some(StoragePoolOperation {
            op_type: PoolOperationType::Resize,
            msg: msg.into(),
            params: params.into(),
            status: PoolOperationStatus::InProgress,
        });
        Ok(())
    }

    /// Render the conflict message reported when a second resize is refused
    pub fn resize_conflict_message(&self) -> String {
        let msg = format!("a resize for pool: {} is already in progress.", self.uuid);
        match &self.last_operation {
            Some(op) if op.op_type == PoolOperationType::Resize => {
                format!("{} {} {}", msg, op.msg, op.params)
            }
            _ => msg,
        }
    }
}
