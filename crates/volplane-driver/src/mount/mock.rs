use crate::mount::{MountRequest, Mounter};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use volplane_core::{Result, VolumeError};

/// In-memory mounter for testing without root
///
/// Tracks active mounts by target path so tests can assert what was bound
/// where. `fail_next_mount` and `fail_next_unmount` inject one OS failure.
#[derive(Clone, Default)]
pub struct MockMounter {
    mounts: Arc<RwLock<BTreeMap<String, MountRequest>>>,
    fail_mount: Arc<RwLock<Option<String>>>,
    fail_unmount: Arc<RwLock<Option<String>>>,
}

impl MockMounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `mount` call fail with `message`
    pub async fn fail_next_mount(&self, message: impl Into<String>) {
        *self.fail_mount.write().await = Some(message.into());
    }

    /// Make the next `unmount` call fail with `message`
    pub async fn fail_next_unmount(&self, message: impl Into<String>) {
        *self.fail_unmount.write().await = Some(message.into());
    }

    /// The request currently mounted at `target`
    pub async fn mounted_at(&self, target: &str) -> Option<MountRequest> {
        self.mounts.read().await.get(target).cloned()
    }

    pub async fn mount_count(&self) -> usize {
        self.mounts.read().await.len()
    }
}

#[async_trait]
impl Mounter for MockMounter {
    async fn mount(&self, request: &MountRequest) -> Result<()> {
        if let Some(message) = self.fail_mount.write().await.take() {
            return Err(VolumeError::io_failure(
                format!("mount {} failed: {}", request.target, message),
                None,
            ));
        }

        let mut mounts = self.mounts.write().await;
        if mounts.contains_key(&request.target) {
            return Err(VolumeError::io_failure(
                format!("mount {} failed: target is busy", request.target),
                None,
            ));
        }
        mounts.insert(request.target.clone(), request.clone());
        debug!("Mock: mounted {} at {}", request.source, request.target);
        Ok(())
    }

    async fn unmount(&self, target: &str) -> Result<()> {
        if let Some(message) = self.fail_unmount.write().await.take() {
            return Err(VolumeError::io_failure(
                format!("umount {} failed: {}", target, message),
                None,
            ));
        }

        if self.mounts.write().await.remove(target).is_none() {
            return Err(VolumeError::io_failure(
                format!("umount {} failed: not mounted", target),
                None,
            ));
        }
        debug!("Mock: unmounted {}", target);
        Ok(())
    }

    async fn is_mounted(&self, target: &str) -> Result<bool> {
        Ok(self.mounts.read().await.contains_key(target))
    }
}
