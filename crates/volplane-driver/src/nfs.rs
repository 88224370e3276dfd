use crate::deadline::with_deadline;
use crate::error::Result as RegistryResult;
use crate::lock::{KeyedLock, OperationGate};
use crate::mount::{MountRequest, Mounter};
use crate::params::DriverParams;
use crate::registry::DriverRegistry;
use crate::traits::VolumeDriver;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use volplane_core::{
    CreateOptions, DriverCategory, Labels, Result, Volume, VolumeError, VolumeId, VolumeLocator,
    VolumeRecord, VolumeSpec,
};
use volplane_storage::{KVStore, VolumeStateStore};

/// Name the NFS driver registers under
pub const NFS_DRIVER_NAME: &str = "nfs";

/// State store namespace for NFS volume records
const KEY_PREFIX: &str = "volplane.nfs";

/// Validated NFS driver options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NfsConfig {
    /// Export to mount, e.g. `10.0.0.5:/exports/volumes`
    pub uri: String,
    /// Directory under which the export is mounted at a generated path
    pub mount_root: PathBuf,
    pub fs_type: String,
    pub mount_options: Vec<String>,
    /// Reject a create whose locator name is already in use
    pub unique_names: bool,
    /// Deadline for each mount, unmount and delete
    pub mount_timeout: Duration,
}

impl NfsConfig {
    pub fn from_params(params: &DriverParams) -> Result<Self> {
        let mount_options = params
            .optional("mount_options")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            uri: params.required("uri")?.to_string(),
            mount_root: PathBuf::from(params.optional_or("mount_root", "/mnt")),
            fs_type: params.optional_or("fstype", "nfs").to_string(),
            mount_options,
            unique_names: params.bool_or("unique_names", false)?,
            mount_timeout: params.duration_secs_or("mount_timeout_secs", Duration::from_secs(30))?,
        })
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Volume driver backed by one shared NFS export
///
/// The export is mounted once at `<mount_root>/<uuid>` during init and stays
/// mounted until `shutdown`. Each volume is a sub-directory of that mount,
/// bound at the caller's target on `mount`.
pub struct NfsDriver {
    config: NfsConfig,
    mnt_path: PathBuf,
    state: VolumeStateStore,
    mounter: Arc<dyn Mounter>,
    locks: KeyedLock,
    gate: OperationGate,
}

impl NfsDriver {
    /// Validate `params` and mount the export
    pub async fn init(
        params: DriverParams,
        store: Arc<dyn KVStore>,
        mounter: Arc<dyn Mounter>,
    ) -> Result<Self> {
        let config = NfsConfig::from_params(&params)?;
        let mnt_path = config.mount_root.join(uuid::Uuid::new_v4().to_string());

        info!(
            uri = %config.uri,
            mount_path = %mnt_path.display(),
            "Mounting NFS export"
        );

        tokio::fs::create_dir_all(&mnt_path).await?;

        let request = MountRequest::typed(&config.uri, path_str(&mnt_path), &config.fs_type)
            .with_options(config.mount_options.iter().cloned());

        let timeout = config.mount_timeout;
        if let Err(e) = with_deadline("mount export", timeout, mounter.mount(&request)).await {
            if let Err(cleanup) = tokio::fs::remove_dir(&mnt_path).await {
                warn!(error = %cleanup, "Failed to remove unused export mount point");
            }
            return Err(e);
        }

        Ok(Self {
            config,
            mnt_path,
            state: VolumeStateStore::new(store, KEY_PREFIX),
            mounter,
            locks: KeyedLock::new(),
            gate: OperationGate::new(NFS_DRIVER_NAME),
        })
    }

    /// Register the NFS initializer with `registry`
    pub fn register(registry: &DriverRegistry, mounter: Arc<dyn Mounter>) -> RegistryResult<()> {
        registry.register(NFS_DRIVER_NAME, DriverCategory::File, move |params, store| {
            let mounter = Arc::clone(&mounter);
            async move {
                let driver = NfsDriver::init(params, store, mounter).await?;
                Ok::<_, VolumeError>(Arc::new(driver) as Arc<dyn VolumeDriver>)
            }
        })
    }

    /// Where the shared export is mounted
    pub fn export_path(&self) -> &Path {
        &self.mnt_path
    }

    pub fn config(&self) -> &NfsConfig {
        &self.config
    }

    fn volume_path(&self, id: &VolumeId) -> PathBuf {
        self.mnt_path.join(id.as_str())
    }

    /// Keep the OS view in line with a record that was not written
    async fn undo_mount(&self, target: &str) {
        if let Err(e) = self.mounter.unmount(target).await {
            warn!(path = target, error = %e, "Failed to undo mount after store write failed");
        }
    }

    /// Reconcile the record with the OS after a mount or unmount expired
    ///
    /// The OS call may land after the deadline fired. `updated` is written
    /// only if `path` is now in the state it describes; otherwise the record
    /// stays as it was.
    async fn settle_after_deadline(&self, updated: &VolumeRecord, path: &str, mounted: bool) {
        let observed = with_deadline(
            "check mount",
            self.config.mount_timeout,
            self.mounter.is_mounted(path),
        )
        .await;

        match observed {
            Ok(now) if now == mounted => {
                warn!(path, mounted, "Operation took effect after its deadline, recording it");
                if let Err(e) = self.state.put(updated) {
                    warn!(path, error = %e, "Failed to record late operation");
                    if mounted {
                        self.undo_mount(path).await;
                    }
                }
            }
            Ok(_) => debug!(path, "Operation did not take effect before its deadline"),
            Err(e) => warn!(path, error = %e, "Mount state unknown after deadline"),
        }
    }

    /// Bind the volume directory at `target`, typed by its format
    fn bind_request(&self, record: &VolumeRecord, target: &str) -> MountRequest {
        let source = path_str(&self.volume_path(&record.id));
        match record.spec.format.as_str() {
            "" | "none" => MountRequest::bind(source, target),
            format => MountRequest::typed(source, target, format),
        }
    }
}

#[async_trait]
impl VolumeDriver for NfsDriver {
    fn name(&self) -> &str {
        NFS_DRIVER_NAME
    }

    fn category(&self) -> DriverCategory {
        DriverCategory::File
    }

    #[instrument(skip(self, options, spec), fields(volume_name = %locator.name))]
    async fn create(
        &self,
        locator: VolumeLocator,
        options: CreateOptions,
        spec: VolumeSpec,
    ) -> Result<VolumeId> {
        let _permit = self.gate.enter().await?;

        let id = VolumeId::generate();
        let _guard = self.locks.acquire(id.as_str()).await;

        let path = self.volume_path(&id);
        with_deadline("create", self.config.mount_timeout, async {
            tokio::fs::create_dir(&path).await.map_err(VolumeError::from)
        })
        .await?;

        let mut record = VolumeRecord::new(id.clone(), locator, spec);
        record.formatted = true;
        record.mark_attached(path_str(&path))?;

        let unique = self.config.unique_names || options.fail_if_exists;
        if let Err(e) = self.state.insert_new(&record, unique) {
            if let Err(cleanup) = tokio::fs::remove_dir(&path).await {
                warn!(
                    volume_id = %id,
                    error = %cleanup,
                    "Failed to remove directory of rejected volume"
                );
            }
            return Err(e);
        }

        info!(volume_id = %id, "Created volume");
        Ok(id)
    }

    #[instrument(skip(self), fields(volume_id = %id))]
    async fn delete(&self, id: &VolumeId) -> Result<()> {
        let _permit = self.gate.enter().await?;
        let _guard = self.locks.acquire(id.as_str()).await;

        let record = self.state.get(id)?;
        record.ensure_deletable()?;

        let path = self.volume_path(id);
        with_deadline("delete", self.config.mount_timeout, async {
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => Ok(()),
                // Left over from an earlier attempt that removed the
                // directory but not the record
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("Volume directory already removed");
                    Ok(())
                }
                Err(e) => Err(VolumeError::from(e)),
            }
        })
        .await?;

        self.state.remove(&record)?;

        info!("Deleted volume");
        Ok(())
    }

    #[instrument(skip(self), fields(volume_id = %id))]
    async fn mount(&self, id: &VolumeId, target: &str) -> Result<()> {
        let _permit = self.gate.enter().await?;
        let _guard = self.locks.acquire(id.as_str()).await;

        let record = self.state.get(id)?;
        if record.mounted && record.mount_path == target {
            debug!("Already mounted at target");
            return Ok(());
        }

        let mut updated = record.clone();
        updated.mark_mounted(target)?;

        let request = self.bind_request(&record, target);
        let timeout = self.config.mount_timeout;
        if let Err(e) = with_deadline("mount", timeout, self.mounter.mount(&request)).await {
            if matches!(e, VolumeError::Timeout { .. }) {
                self.settle_after_deadline(&updated, target, true).await;
            }
            return Err(e);
        }

        if let Err(e) = self.state.put(&updated) {
            self.undo_mount(target).await;
            return Err(e);
        }

        info!(target_path = target, "Mounted volume");
        Ok(())
    }

    #[instrument(skip(self), fields(volume_id = %id))]
    async fn unmount(&self, id: &VolumeId, target: &str) -> Result<()> {
        let _permit = self.gate.enter().await?;
        let _guard = self.locks.acquire(id.as_str()).await;

        let record = self.state.get(id)?;

        let mut updated = record.clone();
        updated.mark_unmounted(target)?;

        let path = record.mount_path.as_str();
        let timeout = self.config.mount_timeout;
        if let Err(e) = with_deadline("unmount", timeout, self.mounter.unmount(path)).await {
            if matches!(e, VolumeError::Timeout { .. }) {
                self.settle_after_deadline(&updated, path, false).await;
            }
            return Err(e);
        }

        self.state.put(&updated)?;

        info!(target_path = %record.mount_path, "Unmounted volume");
        Ok(())
    }

    async fn inspect(&self, ids: &[VolumeId]) -> Result<Vec<Volume>> {
        let _permit = self.gate.enter().await?;

        ids.iter()
            .map(|id| self.state.get(id).map(|record| record.to_volume(NFS_DRIVER_NAME)))
            .collect()
    }

    async fn enumerate(&self, locator: &VolumeLocator, labels: &Labels) -> Result<Vec<Volume>> {
        let _permit = self.gate.enter().await?;

        Ok(self
            .state
            .list()?
            .iter()
            .filter(|record| record.locator.matches(locator, labels))
            .map(|record| record.to_volume(NFS_DRIVER_NAME))
            .collect())
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.gate.close().await {
            return Ok(());
        }

        info!(mount_path = %self.mnt_path.display(), "Unmounting NFS export");
        with_deadline(
            "unmount export",
            self.config.mount_timeout,
            self.mounter.unmount(&path_str(&self.mnt_path)),
        )
        .await?;

        if let Err(e) = tokio::fs::remove_dir(&self.mnt_path).await {
            debug!(error = %e, "Export mount point left in place");
        }
        Ok(())
    }
}
