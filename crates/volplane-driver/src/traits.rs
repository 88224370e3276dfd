use async_trait::async_trait;
use volplane_core::{
    CreateOptions, DriverCategory, Labels, Result, SnapId, Volume, VolumeAlerts, VolumeError,
    VolumeId, VolumeLocator, VolumeSnap, VolumeSpec, VolumeStats,
};

/// Lifecycle contract every volume backend implements
///
/// Optional capability groups (attach/detach, snapshots, telemetry) live in
/// separate traits. A backend opts into a group by returning `Some(self)`
/// from the matching `as_*` hook; otherwise the facade methods below fail
/// with `VolumeError::NotSupported`.
///
/// Operations against the same `VolumeId` are serialized by the driver.
/// Operations against different IDs may run in parallel.
#[async_trait]
pub trait VolumeDriver: Send + Sync {
    // --- Identity ---

    /// Name the driver is registered under
    fn name(&self) -> &str;

    /// Declared category
    fn category(&self) -> DriverCategory;

    // --- Lifecycle ---

    /// Provision backend storage and persist an initial record
    async fn create(
        &self,
        locator: VolumeLocator,
        options: CreateOptions,
        spec: VolumeSpec,
    ) -> Result<VolumeId>;

    /// Release backend storage and remove the record
    ///
    /// Safe to retry after a failure between the two steps.
    async fn delete(&self, id: &VolumeId) -> Result<()>;

    /// Bind the volume at `target`; the record is only updated on success
    async fn mount(&self, id: &VolumeId, target: &str) -> Result<()>;

    /// Unbind the volume from `target`
    async fn unmount(&self, id: &VolumeId, target: &str) -> Result<()>;

    // --- Query ---

    /// Look up volumes by ID; any absent ID fails the whole call with `NotFound`
    async fn inspect(&self, ids: &[VolumeId]) -> Result<Vec<Volume>>;

    /// List volumes matching a locator filter and extra labels
    async fn enumerate(&self, locator: &VolumeLocator, labels: &Labels) -> Result<Vec<Volume>>;

    // --- Capability hooks ---

    fn as_block(&self) -> Option<&dyn BlockDriver> {
        None
    }

    fn as_snapshot(&self) -> Option<&dyn SnapshotDriver> {
        None
    }

    fn as_stats(&self) -> Option<&dyn StatsDriver> {
        None
    }

    // --- Optional operations ---

    async fn attach(&self, id: &VolumeId) -> Result<String> {
        match self.as_block() {
            Some(block) => block.attach(id).await,
            None => Err(VolumeError::NotSupported),
        }
    }

    async fn detach(&self, id: &VolumeId) -> Result<()> {
        match self.as_block() {
            Some(block) => block.detach(id).await,
            None => Err(VolumeError::NotSupported),
        }
    }

    async fn snapshot(&self, id: &VolumeId, labels: &Labels) -> Result<SnapId> {
        match self.as_snapshot() {
            Some(snap) => snap.snapshot(id, labels).await,
            None => Err(VolumeError::NotSupported),
        }
    }

    async fn snap_delete(&self, snap_id: &SnapId) -> Result<()> {
        match self.as_snapshot() {
            Some(snap) => snap.snap_delete(snap_id).await,
            None => Err(VolumeError::NotSupported),
        }
    }

    async fn snap_inspect(&self, snap_ids: &[SnapId]) -> Result<Vec<VolumeSnap>> {
        match self.as_snapshot() {
            Some(snap) => snap.snap_inspect(snap_ids).await,
            None => Err(VolumeError::NotSupported),
        }
    }

    async fn snap_enumerate(&self, ids: &[VolumeId], labels: &Labels) -> Result<Vec<VolumeSnap>> {
        match self.as_snapshot() {
            Some(snap) => snap.snap_enumerate(ids, labels).await,
            None => Err(VolumeError::NotSupported),
        }
    }

    async fn stats(&self, id: &VolumeId) -> Result<VolumeStats> {
        match self.as_stats() {
            Some(stats) => stats.stats(id).await,
            None => Err(VolumeError::NotSupported),
        }
    }

    async fn alerts(&self, id: &VolumeId) -> Result<VolumeAlerts> {
        match self.as_stats() {
            Some(stats) => stats.alerts(id).await,
            None => Err(VolumeError::NotSupported),
        }
    }

    // --- Teardown ---

    /// Release process-wide resources after in-flight operations drain
    ///
    /// The registry calls this at most once per instance.
    async fn shutdown(&self) -> Result<()>;
}

/// Backends whose devices must be attached before mounting
#[async_trait]
pub trait BlockDriver: Send + Sync {
    /// Make the device resolvable on this host and return its path
    async fn attach(&self, id: &VolumeId) -> Result<String>;

    async fn detach(&self, id: &VolumeId) -> Result<()>;
}

/// Point-in-time snapshot capability
#[async_trait]
pub trait SnapshotDriver: Send + Sync {
    async fn snapshot(&self, id: &VolumeId, labels: &Labels) -> Result<SnapId>;

    async fn snap_delete(&self, snap_id: &SnapId) -> Result<()>;

    async fn snap_inspect(&self, snap_ids: &[SnapId]) -> Result<Vec<VolumeSnap>>;

    /// Snapshots of the given volumes (all volumes when empty) carrying `labels`
    async fn snap_enumerate(&self, ids: &[VolumeId], labels: &Labels) -> Result<Vec<VolumeSnap>>;
}

/// Telemetry capability
#[async_trait]
pub trait StatsDriver: Send + Sync {
    async fn stats(&self, id: &VolumeId) -> Result<VolumeStats>;

    async fn alerts(&self, id: &VolumeId) -> Result<VolumeAlerts>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use volplane_core::GIB;

    /// Lifecycle-only driver with no optional capabilities
    struct BareDriver;

    #[async_trait]
    impl VolumeDriver for BareDriver {
        fn name(&self) -> &str {
            "bare"
        }

        fn category(&self) -> DriverCategory {
            DriverCategory::File
        }

        async fn create(
            &self,
            _locator: VolumeLocator,
            _options: CreateOptions,
            _spec: VolumeSpec,
        ) -> Result<VolumeId> {
            Ok(VolumeId::generate())
        }

        async fn delete(&self, _id: &VolumeId) -> Result<()> {
            Ok(())
        }

        async fn mount(&self, _id: &VolumeId, _target: &str) -> Result<()> {
            Ok(())
        }

        async fn unmount(&self, _id: &VolumeId, _target: &str) -> Result<()> {
            Ok(())
        }

        async fn inspect(&self, _ids: &[VolumeId]) -> Result<Vec<Volume>> {
            Ok(Vec::new())
        }

        async fn enumerate(
            &self,
            _locator: &VolumeLocator,
            _labels: &Labels,
        ) -> Result<Vec<Volume>> {
            Ok(Vec::new())
        }

        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Driver that opts into telemetry only
    struct StatsOnlyDriver;

    #[async_trait]
    impl StatsDriver for StatsOnlyDriver {
        async fn stats(&self, _id: &VolumeId) -> Result<VolumeStats> {
            Ok(VolumeStats {
                bytes_used: GIB,
                ..Default::default()
            })
        }

        async fn alerts(&self, _id: &VolumeId) -> Result<VolumeAlerts> {
            Ok(VolumeAlerts::default())
        }
    }

    #[async_trait]
    impl VolumeDriver for StatsOnlyDriver {
        fn name(&self) -> &str {
            "stats-only"
        }

        fn category(&self) -> DriverCategory {
            DriverCategory::Block
        }

        async fn create(
            &self,
            locator: VolumeLocator,
            options: CreateOptions,
            spec: VolumeSpec,
        ) -> Result<VolumeId> {
            BareDriver.create(locator, options, spec).await
        }

        async fn delete(&self, id: &VolumeId) -> Result<()> {
            BareDriver.delete(id).await
        }

        async fn mount(&self, id: &VolumeId, target: &str) -> Result<()> {
            BareDriver.mount(id, target).await
        }

        async fn unmount(&self, id: &VolumeId, target: &str) -> Result<()> {
            BareDriver.unmount(id, target).await
        }

        async fn inspect(&self, ids: &[VolumeId]) -> Result<Vec<Volume>> {
            BareDriver.inspect(ids).await
        }

        async fn enumerate(&self, locator: &VolumeLocator, labels: &Labels) -> Result<Vec<Volume>> {
            BareDriver.enumerate(locator, labels).await
        }

        fn as_stats(&self) -> Option<&dyn StatsDriver> {
            Some(self)
        }

        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_missing_capabilities_are_not_supported() {
        let driver: &dyn VolumeDriver = &BareDriver;
        let id = VolumeId::new("v1");
        let snap = SnapId::new("s1");
        let labels = Labels::new();

        assert!(matches!(driver.attach(&id).await, Err(VolumeError::NotSupported)));
        assert!(matches!(driver.detach(&id).await, Err(VolumeError::NotSupported)));
        assert!(matches!(
            driver.snapshot(&id, &labels).await,
            Err(VolumeError::NotSupported)
        ));
        assert!(matches!(
            driver.snap_delete(&snap).await,
            Err(VolumeError::NotSupported)
        ));
        assert!(matches!(
            driver.snap_inspect(&[snap.clone()]).await,
            Err(VolumeError::NotSupported)
        ));
        assert!(matches!(
            driver.snap_enumerate(&[id.clone()], &labels).await,
            Err(VolumeError::NotSupported)
        ));
        assert!(matches!(driver.stats(&id).await, Err(VolumeError::NotSupported)));
        assert!(matches!(driver.alerts(&id).await, Err(VolumeError::NotSupported)));
    }

    #[tokio::test]
    async fn test_capability_hook_dispatches() {
        let driver: &dyn VolumeDriver = &StatsOnlyDriver;
        let id = VolumeId::new("v1");

        assert_eq!(driver.stats(&id).await.unwrap().bytes_used, GIB);
        assert!(driver.alerts(&id).await.unwrap().alerts.is_empty());
        assert!(matches!(
            driver.snapshot(&id, &Labels::new()).await,
            Err(VolumeError::NotSupported)
        ));
    }
}
