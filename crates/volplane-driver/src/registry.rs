use crate::error::{RegistryError, Result};
use crate::params::DriverParams;
use crate::traits::VolumeDriver;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};
use volplane_core::{DriverCategory, VolumeError};
use volplane_storage::{KVStore, MemoryBackend};

type InitResult = volplane_core::Result<Arc<dyn VolumeDriver>>;

/// Driver initializer: builds a live instance from its params and the shared store
pub type InitFn =
    Arc<dyn Fn(DriverParams, Arc<dyn KVStore>) -> BoxFuture<'static, InitResult> + Send + Sync>;

type InitFuture = Shared<BoxFuture<'static, Result<Arc<dyn VolumeDriver>>>>;

enum Slot {
    Idle,
    Initializing { generation: u64, future: InitFuture },
    Ready(Arc<dyn VolumeDriver>),
}

struct Entry {
    category: DriverCategory,
    init: InitFn,
    slot: Slot,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    next_generation: u64,
    closed: bool,
}

/// Process-wide table of volume drivers
///
/// Backends register an initializer under a unique name at startup.
/// `get` runs the initializer at most once at a time per name; concurrent
/// callers share the in-flight initialization and its outcome. A failed
/// initialization is handed to every waiter but not cached, so a later
/// `get` tries again.
pub struct DriverRegistry {
    store: Arc<dyn KVStore>,
    inner: Mutex<Inner>,
}

static GLOBAL: OnceLock<Arc<DriverRegistry>> = OnceLock::new();

impl DriverRegistry {
    /// Create a registry whose drivers persist through `store`
    pub fn new(store: Arc<dyn KVStore>) -> Self {
        Self {
            store,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// The process-wide registry
    ///
    /// Built over an in-memory store unless `install_global` ran first.
    pub fn global() -> Arc<DriverRegistry> {
        GLOBAL
            .get_or_init(|| Arc::new(DriverRegistry::new(Arc::new(MemoryBackend::new()))))
            .clone()
    }

    /// Install `registry` as the process-wide registry
    ///
    /// Fails, handing the registry back, if one is already installed.
    pub fn install_global(
        registry: Arc<DriverRegistry>,
    ) -> std::result::Result<(), Arc<DriverRegistry>> {
        GLOBAL.set(registry)
    }

    /// Shared KV store handed to every initializer
    pub fn store(&self) -> Arc<dyn KVStore> {
        Arc::clone(&self.store)
    }

    /// Register a driver initializer
    ///
    /// The first registration of a name wins; a second one fails with
    /// `DuplicateDriver` and leaves the first in place.
    pub fn register<F, Fut>(&self, name: &str, category: DriverCategory, init: F) -> Result<()>
    where
        F: Fn(DriverParams, Arc<dyn KVStore>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = InitResult> + Send + 'static,
    {
        let init: InitFn = Arc::new(move |params, store| init(params, store).boxed());

        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(RegistryError::RegistryClosed);
        }
        if inner.entries.contains_key(name) {
            warn!(driver = name, "Rejecting duplicate driver registration");
            return Err(RegistryError::duplicate_driver(name));
        }

        inner.entries.insert(
            name.to_string(),
            Entry {
                category,
                init,
                slot: Slot::Idle,
            },
        );
        info!(driver = name, %category, "Registered volume driver");
        Ok(())
    }

    /// Resolve a driver, initializing it with `params` if needed
    ///
    /// `params` are only used by the call that starts initialization.
    pub async fn get(&self, name: &str, params: &DriverParams) -> Result<Arc<dyn VolumeDriver>> {
        let (generation, future) = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(RegistryError::RegistryClosed);
            }

            inner.next_generation += 1;
            let next_generation = inner.next_generation;

            let entry = inner
                .entries
                .get_mut(name)
                .ok_or_else(|| RegistryError::driver_not_registered(name))?;

            match &entry.slot {
                Slot::Ready(driver) => return Ok(Arc::clone(driver)),
                Slot::Initializing { generation, future } => (*generation, future.clone()),
                Slot::Idle => {
                    let future = Self::start_init(name, entry, params.clone(), self.store());
                    entry.slot = Slot::Initializing {
                        generation: next_generation,
                        future: future.clone(),
                    };
                    (next_generation, future)
                }
            }
        };

        let result = future.await;

        let (closed, settled_here) = {
            let mut inner = self.inner.lock();
            let closed = inner.closed;
            let mut settled_here = false;

            if let Some(entry) = inner.entries.get_mut(name) {
                let current = matches!(
                    &entry.slot,
                    Slot::Initializing { generation: g, .. } if *g == generation
                );
                if current {
                    entry.slot = match &result {
                        Ok(driver) if !closed => Slot::Ready(Arc::clone(driver)),
                        _ => Slot::Idle,
                    };
                    settled_here = true;
                }
            }
            (closed, settled_here)
        };

        if closed {
            // Initialization finished after shutdown started; tear the new
            // instance down exactly once, from the caller that settled it.
            if let (true, Ok(driver)) = (settled_here, &result) {
                if let Err(e) = driver.shutdown().await {
                    error!(
                        driver = name,
                        error = %e,
                        "Failed to shut down late-initialized driver"
                    );
                }
            }
            return Err(RegistryError::RegistryClosed);
        }

        result
    }

    fn start_init(
        name: &str,
        entry: &Entry,
        params: DriverParams,
        store: Arc<dyn KVStore>,
    ) -> InitFuture {
        let init = Arc::clone(&entry.init);
        let name = name.to_string();

        async move {
            info!(driver = %name, "Initializing volume driver");
            match init(params, store).await {
                Ok(driver) => {
                    info!(driver = %name, "Volume driver initialized");
                    Ok(driver)
                }
                Err(e) => {
                    warn!(driver = %name, error = %e, "Volume driver initialization failed");
                    Err(RegistryError::init_failed(name, e))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Resolve an already-initialized driver without initializing it
    pub fn get_initialized(&self, name: &str) -> Result<Arc<dyn VolumeDriver>> {
        let inner = self.inner.lock();
        if inner.closed {
            return Err(RegistryError::RegistryClosed);
        }

        match inner.entries.get(name).map(|e| &e.slot) {
            None => Err(RegistryError::driver_not_registered(name)),
            Some(Slot::Ready(driver)) => Ok(Arc::clone(driver)),
            Some(_) => Err(RegistryError::driver_not_initialized(name)),
        }
    }

    /// Registered drivers and their categories, in name order
    pub fn registered(&self) -> Vec<(String, DriverCategory)> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.category))
            .collect()
    }

    /// Initialized drivers of `category`, in name order
    pub fn initialized(&self, category: DriverCategory) -> Vec<Arc<dyn VolumeDriver>> {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|entry| entry.category == category)
            .filter_map(|entry| match &entry.slot {
                Slot::Ready(driver) => Some(Arc::clone(driver)),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Close the registry and shut every initialized driver down once
    ///
    /// Drivers are shut down in name order. A failing driver does not stop
    /// the rest; every failure is logged and returned.
    pub async fn shutdown(&self) -> Vec<(String, VolumeError)> {
        let drivers: Vec<(String, Arc<dyn VolumeDriver>)> = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Vec::new();
            }
            inner.closed = true;

            inner
                .entries
                .iter_mut()
                .filter_map(|(name, entry)| {
                    if !matches!(entry.slot, Slot::Ready(_)) {
                        return None;
                    }
                    match std::mem::replace(&mut entry.slot, Slot::Idle) {
                        Slot::Ready(driver) => Some((name.clone(), driver)),
                        _ => None,
                    }
                })
                .collect()
        };

        info!(count = drivers.len(), "Shutting down volume drivers");

        let mut failures = Vec::new();
        for (name, driver) in drivers {
            match driver.shutdown().await {
                Ok(()) => info!(driver = %name, "Volume driver shut down"),
                Err(e) => {
                    error!(driver = %name, error = %e, "Volume driver shutdown failed");
                    failures.push((name, e));
                }
            }
        }

        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;
    use volplane_core::{CreateOptions, Labels, Volume, VolumeId, VolumeLocator, VolumeSpec};

    /// Driver that only counts shutdowns
    struct CountingDriver {
        name: String,
        shutdowns: Arc<AtomicUsize>,
        fail_shutdown: bool,
    }

    impl CountingDriver {
        fn new(
            name: &str,
            shutdowns: Arc<AtomicUsize>,
            fail_shutdown: bool,
        ) -> Arc<dyn VolumeDriver> {
            Arc::new(Self {
                name: name.to_string(),
                shutdowns,
                fail_shutdown,
            })
        }
    }

    #[async_trait]
    impl VolumeDriver for CountingDriver {
        fn name(&self) -> &str {
            &self.name
        }

        fn category(&self) -> DriverCategory {
            DriverCategory::File
        }

        async fn create(
            &self,
            _locator: VolumeLocator,
            _options: CreateOptions,
            _spec: VolumeSpec,
        ) -> volplane_core::Result<VolumeId> {
            Err(VolumeError::NotSupported)
        }

        async fn delete(&self, id: &VolumeId) -> volplane_core::Result<()> {
            Err(VolumeError::volume_not_found(id.as_str()))
        }

        async fn mount(&self, id: &VolumeId, _target: &str) -> volplane_core::Result<()> {
            Err(VolumeError::volume_not_found(id.as_str()))
        }

        async fn unmount(&self, id: &VolumeId, _target: &str) -> volplane_core::Result<()> {
            Err(VolumeError::volume_not_found(id.as_str()))
        }

        async fn inspect(&self, _ids: &[VolumeId]) -> volplane_core::Result<Vec<Volume>> {
            Ok(Vec::new())
        }

        async fn enumerate(
            &self,
            _locator: &VolumeLocator,
            _labels: &Labels,
        ) -> volplane_core::Result<Vec<Volume>> {
            Ok(Vec::new())
        }

        async fn shutdown(&self) -> volplane_core::Result<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            if self.fail_shutdown {
                return Err(VolumeError::io_failure("export busy", None));
            }
            Ok(())
        }
    }

    fn make_registry() -> DriverRegistry {
        DriverRegistry::new(Arc::new(MemoryBackend::new()))
    }

    fn register_counting(
        registry: &DriverRegistry,
        name: &'static str,
        category: DriverCategory,
        shutdowns: Arc<AtomicUsize>,
        fail_shutdown: bool,
    ) {
        registry
            .register(name, category, move |_params, _store| {
                let shutdowns = Arc::clone(&shutdowns);
                async move {
                    Ok::<_, VolumeError>(CountingDriver::new(name, shutdowns, fail_shutdown))
                }
            })
            .unwrap();
    }

    fn same_instance(a: &Arc<dyn VolumeDriver>, b: &Arc<dyn VolumeDriver>) -> bool {
        Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
    }

    #[tokio::test]
    async fn test_get_unregistered_driver() {
        let registry = make_registry();
        let err = registry.get("nfs", &DriverParams::new()).await.err().unwrap();
        assert!(matches!(err, RegistryError::DriverNotRegistered { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_registration_first_wins() {
        let registry = make_registry();
        let first = Arc::new(AtomicUsize::new(0));
        register_counting(&registry, "nfs", DriverCategory::File, Arc::clone(&first), false);

        let err = registry
            .register("nfs", DriverCategory::Block, |_params, _store| async {
                Err::<Arc<dyn VolumeDriver>, _>(VolumeError::NotSupported)
            })
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateDriver { ref name } if name == "nfs"));
        assert!(err.to_string().contains("nfs"));

        assert_eq!(
            registry.registered(),
            vec![("nfs".to_string(), DriverCategory::File)]
        );
        let driver = registry.get("nfs", &DriverParams::new()).await.unwrap();
        assert_eq!(driver.category(), DriverCategory::File);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_initializes_once() {
        let registry = Arc::new(make_registry());
        let inits = Arc::new(AtomicUsize::new(0));
        let shutdowns = Arc::new(AtomicUsize::new(0));

        {
            let inits = Arc::clone(&inits);
            registry
                .register("nfs", DriverCategory::File, move |_params, _store| {
                    let inits = Arc::clone(&inits);
                    let shutdowns = Arc::clone(&shutdowns);
                    async move {
                        inits.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, VolumeError>(CountingDriver::new("nfs", shutdowns, false))
                    }
                })
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.get("nfs", &DriverParams::new()).await
            }));
        }

        let mut drivers = Vec::new();
        for handle in handles {
            drivers.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert!(drivers.iter().all(|d| same_instance(d, &drivers[0])));
        assert!(same_instance(
            &registry.get_initialized("nfs").unwrap(),
            &drivers[0]
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_init_failure_is_shared_but_not_cached() {
        let registry = Arc::new(make_registry());
        let inits = Arc::new(AtomicUsize::new(0));

        {
            let inits = Arc::clone(&inits);
            registry
                .register("nfs", DriverCategory::File, move |params, _store| {
                    let inits = Arc::clone(&inits);
                    async move {
                        inits.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        params.required("uri")?;
                        Ok::<_, VolumeError>(CountingDriver::new(
                            "nfs",
                            Arc::new(AtomicUsize::new(0)),
                            false,
                        ))
                    }
                })
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.get("nfs", &DriverParams::new()).await
            }));
        }
        for handle in handles {
            let err = handle.await.unwrap().err().unwrap();
            assert!(matches!(
                err.init_error(),
                Some(VolumeError::InvalidConfig { .. })
            ));
        }
        assert_eq!(inits.load(Ordering::SeqCst), 1);

        let err = registry.get_initialized("nfs").err().unwrap();
        assert!(matches!(err, RegistryError::DriverNotInitialized { .. }));

        // A later call retries with fresh params
        let params = DriverParams::new().with("uri", "host:/export");
        registry.get("nfs", &params).await.unwrap();
        assert_eq!(inits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_initialized_filters_by_category() {
        let registry = make_registry();
        let shutdowns = Arc::new(AtomicUsize::new(0));
        register_counting(&registry, "nfs", DriverCategory::File, Arc::clone(&shutdowns), false);
        register_counting(&registry, "ebs", DriverCategory::Block, Arc::clone(&shutdowns), false);
        register_counting(&registry, "efs", DriverCategory::File, Arc::clone(&shutdowns), false);

        registry.get("nfs", &DriverParams::new()).await.unwrap();
        registry.get("ebs", &DriverParams::new()).await.unwrap();

        let files: Vec<String> = registry
            .initialized(DriverCategory::File)
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(files, vec!["nfs"]);
        assert_eq!(registry.initialized(DriverCategory::Block).len(), 1);
        assert!(registry.initialized(DriverCategory::Clustered).is_empty());

        let names: Vec<String> = registry.registered().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["ebs", "efs", "nfs"]);
    }

    #[tokio::test]
    async fn test_shutdown_tolerates_failures_and_runs_once() {
        let registry = make_registry();
        let ok_shutdowns = Arc::new(AtomicUsize::new(0));
        let bad_shutdowns = Arc::new(AtomicUsize::new(0));
        let idle_shutdowns = Arc::new(AtomicUsize::new(0));

        let block = DriverCategory::Block;
        let file = DriverCategory::File;
        register_counting(&registry, "a-bad", block, Arc::clone(&bad_shutdowns), true);
        register_counting(&registry, "b-ok", file, Arc::clone(&ok_shutdowns), false);
        register_counting(&registry, "c-idle", file, Arc::clone(&idle_shutdowns), false);

        registry.get("a-bad", &DriverParams::new()).await.unwrap();
        registry.get("b-ok", &DriverParams::new()).await.unwrap();

        let failures = registry.shutdown().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "a-bad");
        assert_eq!(bad_shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(ok_shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(idle_shutdowns.load(Ordering::SeqCst), 0);

        assert!(registry.shutdown().await.is_empty());
        assert_eq!(ok_shutdowns.load(Ordering::SeqCst), 1);

        assert!(registry.is_closed());
        let err = registry.get("b-ok", &DriverParams::new()).await.err().unwrap();
        assert!(matches!(err, RegistryError::RegistryClosed));
        let err = registry
            .register("late", DriverCategory::File, |_params, _store| async {
                Err::<Arc<dyn VolumeDriver>, _>(VolumeError::NotSupported)
            })
            .unwrap_err();
        assert!(matches!(err, RegistryError::RegistryClosed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_init_finishing_after_shutdown_is_torn_down() {
        let registry = Arc::new(make_registry());
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        {
            let shutdowns = Arc::clone(&shutdowns);
            let release = Arc::clone(&release);
            registry
                .register("nfs", DriverCategory::File, move |_params, _store| {
                    let shutdowns = Arc::clone(&shutdowns);
                    let release = Arc::clone(&release);
                    async move {
                        release.notified().await;
                        Ok::<_, VolumeError>(CountingDriver::new("nfs", shutdowns, false))
                    }
                })
                .unwrap();
        }

        let pending = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.get("nfs", &DriverParams::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(registry.shutdown().await.is_empty());
        release.notify_one();

        let err = pending.await.unwrap().err().unwrap();
        assert!(matches!(err, RegistryError::RegistryClosed));
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_global_registry_is_shared() {
        let a = DriverRegistry::global();
        let b = DriverRegistry::global();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(DriverRegistry::install_global(Arc::new(make_registry())).is_err());
    }
}
