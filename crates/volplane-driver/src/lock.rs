use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, OwnedRwLockReadGuard, RwLock};
use tracing::debug;
use volplane_core::{Result, VolumeError};

/// Per-key async mutual exclusion
///
/// Holding the guard for a key serializes every other `acquire` of the same
/// key; different keys never block each other. Keys whose last guard was
/// dropped are pruned on the next acquire.
#[derive(Default)]
pub struct KeyedLock {
    slots: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

/// Guard for one key; releases the key on drop
pub struct KeyedGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl KeyedGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `key` is free and take it
    pub async fn acquire(&self, key: &str) -> KeyedGuard {
        let slot = {
            let mut slots = self.slots.lock();
            slots.retain(|_, slot| slot.strong_count() > 0);

            match slots.get(key).and_then(Weak::upgrade) {
                Some(slot) => slot,
                None => {
                    let slot = Arc::new(AsyncMutex::new(()));
                    slots.insert(key.to_string(), Arc::downgrade(&slot));
                    slot
                }
            }
        };

        let guard = slot.lock_owned().await;
        debug!(key, "Acquired keyed lock");

        KeyedGuard {
            key: key.to_string(),
            _guard: guard,
        }
    }

    /// Number of keys currently held or waited on
    pub fn active(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.strong_count() > 0)
            .count()
    }
}

/// Admission gate separating in-flight operations from shutdown
///
/// Operations hold a shared permit while they run. `close` waits for every
/// permit to be returned, then rejects further operations with
/// `ShuttingDown`.
pub struct OperationGate {
    driver: String,
    closed: Arc<RwLock<bool>>,
}

/// Shared permit held for the duration of one operation
pub struct OperationPermit {
    _guard: OwnedRwLockReadGuard<bool>,
}

impl OperationGate {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            closed: Arc::new(RwLock::new(false)),
        }
    }

    /// Admit one operation
    pub async fn enter(&self) -> Result<OperationPermit> {
        let guard = Arc::clone(&self.closed).read_owned().await;
        if *guard {
            return Err(VolumeError::shutting_down(&self.driver));
        }
        Ok(OperationPermit { _guard: guard })
    }

    /// Drain in-flight operations and refuse new ones
    ///
    /// Returns `false` if the gate was already closed.
    pub async fn close(&self) -> bool {
        let mut closed = self.closed.write().await;
        let was_open = !*closed;
        *closed = true;
        was_open
    }

    pub async fn is_closed(&self) -> bool {
        *self.closed.read().await
    }
}
