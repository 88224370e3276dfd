use crate::{KVStore, Result, StorageError, Transaction as KVTransaction};
use bytes::Bytes;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    revision: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at > now).unwrap_or(true)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<Vec<u8>, Entry>,
    /// Keys currently carrying a TTL
    expiring: BTreeSet<Vec<u8>>,
    last_revision: u64,
}

impl Inner {
    fn live(&self, key: &[u8]) -> Option<&Entry> {
        let now = Instant::now();
        self.entries.get(key).filter(|e| e.live(now))
    }

    /// Revision of a key as a transaction observes it; absent keys are 0
    fn revision(&self, key: &[u8]) -> u64 {
        self.live(key).map(|e| e.revision).unwrap_or(0)
    }

    fn write(&mut self, key: &[u8], value: &[u8], expires_at: Option<Instant>) {
        if expires_at.is_some() {
            self.expiring.insert(key.to_vec());
        } else {
            self.expiring.remove(key);
        }
        self.last_revision += 1;
        self.entries.insert(
            key.to_vec(),
            Entry {
                value: Bytes::copy_from_slice(value),
                revision: self.last_revision,
                expires_at,
            },
        );
    }

    fn remove(&mut self, key: &[u8]) {
        self.entries.remove(key);
        self.expiring.remove(key);
    }

    /// Drop keys whose TTL has passed; they already read as absent
    fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let dead: Vec<Vec<u8>> = self
            .expiring
            .iter()
            .filter(|key| self.entries.get(*key).is_none_or(|e| !e.live(now)))
            .cloned()
            .collect();

        for key in &dead {
            self.remove(key);
        }
        dead.len()
    }
}

/// In-process key-value store
///
/// Used for tests and for embedders that do not need durability. Clones
/// share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .values()
            .filter(|e| e.live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every key whose TTL has passed, returning how many went
    pub fn purge_expired(&self) -> usize {
        self.inner.lock().purge_expired()
    }
}

impl KVStore for MemoryBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.inner.lock().live(key).map(|e| e.value.clone()))
    }

    fn put_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<()> {
        debug!(
            "Memory: putting key {:?} (ttl {:?})",
            String::from_utf8_lossy(key),
            ttl
        );
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        let mut inner = self.inner.lock();
        inner.write(key, value, expires_at);
        inner.purge_expired();
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        debug!("Memory: deleting key {:?}", String::from_utf8_lossy(key));
        self.inner.lock().remove(key);
        Ok(())
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        let now = Instant::now();
        let inner = self.inner.lock();
        let results = inner
            .entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.live(now))
            .map(|(k, e)| (Bytes::copy_from_slice(k), e.value.clone()))
            .collect();
        Ok(results)
    }

    fn transaction(&self) -> Result<Box<dyn KVTransaction>> {
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            reads: RefCell::new(HashMap::new()),
            writes: BTreeMap::new(),
        }))
    }
}

/// Optimistic transaction over `MemoryBackend`
///
/// Writes are buffered. Commit fails with `Conflict` if any key read by the
/// transaction changed revision since it was read.
struct MemoryTransaction {
    inner: Arc<Mutex<Inner>>,
    reads: RefCell<HashMap<Vec<u8>, u64>>,
    writes: BTreeMap<Vec<u8>, Option<Bytes>>,
}

impl KVTransaction for MemoryTransaction {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        if let Some(buffered) = self.writes.get(key) {
            return Ok(buffered.clone());
        }

        let inner = self.inner.lock();
        self.reads
            .borrow_mut()
            .entry(key.to_vec())
            .or_insert_with(|| inner.revision(key));
        Ok(inner.live(key).map(|e| e.value.clone()))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.writes
            .insert(key.to_vec(), Some(Bytes::copy_from_slice(value)));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.writes.insert(key.to_vec(), None);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let mut inner = self.inner.lock();

        for (key, seen) in self.reads.borrow().iter() {
            if inner.revision(key) != *seen {
                return Err(StorageError::conflict(String::from_utf8_lossy(key)));
            }
        }

        for (key, value) in &self.writes {
            match value {
                Some(v) => inner.write(key, v, None),
                None => inner.remove(key),
            }
        }

        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_basic_operations() {
        let backend = MemoryBackend::new();
        backend.put(b"nfs/v1", b"record").unwrap();
        assert_eq!(backend.get(b"nfs/v1").unwrap(), Some(Bytes::from("record")));
        assert_eq!(backend.len(), 1);

        backend.delete(b"nfs/v1").unwrap();
        assert!(backend.is_empty());
        backend.delete(b"nfs/v1").unwrap();
    }

    #[test]
    fn test_memory_scan_is_prefix_bounded() {
        let backend = MemoryBackend::new();
        backend.put(b"nfs/a", b"1").unwrap();
        backend.put(b"nfs/b", b"2").unwrap();
        backend.put(b"nfs.index/name/x", b"[]").unwrap();
        backend.put(b"ebs/c", b"3").unwrap();

        let keys: Vec<_> = backend
            .scan(b"nfs/")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![Bytes::from("nfs/a"), Bytes::from("nfs/b")]);
        assert_eq!(backend.keys_with_prefix(b"nfs/").unwrap(), keys);
        assert_eq!(backend.keys_with_prefix(b"nfs").unwrap().len(), 3);
    }

    #[test]
    fn test_memory_ttl_expiry() {
        let backend = MemoryBackend::new();
        backend
            .put_with_ttl(b"lease", b"holder", Duration::from_millis(20))
            .unwrap();
        assert!(backend.exists(b"lease").unwrap());

        std::thread::sleep(Duration::from_millis(50));
        assert!(!backend.exists(b"lease").unwrap());
        assert!(backend.scan(b"lease").unwrap().is_empty());
    }

    #[test]
    fn test_memory_purges_expired_keys() {
        let backend = MemoryBackend::new();
        for key in [b"lease/a", b"lease/b"] {
            backend
                .put_with_ttl(key, b"holder", Duration::from_millis(20))
                .unwrap();
        }
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(backend.purge_expired(), 2);
        assert!(backend.inner.lock().entries.is_empty());

        // Any later write sweeps keys that expired in the meantime
        backend
            .put_with_ttl(b"lease/c", b"holder", Duration::from_millis(20))
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        backend.put(b"durable", b"value").unwrap();
        assert_eq!(backend.inner.lock().entries.len(), 1);
        assert!(backend.inner.lock().expiring.is_empty());
    }

    #[test]
    fn test_memory_clones_share_state() {
        let backend = MemoryBackend::new();
        let other = backend.clone();
        backend.put(b"k", b"v").unwrap();
        assert!(other.exists(b"k").unwrap());
    }

    #[test]
    fn test_memory_transaction_commit_and_rollback() {
        let backend = MemoryBackend::new();

        let mut txn = backend.transaction().unwrap();
        txn.put(b"k1", b"v1").unwrap();
        assert_eq!(txn.get(b"k1").unwrap(), Some(Bytes::from("v1")));
        assert_eq!(backend.get(b"k1").unwrap(), None);
        txn.commit().unwrap();
        assert_eq!(backend.get(b"k1").unwrap(), Some(Bytes::from("v1")));

        let mut txn = backend.transaction().unwrap();
        txn.delete(b"k1").unwrap();
        txn.rollback().unwrap();
        assert!(backend.exists(b"k1").unwrap());
    }

    #[test]
    fn test_memory_transaction_detects_conflict() {
        let backend = MemoryBackend::new();

        let mut first = backend.transaction().unwrap();
        let mut second = backend.transaction().unwrap();

        assert_eq!(first.get(b"names/v1").unwrap(), None);
        assert_eq!(second.get(b"names/v1").unwrap(), None);

        first.put(b"names/v1", b"a").unwrap();
        second.put(b"names/v1", b"b").unwrap();

        first.commit().unwrap();
        let err = second.commit().unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
        assert_eq!(backend.get(b"names/v1").unwrap(), Some(Bytes::from("a")));
    }
}
