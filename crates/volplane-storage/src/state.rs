use crate::{IndexKey, KVStore, KeyEncoder, StorageError, Transaction, NO_EXPIRY};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};
use volplane_core::{Result, VolumeError, VolumeId, VolumeRecord, RECORD_SCHEMA_VERSION};

/// Per-driver namespaced persistence for volume records
///
/// Performs no locking: callers serialize their own read-modify-write
/// cycles per volume ID. Multi-key updates (record plus name index) are
/// done in a single store transaction.
/// Commits retried after losing an optimistic race before giving up
const MAX_TRANSACTION_ATTEMPTS: u32 = 64;

#[derive(Clone)]
pub struct VolumeStateStore {
    store: Arc<dyn KVStore>,
    prefix: String,
}

#[derive(Deserialize)]
struct SchemaHeader {
    schema_version: u32,
}

fn encode(record: &VolumeRecord) -> std::result::Result<Vec<u8>, StorageError> {
    Ok(serde_json::to_vec(record)?)
}

fn decode(bytes: &[u8]) -> std::result::Result<VolumeRecord, StorageError> {
    let header: SchemaHeader = serde_json::from_slice(bytes)?;
    if header.schema_version > RECORD_SCHEMA_VERSION {
        return Err(StorageError::IncompatibleSchema {
            found: header.schema_version,
            supported: RECORD_SCHEMA_VERSION,
        });
    }
    Ok(serde_json::from_slice(bytes)?)
}

fn read_index(
    txn: &dyn Transaction,
    key: &str,
) -> std::result::Result<Vec<VolumeId>, StorageError> {
    match txn.get(key.as_bytes())? {
        Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        None => Ok(Vec::new()),
    }
}

impl VolumeStateStore {
    /// Create a store namespaced under `prefix`
    pub fn new(store: Arc<dyn KVStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, id: &VolumeId) -> String {
        KeyEncoder::encode_volume_key(&self.prefix, id)
    }

    fn name_index(&self, name: &str) -> String {
        IndexKey::locator_name(&self.prefix, name).encode()
    }

    /// Load a record, or `NotFound` if no record is persisted for `id`
    pub fn get(&self, id: &VolumeId) -> Result<VolumeRecord> {
        let key = self.key(id);
        debug!("Loading volume record {}", key);

        let bytes = self
            .store
            .get(key.as_bytes())?
            .ok_or_else(|| VolumeError::volume_not_found(id.as_str()))?;

        Ok(decode(&bytes)?)
    }

    /// Overwrite a record
    pub fn put(&self, record: &VolumeRecord) -> Result<()> {
        let key = self.key(&record.id);
        debug!("Storing volume record {}", key);

        let bytes = encode(record)?;
        self.store.put_with_ttl(key.as_bytes(), &bytes, NO_EXPIRY)?;
        Ok(())
    }

    /// Delete a record; deleting an absent record succeeds
    pub fn delete(&self, id: &VolumeId) -> Result<()> {
        let key = self.key(id);
        debug!("Deleting volume record {}", key);
        self.store.delete(key.as_bytes())?;
        Ok(())
    }

    /// Whether a record is persisted for `id`
    pub fn exists(&self, id: &VolumeId) -> Result<bool> {
        Ok(self.store.exists(self.key(id).as_bytes())?)
    }

    /// Every record owned by this prefix
    pub fn list(&self) -> Result<Vec<VolumeRecord>> {
        let entries = self
            .store
            .scan(KeyEncoder::encode_prefix(&self.prefix).as_bytes())?;

        let mut records = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let key = String::from_utf8_lossy(&key);
            if KeyEncoder::parse_volume_key(&self.prefix, &key).is_none() {
                warn!("Skipping malformed volume key {}", key);
                continue;
            }
            records.push(decode(&value)?);
        }

        Ok(records)
    }

    /// IDs of the volumes whose locator carries `name`
    pub fn ids_by_name(&self, name: &str) -> Result<Vec<VolumeId>> {
        let ids = match self.store.get(self.name_index(name).as_bytes())? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(StorageError::from)?,
            None => Vec::new(),
        };
        Ok(ids)
    }

    /// Persist a brand-new record together with its name index entry
    ///
    /// Fails with `AlreadyExists` if the ID is taken, or if `unique_name` is
    /// set and another volume already carries the locator name.
    pub fn insert_new(&self, record: &VolumeRecord, unique_name: bool) -> Result<()> {
        let key = self.key(&record.id);
        let name = &record.locator.name;

        self.in_transaction(|txn| {
            if txn.get(key.as_bytes())?.is_some() {
                return Ok(Err(VolumeError::already_exists(record.id.as_str(), "volume")));
            }

            if !name.is_empty() {
                let index_key = self.name_index(name);
                let mut ids = read_index(&*txn, &index_key)?;
                if unique_name && !ids.is_empty() {
                    return Ok(Err(VolumeError::already_exists(name.as_str(), "volume name")));
                }
                ids.push(record.id.clone());
                txn.put(index_key.as_bytes(), &serde_json::to_vec(&ids)?)?;
            }

            txn.put(key.as_bytes(), &encode(record)?)?;
            Ok(Ok(()))
        })?;

        debug!("Inserted volume record {}", key);
        Ok(())
    }

    /// Delete a record and its name index entry
    pub fn remove(&self, record: &VolumeRecord) -> Result<()> {
        let key = self.key(&record.id);
        let name = &record.locator.name;

        self.in_transaction(|txn| {
            txn.delete(key.as_bytes())?;

            if !name.is_empty() {
                let index_key = self.name_index(name);
                let mut ids = read_index(&*txn, &index_key)?;
                ids.retain(|id| id != &record.id);
                if ids.is_empty() {
                    txn.delete(index_key.as_bytes())?;
                } else {
                    txn.put(index_key.as_bytes(), &serde_json::to_vec(&ids)?)?;
                }
            }
            Ok(Ok(()))
        })?;

        debug!("Removed volume record {}", key);
        Ok(())
    }

    /// Run `body` in a fresh transaction and commit it
    ///
    /// `body` returns `Ok(Err(_))` to reject the write; the transaction is
    /// rolled back and the rejection returned as is. A commit that loses an
    /// optimistic race is retried from a fresh read, up to
    /// `MAX_TRANSACTION_ATTEMPTS` times.
    fn in_transaction<T>(
        &self,
        mut body: impl FnMut(&mut dyn Transaction) -> std::result::Result<Result<T>, StorageError>,
    ) -> Result<T> {
        let mut attempt = 1;
        loop {
            let mut txn = self.store.transaction()?;
            let value = match body(txn.as_mut())? {
                Ok(value) => value,
                Err(rejected) => {
                    txn.rollback()?;
                    return Err(rejected);
                }
            };

            match txn.commit() {
                Ok(()) => return Ok(value),
                Err(StorageError::Conflict { key }) if attempt < MAX_TRANSACTION_ATTEMPTS => {
                    debug!("Retrying transaction after conflict on {} (attempt {})", key, attempt);
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
