use crate::{KVStore, Result, StorageError, Transaction as KVTransaction};
use bytes::Bytes;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

// Table definitions
const KV_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("kv");
/// Expiry deadline (unix millis) for keys written with a TTL
const EXPIRY_TABLE: TableDefinition<&[u8], u64> = TableDefinition::new("kv_expiry");

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn expired(deadline: Option<u64>) -> bool {
    matches!(deadline, Some(at) if at <= now_millis())
}

/// redb-based storage backend
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Create a new RedbBackend
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening redb database at: {}", path.as_ref().display());

        let db = Database::create(path.as_ref()).map_err(|e| {
            StorageError::database_error(
                format!("Failed to create database: {}", e),
                Some(Box::new(e)),
            )
        })?;

        // Create tables if they don't exist
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(KV_TABLE)?;
            let _ = write_txn.open_table(EXPIRY_TABLE)?;
        }
        write_txn.commit()?;

        info!("redb database initialized successfully");

        Ok(Self { db: Arc::new(db) })
    }

    /// Remove every key whose TTL has passed, returning how many went
    pub fn purge_expired(&self) -> Result<usize> {
        let write_txn = self.db.begin_write()?;
        let purged = purge_expired_in(&write_txn)?;
        write_txn.commit()?;
        Ok(purged)
    }
}

/// Drop expired keys from both tables inside `write_txn`
fn purge_expired_in(write_txn: &redb::WriteTransaction) -> Result<usize> {
    let now = now_millis();
    let mut expiry = write_txn.open_table(EXPIRY_TABLE)?;

    let mut dead = Vec::new();
    for entry in expiry.iter()? {
        let (key, deadline) = entry?;
        if deadline.value() <= now {
            dead.push(key.value().to_vec());
        }
    }
    if dead.is_empty() {
        return Ok(0);
    }

    let mut table = write_txn.open_table(KV_TABLE)?;
    for key in &dead {
        table.remove(key.as_slice())?;
        expiry.remove(key.as_slice())?;
    }

    debug!("Purged {} expired keys", dead.len());
    Ok(dead.len())
}

impl KVStore for RedbBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        debug!("Getting key: {:?}", String::from_utf8_lossy(key));

        let read_txn = self.db.begin_read()?;
        let expiry = read_txn.open_table(EXPIRY_TABLE)?;
        if expired(expiry.get(key)?.map(|v| v.value())) {
            return Ok(None);
        }

        let table = read_txn.open_table(KV_TABLE)?;
        match table.get(key)? {
            Some(value) => Ok(Some(Bytes::from(value.value().to_vec()))),
            None => Ok(None),
        }
    }

    fn put_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<()> {
        debug!(
            "Putting key: {:?} (ttl {:?})",
            String::from_utf8_lossy(key),
            ttl
        );

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(KV_TABLE)?;
            table.insert(key, value)?;

            let mut expiry = write_txn.open_table(EXPIRY_TABLE)?;
            if ttl.is_zero() {
                expiry.remove(key)?;
            } else {
                expiry.insert(key, now_millis().saturating_add(ttl.as_millis() as u64))?;
            }
        }
        purge_expired_in(&write_txn)?;
        write_txn.commit()?;

        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        debug!("Deleting key: {:?}", String::from_utf8_lossy(key));

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(KV_TABLE)?;
            table.remove(key)?;
            let mut expiry = write_txn.open_table(EXPIRY_TABLE)?;
            expiry.remove(key)?;
        }
        write_txn.commit()?;

        Ok(())
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        debug!(
            "Scanning with prefix: {:?}",
            String::from_utf8_lossy(prefix)
        );

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(KV_TABLE)?;
        let expiry = read_txn.open_table(EXPIRY_TABLE)?;

        let mut results = Vec::new();

        for entry in table.iter()? {
            let (key, value) = entry?;
            let key_bytes = key.value();

            if !key_bytes.starts_with(prefix) {
                continue;
            }
            if expired(expiry.get(key_bytes)?.map(|v| v.value())) {
                continue;
            }

            results.push((
                Bytes::from(key_bytes.to_vec()),
                Bytes::from(value.value().to_vec()),
            ));
        }

        debug!("Scan found {} results", results.len());
        Ok(results)
    }

    fn transaction(&self) -> Result<Box<dyn KVTransaction>> {
        let write_txn = self.db.begin_write()?;
        Ok(Box::new(RedbTransaction {
            txn: Some(write_txn),
            committed: false,
        }))
    }
}

/// redb transaction implementation
///
/// redb admits one write transaction at a time, so reads inside it are
/// isolated from every other writer until commit.
struct RedbTransaction {
    txn: Option<redb::WriteTransaction>,
    committed: bool,
}

impl RedbTransaction {
    fn txn(&self) -> Result<&redb::WriteTransaction> {
        self.txn.as_ref().ok_or_else(|| {
            StorageError::transaction_error("Transaction already committed or rolled back")
        })
    }
}

impl KVTransaction for RedbTransaction {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let txn = self.txn()?;

        let expiry = txn.open_table(EXPIRY_TABLE)?;
        if expired(expiry.get(key)?.map(|v| v.value())) {
            return Ok(None);
        }

        let table = txn.open_table(KV_TABLE)?;
        let result = table
            .get(key)?
            .map(|value| Bytes::from(value.value().to_vec()));

        Ok(result)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let txn = self.txn()?;

        let mut table = txn.open_table(KV_TABLE)?;
        table.insert(key, value)?;
        let mut expiry = txn.open_table(EXPIRY_TABLE)?;
        expiry.remove(key)?;

        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        let txn = self.txn()?;

        let mut table = txn.open_table(KV_TABLE)?;
        table.remove(key)?;
        let mut expiry = txn.open_table(EXPIRY_TABLE)?;
        expiry.remove(key)?;

        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        let txn = self.txn.take().ok_or_else(|| {
            StorageError::transaction_error("Transaction already committed or rolled back")
        })?;

        txn.commit()?;
        self.committed = true;

        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        let txn = self.txn.take().ok_or_else(|| {
            StorageError::transaction_error("Transaction already committed or rolled back")
        })?;

        txn.abort()?;

        Ok(())
    }
}

impl Drop for RedbTransaction {
    fn drop(&mut self) {
        if !self.committed {
            // Auto-rollback if not committed
            if let Some(txn) = self.txn.take() {
                let _ = txn.abort();
            }
        }
    }
}
