use crate::domain::ports::ProjectionStore;
use crate::domain::record::{PersistedTransfer, TransferId};
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;

/// Column Family holding one JSON projection per transfer id.
pub const CF_TRANSFERS: &str = "transfers";

/// A persistent projection store backed by RocksDB.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBProjectionStore {
    db: Arc<DB>,
}

impl RocksDBProjectionStore {
    /// Opens or creates a RocksDB instance at `path`, creating the
    /// "transfers" column family when missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_transfers = ColumnFamilyDescriptor::new(CF_TRANSFERS, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf_transfers])?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db.cf_handle(CF_TRANSFERS).ok_or_else(|| {
            TransferError::StorageError(Box::new(std::io::Error::other(
                "Transfers column family not found",
            )))
        })
    }
}

#[async_trait]
impl ProjectionStore for RocksDBProjectionStore {
    async fn put(&self, projection: PersistedTransfer) -> Result<()> {
        let cf = self.cf()?;
        let value = serde_json::to_vec(&projection)?;
        self.db.put_cf(cf, projection.id.as_str().as_bytes(), value)?;
        Ok(())
    }

    async fn get(&self, id: &TransferId) -> Result<Option<PersistedTransfer>> {
        let cf = self.cf()?;
        match self.db.get_cf(cf, id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &TransferId) -> Result<()> {
        let cf = self.cf()?;
        self.db.delete_cf(cf, id.as_str().as_bytes())?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<PersistedTransfer>> {
        let cf = self.cf()?;
        let mut projections = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            projections.push(serde_json::from_slice(&value)?);
        }
        Ok(projections)
    }

    async fn clear(&self) -> Result<()> {
        let cf = self.cf()?;
        let mut batch = WriteBatch::default();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _value) = item?;
            batch.delete_cf(cf, key);
        }
        self.db.write(batch)?;
        Ok(())
    }
}
