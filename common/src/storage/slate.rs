//! SlateDB storage backend.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use slatedb::{Db, DbIterator, DbReader, WriteBatch};

use crate::bytes::BytesRange;

use super::{Record, RecordOp, Storage, StorageError, StorageIterator, StorageRead, StorageResult};

fn storage_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::Storage(e.to_string())
}

/// Writable SlateDB-backed storage.
pub struct SlateDbStorage {
    db: Arc<Db>,
}

impl SlateDbStorage {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }
}

struct SlateDbIterator<'a> {
    inner: DbIterator<'a>,
}

#[async_trait]
impl StorageIterator for SlateDbIterator<'_> {
    async fn next(&mut self) -> StorageResult<Option<Record>> {
        let next = self.inner.next().await.map_err(storage_err)?;
        Ok(next.map(|kv| Record {
            key: kv.key,
            value: kv.value,
        }))
    }
}

#[async_trait]
impl StorageRead for SlateDbStorage {
    async fn get(&self, key: Bytes) -> StorageResult<Option<Record>> {
        let value = self.db.get(&key).await.map_err(storage_err)?;
        Ok(value.map(|value| Record { key, value }))
    }

    async fn scan_iter(
        &self,
        range: BytesRange,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>> {
        let inner = self.db.scan::<Bytes, _>(range).await.map_err(storage_err)?;
        Ok(Box::new(SlateDbIterator { inner }))
    }
}

#[async_trait]
impl Storage for SlateDbStorage {
    async fn apply(&self, ops: Vec<RecordOp>) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        for op in ops {
            match op {
                RecordOp::Put(record) => batch.put(&record.key, &record.value),
                RecordOp::Delete(key) => batch.delete(&key),
            }
        }
        self.db.write(batch).await.map_err(storage_err)
    }

    async fn flush(&self) -> StorageResult<()> {
        self.db.flush().await.map_err(storage_err)
    }

    async fn close(&self) -> StorageResult<()> {
        self.db.close().await.map_err(storage_err)
    }
}

/// Read-only SlateDB storage over a `DbReader`.
///
/// Readers do not participate in writer fencing, so any number of them can
/// coexist with a single writer.
pub struct SlateDbStorageReader {
    reader: Arc<DbReader>,
}

impl SlateDbStorageReader {
    pub fn new(reader: Arc<DbReader>) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl StorageRead for SlateDbStorageReader {
    async fn get(&self, key: Bytes) -> StorageResult<Option<Record>> {
        let value = self.reader.get(&key).await.map_err(storage_err)?;
        Ok(value.map(|value| Record { key, value }))
    }

    async fn scan_iter(
        &self,
        range: BytesRange,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>> {
        let inner = self
            .reader
            .scan::<Bytes, _>(range)
            .await
            .map_err(storage_err)?;
        Ok(Box::new(SlateDbIterator { inner }))
    }
}
