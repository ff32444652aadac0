//! In-memory storage backend.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use crate::bytes::BytesRange;

use super::{Record, RecordOp, Storage, StorageError, StorageIterator, StorageRead, StorageResult};

/// `BTreeMap`-backed storage for tests and ephemeral deployments.
///
/// Scans operate on a snapshot taken when the iterator is created; records
/// written after that are not visible to an open iterator. This matches the
/// read visibility the durable backend provides.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: RwLock<BTreeMap<Bytes, Bytes>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_poisoned() -> StorageError {
        StorageError::Internal("storage lock poisoned".to_string())
    }
}

struct SnapshotIterator {
    records: VecDeque<Record>,
}

#[async_trait]
impl StorageIterator for SnapshotIterator {
    async fn next(&mut self) -> StorageResult<Option<Record>> {
        Ok(self.records.pop_front())
    }
}

#[async_trait]
impl StorageRead for InMemoryStorage {
    async fn get(&self, key: Bytes) -> StorageResult<Option<Record>> {
        let map = self.inner.read().map_err(|_| Self::lock_poisoned())?;
        Ok(map.get(&key).map(|value| Record {
            key,
            value: value.clone(),
        }))
    }

    async fn scan_iter(
        &self,
        range: BytesRange,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>> {
        let map = self.inner.read().map_err(|_| Self::lock_poisoned())?;
        let records = map
            .range::<Bytes, _>(range)
            .map(|(key, value)| Record {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        Ok(Box::new(SnapshotIterator { records }))
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn apply(&self, ops: Vec<RecordOp>) -> StorageResult<()> {
        let mut map = self.inner.write().map_err(|_| Self::lock_poisoned())?;
        for op in ops {
            match op {
                RecordOp::Put(record) => {
                    map.insert(record.key, record.value);
                }
                RecordOp::Delete(key) => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn flush(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}
