//! Storage abstraction shared by the oplog services.
//!
//! The oplog core is written against the [`Storage`] and [`StorageRead`]
//! traits rather than a concrete database. Two backends are provided:
//!
//! - [`in_memory::InMemoryStorage`]: a `BTreeMap`-backed store for tests and
//!   ephemeral deployments.
//! - [`slate::SlateDbStorage`]: a SlateDB database over an object store for
//!   durable deployments.
//!
//! Backends are created from a [`config::StorageConfig`] through
//! [`factory::create_storage`].

pub mod config;
pub mod factory;
pub mod in_memory;
pub mod slate;

use async_trait::async_trait;
use bytes::Bytes;

use crate::bytes::BytesRange;

/// A key/value pair stored in or read from a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Bytes,
    pub value: Bytes,
}

/// A single mutation applied through [`Storage::apply`].
#[derive(Debug, Clone)]
pub enum RecordOp {
    Put(Record),
    Delete(Bytes),
}

/// Error type for storage operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend failure (I/O, object store, corruption).
    Storage(String),
    /// Bug or invariant violation inside a backend.
    Internal(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Storage(msg) => write!(f, "storage error: {}", msg),
            StorageError::Internal(msg) => write!(f, "internal storage error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Iterator over records within a scan range, in key order.
#[async_trait]
pub trait StorageIterator {
    /// Returns the next record, or `None` when the range is exhausted.
    async fn next(&mut self) -> StorageResult<Option<Record>>;
}

/// Read operations on a storage backend.
#[async_trait]
pub trait StorageRead: Send + Sync {
    /// Point lookup for a single key.
    async fn get(&self, key: Bytes) -> StorageResult<Option<Record>>;

    /// Ordered scan over `range`.
    async fn scan_iter(
        &self,
        range: BytesRange,
    ) -> StorageResult<Box<dyn StorageIterator + Send + 'static>>;
}

/// Full read/write access to a storage backend.
///
/// `apply` is atomic: either every mutation in the batch is visible or none
/// is. The oplog relies on this to keep the op row, the state row, and its
/// timestamp index consistent.
#[async_trait]
pub trait Storage: StorageRead {
    /// Applies a batch of mutations atomically.
    async fn apply(&self, ops: Vec<RecordOp>) -> StorageResult<()>;

    /// Inserts or replaces records. Shorthand for an all-`Put` batch.
    async fn put(&self, records: Vec<Record>) -> StorageResult<()> {
        self.apply(records.into_iter().map(RecordOp::Put).collect())
            .await
    }

    /// Forces pending writes to durable storage.
    async fn flush(&self) -> StorageResult<()>;

    /// Closes the backend, flushing pending writes.
    async fn close(&self) -> StorageResult<()>;
}
