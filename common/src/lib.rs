pub mod bytes;
pub mod serde;
pub mod storage;

pub use bytes::BytesRange;
pub use storage::config::StorageConfig;
pub use storage::factory::{create_storage, create_storage_read};
pub use storage::{
    Record, RecordOp, Storage, StorageError, StorageIterator, StorageRead, StorageResult,
};
