//! Configuration for the oplog core.

use oplog_common::StorageConfig;

/// Default maximum size of the capped operation log, in bytes.
pub const DEFAULT_CAP_MAX_BYTES: u64 = 100 * 1024 * 1024;

/// Default capacity of the ingest queue.
pub const DEFAULT_QUEUE_MAX: usize = 100_000;

/// Default page size for replication scans.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Configuration for an oplog instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage backend selection.
    pub storage: StorageConfig,
    /// Maximum size of the capped operation log in bytes. Oldest operations
    /// are evicted past this size; object states are never evicted.
    pub cap_max_bytes: u64,
    /// Number of operations the ingest queue holds before dropping.
    pub queue_max: usize,
    /// Page size for replication scans over the state collection.
    pub page_size: usize,
    /// Template used to render the `ref` field of emitted events, with
    /// `{{type}}` and `{{id}}` placeholders. No `ref` is emitted when unset.
    pub object_url: Option<String>,
    /// Shared password protecting the SSE stream and HTTP ingest.
    pub password: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::InMemory,
            cap_max_bytes: DEFAULT_CAP_MAX_BYTES,
            queue_max: DEFAULT_QUEUE_MAX,
            page_size: DEFAULT_PAGE_SIZE,
            object_url: None,
            password: None,
        }
    }
}
