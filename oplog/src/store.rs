//! The oplog store: a capped operation log plus a compacted state
//! collection over a single ordered key/value backend.
//!
//! Appends are durable-or-bust: the store retries forever with exponential
//! backoff rather than dropping an accepted operation. Reads surface errors
//! to the caller, which converts them into a retry (see [`crate::tail`]).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use oplog_common::{create_storage, Record, RecordOp, Storage, StorageIterator};

use crate::config::Config;
use crate::error::Result;
use crate::filter::Filter;
use crate::lastid::{LastId, OpIdGenerator, OperationId};
use crate::model::{EventKind, ObjectState, Operation};
use crate::serde::{
    decode_op_key, decode_state_index_key, meta_key, op_key, ops_range, state_index_key,
    state_index_range, state_index_range_after, state_key, states_range,
};

/// How long a tail cursor blocks at the end of the log before yielding a
/// timeout marker.
const TAIL_TIMEOUT: Duration = Duration::from_secs(5);

/// Initial and maximum delay for retry backoff.
const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Exponential backoff, doubling from 1s to a 30s cap.
pub(crate) struct Backoff {
    delay: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            delay: BACKOFF_INITIAL,
        }
    }

    /// Returns the next delay and doubles the internal state.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = (self.delay * 2).min(BACKOFF_MAX);
        delay
    }

    pub fn reset(&mut self) {
        self.delay = BACKOFF_INITIAL;
    }
}

/// The store metadata row.
///
/// `last_id` survives eviction of the operation rows it refers to, and
/// `log_bytes` keeps the capped-log accounting consistent across restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreMeta {
    last_id: Option<OperationId>,
    log_bytes: u64,
}

/// The oplog store.
pub struct Store {
    storage: Arc<dyn Storage>,
    generator: OpIdGenerator,
    appended: Arc<Notify>,
    // Serializes appends: id assignment and the capped-log accounting are
    // read-modify-write over the meta row.
    write_lock: tokio::sync::Mutex<()>,
    cap_max_bytes: u64,
    page_size: usize,
}

impl Store {
    /// Opens a store over the backend selected by `config`.
    pub async fn open(config: &Config) -> Result<Self> {
        let storage = create_storage(&config.storage).await?;
        Ok(Self::new(storage, config))
    }

    /// Creates a store over an existing backend.
    pub fn new(storage: Arc<dyn Storage>, config: &Config) -> Self {
        Self {
            storage,
            generator: OpIdGenerator::new(),
            appended: Arc::new(Notify::new()),
            write_lock: tokio::sync::Mutex::new(()),
            cap_max_bytes: config.cap_max_bytes,
            page_size: config.page_size,
        }
    }

    /// The configured replication page size.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    async fn read_meta(&self) -> Result<StoreMeta> {
        match self.storage.get(meta_key()).await? {
            Some(record) => Ok(serde_json::from_slice(&record.value)?),
            None => Ok(StoreMeta::default()),
        }
    }

    /// Appends an operation to the log and applies it to the state
    /// collection, retrying forever on storage errors.
    ///
    /// Assigns and returns the operation id; `op.id` is set on return.
    pub async fn append(&self, op: &mut Operation) -> OperationId {
        tracing::debug!(op = %op.info(), "ingest operation");
        let mut backoff = Backoff::new();
        loop {
            match self.try_append(op).await {
                Ok(id) => {
                    op.id = Some(id);
                    self.appended.notify_waiters();
                    return id;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "can't append operation, retrying");
                    tokio::time::sleep(backoff.next_delay()).await;
                }
            }
        }
    }

    async fn try_append(&self, op: &Operation) -> Result<OperationId> {
        let _guard = self.write_lock.lock().await;
        let meta = self.read_meta().await?;

        // Assigned ids must be strictly monotonic for the op keys to sort in
        // append order.
        let mut id = self.generator.next(Utc::now());
        if let Some(last) = meta.last_id {
            if id <= last {
                id = last.successor();
            }
        }

        // `ref` is render-only; stored rows never carry it.
        let mut data = op.data.clone();
        data.object_ref = None;

        let op_row_key = op_key(&id);
        let op_row_value = Bytes::from(serde_json::to_vec(&Operation {
            id: None,
            event: op.event,
            data: data.clone(),
        })?);

        let mut batch = Vec::new();
        let mut log_bytes =
            meta.log_bytes + (op_row_key.len() + op_row_value.len()) as u64;
        batch.push(RecordOp::Put(Record {
            key: op_row_key,
            value: op_row_value,
        }));

        // Updates collapse into insert: the state collection only records
        // whether the object exists and its latest data.
        let state_event = match op.event {
            EventKind::Update => EventKind::Insert,
            other => other,
        };
        let object_key = data.object_key();
        let applied_at = Utc::now();
        let state = ObjectState {
            key: object_key.clone(),
            event: state_event,
            timestamp: applied_at,
            data,
        };
        let applied_ms = applied_at.timestamp_millis().max(0) as u64;

        // Replace the by-time index row for this object.
        if let Some(previous) = self.storage.get(state_key(&object_key)).await? {
            let previous: ObjectState = serde_json::from_slice(&previous.value)?;
            let previous_ms = previous.timestamp.timestamp_millis().max(0) as u64;
            if previous_ms != applied_ms {
                batch.push(RecordOp::Delete(state_index_key(previous_ms, &object_key)));
            }
        }
        batch.push(RecordOp::Put(Record {
            key: state_key(&object_key),
            value: Bytes::from(serde_json::to_vec(&state)?),
        }));
        batch.push(RecordOp::Put(Record {
            key: state_index_key(applied_ms, &object_key),
            value: Bytes::new(),
        }));

        // Evict the oldest operations past the cap. States and meta are
        // never evicted.
        if log_bytes > self.cap_max_bytes {
            let mut oldest = self.storage.scan_iter(ops_range(None)).await?;
            while log_bytes > self.cap_max_bytes {
                let Some(record) = oldest.next().await? else {
                    break;
                };
                log_bytes -= (record.key.len() + record.value.len()) as u64;
                batch.push(RecordOp::Delete(record.key));
            }
        }

        batch.push(RecordOp::Put(Record {
            key: meta_key(),
            value: Bytes::from(serde_json::to_vec(&StoreMeta {
                last_id: Some(id),
                log_bytes,
            })?),
        }));

        self.storage.apply(batch).await?;
        Ok(id)
    }

    /// The most recently assigned operation id, if any operation was ever
    /// appended. Survives eviction of the operation itself.
    pub async fn last_id(&self) -> Result<Option<OperationId>> {
        Ok(self.read_meta().await?.last_id)
    }

    /// Checks whether a last id still resolves in the store. Replication
    /// ids are timestamps, not keys, and are always considered present.
    pub async fn has_id(&self, id: &LastId) -> Result<bool> {
        match id {
            LastId::Replication(_) => Ok(true),
            LastId::Operation(op_id) => {
                Ok(self.storage.get(op_key(op_id)).await?.is_some())
            }
        }
    }

    /// Opens a tail cursor over operations strictly after `after`.
    pub fn tail_ops(&self, after: Option<OperationId>, filter: Filter) -> TailCursor {
        TailCursor {
            storage: self.storage.clone(),
            appended: self.appended.clone(),
            after,
            filter,
            iter: None,
            timeout: TAIL_TIMEOUT,
        }
    }

    /// Scans one page of object states within a replication window.
    ///
    /// Pass `cursor` from the previous page to continue; a `None` cursor in
    /// the result means the window is exhausted.
    pub async fn scan_states(
        &self,
        scan: &StateScan,
        cursor: Option<Bytes>,
    ) -> Result<StatePage> {
        let range = match cursor {
            Some(cursor) => state_index_range_after(cursor, scan.to_ms),
            None => state_index_range(scan.from_ms, scan.to_ms),
        };
        let mut iter = self.storage.scan_iter(range).await?;
        let mut states = Vec::new();
        loop {
            let Some(record) = iter.next().await? else {
                return Ok(StatePage {
                    states,
                    cursor: None,
                });
            };
            let position = record.key.clone();
            let (ts_ms, object_key) = decode_state_index_key(&record.key)?;
            let Some(row) = self.storage.get(state_key(&object_key)).await? else {
                continue;
            };
            let state: ObjectState = serde_json::from_slice(&row.value)?;
            // A row whose apply time moved on has a fresher index entry
            // elsewhere in the scan; skip the stale one.
            if state.timestamp.timestamp_millis().max(0) as u64 != ts_ms {
                continue;
            }
            if state.event == EventKind::Delete && !scan.include_deletes {
                continue;
            }
            if !scan.filter.matches(&state.data) {
                continue;
            }
            states.push(state);
            if states.len() >= scan.limit {
                return Ok(StatePage {
                    states,
                    cursor: Some(position),
                });
            }
        }
    }

    /// Scans every state row, in object-key order. Used by the sync diff.
    pub async fn scan_all_states(&self) -> Result<StateIter> {
        let iter = self.storage.scan_iter(states_range()).await?;
        Ok(StateIter { iter })
    }
}

/// Parameters of a replication scan.
#[derive(Debug, Clone)]
pub struct StateScan {
    /// Inclusive lower bound on the apply time, in milliseconds.
    pub from_ms: u64,
    /// Inclusive upper bound on the apply time, in milliseconds. Freezing
    /// this to the moment replication starts keeps later live updates from
    /// being shipped twice.
    pub to_ms: u64,
    /// Whether `delete` states are shipped. Only fallback resumes need
    /// them; a fresh consumer wants only live objects.
    pub include_deletes: bool,
    pub filter: Filter,
    /// Page size.
    pub limit: usize,
}

/// One page of a replication scan.
pub struct StatePage {
    pub states: Vec<ObjectState>,
    /// Continuation position, or `None` when the window is exhausted.
    pub cursor: Option<Bytes>,
}

/// Iterator over every state row.
pub struct StateIter {
    iter: Box<dyn StorageIterator + Send>,
}

impl StateIter {
    pub async fn next(&mut self) -> Result<Option<ObjectState>> {
        match self.iter.next().await? {
            Some(record) => Ok(Some(serde_json::from_slice(&record.value)?)),
            None => Ok(None),
        }
    }
}

/// An item yielded by a [`TailCursor`].
#[derive(Debug)]
pub enum Tailed {
    /// The next operation in natural log order.
    Op(Operation),
    /// No operation arrived within the tail timeout; the caller re-enters.
    Timeout,
}

/// Cursor tailing the capped log in natural order.
///
/// At the end of data the cursor parks on the store's append notification
/// for up to the tail timeout, then yields [`Tailed::Timeout`].
pub struct TailCursor {
    storage: Arc<dyn Storage>,
    appended: Arc<Notify>,
    after: Option<OperationId>,
    filter: Filter,
    iter: Option<Box<dyn StorageIterator + Send>>,
    timeout: Duration,
}

impl TailCursor {
    pub async fn next(&mut self) -> Result<Tailed> {
        loop {
            if self.iter.is_none() {
                let fresh = self
                    .storage
                    .scan_iter(ops_range(self.after.as_ref()))
                    .await?;
                self.iter = Some(fresh);
            }
            let iter = self.iter.as_mut().expect("iterator was just opened");

            match iter.next().await? {
                Some(record) => {
                    let id = decode_op_key(&record.key)?;
                    self.after = Some(id);
                    let mut op: Operation = serde_json::from_slice(&record.value)?;
                    op.id = Some(id);
                    if self.filter.matches(&op.data) {
                        return Ok(Tailed::Op(op));
                    }
                }
                None => {
                    // The scan is a snapshot; drop it and wait for an append
                    // before re-scanning past the last seen id.
                    self.iter = None;
                    let notified = self.appended.notified();
                    if tokio::time::timeout(self.timeout, notified).await.is_err() {
                        return Ok(Tailed::Timeout);
                    }
                }
            }
        }
    }
}
