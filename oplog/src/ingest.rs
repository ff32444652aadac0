//! Operation ingestion: decoding, the bounded queue, and the appender task.
//!
//! Producers push operations into a bounded queue with a non-blocking send;
//! overflow drops the operation and bumps a counter rather than blocking the
//! reader. A single appender task drains the queue into the store, which
//! retries forever, so accepted operations are never lost downstream of the
//! queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::model::{EventKind, Operation, OperationData};
use crate::stats::Stats;
use crate::store::Store;

/// An operation ingested as JSON.
#[derive(Debug, Deserialize)]
struct InOperation {
    event: String,
    #[serde(default)]
    parents: Vec<String>,
    #[serde(rename = "type")]
    object_type: String,
    id: String,
    /// Optional; defaults to the receive time.
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

/// Parses and normalizes a JSON operation.
///
/// `event` and `type` are lowercased; a missing timestamp defaults to now.
/// The result satisfies the stored-operation invariants.
pub fn decode_operation(data: &[u8]) -> Result<Operation> {
    let incoming: InOperation =
        serde_json::from_slice(data).map_err(|e| Error::InvalidOperation(e.to_string()))?;

    let op = Operation {
        id: None,
        event: EventKind::parse(&incoming.event.to_lowercase())?,
        data: OperationData {
            timestamp: incoming.timestamp.unwrap_or_else(Utc::now),
            parents: incoming.parents,
            object_type: incoming.object_type.to_lowercase(),
            id: incoming.id,
            object_ref: None,
        },
    };
    op.validate()?;
    Ok(op)
}

/// Producer side of the bounded ingest queue.
#[derive(Clone)]
pub struct IngestQueue {
    tx: mpsc::Sender<Operation>,
    stats: Arc<Stats>,
}

impl IngestQueue {
    /// Creates the queue, returning the consumer end for the appender.
    pub fn bounded(queue_max: usize, stats: Arc<Stats>) -> (Self, mpsc::Receiver<Operation>) {
        let (tx, rx) = mpsc::channel(queue_max);
        (Self { tx, stats }, rx)
    }

    /// Enqueues an operation without blocking.
    ///
    /// Returns false when the queue is full and the operation was dropped.
    pub fn push(&self, op: Operation) -> bool {
        match self.tx.try_send(op) {
            Ok(()) => {
                self.update_queue_size();
                true
            }
            Err(mpsc::error::TrySendError::Full(op)) => {
                tracing::warn!(op = %op.info(), "ingest queue is full, dropping operation");
                self.stats.events_discarded.inc();
                false
            }
            Err(mpsc::error::TrySendError::Closed(op)) => {
                tracing::warn!(op = %op.info(), "ingest queue is closed, dropping operation");
                self.stats.events_discarded.inc();
                false
            }
        }
    }

    fn update_queue_size(&self) {
        let queued = self.tx.max_capacity() - self.tx.capacity();
        self.stats.queue_size.set(queued as i64);
    }
}

/// Spawns the appender task draining `rx` into the store.
///
/// The task ends when every producer handle has been dropped.
pub fn spawn_appender(
    store: Arc<Store>,
    mut rx: mpsc::Receiver<Operation>,
    stats: Arc<Stats>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(mut op) = rx.recv().await {
            stats.queue_size.set(rx.len() as i64);
            store.append(&mut op).await;
            stats.events_ingested.inc();
        }
        tracing::debug!("ingest appender stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::filter::Filter;
    use crate::store::Tailed;
    use chrono::TimeZone;
    use oplog_common::storage::in_memory::InMemoryStorage;

    fn test_store() -> Arc<Store> {
        Arc::new(Store::new(
            Arc::new(InMemoryStorage::new()),
            &Config::default(),
        ))
    }

    #[test]
    fn should_decode_and_normalize_operation() {
        // given
        let raw = br#"{"event":"INSERT","type":"Video","id":"x1","parents":["user/u1"],"timestamp":"2015-02-09T08:00:00Z"}"#;

        // when
        let op = decode_operation(raw).unwrap();

        // then
        assert_eq!(op.event, EventKind::Insert);
        assert_eq!(op.data.object_type, "video");
        assert_eq!(op.data.id, "x1");
        assert_eq!(
            op.data.timestamp,
            Utc.with_ymd_and_hms(2015, 2, 9, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn should_default_timestamp_to_now() {
        // given
        let raw = br#"{"event":"insert","type":"video","id":"x1","parents":[]}"#;
        let before = Utc::now();

        // when
        let op = decode_operation(raw).unwrap();

        // then
        assert!(op.data.timestamp >= before);
        assert!(op.data.timestamp <= Utc::now());
    }

    #[test]
    fn should_reject_invalid_json() {
        // given
        let raw = b"not json";

        // when
        let result = decode_operation(raw);

        // then
        assert!(matches!(result, Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn should_reject_unknown_event_names() {
        // given
        let raw = br#"{"event":"upsert","type":"video","id":"x1"}"#;

        // when/then
        assert!(decode_operation(raw).is_err());
    }

    #[test]
    fn should_reject_operations_failing_validation() {
        // given
        let raw = br#"{"event":"insert","type":"video","id":""}"#;

        // when/then
        assert!(decode_operation(raw).is_err());
    }

    #[tokio::test]
    async fn should_drop_on_queue_overflow_and_count_it() {
        // given
        let stats = Arc::new(Stats::new(1));
        let (queue, _rx) = IngestQueue::bounded(1, stats.clone());
        let op = decode_operation(br#"{"event":"insert","type":"video","id":"x1"}"#).unwrap();

        // when
        let first = queue.push(op.clone());
        let second = queue.push(op);

        // then
        assert!(first);
        assert!(!second);
        assert_eq!(stats.events_discarded.get(), 1);
    }

    #[tokio::test]
    async fn should_append_queued_operations_exactly_once() {
        // given
        let store = test_store();
        let stats = Arc::new(Stats::new(16));
        let (queue, rx) = IngestQueue::bounded(16, stats.clone());
        let handle = spawn_appender(store.clone(), rx, stats.clone());

        // when
        let op = decode_operation(br#"{"event":"insert","type":"video","id":"x1"}"#).unwrap();
        assert!(queue.push(op));
        drop(queue);
        handle.await.unwrap();

        // then
        assert_eq!(stats.events_ingested.get(), 1);
        let mut cursor = store.tail_ops(None, Filter::default());
        match cursor.next().await.unwrap() {
            Tailed::Op(stored) => assert_eq!(stored.data.object_key(), "video/x1"),
            Tailed::Timeout => panic!("expected the ingested operation"),
        }
    }
}
