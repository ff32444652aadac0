//! The subscription state machine.
//!
//! A subscription is either *live tailing* the capped log or *replicating*
//! the state collection, with a one-way handoff from replication to live:
//!
//! - a replication last id positions a state scan whose upper bound is
//!   frozen to the log position when replication starts
//!   (`replication_fallback_id`);
//! - when the scan is exhausted a synthetic `live` event marks the boundary
//!   and tailing resumes from the frozen position, so no stored event is
//!   duplicated or lost across the handoff;
//! - an operation last id (or none) starts live immediately.
//!
//! Cancellation is the sink closing: when the receiving end of the event
//! channel is dropped, the tailer returns.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::event::{OplogEvent, SyntheticEvent, SyntheticKind};
use crate::filter::Filter;
use crate::lastid::{LastId, OperationId, ReplicationId};
use crate::store::{Backoff, StateScan, Store, Tailed};

enum State {
    Live { after: Option<OperationId> },
    Replicate { from: ReplicationId },
}

/// Drives subscriptions over a store.
pub struct Tailer {
    store: Arc<Store>,
    object_url: Option<String>,
}

impl Tailer {
    pub fn new(store: Arc<Store>, object_url: Option<String>) -> Self {
        Self { store, object_url }
    }

    /// Emits the event stream for a subscription into `sink` until the
    /// receiving end is dropped.
    ///
    /// `last_id` selects the starting mode: a replication id starts
    /// replication (preceded by a synthetic `reset` when it is zero), an
    /// operation id or `None` starts live tailing after that position or
    /// after the current end of the log.
    pub async fn tail(&self, last_id: Option<LastId>, filter: Filter, sink: mpsc::Sender<OplogEvent>) {
        let mut state = match last_id {
            Some(LastId::Replication(from)) => {
                if from.ms == 0 && !from.fallback {
                    // Full replication starts with a reset so the consumer
                    // clears its database first. The id is 1: a consumer
                    // that acked the reset and reconnects will not be sent
                    // a second one.
                    let reset = OplogEvent::Synthetic(SyntheticEvent {
                        id: "1".to_string(),
                        kind: SyntheticKind::Reset,
                    });
                    if sink.send(reset).await.is_err() {
                        return;
                    }
                }
                State::Replicate { from }
            }
            Some(LastId::Operation(id)) => State::Live { after: Some(id) },
            None => {
                // No resume position: tail from the current end of the log.
                let after = self.current_end(&sink).await;
                if sink.is_closed() {
                    return;
                }
                State::Live { after }
            }
        };

        loop {
            match state {
                State::Live { after } => {
                    self.live(after, &filter, &sink).await;
                    return;
                }
                State::Replicate { from } => match self.replicate(from, &filter, &sink).await {
                    Some(next) => state = next,
                    None => return,
                },
            }
        }
    }

    /// Resolves the current end of the log, retrying on store errors.
    async fn current_end(&self, sink: &mpsc::Sender<OplogEvent>) -> Option<OperationId> {
        let mut backoff = Backoff::new();
        loop {
            tokio::select! {
                result = self.store.last_id() => match result {
                    Ok(id) => return id,
                    Err(e) => {
                        tracing::warn!(error = %e, "tail failed reading log position, retrying");
                        tokio::time::sleep(backoff.next_delay()).await;
                    }
                },
                _ = sink.closed() => return None,
            }
        }
    }

    /// Live mode: stream the capped log in natural order until cancelled.
    async fn live(&self, mut after: Option<OperationId>, filter: &Filter, sink: &mpsc::Sender<OplogEvent>) {
        tracing::debug!("starting live updates");
        let mut backoff = Backoff::new();
        loop {
            let mut cursor = self.store.tail_ops(after, filter.clone());
            loop {
                let item = tokio::select! {
                    item = cursor.next() => item,
                    _ = sink.closed() => return,
                };
                match item {
                    Ok(Tailed::Op(mut op)) => {
                        backoff.reset();
                        // Resume position for cursor re-opens after errors.
                        after = op.id;
                        if let Some(url) = &self.object_url {
                            op.data.render_ref(url);
                        }
                        if sink.send(OplogEvent::Operation(op)).await.is_err() {
                            return;
                        }
                    }
                    Ok(Tailed::Timeout) => {
                        // End of data; re-enter the cursor.
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "tail failed, retrying");
                        tokio::time::sleep(backoff.next_delay()).await;
                        break;
                    }
                }
            }
        }
    }

    /// Replication mode: scan states within a frozen window, then hand off
    /// to live with a synthetic `live` boundary event.
    async fn replicate(
        &self,
        from: ReplicationId,
        filter: &Filter,
        sink: &mpsc::Sender<OplogEvent>,
    ) -> Option<State> {
        tracing::debug!(from = %from, fallback = from.fallback, "starting replication");

        // Capture the current log position before scanning. Live tailing
        // resumes here, and the scan window is frozen at this moment so
        // states applied during replication are delivered live instead.
        // The bound is taken from the wall clock rather than the captured
        // id: operation ids embed seconds, and truncating the window to a
        // second boundary would lose states applied earlier in the capture
        // second.
        let fallback_id = self.current_end(sink).await;
        if sink.is_closed() {
            return None;
        }
        let to_ms = Utc::now().timestamp_millis().max(0) as u64;

        let scan = StateScan {
            from_ms: from.ms,
            to_ms,
            // A consumer bootstrapping from scratch only wants live
            // objects. A fallback resume may have missed deletions, so
            // those are shipped too.
            include_deletes: from.fallback,
            filter: filter.clone(),
            limit: self.store.page_size(),
        };

        let mut backoff = Backoff::new();
        let mut cursor = None;
        let mut last_ev: Option<ReplicationId> = None;
        loop {
            let page = tokio::select! {
                page = self.store.scan_states(&scan, cursor.clone()) => page,
                _ = sink.closed() => return None,
            };
            match page {
                Ok(page) => {
                    backoff.reset();
                    for mut state in page.states {
                        last_ev = Some(state.event_id());
                        if let Some(url) = &self.object_url {
                            state.data.render_ref(url);
                        }
                        if sink.send(OplogEvent::State(state)).await.is_err() {
                            return None;
                        }
                    }
                    match page.cursor {
                        Some(next) => cursor = Some(next),
                        None => {
                            // Replication is done. The live marker carries
                            // the last replicated id so a consumer failing
                            // right after it resumes from that point.
                            let live = OplogEvent::Synthetic(SyntheticEvent {
                                id: last_ev.map(|id| id.to_string()).unwrap_or_default(),
                                kind: SyntheticKind::Live,
                            });
                            if sink.send(live).await.is_err() {
                                return None;
                            }
                            return Some(State::Live { after: fallback_id });
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "replication failed, retrying");
                    tokio::time::sleep(backoff.next_delay()).await;
                }
            }
        }
    }
}
