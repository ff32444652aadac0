//! The stream event variants and their SSE framing.
//!
//! A subscription carries heterogeneous records: stored operations during
//! live tailing, object states during replication, and the synthetic
//! `reset`/`live` markers the tailer emits at subscription boundaries. They
//! are modeled as one tagged variant with a common event id and wire
//! serialization.

use std::fmt::Write;

use crate::error::Result;
use crate::model::{ObjectState, Operation};

/// A synthetic stream marker carrying no data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticEvent {
    /// The event id exposed on the stream; may be empty.
    pub id: String,
    pub kind: SyntheticKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticKind {
    /// Instructs the consumer to reset its database before processing
    /// further operations.
    Reset,
    /// Marks the end of replication; subsequent events are live.
    Live,
}

impl SyntheticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyntheticKind::Reset => "reset",
            SyntheticKind::Live => "live",
        }
    }
}

/// Any event a subscription can emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OplogEvent {
    /// A stored operation, emitted while live tailing.
    Operation(Operation),
    /// An object state, emitted while replicating.
    State(ObjectState),
    /// A `reset` or `live` marker.
    Synthetic(SyntheticEvent),
}

impl OplogEvent {
    /// The SSE event id.
    ///
    /// Operations use their hex operation id, states their millisecond
    /// replication id, synthetic events whatever id they were built with.
    pub fn event_id(&self) -> String {
        match self {
            OplogEvent::Operation(op) => {
                op.id.map(|id| id.to_string()).unwrap_or_default()
            }
            OplogEvent::State(state) => state.event_id().to_string(),
            OplogEvent::Synthetic(ev) => ev.id.clone(),
        }
    }

    /// The SSE event name.
    pub fn event_name(&self) -> &str {
        match self {
            OplogEvent::Operation(op) => op.event.as_str(),
            OplogEvent::State(state) => state.event.as_str(),
            OplogEvent::Synthetic(ev) => ev.kind.as_str(),
        }
    }

    /// Serializes the event as one SSE frame, appended to `buf`.
    ///
    /// Synthetic events have no `data:` line; operations and states carry
    /// their data as single-line JSON.
    pub fn write_sse(&self, buf: &mut String) -> Result<()> {
        let id = self.event_id();
        write!(buf, "id: {}\nevent: {}\n", id, self.event_name())
            .expect("writing to a String cannot fail");
        match self {
            OplogEvent::Operation(op) => {
                let data = serde_json::to_string(&op.data)?;
                write!(buf, "data: {}\n", data).expect("writing to a String cannot fail");
            }
            OplogEvent::State(state) => {
                let data = serde_json::to_string(&state.data)?;
                write!(buf, "data: {}\n", data).expect("writing to a String cannot fail");
            }
            OplogEvent::Synthetic(_) => {}
        }
        buf.push('\n');
        Ok(())
    }
}
