//! Core data types: operations and per-object states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lastid::{OperationId, ReplicationId};

/// The kind of change an operation describes.
///
/// Only these three kinds are ever stored. The synthetic `reset` and `live`
/// stream markers are not operations (see [`crate::event`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

impl EventKind {
    /// Parses a lowercase event name.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "insert" => Ok(EventKind::Insert),
            "update" => Ok(EventKind::Update),
            "delete" => Ok(EventKind::Delete),
            other => Err(Error::InvalidOperation(format!(
                "invalid event name: {}",
                other
            ))),
        }
    }

    /// The wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Insert => "insert",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The data part of an operation, as exposed on the SSE stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationData {
    /// Last modification time of the object, supplied by the producer.
    pub timestamp: DateTime<Utc>,
    /// Parent references, canonically `type/id` tokens.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Object type token, e.g. `video`.
    #[serde(rename = "type")]
    pub object_type: String,
    /// Object id within the type.
    pub id: String,
    /// Reference URL rendered from the server's object URL template.
    /// Never stored; set at emission time only.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub object_ref: Option<String>,
}

impl OperationData {
    /// The object key `type/id` identifying the object across operations.
    pub fn object_key(&self) -> String {
        format!("{}/{}", self.object_type, self.id)
    }

    /// Checks the stored-operation invariants.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidOperation("missing id field".to_string()));
        }
        if self.object_type.is_empty() {
            return Err(Error::InvalidOperation("missing type field".to_string()));
        }
        if self.parents.iter().any(|p| p.is_empty()) {
            return Err(Error::InvalidOperation("parent can't be empty".to_string()));
        }
        Ok(())
    }

    /// Sets `ref` by substituting `{{type}}` and `{{id}}` in `template`.
    pub fn render_ref(&mut self, template: &str) {
        self.object_ref = Some(render_object_url(template, &self.object_type, &self.id));
    }
}

/// Renders an object reference URL from a template.
pub fn render_object_url(template: &str, object_type: &str, id: &str) -> String {
    template
        .replace("{{type}}", object_type)
        .replace("{{id}}", id)
}

/// An operation stored in (or destined for) the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// The store-assigned id. `None` until appended.
    #[serde(skip)]
    pub id: Option<OperationId>,
    pub event: EventKind,
    pub data: OperationData,
}

impl Operation {
    /// Checks the stored-operation invariants.
    pub fn validate(&self) -> Result<()> {
        self.data.validate()
    }

    /// A compact human readable description for logs.
    pub fn info(&self) -> String {
        let id = self
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "(new)".to_string());
        format!(
            "{}:{}({}:{})",
            id, self.event, self.data.object_type, self.data.id
        )
    }
}

/// The current state of an object, derived from the most recent operation
/// applied to it.
///
/// One row exists per object key. Updates collapse into `insert`; deletes
/// flip the row to `delete` without removing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectState {
    /// The object key `type/id`.
    #[serde(rename = "id")]
    pub key: String,
    /// `insert` or `delete`; never `update`.
    pub event: EventKind,
    /// Server wall-clock time of the last apply. Distinct from
    /// `data.timestamp`, which is producer-supplied.
    pub timestamp: DateTime<Utc>,
    /// The data of the last operation seen for this object.
    pub data: OperationData,
}

impl ObjectState {
    /// The replication-id of the state row, used as its SSE event id.
    pub fn event_id(&self) -> ReplicationId {
        ReplicationId::new(self.timestamp.timestamp_millis().max(0) as u64)
    }
}

/// A map of object key to operation data, as used by the sync diff.
pub type OperationDataMap = std::collections::HashMap<String, OperationData>;
