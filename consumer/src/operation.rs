//! Operations as seen by a consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// An operation received from the oplog stream.
///
/// Synthetic `reset` and `live` events carry no data.
#[derive(Debug, Clone)]
pub struct Operation {
    /// The event id, used as the resume position once acknowledged.
    pub id: String,
    /// `insert`, `update`, `delete`, `reset`, or `live`.
    pub event: String,
    pub data: Option<OperationData>,
    ack: mpsc::UnboundedSender<String>,
}

/// The data part of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationData {
    pub id: String,
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub object_ref: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub parents: Vec<String>,
}

impl Operation {
    pub(crate) fn new(
        id: String,
        event: String,
        data: Option<OperationData>,
        ack: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            id,
            event,
            data,
            ack,
        }
    }

    /// Acknowledges the operation.
    ///
    /// Must be called once the operation has been processed. Unacknowledged
    /// operations hold back the persisted resume position, so failing to
    /// call this prevents resuming past them after a restart.
    pub fn done(&self) {
        // The receiving side only goes away when processing stops entirely.
        let _ = self.ack.send(self.id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_send_id_on_done() {
        // given
        let (tx, mut rx) = mpsc::unbounded_channel();
        let op = Operation::new("abc".to_string(), "insert".to_string(), None, tx);

        // when
        op.done();

        // then
        assert_eq!(rx.try_recv().unwrap(), "abc");
    }

    #[test]
    fn should_parse_operation_data_from_wire_json() {
        // given
        let json = r#"{"timestamp":"2015-02-09T08:00:00Z","parents":["user/u1"],"type":"video","id":"x1","ref":"http://api/video/x1"}"#;

        // when
        let data: OperationData = serde_json::from_str(json).unwrap();

        // then
        assert_eq!(data.object_type, "video");
        assert_eq!(data.id, "x1");
        assert_eq!(data.object_ref.as_deref(), Some("http://api/video/x1"));
        assert_eq!(data.parents, vec!["user/u1"]);
    }
}
