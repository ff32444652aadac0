//! Storage key encodings for the oplog.
//!
//! All rows live in one ordered key space. Keys start with a version byte
//! and a record type discriminator:
//!
//! ```text
//! | version (u8) | type (u8) | ... record-specific fields ... |
//! ```
//!
//! # Record Types
//!
//! - `Meta` (0x00): the single store metadata row (last assigned id, tracked
//!   log size).
//! - `Op` (0x01): a stored operation, keyed by its raw 12-byte id. Ids are
//!   assigned monotonically, so key order is append order.
//! - `State` (0x02): the current state of an object, keyed by the
//!   terminated-bytes encoding of its `type/id` object key.
//! - `StateIndex` (0x03): the by-time index over states, keyed by
//!   `| apply time ms (u64 BE) | terminated object key |`. Index rows have
//!   empty values; replication scans walk this index in timestamp order.
//!
//! Record type tags are contiguous, so the full range of one record type is
//! `[tag, next tag)`.

use std::ops::Bound;

use bytes::{BufMut, Bytes, BytesMut};
use oplog_common::serde::terminated_bytes;
use oplog_common::BytesRange;

use crate::error::{Error, Result};
use crate::lastid::{OperationId, OPERATION_ID_LEN};

/// Key format version (currently 0x01).
pub const KEY_VERSION: u8 = 0x01;

/// Record type discriminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Meta = 0x00,
    Op = 0x01,
    State = 0x02,
    StateIndex = 0x03,
}

impl RecordType {
    pub fn id(&self) -> u8 {
        *self as u8
    }
}

fn tag(record_type: RecordType) -> Bytes {
    Bytes::from(vec![KEY_VERSION, record_type.id()])
}

fn check_header(data: &[u8], record_type: RecordType) -> Result<()> {
    if data.len() < 2 {
        return Err(Error::Encoding("key too short".to_string()));
    }
    if data[0] != KEY_VERSION {
        return Err(Error::Encoding(format!(
            "invalid key version: expected 0x{:02x}, got 0x{:02x}",
            KEY_VERSION, data[0]
        )));
    }
    if data[1] != record_type.id() {
        return Err(Error::Encoding(format!(
            "invalid record type: expected 0x{:02x}, got 0x{:02x}",
            record_type.id(),
            data[1]
        )));
    }
    Ok(())
}

/// The key of the store metadata row.
pub fn meta_key() -> Bytes {
    tag(RecordType::Meta)
}

/// Builds the key of an operation row.
pub fn op_key(id: &OperationId) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + OPERATION_ID_LEN);
    buf.put_u8(KEY_VERSION);
    buf.put_u8(RecordType::Op.id());
    buf.put_slice(id.as_bytes());
    buf.freeze()
}

/// Recovers the operation id from an operation row key.
pub fn decode_op_key(key: &[u8]) -> Result<OperationId> {
    check_header(key, RecordType::Op)?;
    let body: [u8; OPERATION_ID_LEN] = key[2..]
        .try_into()
        .map_err(|_| Error::Encoding("op key has wrong length".to_string()))?;
    Ok(OperationId::from_bytes(body))
}

/// The range of operation rows strictly after `after`, or all of them.
pub fn ops_range(after: Option<&OperationId>) -> BytesRange {
    let start = match after {
        Some(id) => Bound::Excluded(op_key(id)),
        None => Bound::Included(tag(RecordType::Op)),
    };
    BytesRange::new(start, Bound::Excluded(tag(RecordType::State)))
}

/// Builds the key of a state row.
pub fn state_key(object_key: &str) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(KEY_VERSION);
    buf.put_u8(RecordType::State.id());
    terminated_bytes::serialize(object_key.as_bytes(), &mut buf);
    buf.freeze()
}

/// The range of all state rows.
pub fn states_range() -> BytesRange {
    BytesRange::new(
        Bound::Included(tag(RecordType::State)),
        Bound::Excluded(tag(RecordType::StateIndex)),
    )
}

/// Builds the key of a state-by-time index row.
pub fn state_index_key(ts_ms: u64, object_key: &str) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(KEY_VERSION);
    buf.put_u8(RecordType::StateIndex.id());
    buf.put_u64(ts_ms);
    terminated_bytes::serialize(object_key.as_bytes(), &mut buf);
    buf.freeze()
}

/// Recovers `(apply time ms, object key)` from a state index key.
pub fn decode_state_index_key(key: &[u8]) -> Result<(u64, String)> {
    check_header(key, RecordType::StateIndex)?;
    if key.len() < 10 {
        return Err(Error::Encoding("state index key too short".to_string()));
    }
    let ts_ms = u64::from_be_bytes(
        key[2..10]
            .try_into()
            .expect("slice of fixed length 8"),
    );
    let mut rest = &key[10..];
    let object_key = terminated_bytes::deserialize(&mut rest)?;
    let object_key = String::from_utf8(object_key.to_vec())
        .map_err(|e| Error::Encoding(format!("object key is not utf-8: {}", e)))?;
    Ok((ts_ms, object_key))
}

fn state_index_end() -> Bytes {
    Bytes::from(vec![KEY_VERSION, RecordType::StateIndex.id() + 1])
}

/// The index range covering apply times in `[from_ms, to_ms]`, both
/// inclusive.
pub fn state_index_range(from_ms: u64, to_ms: u64) -> BytesRange {
    let mut start = BytesMut::with_capacity(10);
    start.put_u8(KEY_VERSION);
    start.put_u8(RecordType::StateIndex.id());
    start.put_u64(from_ms);

    let end = match to_ms.checked_add(1) {
        Some(next_ms) => {
            let mut end = BytesMut::with_capacity(10);
            end.put_u8(KEY_VERSION);
            end.put_u8(RecordType::StateIndex.id());
            end.put_u64(next_ms);
            end.freeze()
        }
        None => state_index_end(),
    };
    BytesRange::new(Bound::Included(start.freeze()), Bound::Excluded(end))
}

/// The index range resuming strictly after `cursor`, up to `to_ms`
/// inclusive. Resuming by full index key keeps rows with equal timestamps
/// from being lost or repeated at page boundaries.
pub fn state_index_range_after(cursor: Bytes, to_ms: u64) -> BytesRange {
    let end = match to_ms.checked_add(1) {
        Some(next_ms) => {
            let mut end = BytesMut::with_capacity(10);
            end.put_u8(KEY_VERSION);
            end.put_u8(RecordType::StateIndex.id());
            end.put_u64(next_ms);
            end.freeze()
        }
        None => state_index_end(),
    };
    BytesRange::new(Bound::Excluded(cursor), Bound::Excluded(end))
}
