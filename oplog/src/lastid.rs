//! The two last-event-id spaces and their classification.
//!
//! A subscription resumes from a *last id*, which is one of:
//!
//! - an operation id: 24 lowercase hex characters naming a stored operation,
//!   with the creation time embedded in its high bits;
//! - a replication id: a decimal milliseconds-since-epoch timestamp of at
//!   most 13 digits, positioning a replication scan.
//!
//! Classification is explicit in [`LastId::parse`]: a short all-digit token
//! is a replication id, a 24-hex token is an operation id, anything else is
//! invalid. `0` means "replicate everything from the beginning".

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Byte length of an operation id.
pub const OPERATION_ID_LEN: usize = 12;

/// Maximum digits of a replication id token.
const REPLICATION_ID_MAX_DIGITS: usize = 13;

/// A store-assigned operation id.
///
/// Layout: 4 bytes big-endian unix seconds, 5 bytes of per-process random,
/// 3 bytes of counter. Lexicographic byte order is assignment order within
/// one log because the store bumps fresh ids above the previous one (see
/// [`OperationId::successor`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationId([u8; OPERATION_ID_LEN]);

impl OperationId {
    pub fn from_bytes(bytes: [u8; OPERATION_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Parses a 24-character lowercase hex representation.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != OPERATION_ID_LEN * 2 {
            return None;
        }
        let mut bytes = [0u8; OPERATION_ID_LEN];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = hex_val(chunk[0])?;
            let lo = hex_val(chunk[1])?;
            bytes[i] = (hi << 4) | lo;
        }
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; OPERATION_ID_LEN] {
        &self.0
    }

    /// The embedded creation time, at second precision.
    pub fn time(&self) -> DateTime<Utc> {
        let secs = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        DateTime::from_timestamp(i64::from(secs), 0).unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// Converts this id into a replication id by extracting the embedded
    /// timestamp. The result carries the fallback flag, marking a resume
    /// position recovered from an id that aged out of the log.
    pub fn fallback(&self) -> ReplicationId {
        ReplicationId {
            ms: self.time().timestamp_millis().max(0) as u64,
            fallback: true,
        }
    }

    /// The next id in byte order. Used by the store to keep assigned ids
    /// strictly monotonic when a freshly generated id does not sort above
    /// the previous one (clock skew, process restart within a second).
    pub fn successor(&self) -> Self {
        let mut bytes = self.0;
        for b in bytes.iter_mut().rev() {
            let (next, carry) = b.overflowing_add(1);
            *b = next;
            if !carry {
                break;
            }
        }
        Self(bytes)
    }
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl serde::Serialize for OperationId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for OperationId {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        OperationId::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid operation id: {}", s)))
    }
}

/// A timestamp id positioning a replication scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationId {
    /// Milliseconds since the unix epoch. `0` replicates from the beginning.
    pub ms: u64,
    /// True when derived from an aged-out operation id via
    /// [`OperationId::fallback`]. Fallback replication also ships deletes.
    pub fallback: bool,
}

impl ReplicationId {
    pub fn new(ms: u64) -> Self {
        Self { ms, fallback: false }
    }

    pub fn time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.ms as i64).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

impl std::fmt::Display for ReplicationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.ms)
    }
}

/// A last-event-id from either id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastId {
    Operation(OperationId),
    Replication(ReplicationId),
}

impl LastId {
    /// Classifies a last-event-id token.
    ///
    /// The empty string is invalid at this layer; callers substitute their
    /// own defaults before parsing.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidLastId("empty id".to_string()));
        }
        if s.len() <= REPLICATION_ID_MAX_DIGITS && s.bytes().all(|b| b.is_ascii_digit()) {
            // Thirteen decimal digits always fit in a u64.
            let ms = s
                .parse::<u64>()
                .map_err(|e| Error::InvalidLastId(e.to_string()))?;
            return Ok(LastId::Replication(ReplicationId::new(ms)));
        }
        if let Some(id) = OperationId::from_hex(s) {
            return Ok(LastId::Operation(id));
        }
        Err(Error::InvalidLastId(s.to_string()))
    }

    /// The time position the id represents.
    pub fn time(&self) -> DateTime<Utc> {
        match self {
            LastId::Operation(id) => id.time(),
            LastId::Replication(id) => id.time(),
        }
    }
}

impl std::fmt::Display for LastId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LastId::Operation(id) => write!(f, "{}", id),
            LastId::Replication(id) => write!(f, "{}", id),
        }
    }
}

/// Generator for fresh operation ids.
///
/// The 5 random bytes are fixed per process; the 3-byte counter makes ids
/// assigned within the same second distinct.
pub struct OpIdGenerator {
    random: [u8; 5],
    counter: AtomicU32,
}

impl OpIdGenerator {
    pub fn new() -> Self {
        Self {
            random: rand::random(),
            counter: AtomicU32::new(rand::random()),
        }
    }

    /// Builds an id embedding `at` as its creation time.
    pub fn next(&self, at: DateTime<Utc>) -> OperationId {
        let secs = at.timestamp().clamp(0, i64::from(u32::MAX)) as u32;
        let count = self.counter.fetch_add(1, Ordering::Relaxed).to_be_bytes();
        let mut bytes = [0u8; OPERATION_ID_LEN];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&self.random);
        bytes[9..].copy_from_slice(&count[1..]);
        OperationId(bytes)
    }
}

impl Default for OpIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
