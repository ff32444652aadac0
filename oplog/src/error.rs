//! Error types for oplog operations.

use oplog_common::StorageError;

/// Error type for oplog operations.
///
/// # Error Categories
///
/// - [`Storage`](Error::Storage): Errors from the underlying storage layer.
/// - [`Encoding`](Error::Encoding): Errors during serialization or
///   deserialization of stored rows.
/// - [`InvalidOperation`](Error::InvalidOperation): An ingested operation
///   failed validation (bad event name, missing id/type, empty parent).
/// - [`InvalidLastId`](Error::InvalidLastId): A last-event-id token could not
///   be classified as either id space.
/// - [`Io`](Error::Io): Socket or filesystem errors from the daemons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Storage-related errors from the underlying backend.
    Storage(String),
    /// Encoding or decoding errors for stored rows and keys.
    Encoding(String),
    /// An operation failed validation.
    InvalidOperation(String),
    /// A last-event-id token is neither an operation id nor a replication id.
    InvalidLastId(String),
    /// Socket or filesystem error.
    Io(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Storage(msg) => write!(f, "storage error: {}", msg),
            Error::Encoding(msg) => write!(f, "encoding error: {}", msg),
            Error::InvalidOperation(msg) => write!(f, "invalid operation: {}", msg),
            Error::InvalidLastId(msg) => write!(f, "invalid last id: {}", msg),
            Error::Io(msg) => write!(f, "io error: {}", msg),
        }
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl From<oplog_common::serde::DeserializeError> for Error {
    fn from(err: oplog_common::serde::DeserializeError) -> Self {
        Error::Encoding(err.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// Result type alias for oplog operations.
pub type Result<T> = std::result::Result<T, Error>;
