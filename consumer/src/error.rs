//! Consumer error taxonomy.

/// Error type for the oplog consumer.
///
/// Transport and decoding errors are retryable: the consumer reports them
/// and reconnects. [`AccessDenied`](Error::AccessDenied) and a malformed
/// state file are fatal. [`ResumeFailed`](Error::ResumeFailed) is surfaced
/// so the caller can decide its recovery policy, typically resetting the
/// position to `"0"` for a full replication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The server rejected the credentials (HTTP 401/403).
    AccessDenied,
    /// The server did not echo the requested `Last-Event-ID`: the resume
    /// position was not honored.
    ResumeFailed,
    /// The position could not be written to the state file. Retried on the
    /// next save tick.
    WritingState(String),
    /// The stream delivered a frame without an event name.
    IncompleteEvent,
    /// The stream delivered a frame whose data could not be decoded.
    InvalidEvent,
    /// The SSE stream closed unexpectedly.
    ConnectionClosed,
    /// Transport-level failure (connect error, non-200 response, read
    /// error). Retried with backoff.
    Connection(String),
    /// The state file exists but does not hold a valid position.
    State(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::AccessDenied => write!(f, "invalid credentials"),
            Error::ResumeFailed => write!(f, "resume failed"),
            Error::WritingState(msg) => write!(f, "can't write state file: {}", msg),
            Error::IncompleteEvent => write!(f, "incomplete event"),
            Error::InvalidEvent => write!(f, "invalid event"),
            Error::ConnectionClosed => write!(f, "connection closed"),
            Error::Connection(msg) => write!(f, "connection error: {}", msg),
            Error::State(msg) => write!(f, "invalid state file: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Result type alias for consumer operations.
pub type Result<T> = std::result::Result<T, Error>;
