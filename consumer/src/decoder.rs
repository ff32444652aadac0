//! SSE stream decoder.
//!
//! Parses the `id:`/`event:`/`data:` fields of an event stream. A blank
//! line delimits a complete event; comment lines (leading `:`) are
//! heartbeats and are ignored. The oplog never spreads `data` over several
//! lines, so each field is a single line.

use bytes::BytesMut;
use futures::{Stream, StreamExt};

use crate::error::{Error, Result};
use crate::operation::OperationData;

/// A decoded SSE frame, before it is turned into an
/// [`Operation`](crate::Operation).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEvent {
    pub id: String,
    pub event: String,
    pub data: Option<OperationData>,
}

/// Decoder over a chunked byte stream.
pub struct Decoder<S> {
    stream: S,
    buf: BytesMut,
}

impl<S, E> Decoder<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    /// Reads the next complete event, blocking until one arrives.
    pub async fn next(&mut self) -> Result<RawEvent> {
        let mut event = RawEvent::default();
        loop {
            let line = self.read_line().await?;
            if line.is_empty() {
                // Blank line: the event is complete.
                if event.event.is_empty() {
                    return Err(Error::IncompleteEvent);
                }
                return Ok(event);
            }
            if line.starts_with(':') {
                // Comment; heartbeat ping.
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_str(), ""),
            };
            match field {
                "id" => event.id = value.to_string(),
                "event" => event.event = value.to_string(),
                "data" => {
                    event.data =
                        Some(serde_json::from_str(value).map_err(|_| Error::InvalidEvent)?);
                }
                _ => {}
            }
        }
    }

    /// Returns the next line without its trailing newline, reading more
    /// chunks from the stream as needed.
    async fn read_line(&mut self) -> Result<String> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line = self.buf.split_to(pos + 1);
                return Ok(String::from_utf8_lossy(&line[..pos]).into_owned());
            }
            match self.stream.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(Error::Connection(e.to_string())),
                None => return Err(Error::ConnectionClosed),
            }
        }
    }
}
