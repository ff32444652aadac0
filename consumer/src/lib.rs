//! Consumer client for oplog SSE streams.
//!
//! Subscribes to an oplog server, decodes its event stream, tracks
//! in-flight acknowledgements, and persists the resume position so a
//! restarted consumer picks up exactly where it left off:
//!
//! ```ignore
//! use std::sync::Arc;
//! use oplog_consumer::{Consumer, Options};
//! use tokio::sync::{mpsc, oneshot, watch};
//!
//! let consumer = Arc::new(Consumer::subscribe("http://localhost:8042", Options::default()).await?);
//! let (ops_tx, mut ops_rx) = mpsc::channel(64);
//! let (errs_tx, mut errs_rx) = mpsc::channel(64);
//! let (_stop_tx, stop_rx) = watch::channel(false);
//! let (done_tx, done_rx) = oneshot::channel();
//! tokio::spawn(consumer.clone().process(ops_tx, errs_tx, stop_rx, done_tx));
//! while let Some(op) = ops_rx.recv().await {
//!     // handle the operation, then acknowledge it
//!     op.done();
//! }
//! ```

mod consumer;
mod decoder;
mod error;
mod ife;
mod operation;

pub use consumer::{Consumer, Filter, Options};
pub use decoder::{Decoder, RawEvent};
pub use error::{Error, Result};
pub use ife::InFlightEvents;
pub use operation::{Operation, OperationData};
