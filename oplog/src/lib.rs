//! Generic operation log and replication system for REST APIs.
//!
//! Producers emit small change events (insert/update/delete of a
//! `type/id` object) over UDP or HTTP; the oplog persists them in a capped
//! log plus a compacted per-object state collection, and streams them to
//! consumers over Server-Sent Events with resumable positions and full
//! replication for bootstrap.
//!
//! Most deployments run the `oplogd` agent, which wraps this crate. Rust
//! applications can also integrate at the code level: open a [`Store`],
//! feed it through [`ingest`], and serve subscriptions with a [`Tailer`]
//! behind the [`server::OplogServer`].

pub mod config;
mod diff;
pub mod error;
pub mod event;
pub mod filter;
pub mod ingest;
pub mod lastid;
pub mod model;
mod serde;
pub mod server;
pub mod stats;
pub mod store;
pub mod tail;
pub mod udp;

pub use config::Config;
pub use error::{Error, Result};
pub use event::{OplogEvent, SyntheticEvent, SyntheticKind};
pub use filter::Filter;
pub use lastid::{LastId, OperationId, ReplicationId};
pub use model::{EventKind, ObjectState, Operation, OperationData, OperationDataMap};
pub use stats::Stats;
pub use store::{StatePage, StateScan, Store, TailCursor, Tailed};
pub use tail::Tailer;
