//! HTTP server exposing the SSE stream, the ingest endpoint, and status.

mod config;
pub mod handlers;
mod http;
mod middleware;

pub use config::CliArgs;
pub use handlers::AppState;
pub use http::OplogServer;
