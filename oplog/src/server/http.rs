//! Server assembly and lifecycle.

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use crate::error::Result;

use super::handlers::{self, AppState};
use super::middleware::{MetricsLayer, TracingLayer};

/// The oplog HTTP server.
pub struct OplogServer {
    listener: TcpListener,
    router: Router,
}

impl OplogServer {
    /// Binds the server to `addr`. Use port 0 to pick an ephemeral port.
    pub async fn bind(addr: &str, state: AppState) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let router = routes(state);
        Ok(Self { listener, router })
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves requests until the process stops.
    pub async fn run(self) -> Result<()> {
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }
}

fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::handle_ops))
        .route(
            "/ops",
            get(handlers::handle_ops).post(handlers::handle_ingest),
        )
        .route("/status", get(handlers::handle_status))
        .route("/metrics", get(handlers::handle_metrics))
        .layer(MetricsLayer::new(state.stats.clone()))
        .layer(TracingLayer::new())
        .with_state(state)
}
