//! The oplogd agent: listens on a UDP port for operations and exposes the
//! HTTP SSE replication API.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use oplog::ingest::{spawn_appender, IngestQueue};
use oplog::server::{AppState, CliArgs, OplogServer};
use oplog::udp::UdpDaemon;
use oplog::{Result, Stats, Store, Tailer};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = args.to_config();
    let store = Arc::new(Store::open(&config).await?);
    let stats = Arc::new(Stats::new(config.queue_max));

    let (queue, rx) = IngestQueue::bounded(config.queue_max, stats.clone());
    spawn_appender(store.clone(), rx, stats.clone());

    let udp = UdpDaemon::bind(&args.listen, queue, stats.clone()).await?;
    tracing::info!(addr = %udp.local_addr()?, "udp ingest listening");
    tokio::spawn(udp.run());

    let tailer = Arc::new(Tailer::new(store.clone(), config.object_url.clone()));
    let state = AppState {
        store,
        tailer,
        stats,
        password: config.password.clone(),
    };
    let server = OplogServer::bind(&args.listen, state).await?;
    tracing::info!(addr = %server.local_addr()?, "sse api listening");
    server.run().await
}
