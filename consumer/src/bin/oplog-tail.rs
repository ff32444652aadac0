//! The oplog-tail command subscribes to an oplog server and prints every
//! received operation.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::{mpsc, oneshot, watch};
use tracing_subscriber::EnvFilter;

use oplog_consumer::{Consumer, Error, Filter, Options};

#[derive(Debug, Parser)]
#[command(name = "oplog-tail")]
#[command(about = "Tail an oplog SSE stream")]
struct TailArgs {
    /// Password to access the oplog.
    #[arg(long)]
    password: Option<String>,

    /// Path of the state file storing the oplog position id (default: no
    /// store).
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Comma separated list of types to filter on.
    #[arg(long)]
    types: Option<String>,

    /// Comma separated list of parents type/id to filter on.
    #[arg(long)]
    parents: Option<String>,

    /// Remove the saved state and force a full replication.
    #[arg(long)]
    reset: bool,

    /// The oplog URL to subscribe to.
    url: String,
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> oplog_consumer::Result<()> {
    let args = TailArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = Options {
        state_file: args.state_file.clone(),
        password: args.password,
        filter: Filter {
            types: split_list(args.types),
            parents: split_list(args.parents),
        },
        reset: args.reset,
    };

    let consumer = Arc::new(Consumer::subscribe(&args.url, options).await?);

    let (ops_tx, mut ops_rx) = mpsc::channel(64);
    let (errs_tx, mut errs_rx) = mpsc::channel(64);
    let (stop_tx, stop_rx) = watch::channel(false);
    let (done_tx, mut done_rx) = oneshot::channel();

    tokio::spawn(consumer.clone().process(ops_tx, errs_tx, stop_rx, done_tx));

    loop {
        tokio::select! {
            op = ops_rx.recv() => {
                let Some(op) = op else { break };
                match &op.data {
                    Some(data) => println!(
                        "{}: {} #{} {}/{} ({})",
                        data.timestamp,
                        op.event,
                        op.id,
                        data.object_type,
                        data.id,
                        data.parents.join(", "),
                    ),
                    None => println!("{} #{}", op.event, op.id),
                }
                op.done();
            }
            err = errs_rx.recv() => {
                let Some(err) = err else { break };
                match err {
                    Error::AccessDenied | Error::State(_) => {
                        let _ = stop_tx.send(true);
                        let _ = (&mut done_rx).await;
                        return Err(err);
                    }
                    Error::ResumeFailed => {
                        if args.state_file.is_some() {
                            tracing::warn!("resume failed, forcing full replication");
                            consumer.set_last_id("0");
                        } else {
                            tracing::warn!(error = %err, "resume failed");
                        }
                    }
                    other => tracing::warn!(error = %other, "consumer error"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                let _ = stop_tx.send(true);
                let _ = (&mut done_rx).await;
                break;
            }
        }
    }

    Ok(())
}
