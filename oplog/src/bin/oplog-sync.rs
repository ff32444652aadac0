//! The oplog-sync command keeps the oplog database in sync with the source
//! data.
//!
//! It takes a dump of the source data as input and compares it with the
//! oplog's state collection. For any discrepancy, an oplog event is
//! appended to rectify the oplog's database and all its consumers.
//!
//! The dump is streamable JSON: one object per line with the same schema as
//! the data part of the SSE API response:
//!
//! ```text
//! {"timestamp":"2014-11-06T03:04:39.041-08:00","parents":["user/xl2d"],"type":"video","id":"x34cd"}
//! {"timestamp":"2014-12-24T02:03:05.167+01:00","parents":["user/xkwek"],"type":"video","id":"x12ab"}
//! ```
//!
//! The timestamp is the last modification date of the object. BE CAREFUL:
//! any object absent from the dump with a timestamp older than the most
//! recent timestamp in the dump will be deleted from the oplog.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use oplog::config::{Config, DEFAULT_CAP_MAX_BYTES};
use oplog::{Error, EventKind, Operation, OperationDataMap, Result, Store};
use oplog_common::storage::config::{
    AwsObjectStoreConfig, LocalObjectStoreConfig, ObjectStoreConfig, SlateDbStorageConfig,
};
use oplog_common::StorageConfig;

#[derive(Debug, Parser)]
#[command(name = "oplog-sync")]
#[command(about = "Reconcile the oplog database with a dump of the source data")]
struct SyncArgs {
    /// Storage data directory path (for local storage).
    #[arg(long, default_value = ".data")]
    data_dir: String,

    /// Use in-memory storage (for testing).
    #[arg(long, default_value = "false")]
    in_memory: bool,

    /// S3 bucket name (enables S3 storage when set).
    #[arg(long)]
    s3_bucket: Option<String>,

    /// AWS region for S3 storage.
    #[arg(long, default_value = "us-east-1")]
    s3_region: String,

    /// Maximum size of the capped operation log in bytes.
    #[arg(long, default_value_t = DEFAULT_CAP_MAX_BYTES)]
    capped_log_size: u64,

    /// Show debug log messages.
    #[arg(long)]
    debug: bool,

    /// Path of the dump file.
    dump: PathBuf,
}

impl SyncArgs {
    fn to_config(&self) -> Config {
        let storage = if self.in_memory {
            StorageConfig::InMemory
        } else if let Some(bucket) = &self.s3_bucket {
            StorageConfig::SlateDb(SlateDbStorageConfig {
                path: "oplog".to_string(),
                object_store: ObjectStoreConfig::Aws(AwsObjectStoreConfig {
                    region: self.s3_region.clone(),
                    bucket: bucket.clone(),
                }),
                settings_path: None,
            })
        } else {
            StorageConfig::SlateDb(SlateDbStorageConfig {
                path: "oplog".to_string(),
                object_store: ObjectStoreConfig::Local(LocalObjectStoreConfig {
                    path: self.data_dir.clone(),
                }),
                settings_path: None,
            })
        };
        Config {
            storage,
            cap_max_bytes: self.capped_log_size,
            ..Config::default()
        }
    }
}

/// Loads the dump into a map keyed by object key. Any unreadable or invalid
/// line fails the whole run.
fn load_dump(path: &PathBuf) -> Result<OperationDataMap> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut create_map = OperationDataMap::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let data: oplog::OperationData = serde_json::from_str(&line).map_err(|e| {
            Error::InvalidOperation(format!("dump line {}: {}", index + 1, e))
        })?;
        data.validate()
            .map_err(|e| Error::InvalidOperation(format!("dump line {}: {}", index + 1, e)))?;
        create_map.insert(data.object_key(), data);
    }
    Ok(create_map)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = SyncArgs::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut create_map = load_dump(&args.dump)?;
    tracing::info!(objects = create_map.len(), "dump loaded");

    let store = Store::open(&args.to_config()).await?;

    let mut update_map = OperationDataMap::new();
    let mut delete_map = OperationDataMap::new();
    store
        .diff(&mut create_map, &mut update_map, &mut delete_map)
        .await?;

    let (created, updated, deleted) = (create_map.len(), update_map.len(), delete_map.len());

    // Append one operation per delta entry to fix the discrepancies.
    for (event, map) in [
        (EventKind::Insert, create_map),
        (EventKind::Update, update_map),
        (EventKind::Delete, delete_map),
    ] {
        for (_, data) in map {
            store
                .append(&mut Operation {
                    id: None,
                    event,
                    data,
                })
                .await;
        }
    }

    tracing::info!(created, updated, deleted, "sync complete");
    Ok(())
}
