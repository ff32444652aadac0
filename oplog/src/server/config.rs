//! Configuration for the oplogd agent.

use clap::Parser;
use oplog_common::storage::config::{
    AwsObjectStoreConfig, LocalObjectStoreConfig, ObjectStoreConfig, SlateDbStorageConfig,
};
use oplog_common::StorageConfig;

use crate::config::{Config, DEFAULT_CAP_MAX_BYTES, DEFAULT_QUEUE_MAX};

/// CLI arguments for the oplogd agent.
#[derive(Debug, Parser)]
#[command(name = "oplogd")]
#[command(about = "Operation log agent: UDP ingest and SSE replication API")]
pub struct CliArgs {
    /// Address to listen on. The same address is used for both the SSE
    /// (HTTP) and UDP APIs.
    #[arg(long, default_value = "0.0.0.0:8042")]
    pub listen: String,

    /// Storage data directory path (for local storage).
    #[arg(long, default_value = ".data")]
    pub data_dir: String,

    /// Use in-memory storage (for testing).
    #[arg(long, default_value = "false")]
    pub in_memory: bool,

    /// S3 bucket name (enables S3 storage when set).
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// AWS region for S3 storage.
    #[arg(long, default_value = "us-east-1")]
    pub s3_region: String,

    /// Maximum size of the capped operation log in bytes.
    #[arg(long, default_value_t = DEFAULT_CAP_MAX_BYTES)]
    pub capped_log_size: u64,

    /// Number of events to queue before throwing UDP messages.
    #[arg(long, default_value_t = DEFAULT_QUEUE_MAX)]
    pub max_queued_events: usize,

    /// Password protecting the SSE stream and HTTP ingest.
    #[arg(long, env = "OPLOGD_PASSWORD")]
    pub password: Option<String>,

    /// URL template referencing objects, with {{type}} and {{id}}
    /// variables (e.g. http://api.mydomain.com/{{type}}/{{id}}). When set,
    /// SSE events carry a "ref" field with the rendered URL.
    #[arg(long, env = "OPLOGD_OBJECT_URL")]
    pub object_url: Option<String>,

    /// Show debug log messages.
    #[arg(long)]
    pub debug: bool,
}

impl CliArgs {
    /// Converts CLI args to an oplog configuration.
    pub fn to_config(&self) -> Config {
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
            queue_max: self.max_queued_events,
            object_url: self.object_url.clone(),
            password: self.password.clone(),
            ..Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> CliArgs {
        CliArgs {
            listen: "0.0.0.0:8042".to_string(),
            data_dir: ".data".to_string(),
            in_memory: true,
            s3_bucket: None,
            s3_region: "us-east-1".to_string(),
            capped_log_size: DEFAULT_CAP_MAX_BYTES,
            max_queued_events: DEFAULT_QUEUE_MAX,
            password: None,
            object_url: None,
            debug: false,
        }
    }

    #[test]
    fn should_create_in_memory_config() {
        // given
        let args = args();

        // when
        let config = args.to_config();

        // then
        assert!(matches!(config.storage, StorageConfig::InMemory));
    }

    #[test]
    fn should_create_local_slatedb_config() {
        // given
        let args = CliArgs {
            in_memory: false,
            data_dir: "/tmp/oplog-data".to_string(),
            ..args()
        };

        // when
        let config = args.to_config();

        // then
        match config.storage {
            StorageConfig::SlateDb(slate_config) => match slate_config.object_store {
                ObjectStoreConfig::Local(local_config) => {
                    assert_eq!(local_config.path, "/tmp/oplog-data");
                }
                _ => panic!("Expected Local object store"),
            },
            _ => panic!("Expected SlateDb config"),
        }
    }

    #[test]
    fn should_create_s3_slatedb_config() {
        // given
        let args = CliArgs {
            in_memory: false,
            s3_bucket: Some("my-bucket".to_string()),
            s3_region: "us-west-2".to_string(),
            ..args()
        };

        // when
        let config = args.to_config();

        // then
        match config.storage {
            StorageConfig::SlateDb(slate_config) => match slate_config.object_store {
                ObjectStoreConfig::Aws(aws_config) => {
                    assert_eq!(aws_config.bucket, "my-bucket");
                    assert_eq!(aws_config.region, "us-west-2");
                }
                _ => panic!("Expected Aws object store"),
            },
            _ => panic!("Expected SlateDb config"),
        }
    }

    #[test]
    fn should_carry_tuning_flags_into_config() {
        // given
        let args = CliArgs {
            capped_log_size: 1024,
            max_queued_events: 42,
            password: Some("secret".to_string()),
            object_url: Some("http://api/{{type}}/{{id}}".to_string()),
            ..args()
        };

        // when
        let config = args.to_config();

        // then
        assert_eq!(config.cap_max_bytes, 1024);
        assert_eq!(config.queue_max, 42);
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.object_url.as_deref(), Some("http://api/{{type}}/{{id}}"));
    }
}
