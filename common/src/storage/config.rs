//! Serializable storage configuration.

use serde::{Deserialize, Serialize};

/// Selects and configures a storage backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StorageConfig {
    /// Non-durable in-memory storage, for tests and ephemeral deployments.
    InMemory,
    /// SlateDB over an object store.
    SlateDb(SlateDbStorageConfig),
}

/// Configuration for the SlateDB backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlateDbStorageConfig {
    /// Path of the database root within the object store.
    pub path: String,
    /// Object store backing the database.
    pub object_store: ObjectStoreConfig,
    /// Optional path to a SlateDB settings file.
    pub settings_path: Option<String>,
}

/// Object store selection for SlateDB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ObjectStoreConfig {
    /// In-memory object store (testing only).
    InMemory,
    /// AWS S3.
    Aws(AwsObjectStoreConfig),
    /// Local filesystem directory.
    Local(LocalObjectStoreConfig),
}

/// AWS S3 object store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsObjectStoreConfig {
    pub region: String,
    pub bucket: String,
}

/// Local filesystem object store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalObjectStoreConfig {
    pub path: String,
}
