//! Durable storage for player records.
//!
//! The [`Store`] trait is the contract the manager depends on. Backends are
//! picked by [`StorageConfig`] through [`open_store`]:
//!
//! * [`SledStore`] - embedded on-disk key-value store
//! * [`MemoryStore`] - in-process map, used by tests and throwaway servers
//!
//! All operations are async. Implementations must tolerate concurrent
//! upserts for different identifiers, and repeated upserts of the same record
//! must leave the same row behind.

use crate::error::StorageError;
use crate::identifier::UserId;
use crate::user::UserRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

mod memory;
mod row;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

/// Backend contract for player records.
#[async_trait]
pub trait Store: Send + Sync {
    /// Short name used in logs.
    fn backend_name(&self) -> &'static str;

    /// Ensures everything needed to hold records exists. Safe to call on
    /// every startup.
    async fn provision_schema(&self) -> Result<(), StorageError>;

    /// Reads every persisted record. Rows that cannot be decoded are skipped
    /// and logged.
    async fn load_all(&self) -> Result<Vec<UserRecord>, StorageError>;

    async fn find_by_identifier(&self, id: UserId) -> Result<Option<UserRecord>, StorageError>;

    /// Case-insensitive lookup by display name.
    async fn find_by_name(&self, name: &str) -> Result<Option<UserRecord>, StorageError>;

    /// Creates the row for `record.id` or overwrites its durable fields.
    async fn upsert(&self, record: &UserRecord) -> Result<(), StorageError>;
}

/// Available storage engines.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sled,
    Memory,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sled" => Ok(Backend::Sled),
            "memory" => Ok(Backend::Memory),
            other => Err(format!("Unknown storage backend: {other}")),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Sled => f.write_str("sled"),
            Backend::Memory => f.write_str("memory"),
        }
    }
}

/// Connection parameters handed to [`open_store`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: Backend,
    /// Database directory for on-disk backends.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/users")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            path: default_storage_path(),
        }
    }
}

/// Opens the backend described by `config`.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn Store>, StorageError> {
    let store: Arc<dyn Store> = match config.backend {
        Backend::Sled => Arc::new(SledStore::open(&config.path)?),
        Backend::Memory => Arc::new(MemoryStore::new()),
    };
    info!(
        "💾 Opened {} user store{}",
        store.backend_name(),
        match config.backend {
            Backend::Sled => format!(" at {}", config.path.display()),
            Backend::Memory => String::new(),
        }
    );
    Ok(store)
}
