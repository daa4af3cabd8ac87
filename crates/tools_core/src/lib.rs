//! # Tools Core - Player Identity Persistence
//!
//! Keeps a live, in-memory record for every player the server knows about and
//! makes sure changes to those records reach durable storage without ever
//! making gameplay code wait on I/O.
//!
//! ## Components
//!
//! * **Identifiers** - [`UserId`] and its fixed 16-byte big-endian encoding
//! * **Records** - [`UserRecord`] values and read-only [`UserHandle`] views
//! * **Storage** - the [`Store`] contract with sled and in-memory backends
//! * **Manager** - [`UserManager`], the concurrent cache everything goes through
//! * **Persist pool** - sharded workers that write records in the order their
//!   changes were made, retrying with backoff
//!
//! ## Lifecycle
//!
//! ```rust
//! # use std::sync::Arc;
//! # use std::time::Duration;
//! use tools_core::{Flag, MemoryStore, SessionInfo, UserId, UserManager, WriterConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let manager = UserManager::start(store, &WriterConfig::default()).await?;
//!
//! let id = UserId::new();
//! manager.attach_session(id, &SessionInfo::new("Notch", "127.0.0.1"));
//! manager.set_flag(id, Flag::God, true);
//! assert!(manager.get(id).is_god());
//! manager.detach_session(id);
//!
//! let report = manager.shutdown(Duration::from_secs(5)).await;
//! assert_eq!(report.failed, 0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Storage failures during startup abort [`UserManager::start`]. After that
//! they stay inside the persist pool: each failed write is logged and retried
//! per [`RetryPolicy`], and only exhausting every attempt is reported, as a
//! durability failure in the logs and in [`PersistStats`].

pub use config::{RetryPolicy, WriterConfig};
pub use error::{IdentifierError, ManagerError, StorageError};
pub use identifier::{UserId, ENCODED_LEN};
pub use manager::{FlushReport, UserManager};
pub use shutdown::ShutdownState;
pub use store::{open_store, Backend, MemoryStore, SledStore, StorageConfig, Store};
pub use user::{Flag, SessionInfo, UserFlags, UserHandle, UserRecord};
pub use writer::PersistStats;

pub mod config;
pub mod error;
pub mod identifier;
pub mod manager;
pub mod shutdown;
pub mod store;
pub mod user;

mod writer;
