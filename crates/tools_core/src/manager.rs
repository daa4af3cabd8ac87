//! Live cache of player records.
//!
//! The [`UserManager`] is the only way to reach a cached player. It is built
//! by [`UserManager::start`], which provisions and loads the store before the
//! manager exists, so nothing can observe a partially warmed cache. Callers
//! share it as an `Arc<UserManager>`.
//!
//! Reads and mutations are synchronous and touch memory only. Every durable
//! change queues a persist on the [`PersistPool`](crate::writer), and the
//! caller never waits for it.

use crate::config::{RetryPolicy, WriterConfig};
use crate::error::ManagerError;
use crate::identifier::UserId;
use crate::shutdown::ShutdownState;
use crate::store::Store;
use crate::user::{Flag, SessionInfo, UserEntry, UserHandle, UserRecord};
use crate::writer::{write_entry, PersistCounters, PersistPool, PersistStats, WriteOutcome};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Result of [`UserManager::shutdown`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    /// Whether the persist queue emptied within the timeout
    pub drained: bool,
    /// Records written by the final flush
    pub flushed: usize,
    /// Records the final flush could not write
    pub failed: usize,
}

/// Concurrent cache of every known player, backed by a [`Store`].
pub struct UserManager {
    store: Arc<dyn Store>,
    users: DashMap<UserId, Arc<UserEntry>>,
    writer: PersistPool,
    counters: Arc<PersistCounters>,
    retry: RetryPolicy,
    shutdown: ShutdownState,
}

impl std::fmt::Debug for UserManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserManager")
            .field("backend", &self.store.backend_name())
            .field("users", &self.users.len())
            .field("shutdown", &self.shutdown)
            .finish()
    }
}

impl UserManager {
    /// Provisions the schema, loads every stored record and starts the
    /// persist workers.
    ///
    /// Must be called from within a tokio runtime. Any storage failure here
    /// aborts startup with [`ManagerError::Startup`].
    pub async fn start(store: Arc<dyn Store>, config: &WriterConfig) -> Result<Arc<Self>, ManagerError> {
        info!("🗄️ Provisioning {} user storage", store.backend_name());
        store
            .provision_schema()
            .await
            .map_err(ManagerError::Startup)?;

        let records = store.load_all().await.map_err(ManagerError::Startup)?;
        let users = DashMap::with_capacity(records.len());
        for record in records {
            let id = record.id;
            if users.insert(id, Arc::new(UserEntry::loaded(record))).is_some() {
                warn!("⚠️ Duplicate stored row for {}, keeping the last one", id);
            }
        }
        info!("👥 Loaded {} known players", users.len());

        let counters = Arc::new(PersistCounters::default());
        let retry = config.retry_policy();
        let writer = PersistPool::start(
            Arc::clone(&store),
            config.worker_count(),
            retry,
            Arc::clone(&counters),
        );

        Ok(Arc::new(Self {
            store,
            users,
            writer,
            counters,
            retry,
            shutdown: ShutdownState::new(),
        }))
    }

    /// Returns the cached player, creating and queuing a default record for
    /// an identifier never seen before.
    pub fn get(&self, id: UserId) -> UserHandle {
        let (entry, _) = self.get_or_create(id, || UserRecord::new(id));
        UserHandle(entry)
    }

    /// Cached player, if any. Never creates.
    pub fn lookup(&self, id: UserId) -> Option<UserHandle> {
        self.users.get(&id).map(|entry| UserHandle(Arc::clone(entry.value())))
    }

    /// Finds a player by display name, ignoring case.
    ///
    /// The cache is searched first, preferring an online player when several
    /// share the name. Otherwise the store is asked, and a record it returns
    /// joins the cache.
    pub async fn get_by_name(&self, name: &str) -> Result<Option<UserHandle>, ManagerError> {
        if let Some(handle) = self.cached_by_name(name) {
            return Ok(Some(handle));
        }
        if self.shutdown.is_shutdown_initiated() {
            return Err(ManagerError::ShuttingDown);
        }

        let Some(record) = self
            .store
            .find_by_name(name)
            .await
            .map_err(ManagerError::Lookup)?
        else {
            return Ok(None);
        };

        debug!("Loaded {} ({}) from storage by name", record.name, record.id);
        // a record created concurrently for the same id stays authoritative
        let entry = self
            .users
            .entry(record.id)
            .or_insert_with(|| Arc::new(UserEntry::loaded(record)))
            .value()
            .clone();
        Ok(Some(UserHandle(entry)))
    }

    fn cached_by_name(&self, name: &str) -> Option<UserHandle> {
        let mut found: Option<Arc<UserEntry>> = None;
        for item in self.users.iter() {
            let entry = item.value();
            if !entry.name_matches(name) {
                continue;
            }
            if entry.is_online() {
                return Some(UserHandle(Arc::clone(entry)));
            }
            if found.is_none() {
                found = Some(Arc::clone(entry));
            }
        }
        found.map(UserHandle)
    }

    /// Connect notification: records the session's name and address and
    /// marks the player online.
    pub fn attach_session(&self, id: UserId, session: &SessionInfo) -> UserHandle {
        let (entry, created) = self.get_or_create(id, || UserRecord::with_session(id, session));
        entry.set_online(true);
        if !created {
            entry.mutate(|fields| {
                fields.set_name(&session.name);
                fields.set_ip(&session.ip);
            });
            self.schedule_persist(&entry);
        }
        info!("🟢 {} ({}) is online from {}", session.name, id, session.ip);
        UserHandle(entry)
    }

    /// Disconnect notification: marks the player offline and queues a final
    /// persist. Returns `false` for an unknown identifier.
    pub fn detach_session(&self, id: UserId) -> bool {
        let Some(entry) = self.users.get(&id).map(|e| Arc::clone(e.value())) else {
            debug!("Ignoring disconnect for unknown player {}", id);
            return false;
        };
        entry.set_online(false);
        // bump the version so the final write happens even without changes
        let (record, _) = entry.mutate(|_| {});
        info!("🔴 {} ({}) went offline", record.name, id);
        self.schedule_persist(&entry);
        true
    }

    /// Sets one flag in memory and queues the change.
    pub fn set_flag(&self, id: UserId, flag: Flag, value: bool) -> UserHandle {
        let (entry, _) = self.get_or_create(id, || UserRecord::new(id));
        entry.mutate(|fields| fields.set_flag(flag, value));
        debug!("Flag {} = {} for {}", flag, value, id);
        self.schedule_persist(&entry);
        UserHandle(entry)
    }

    pub fn is_online(&self, id: UserId) -> bool {
        self.users
            .get(&id)
            .map(|entry| entry.is_online())
            .unwrap_or(false)
    }

    /// Snapshots of every online player, sorted by name.
    pub fn online_users(&self) -> Vec<UserRecord> {
        let mut online: Vec<UserRecord> = self
            .users
            .iter()
            .filter(|item| item.value().is_online())
            .map(|item| item.value().snapshot())
            .collect();
        online.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        online
    }

    /// Number of cached players.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn stats(&self) -> PersistStats {
        self.counters.snapshot()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutdown_initiated()
    }

    /// Stops queuing persists, drains the queue, then writes every record that
    /// still has unacknowledged changes. Draining and flushing share one
    /// `timeout`; players still unsaved when it runs out count as failed.
    ///
    /// Calling it again after the first shutdown does nothing.
    pub async fn shutdown(&self, timeout: Duration) -> FlushReport {
        if !self.shutdown.initiate_shutdown() {
            warn!("⚠️ Shutdown already in progress");
            return FlushReport::default();
        }

        let started = Instant::now();
        let drained = self.writer.drain(timeout).await;

        let dirty: Vec<Arc<UserEntry>> = self
            .users
            .iter()
            .filter(|item| item.value().is_dirty())
            .map(|item| Arc::clone(item.value()))
            .collect();
        if !dirty.is_empty() {
            info!("💾 Flushing {} players with pending changes", dirty.len());
        }

        let mut report = FlushReport {
            drained,
            ..FlushReport::default()
        };
        let remaining = timeout.saturating_sub(started.elapsed());
        let flush = join_all(
            dirty
                .iter()
                .map(|entry| write_entry(self.store.as_ref(), entry, &self.retry, &self.counters)),
        );
        match tokio::time::timeout(remaining, flush).await {
            Ok(outcomes) => {
                for outcome in outcomes {
                    match outcome {
                        WriteOutcome::Stored => report.flushed += 1,
                        WriteOutcome::Stale => {}
                        WriteOutcome::Failed => report.failed += 1,
                    }
                }
            }
            Err(_) => {
                warn!("⏰ Shutdown flush cut off after {:?}", timeout);
                for entry in &dirty {
                    if entry.is_dirty() {
                        report.failed += 1;
                    } else {
                        report.flushed += 1;
                    }
                }
            }
        }

        if report.failed > 0 {
            error!(
                "❌ {} players could not be flushed before shutdown",
                report.failed
            );
        }
        info!(
            "📊 Shutdown flush finished in {:?}: drained={}, flushed={}, failed={}",
            started.elapsed(),
            report.drained,
            report.flushed,
            report.failed
        );
        self.shutdown.complete_shutdown();
        report
    }

    /// Atomic get-or-create. The returned flag is true if this call created
    /// the entry, in which case its first persist has already been queued.
    fn get_or_create(
        &self,
        id: UserId,
        make: impl FnOnce() -> UserRecord,
    ) -> (Arc<UserEntry>, bool) {
        let mut created = false;
        let entry = self
            .users
            .entry(id)
            .or_insert_with(|| {
                created = true;
                Arc::new(UserEntry::created(make()))
            })
            .value()
            .clone();

        if created {
            debug!("✨ New player {}", id);
            self.schedule_persist(&entry);
        }
        (entry, created)
    }

    fn schedule_persist(&self, entry: &Arc<UserEntry>) {
        // a refused job stays dirty and is picked up by the shutdown flush
        self.writer.enqueue(Arc::clone(entry));
    }
}
