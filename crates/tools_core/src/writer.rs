//! Asynchronous persist pool.
//!
//! Persists run on a fixed set of worker tasks, away from the caller. Each
//! identifier is always routed to the same worker, and each worker drains its
//! queue in FIFO order, so writes for one player never run concurrently while
//! different players are written in parallel.
//!
//! A job only names the entry that changed. The worker takes the entry's write
//! lock and stores whatever the entry holds at that moment, so the store only
//! ever moves forward to the latest state. A job that finds its changes already
//! stored by an earlier write is skipped.
//!
//! Failed writes are retried per [`RetryPolicy`]. A job that exhausts its
//! attempts is logged as a durability failure and counted; the entry stays
//! dirty so a later job or the shutdown flush tries again.

use crate::config::RetryPolicy;
use crate::identifier::UserId;
use crate::store::Store;
use crate::user::UserEntry;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Counters describing persist activity since startup.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistStats {
    /// Jobs accepted into the queue
    pub enqueued: u64,
    /// Writes acknowledged by the store
    pub completed: u64,
    /// Jobs dropped because the entry's latest state was already stored
    pub skipped: u64,
    /// Individual failed attempts that were retried
    pub retried: u64,
    /// Jobs that exhausted every attempt
    pub failed: u64,
    /// Jobs refused because the pool was closed
    pub rejected: u64,
    /// Jobs queued or in flight
    pub pending: u64,
}

#[derive(Debug, Default)]
pub(crate) struct PersistCounters {
    enqueued: AtomicU64,
    completed: AtomicU64,
    skipped: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

impl PersistCounters {
    pub(crate) fn snapshot(&self) -> PersistStats {
        let enqueued = self.enqueued.load(Ordering::Acquire);
        let completed = self.completed.load(Ordering::Acquire);
        let skipped = self.skipped.load(Ordering::Acquire);
        let failed = self.failed.load(Ordering::Acquire);
        PersistStats {
            enqueued,
            completed,
            skipped,
            retried: self.retried.load(Ordering::Acquire),
            failed,
            rejected: self.rejected.load(Ordering::Acquire),
            pending: enqueued.saturating_sub(completed + skipped + failed),
        }
    }
}

/// Outcome of writing one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    Stored,
    /// The store already holds the entry's latest version.
    Stale,
    Failed,
}

/// Writes the latest state of `entry`, retrying per `policy`.
///
/// Shared by the workers and the shutdown flush. Each attempt re-reads the
/// entry, so a change made while a write was failing goes out with the next
/// attempt. Never panics and never returns an error; failures end up in the
/// log and in `counters`.
pub(crate) async fn write_entry(
    store: &dyn Store,
    entry: &UserEntry,
    policy: &RetryPolicy,
    counters: &PersistCounters,
) -> WriteOutcome {
    let _guard = entry.lock_writes().await;
    if !entry.is_dirty() {
        counters.skipped.fetch_add(1, Ordering::AcqRel);
        debug!("{} already stored at v{}", entry.id(), entry.persisted_version());
        return WriteOutcome::Stale;
    }

    let mut attempt = 1;
    loop {
        let (record, version) = entry.current();
        match store.upsert(&record).await {
            Ok(()) => {
                entry.mark_persisted(version);
                counters.completed.fetch_add(1, Ordering::AcqRel);
                debug!("💾 Persisted {} (v{})", record.id, version);
                return WriteOutcome::Stored;
            }
            Err(e) if attempt < policy.max_attempts => {
                let delay = policy.backoff_for(attempt);
                warn!(
                    "⚠️ Persist of {} failed (attempt {}/{}), retrying in {:?}: {}",
                    record.id, attempt, policy.max_attempts, delay, e
                );
                counters.retried.fetch_add(1, Ordering::AcqRel);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                error!(
                    "❌ Durability failure: {} (v{}) not persisted after {} attempts: {}",
                    record.id, version, attempt, e
                );
                counters.failed.fetch_add(1, Ordering::AcqRel);
                return WriteOutcome::Failed;
            }
        }
    }
}

struct PersistJob {
    entry: Arc<UserEntry>,
}

/// Worker pool that owns every asynchronous store write.
pub(crate) struct PersistPool {
    senders: Mutex<Option<Vec<mpsc::UnboundedSender<PersistJob>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<PersistCounters>,
}

impl PersistPool {
    /// Spawns `worker_count` workers on the current tokio runtime.
    pub(crate) fn start(
        store: Arc<dyn Store>,
        worker_count: usize,
        policy: RetryPolicy,
        counters: Arc<PersistCounters>,
    ) -> Self {
        let worker_count = worker_count.max(1);
        let mut senders = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);

        for index in 0..worker_count {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            workers.push(tokio::spawn(run_worker(
                index,
                rx,
                Arc::clone(&store),
                policy,
                Arc::clone(&counters),
            )));
        }

        info!(
            "🧵 Persist pool started with {} workers ({} attempts per write)",
            worker_count, policy.max_attempts
        );

        Self {
            senders: Mutex::new(Some(senders)),
            workers: Mutex::new(workers),
            counters,
        }
    }

    /// Worker index that owns `id`.
    pub(crate) fn shard_for(id: UserId, worker_count: usize) -> usize {
        let (most, least) = id.halves();
        ((most ^ least) % worker_count.max(1) as u64) as usize
    }

    /// Queues a write of `entry` without blocking. Returns `false` if the
    /// pool is closed.
    pub(crate) fn enqueue(&self, entry: Arc<UserEntry>) -> bool {
        let id = entry.id();
        let senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(senders) = senders.as_ref() else {
            self.counters.rejected.fetch_add(1, Ordering::AcqRel);
            warn!("⚠️ Persist pool closed, not queuing write for {}", id);
            return false;
        };

        let shard = Self::shard_for(id, senders.len());
        // counted before sending so a fast worker never observes completed > enqueued
        self.counters.enqueued.fetch_add(1, Ordering::AcqRel);
        if senders[shard].send(PersistJob { entry }).is_err() {
            self.counters.enqueued.fetch_sub(1, Ordering::AcqRel);
            self.counters.rejected.fetch_add(1, Ordering::AcqRel);
            error!("❌ Persist worker {} is gone, write for {} not queued", shard, id);
            return false;
        }
        true
    }

    /// Closes the queues and waits up to `timeout` for the workers to finish
    /// what was already queued. Returns whether every worker finished.
    pub(crate) async fn drain(&self, timeout: Duration) -> bool {
        // dropping the senders ends each worker's loop once its queue is empty
        drop(
            self.senders
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if workers.is_empty() {
            return true;
        }

        match tokio::time::timeout(timeout, join_all(workers)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!("❌ Persist worker ended abnormally: {}", e);
                    }
                }
                info!("✅ Persist queue drained");
                true
            }
            Err(_) => {
                warn!(
                    "⏰ Persist queue not drained within {:?} ({} jobs pending)",
                    timeout,
                    self.counters.snapshot().pending
                );
                false
            }
        }
    }
}

async fn run_worker(
    index: usize,
    mut rx: mpsc::UnboundedReceiver<PersistJob>,
    store: Arc<dyn Store>,
    policy: RetryPolicy,
    counters: Arc<PersistCounters>,
) {
    debug!("Persist worker {} started", index);
    while let Some(job) = rx.recv().await {
        write_entry(store.as_ref(), &job.entry, &policy, &counters).await;
    }
    debug!("Persist worker {} stopped", index);
}
