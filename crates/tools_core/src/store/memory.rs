//! In-process store.
//!
//! Rows are kept in the same encoded layout as the on-disk backend. Clones
//! share state, so a second manager started on a clone sees what the first
//! one wrote, as a restarted process would. Availability and write failures
//! can be switched on to exercise the retry path.

use super::row::{name_key, StoredUser};
use super::Store;
use crate::error::StorageError;
use crate::identifier::{UserId, ENCODED_LEN};
use crate::user::UserRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::warn;

#[derive(Debug, Default)]
struct Inner {
    rows: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    provisioned: AtomicBool,
    unavailable: AtomicBool,
    failing_upserts: AtomicU32,
    upsert_log: Mutex<Vec<UserRecord>>,
}

/// Map-backed [`Store`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail with [`StorageError::Unavailable`] while `false`.
    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::Release);
    }

    /// Fails the next `count` upserts with [`StorageError::Unavailable`].
    pub fn fail_next_upserts(&self, count: u32) {
        self.inner.failing_upserts.store(count, Ordering::Release);
    }

    /// Writes a raw row, bypassing encoding. Used to plant malformed data.
    pub fn insert_raw(&self, key: Vec<u8>, value: Vec<u8>) {
        self.rows_mut().insert(key, value);
    }

    /// Every record successfully upserted, in the order the writes applied.
    pub fn upsert_log(&self) -> Vec<UserRecord> {
        self.inner
            .upsert_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_provisioned(&self) -> bool {
        self.inner.provisioned.load(Ordering::Acquire)
    }

    pub fn row_count(&self) -> usize {
        self.rows().len()
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.inner.unavailable.load(Ordering::Acquire) {
            return Err(StorageError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }

    fn rows(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Vec<u8>, Vec<u8>>> {
        self.inner.rows.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn rows_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Vec<u8>, Vec<u8>>> {
        self.inner.rows.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn provision_schema(&self) -> Result<(), StorageError> {
        self.check_available()?;
        self.inner.provisioned.store(true, Ordering::Release);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<UserRecord>, StorageError> {
        self.check_available()?;
        let rows = self.rows();
        let mut records = Vec::with_capacity(rows.len());
        for (key, value) in rows.iter() {
            match StoredUser::decode_row(key, value) {
                Ok(record) => records.push(record),
                Err(e) => warn!("⚠️ Skipping unreadable user row: {}", e),
            }
        }
        Ok(records)
    }

    async fn find_by_identifier(&self, id: UserId) -> Result<Option<UserRecord>, StorageError> {
        self.check_available()?;
        let key = id.encode();
        match self.rows().get(key.as_slice()) {
            Some(value) => StoredUser::decode_row(&key, value).map(Some),
            None => Ok(None),
        }
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<UserRecord>, StorageError> {
        self.check_available()?;
        let wanted = name_key(name);
        let rows = self.rows();
        for (key, value) in rows.iter().filter(|(key, _)| key.len() == ENCODED_LEN) {
            if let Ok(record) = StoredUser::decode_row(key, value) {
                if name_key(&record.name) == wanted {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    async fn upsert(&self, record: &UserRecord) -> Result<(), StorageError> {
        self.check_available()?;
        let failing = self
            .inner
            .failing_upserts
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StorageError::Unavailable(format!(
                "injected failure writing {}",
                record.id
            )));
        }

        let value = StoredUser::from_record(record).to_bytes()?;
        // log and row are updated under the row lock so the log order is the apply order
        let mut rows = self.rows_mut();
        rows.insert(record.id.encode().to_vec(), value);
        self.inner
            .upsert_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::SessionInfo;

    #[tokio::test]
    async fn upsert_then_find() {
        let store = MemoryStore::new();
        let id = UserId::new();
        let record = UserRecord::with_session(id, &SessionInfo::new("Alex", "10.0.0.1"));
        store.upsert(&record).await.unwrap();

        assert_eq!(store.find_by_identifier(id).await.unwrap(), Some(record.clone()));
        assert_eq!(store.find_by_name("alex").await.unwrap(), Some(record));
        assert_eq!(store.find_by_name("nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn repeated_upsert_keeps_one_row() {
        let store = MemoryStore::new();
        let record = UserRecord::new(UserId::new());
        store.upsert(&record).await.unwrap();
        store.upsert(&record).await.unwrap();
        assert_eq!(store.row_count(), 1);
        assert_eq!(store.load_all().await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn clones_share_rows() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.upsert(&UserRecord::new(UserId::new())).await.unwrap();
        assert_eq!(other.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn load_skips_malformed_rows() {
        let store = MemoryStore::new();
        store.upsert(&UserRecord::new(UserId::new())).await.unwrap();
        store.insert_raw(vec![1, 2, 3], b"{}".to_vec());
        store.insert_raw(UserId::new().encode().to_vec(), b"garbage".to_vec());
        assert_eq!(store.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_operation() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.provision_schema().await,
            Err(StorageError::Unavailable(_))
        ));
        assert!(store.load_all().await.is_err());
        assert!(store.upsert(&UserRecord::new(UserId::new())).await.is_err());

        store.set_available(true);
        assert!(store.provision_schema().await.is_ok());
        assert!(store.is_provisioned());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryStore::new();
        let record = UserRecord::new(UserId::new());
        store.fail_next_upserts(2);
        assert!(store.upsert(&record).await.is_err());
        assert!(store.upsert(&record).await.is_err());
        assert!(store.upsert(&record).await.is_ok());
        assert_eq!(store.upsert_log().len(), 1);
    }
}
