//! Sled-backed persistence for player records.
//!
//! Layout:
//!
//! * tree `users` - 16-byte encoded identifier -> JSON row
//! * tree `users_by_name` - lowercase display name -> 16-byte identifier of the
//!   player who most recently held it
//!
//! The name index is a hint: a hit is checked against the primary row and a
//! miss falls back to a scan, so a stale index entry can never return the
//! wrong player.

use super::row::{name_key, StoredUser};
use super::Store;
use crate::error::StorageError;
use crate::identifier::UserId;
use crate::user::UserRecord;
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info, warn};

const TREE_USERS: &str = "users";
const TREE_NAMES: &str = "users_by_name";
const SCHEMA_KEY: &[u8] = b"schema_version";
const SCHEMA_VERSION: u32 = 1;

#[derive(Clone)]
struct Trees {
    db: sled::Db,
    users: sled::Tree,
    names: sled::Tree,
}

/// On-disk [`Store`] built on sled.
#[derive(Clone)]
pub struct SledStore {
    trees: Trees,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("users", &self.trees.users.len())
            .finish()
    }
}

impl SledStore {
    /// Opens (or creates) the database rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref).map_err(|e| {
            StorageError::Unavailable(format!("cannot create {}: {e}", path_ref.display()))
        })?;
        let db = sled::open(path_ref)?;
        let users = db.open_tree(TREE_USERS)?;
        let names = db.open_tree(TREE_NAMES)?;
        Ok(Self {
            trees: Trees { db, users, names },
        })
    }

    /// Runs blocking sled work off the async executor.
    async fn blocking<F, T>(&self, work: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Trees) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let trees = self.trees.clone();
        tokio::task::spawn_blocking(move || work(&trees))
            .await
            .map_err(|e| StorageError::Unavailable(format!("storage task failed: {e}")))?
    }
}

impl Trees {
    fn get_user(&self, key: &[u8]) -> Result<Option<UserRecord>, StorageError> {
        match self.users.get(key)? {
            Some(value) => StoredUser::decode_row(key, &value).map(Some),
            None => Ok(None),
        }
    }

    fn scan_for_name(&self, wanted: &str) -> Result<Option<UserRecord>, StorageError> {
        for entry in self.users.iter() {
            let (key, value) = entry?;
            match StoredUser::decode_row(&key, &value) {
                Ok(record) if name_key(&record.name) == wanted => return Ok(Some(record)),
                Ok(_) => {}
                Err(e) => debug!("Ignoring unreadable row during name scan: {}", e),
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Store for SledStore {
    fn backend_name(&self) -> &'static str {
        "sled"
    }

    async fn provision_schema(&self) -> Result<(), StorageError> {
        self.blocking(|trees| {
            trees.db.open_tree(TREE_USERS)?;
            trees.db.open_tree(TREE_NAMES)?;
            match trees.db.get(SCHEMA_KEY)? {
                Some(existing) => {
                    debug!("User schema already present ({} bytes)", existing.len());
                }
                None => {
                    trees.db.insert(SCHEMA_KEY, &SCHEMA_VERSION.to_be_bytes()[..])?;
                    info!("🗄️ Provisioned user schema v{}", SCHEMA_VERSION);
                }
            }
            trees.db.flush()?;
            Ok(())
        })
        .await
    }

    async fn load_all(&self) -> Result<Vec<UserRecord>, StorageError> {
        self.blocking(|trees| {
            let mut records = Vec::with_capacity(trees.users.len());
            let mut skipped = 0usize;
            for entry in trees.users.iter() {
                let (key, value) = entry?;
                match StoredUser::decode_row(&key, &value) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        skipped += 1;
                        warn!("⚠️ Skipping unreadable user row: {}", e);
                    }
                }
            }
            if skipped > 0 {
                warn!("⚠️ Skipped {} unreadable user rows during load", skipped);
            }
            Ok(records)
        })
        .await
    }

    async fn find_by_identifier(&self, id: UserId) -> Result<Option<UserRecord>, StorageError> {
        self.blocking(move |trees| trees.get_user(&id.encode())).await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<UserRecord>, StorageError> {
        let wanted = name_key(name);
        self.blocking(move |trees| {
            if let Some(key) = trees.names.get(wanted.as_bytes())? {
                if let Some(record) = trees.get_user(&key)? {
                    if name_key(&record.name) == wanted {
                        return Ok(Some(record));
                    }
                }
            }
            trees.scan_for_name(&wanted)
        })
        .await
    }

    async fn upsert(&self, record: &UserRecord) -> Result<(), StorageError> {
        let key = record.id.encode();
        let value = StoredUser::from_record(record).to_bytes()?;
        let new_name = name_key(&record.name);

        self.blocking(move |trees| {
            let previous = trees.users.insert(key, value)?;

            if let Some(previous) = previous {
                if let Ok(old) = StoredUser::decode_row(&key, &previous) {
                    let old_name = name_key(&old.name);
                    if !old_name.is_empty() && old_name != new_name {
                        // only drop the index entry if it still points at this player
                        let _ = trees.names.compare_and_swap(
                            old_name.as_bytes(),
                            Some(&key[..]),
                            None as Option<&[u8]>,
                        )?;
                    }
                }
            }

            if !new_name.is_empty() {
                trees.names.insert(new_name.as_bytes(), &key[..])?;
            }

            trees.db.flush()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::{SessionInfo, UserFlags};
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, SledStore) {
        let dir = TempDir::new().unwrap();
        let store = SledStore::open(dir.path().join("db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn provision_is_idempotent() {
        let (_dir, store) = open_temp();
        store.provision_schema().await.unwrap();
        store.provision_schema().await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rows_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        let id = UserId::new();
        {
            let store = SledStore::open(&path).unwrap();
            store.provision_schema().await.unwrap();
            let mut record = UserRecord::with_session(id, &SessionInfo::new("Herobrine", "1.2.3.4"));
            record.flags = UserFlags {
                god: true,
                afk: false,
                mark: true,
            };
            record.secure = true;
            store.upsert(&record).await.unwrap();
        }

        let store = SledStore::open(&path).unwrap();
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        let record = &loaded[0];
        assert_eq!(record.id, id);
        assert_eq!(record.name, "Herobrine");
        assert_eq!(record.ip, "1.2.3.4");
        assert!(record.flags.god);
        assert!(record.flags.mark);
        assert!(record.secure);
        assert!(!record.online);
    }

    #[tokio::test]
    async fn upsert_overwrites_in_place() {
        let (_dir, store) = open_temp();
        let id = UserId::new();
        let mut record = UserRecord::new(id);
        store.upsert(&record).await.unwrap();
        record.flags.afk = true;
        store.upsert(&record).await.unwrap();
        store.upsert(&record).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded, vec![record.clone()]);
        assert_eq!(store.find_by_identifier(id).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn find_by_name_ignores_case_and_follows_renames() {
        let (_dir, store) = open_temp();
        let id = UserId::new();
        let mut record = UserRecord::with_session(id, &SessionInfo::new("Jeb_", "::1"));
        store.upsert(&record).await.unwrap();
        assert_eq!(store.find_by_name("JEB_").await.unwrap().map(|r| r.id), Some(id));

        record.name = "Dinnerbone".to_string();
        store.upsert(&record).await.unwrap();
        assert_eq!(store.find_by_name("jeb_").await.unwrap(), None);
        assert_eq!(
            store.find_by_name("dinnerbone").await.unwrap().map(|r| r.id),
            Some(id)
        );
    }

    #[tokio::test]
    async fn name_taken_over_by_another_player() {
        let (_dir, store) = open_temp();
        let first = UserId::new();
        let second = UserId::new();
        let mut a = UserRecord::with_session(first, &SessionInfo::new("Steve", ""));
        store.upsert(&a).await.unwrap();
        let b = UserRecord::with_session(second, &SessionInfo::new("steve", ""));
        store.upsert(&b).await.unwrap();
        assert_eq!(store.find_by_name("Steve").await.unwrap().map(|r| r.id), Some(second));

        // the first player renaming must not drop the second player's index entry
        a.name = "Alex".to_string();
        store.upsert(&a).await.unwrap();
        assert_eq!(store.find_by_name("steve").await.unwrap().map(|r| r.id), Some(second));
    }

    #[tokio::test]
    async fn malformed_rows_are_skipped_on_load() {
        let (_dir, store) = open_temp();
        store.upsert(&UserRecord::new(UserId::new())).await.unwrap();
        store.trees.users.insert(b"bad-key", b"{}".to_vec()).unwrap();
        store
            .trees
            .users
            .insert(&UserId::new().encode(), b"not json".to_vec())
            .unwrap();

        assert_eq!(store.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_upserts_for_different_players() {
        let (_dir, store) = open_temp();
        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let record = UserRecord::with_session(
                    UserId::new(),
                    &SessionInfo::new(format!("player{i}"), "127.0.0.1"),
                );
                store.upsert(&record).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(store.load_all().await.unwrap().len(), 16);
    }
}
