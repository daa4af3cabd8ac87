//! Player records.
//!
//! [`UserRecord`] is the plain value form of a player: what gets stored, what
//! gets loaded, and what callers receive as a snapshot. The live, cached form
//! is a [`UserHandle`], a read-only view onto an entry shared with the
//! [`UserManager`](crate::UserManager). Handles expose getters only; every
//! mutation goes through the manager so it can be persisted.

use crate::error::ManagerError;
use crate::identifier::UserId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Independently togglable transient states of a player.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFlags {
    pub god: bool,
    pub afk: bool,
    pub mark: bool,
}

impl UserFlags {
    pub fn get(&self, flag: Flag) -> bool {
        match flag {
            Flag::God => self.god,
            Flag::Afk => self.afk,
            Flag::Mark => self.mark,
        }
    }

    pub fn set(&mut self, flag: Flag, value: bool) {
        match flag {
            Flag::God => self.god = value,
            Flag::Afk => self.afk = value,
            Flag::Mark => self.mark = value,
        }
    }
}

/// Name of a single entry in [`UserFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    God,
    Afk,
    Mark,
}

impl Flag {
    pub const ALL: [Flag; 3] = [Flag::God, Flag::Afk, Flag::Mark];

    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::God => "god",
            Flag::Afk => "afk",
            Flag::Mark => "mark",
        }
    }
}

impl std::str::FromStr for Flag {
    type Err = ManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Flag::ALL
            .into_iter()
            .find(|flag| flag.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ManagerError::UnknownFlag(s.to_string()))
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live session details delivered with a connect notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub name: String,
    pub ip: String,
}

impl SessionInfo {
    pub fn new(name: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip: ip.into(),
        }
    }
}

/// Value form of one player's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    /// Last known display name. Not unique.
    pub name: String,
    /// Last known connection address, empty until the first connection.
    pub ip: String,
    /// Whether a session is attached. Never persisted.
    pub online: bool,
    pub flags: UserFlags,
    /// Legacy flag from older stored records. Carried for storage
    /// compatibility only.
    pub secure: bool,
}

impl UserRecord {
    /// A fresh record with no name, no address and every flag cleared.
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            name: String::new(),
            ip: String::new(),
            online: false,
            flags: UserFlags::default(),
            secure: false,
        }
    }

    pub fn with_session(id: UserId, session: &SessionInfo) -> Self {
        Self {
            name: session.name.clone(),
            ip: session.ip.clone(),
            ..Self::new(id)
        }
    }
}

/// Persisted fields of a cached entry.
#[derive(Debug, Clone)]
struct Durable {
    name: String,
    ip: String,
    flags: UserFlags,
    secure: bool,
}

/// Cached entry shared between the manager, handles and persist jobs.
///
/// `version` counts durable mutations; `persisted` is the highest version
/// a store has acknowledged. The entry is dirty while `version > persisted`.
/// Store writes for one entry are serialized through `write_lock`.
#[derive(Debug)]
pub(crate) struct UserEntry {
    id: UserId,
    durable: RwLock<Durable>,
    online: AtomicBool,
    version: AtomicU64,
    persisted: AtomicU64,
    write_lock: tokio::sync::Mutex<()>,
}

impl UserEntry {
    /// Entry for a record that already exists in the store.
    pub(crate) fn loaded(record: UserRecord) -> Self {
        Self::build(record, 0)
    }

    /// Entry for a record the store has never seen; starts dirty.
    pub(crate) fn created(record: UserRecord) -> Self {
        Self::build(record, 1)
    }

    fn build(record: UserRecord, version: u64) -> Self {
        Self {
            id: record.id,
            durable: RwLock::new(Durable {
                name: record.name,
                ip: record.ip,
                flags: record.flags,
                secure: record.secure,
            }),
            // loaded records have no session yet
            online: AtomicBool::new(false),
            version: AtomicU64::new(version),
            persisted: AtomicU64::new(0),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub(crate) fn id(&self) -> UserId {
        self.id
    }

    /// Applies `f` to the durable fields and returns the resulting snapshot
    /// together with the new version, both taken under the same lock.
    pub(crate) fn mutate<F>(&self, f: F) -> (UserRecord, u64)
    where
        F: FnOnce(&mut UserRecordFields<'_>),
    {
        let mut durable = self.durable.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut UserRecordFields {
            durable: &mut *durable,
        });
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        (self.record_from(&durable), version)
    }

    /// Snapshot and version of the current state without mutating.
    pub(crate) fn current(&self) -> (UserRecord, u64) {
        let durable = self.durable.read().unwrap_or_else(PoisonError::into_inner);
        (
            self.record_from(&durable),
            self.version.load(Ordering::Acquire),
        )
    }

    pub(crate) fn snapshot(&self) -> UserRecord {
        self.current().0
    }

    fn record_from(&self, durable: &Durable) -> UserRecord {
        UserRecord {
            id: self.id,
            name: durable.name.clone(),
            ip: durable.ip.clone(),
            online: self.online.load(Ordering::Acquire),
            flags: durable.flags,
            secure: durable.secure,
        }
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    pub(crate) fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub(crate) fn persisted_version(&self) -> u64 {
        self.persisted.load(Ordering::Acquire)
    }

    /// Records that `version` reached the store. Never moves backwards.
    pub(crate) fn mark_persisted(&self, version: u64) {
        self.persisted.fetch_max(version, Ordering::AcqRel);
    }

    /// Held for the duration of one store write of this entry.
    pub(crate) async fn lock_writes(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.version.load(Ordering::Acquire) > self.persisted.load(Ordering::Acquire)
    }

    /// Case-insensitive name comparison without cloning the record.
    pub(crate) fn name_matches(&self, name: &str) -> bool {
        self.read(|d| d.name.eq_ignore_ascii_case(name))
    }

    fn read<R>(&self, f: impl FnOnce(&Durable) -> R) -> R {
        let durable = self.durable.read().unwrap_or_else(PoisonError::into_inner);
        f(&durable)
    }
}

/// Mutable access to an entry's durable fields inside [`UserEntry::mutate`].
pub(crate) struct UserRecordFields<'a> {
    durable: &'a mut Durable,
}

impl UserRecordFields<'_> {
    pub(crate) fn set_name(&mut self, name: &str) {
        if self.durable.name != name {
            self.durable.name = name.to_string();
        }
    }

    pub(crate) fn set_ip(&mut self, ip: &str) {
        if self.durable.ip != ip {
            self.durable.ip = ip.to_string();
        }
    }

    pub(crate) fn set_flag(&mut self, flag: Flag, value: bool) {
        self.durable.flags.set(flag, value);
    }
}

/// Read-only view of a cached player.
///
/// Getters always observe the latest completed mutation. Two handles for the
/// same identifier obtained from one manager point at the same entry, see
/// [`UserHandle::ptr_eq`].
#[derive(Debug, Clone)]
pub struct UserHandle(pub(crate) Arc<UserEntry>);

impl UserHandle {
    pub fn id(&self) -> UserId {
        self.0.id()
    }

    pub fn name(&self) -> String {
        self.0.read(|d| d.name.clone())
    }

    pub fn ip(&self) -> String {
        self.0.read(|d| d.ip.clone())
    }

    pub fn is_online(&self) -> bool {
        self.0.is_online()
    }

    pub fn flags(&self) -> UserFlags {
        self.0.read(|d| d.flags)
    }

    pub fn flag(&self, flag: Flag) -> bool {
        self.flags().get(flag)
    }

    pub fn is_god(&self) -> bool {
        self.flag(Flag::God)
    }

    pub fn is_afk(&self) -> bool {
        self.flag(Flag::Afk)
    }

    pub fn is_mark(&self) -> bool {
        self.flag(Flag::Mark)
    }

    /// Owned copy of the current state.
    pub fn snapshot(&self) -> UserRecord {
        self.0.snapshot()
    }

    /// Whether both handles refer to the same cached entry.
    pub fn ptr_eq(&self, other: &UserHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Whether the entry has mutations no store has acknowledged yet.
    pub fn has_pending_writes(&self) -> bool {
        self.0.is_dirty()
    }
}
