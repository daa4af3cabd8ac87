//! Persisted row layout shared by the backends.
//!
//! One row per identifier; the key is the 16-byte encoded identifier and the
//! value carries the durable fields. Every field defaults when absent so rows
//! written before a column existed still load.

use crate::error::StorageError;
use crate::identifier::UserId;
use crate::user::{UserFlags, UserRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoredUser {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub god: bool,
    #[serde(default)]
    pub afk: bool,
    #[serde(default)]
    pub mark: bool,
    #[serde(default)]
    pub secure: bool,
}

impl StoredUser {
    pub fn from_record(record: &UserRecord) -> Self {
        Self {
            name: record.name.clone(),
            ip: record.ip.clone(),
            god: record.flags.god,
            afk: record.flags.afk,
            mark: record.flags.mark,
            secure: record.secure,
        }
    }

    pub fn into_record(self, id: UserId) -> UserRecord {
        UserRecord {
            id,
            name: self.name,
            ip: self.ip,
            // online is never stored
            online: false,
            flags: UserFlags {
                god: self.god,
                afk: self.afk,
                mark: self.mark,
            },
            secure: self.secure,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a `(key, value)` pair as read from a backend.
    pub fn decode_row(key: &[u8], value: &[u8]) -> Result<UserRecord, StorageError> {
        let id = UserId::decode(key)?;
        let row: StoredUser =
            serde_json::from_slice(value).map_err(|e| StorageError::Corrupt {
                key: id.to_string(),
                reason: e.to_string(),
            })?;
        Ok(row.into_record(id))
    }
}

/// Key used by name indexes.
pub(crate) fn name_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_missing_columns_load_with_defaults() {
        let id = UserId::new();
        let record = StoredUser::decode_row(&id.encode(), br#"{"name":"Steve","god":true}"#)
            .unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.name, "Steve");
        assert!(record.ip.is_empty());
        assert!(record.flags.god);
        assert!(!record.secure);
        assert!(!record.online);
    }

    #[test]
    fn secure_flag_is_carried_through() {
        let id = UserId::new();
        let mut record = UserRecord::new(id);
        record.secure = true;
        let bytes = StoredUser::from_record(&record).to_bytes().unwrap();
        assert!(StoredUser::decode_row(&id.encode(), &bytes).unwrap().secure);
    }

    #[test]
    fn online_is_not_stored() {
        let id = UserId::new();
        let mut record = UserRecord::new(id);
        record.online = true;
        let bytes = StoredUser::from_record(&record).to_bytes().unwrap();
        assert!(!String::from_utf8(bytes.clone()).unwrap().contains("online"));
        assert!(!StoredUser::decode_row(&id.encode(), &bytes).unwrap().online);
    }

    #[test]
    fn bad_key_is_a_malformed_identifier() {
        let result = StoredUser::decode_row(b"short", b"{}");
        assert!(matches!(result, Err(StorageError::MalformedIdentifier(_))));
    }

    #[test]
    fn bad_value_is_corrupt() {
        let id = UserId::new();
        let result = StoredUser::decode_row(&id.encode(), b"not json");
        assert!(matches!(result, Err(StorageError::Corrupt { .. })));
    }
}
