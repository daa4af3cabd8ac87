//! Player identifiers and their fixed-width storage encoding.
//!
//! A [`UserId`] wraps a UUID the same way the rest of the server wraps its IDs:
//! a newtype so player identifiers cannot be confused with other UUIDs. Storage
//! backends key rows by the 16-byte big-endian form produced by
//! [`UserId::encode`]; the most significant 64 bits come first, then the least
//! significant 64 bits.

use crate::error::IdentifierError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Width of an encoded identifier in bytes.
pub const ENCODED_LEN: usize = 16;

/// Stable, unique identifier of a player across sessions and name changes.
///
/// # Examples
///
/// ```rust
/// use tools_core::UserId;
///
/// let id: UserId = "02cea57b-a0fb-4391-985e-89e76d642240".parse()?;
/// let bytes = id.encode();
/// assert_eq!(UserId::decode(&bytes)?, id);
/// # Ok::<(), tools_core::IdentifierError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Creates a random (v4) identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Builds an identifier from its two 64-bit halves.
    pub fn from_halves(most: u64, least: u64) -> Self {
        Self(Uuid::from_u128(((most as u128) << 64) | least as u128))
    }

    /// Returns the most and least significant 64-bit halves.
    pub fn halves(&self) -> (u64, u64) {
        let value = self.0.as_u128();
        ((value >> 64) as u64, value as u64)
    }

    /// Encodes the identifier as 16 big-endian bytes, high half first.
    pub fn encode(&self) -> [u8; ENCODED_LEN] {
        let (most, least) = self.halves();
        let mut out = [0u8; ENCODED_LEN];
        out[..8].copy_from_slice(&most.to_be_bytes());
        out[8..].copy_from_slice(&least.to_be_bytes());
        out
    }

    /// Decodes an identifier produced by [`UserId::encode`].
    ///
    /// Fails with [`IdentifierError::Malformed`] unless `bytes` is exactly 16 bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, IdentifierError> {
        if bytes.len() != ENCODED_LEN {
            return Err(IdentifierError::Malformed { len: bytes.len() });
        }
        let mut most = [0u8; 8];
        let mut least = [0u8; 8];
        most.copy_from_slice(&bytes[..8]);
        least.copy_from_slice(&bytes[8..]);
        Ok(Self::from_halves(u64::from_be_bytes(most), u64::from_be_bytes(least)))
    }

    /// Parses the 36-character hyphenated form.
    pub fn parse(s: &str) -> Result<Self, IdentifierError> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for UserId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl From<Uuid> for UserId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_form_is_sixteen_bytes() {
        assert_eq!(UserId::new().encode().len(), 16);
    }

    #[test]
    fn decode_reverses_encode() {
        for _ in 0..64 {
            let id = UserId::new();
            assert_eq!(UserId::decode(&id.encode()).unwrap(), id);
        }
    }

    #[test]
    fn decode_reverses_encode_for_parsed_text() {
        let id: UserId = "02cea57b-a0fb-4391-985e-89e76d642240".parse().unwrap();
        let decoded = UserId::decode(&id.encode()).unwrap();
        assert_eq!(decoded, id);
        assert_eq!(decoded.to_string(), "02cea57b-a0fb-4391-985e-89e76d642240");
    }

    #[test]
    fn encoding_is_big_endian_high_half_first() {
        let id = UserId::from_halves(0x0102_0304_0506_0708, 0x090a_0b0c_0d0e_0f10);
        assert_eq!(
            id.encode(),
            [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]
        );
        assert_eq!(id.to_string(), "01020304-0506-0708-090a-0b0c0d0e0f10");
    }

    #[test]
    fn extreme_values_survive() {
        for id in [UserId::from_halves(0, 0), UserId::from_halves(u64::MAX, u64::MAX)] {
            assert_eq!(UserId::decode(&id.encode()).unwrap(), id);
        }
    }

    #[test]
    fn decode_rejects_wrong_lengths() {
        for len in [0usize, 1, 15, 17, 32] {
            let bytes = vec![0u8; len];
            match UserId::decode(&bytes) {
                Err(IdentifierError::Malformed { len: got }) => assert_eq!(got, len),
                other => panic!("expected Malformed for {len} bytes, got {other:?}"),
            }
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            "not-a-uuid".parse::<UserId>(),
            Err(IdentifierError::Parse(_))
        ));
    }
}
