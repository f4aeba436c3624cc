//! # Identity Newtypes
//!
//! Course, user and payout-identity identifiers. Type-level distinction
//! between these namespaces prevents passing a payer's user id where the
//! payee's payout identity is expected.
//!
//! ## Course Identifiers
//!
//! Historically courses were keyed by their human id, which was not unique
//! across catalog imports. `CourseId` is derived by hashing the human id
//! under a domain prefix so that every component keys the escrow by the
//! same fixed-width, comparable value:
//!
//! ```text
//! CourseId = SHA-256("course-escrow/course-id/v1\0" || human_id)
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// Domain separation prefix for course id derivation.
const COURSE_ID_DOMAIN: &[u8] = b"course-escrow/course-id/v1\0";

/// Content-addressed course identifier.
///
/// Serializes as a 64-character lowercase hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CourseId([u8; 32]);

impl CourseId {
    /// Derive the course id from a human course id.
    ///
    /// Surrounding whitespace is trimmed before hashing so that `"rust-101"`
    /// and `" rust-101 "` address the same escrow.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidIdentifier`] if the human id is empty.
    pub fn derive(human_id: &str) -> Result<Self, CoreError> {
        let trimmed = human_id.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidIdentifier(
                "human course id must not be empty".to_string(),
            ));
        }
        let mut hasher = Sha256::new();
        hasher.update(COURSE_ID_DOMAIN);
        hasher.update(trimmed.as_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hash);
        Ok(Self(bytes))
    }

    /// Construct from raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse from the 64-character hex form produced by [`CourseId::to_hex`].
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let s = s.strip_prefix("course:").unwrap_or(s);
        if s.len() != 64 {
            return Err(CoreError::InvalidIdentifier(format!(
                "course id must be 64 hex characters, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = hex_value(chunk[0]);
            let lo = hex_value(chunk[1]);
            match (hi, lo) {
                (Some(h), Some(l)) => bytes[i] = (h << 4) | l,
                _ => {
                    return Err(CoreError::InvalidIdentifier(format!(
                        "course id contains non-hex characters: {s:?}"
                    )))
                }
            }
        }
        Ok(Self(bytes))
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering without the `course:` prefix.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl std::fmt::Display for CourseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "course:{}", self.to_hex())
    }
}

impl Serialize for CourseId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CourseId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A payout identity handle (wallet address, payout account reference).
///
/// Opaque to the escrow engine: it is only compared for equality and
/// handed to the ledger in payout instructions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityHandle(String);

impl IdentityHandle {
    /// Create a handle, rejecting empty or whitespace-only input.
    pub fn new(handle: impl Into<String>) -> Result<Self, CoreError> {
        let handle = handle.into();
        if handle.trim().is_empty() {
            return Err(CoreError::InvalidIdentifier(
                "identity handle must not be empty".to_string(),
            ));
        }
        Ok(Self(handle))
    }

    /// The handle as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdentityHandle {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IdentityHandle> for String {
    fn from(value: IdentityHandle) -> Self {
        value.0
    }
}

impl std::fmt::Display for IdentityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A platform user (learner, instructor, operator).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create a user id, rejecting empty or whitespace-only input.
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CoreError::InvalidIdentifier(
                "user id must not be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// The user id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn course_id_is_deterministic() {
        let a = CourseId::derive("rust-101").unwrap();
        let b = CourseId::derive("rust-101").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn course_id_trims_whitespace() {
        let a = CourseId::derive("rust-101").unwrap();
        let b = CourseId::derive("  rust-101\n").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn course_id_differs_per_course() {
        let a = CourseId::derive("rust-101").unwrap();
        let b = CourseId::derive("rust-102").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn course_id_rejects_empty() {
        assert!(CourseId::derive("").is_err());
        assert!(CourseId::derive("   ").is_err());
    }

    #[test]
    fn course_id_display_has_prefix() {
        let id = CourseId::derive("rust-101").unwrap();
        let s = id.to_string();
        assert!(s.starts_with("course:"));
        assert_eq!(s.len(), 7 + 64);
    }

    #[test]
    fn course_id_hex_roundtrip() {
        let id = CourseId::derive("rust-101").unwrap();
        assert_eq!(CourseId::from_hex(&id.to_hex()).unwrap(), id);
        assert_eq!(CourseId::from_hex(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn course_id_rejects_bad_hex() {
        assert!(CourseId::from_hex("abc").is_err());
        assert!(CourseId::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn course_id_serializes_as_hex_string() {
        let id = CourseId::derive("rust-101").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: CourseId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn identity_handle_rejects_blank() {
        assert!(IdentityHandle::new("").is_err());
        assert!(IdentityHandle::new("  ").is_err());
        assert!(IdentityHandle::new("addr_test1qz").is_ok());
    }

    #[test]
    fn identity_handle_deserialize_validates() {
        assert!(serde_json::from_str::<IdentityHandle>("\"\"").is_err());
        let h: IdentityHandle = serde_json::from_str("\"addr_1\"").unwrap();
        assert_eq!(h.as_str(), "addr_1");
    }

    #[test]
    fn user_id_display() {
        let u = UserId::new("alice").unwrap();
        assert_eq!(u.to_string(), "user:alice");
        assert!(UserId::new("").is_err());
    }
}
