//! Identity and resource key types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum accepted key length, in bytes.
pub const MAX_KEY_LEN: usize = 128;

/// A normalized identity key (trimmed, upper-cased).
///
/// The identity key is the join key for every lookup. Two raw inputs that differ
/// only in surrounding whitespace or letter case refer to the same identity.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Normalize and validate a raw identity key.
    pub fn parse(raw: &str) -> crate::Result<Self> {
        let key = raw.trim().to_uppercase();
        if key.is_empty() {
            return Err(crate::Error::InvalidIdentityKey(
                "identity key is required".to_string(),
            ));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(crate::Error::InvalidIdentityKey(format!(
                "identity key exceeds {MAX_KEY_LEN} bytes"
            )));
        }
        if key.chars().any(char::is_control) {
            return Err(crate::Error::InvalidIdentityKey(
                "identity key contains control characters".to_string(),
            ));
        }
        Ok(Self(key))
    }

    /// Get the normalized key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdentityKey {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<IdentityKey> for String {
    fn from(key: IdentityKey) -> Self {
        key.0
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityKey({self})")
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resource key (trimmed, case preserved).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Validate a raw resource key.
    pub fn parse(raw: &str) -> crate::Result<Self> {
        let key = raw.trim();
        if key.is_empty() {
            return Err(crate::Error::InvalidResourceKey(
                "resource key is required".to_string(),
            ));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(crate::Error::InvalidResourceKey(format!(
                "resource key exceeds {MAX_KEY_LEN} bytes"
            )));
        }
        if key.chars().any(char::is_control) {
            return Err(crate::Error::InvalidResourceKey(
                "resource key contains control characters".to_string(),
            ));
        }
        Ok(Self(key.to_string()))
    }

    /// Get the key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ResourceKey {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<ResourceKey> for String {
    fn from(key: ResourceKey) -> Self {
        key.0
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceKey({self})")
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
