//! Metered subjects.

use serde::{Deserialize, Serialize};

/// Identifier of the entity whose usage is metered.
///
/// The quota engine only ever holds this id; subject and tier lifecycle belong
/// to the account system. Prefixed constructors keep user ids, API keys and
/// anonymous client addresses from colliding in the counter store.
///
/// # Examples
///
/// ```
/// use qrquota_core::SubjectId;
///
/// assert_eq!(SubjectId::user("42").as_str(), "user:42");
/// assert_eq!(SubjectId::api_key("k_live_1").as_str(), "key:k_live_1");
/// assert_eq!(SubjectId::from("custom").to_string(), "custom");
/// ```
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    /// Subject for a user account.
    pub fn user(id: impl std::fmt::Display) -> Self {
        Self(format!("user:{id}"))
    }

    /// Subject for an API key.
    pub fn api_key(key: impl std::fmt::Display) -> Self {
        Self(format!("key:{key}"))
    }

    /// Subject for an unauthenticated client address.
    pub fn ip(addr: impl std::fmt::Display) -> Self {
        Self(format!("ip:{addr}"))
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubjectId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for SubjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
