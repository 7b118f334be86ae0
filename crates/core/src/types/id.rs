//! Identifier for authenticated principals.
//!
//! The hosted identity service issues UUIDs. A profile shares the id of the
//! identity it belongs to, so a single type covers both.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error returned when a string is not a valid [`UserId`].
#[derive(thiserror::Error, Debug, Clone)]
#[error("invalid user id: {0}")]
pub struct UserIdError(String);

/// The id of a remote identity and of the profile keyed by it.
///
/// # Example
///
/// ```rust
/// # use taskboard_core::UserId;
/// let id: UserId = "0b6f7c52-6d1e-4cf4-9b9c-3c1d0f6f7e11".parse().unwrap();
/// assert_eq!(id.to_string(), "0b6f7c52-6d1e-4cf4-9b9c-3c1d0f6f7e11");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for UserId {
    type Err = UserIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| UserIdError(s.to_owned()))
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}
