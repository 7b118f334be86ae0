//! Profile domain types.
//!
//! A profile is the application's own, user-editable record about an
//! identity. It shares the identity's id and is created on first access.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Email, Identity, UserId};

/// A user's profile record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Same value as the owning identity's id.
    pub id: UserId,
    /// Contact email, seeded from the identity.
    pub email: Email,
    /// Display name.
    pub name: String,
    /// Optional avatar image URL.
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Return a copy of this profile with `patch` applied at time `now`.
    #[must_use]
    pub fn patched(&self, patch: &ProfilePatch, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        if let Some(name) = &patch.name {
            next.name.clone_from(name);
        }
        if let Some(avatar_url) = &patch.avatar_url {
            next.avatar_url.clone_from(avatar_url);
        }
        next.updated_at = now;
        next
    }
}

/// Insert payload for a profile that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewProfile {
    /// Id of the identity the profile belongs to.
    pub id: UserId,
    /// Contact email.
    pub email: Email,
    /// Display name.
    pub name: String,
    /// Optional avatar image URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl NewProfile {
    /// Seed a profile from what the identity service knows about the user.
    #[must_use]
    pub fn seeded_from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            email: identity.email.clone(),
            name: identity.display_name(),
            avatar_url: None,
        }
    }
}

/// A partial profile update. Unset fields are left untouched.
///
/// `avatar_url` distinguishes "leave as is" (`None`) from "clear"
/// (`Some(None)`), which serializes as an explicit `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfilePatch {
    /// New display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New avatar URL, or `Some(None)` to remove it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<Option<String>>,
}

impl ProfilePatch {
    /// Set the display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the avatar URL.
    #[must_use]
    pub fn avatar_url(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(Some(url.into()));
        self
    }

    /// Remove the avatar.
    #[must_use]
    pub fn clear_avatar(mut self) -> Self {
        self.avatar_url = Some(None);
        self
    }

    /// Whether the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.avatar_url.is_none()
    }
}
