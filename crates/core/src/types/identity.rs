//! Identity and session types.
//!
//! Both are owned by the remote identity service. The application only ever
//! reads them; a new value replaces the old one wholesale.

use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use super::{Email, UserId};

/// Free-form attributes attached to an identity at registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMetadata {
    /// Display name supplied at sign-up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A principal authenticated by the remote identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Identity id, also the id of the user's profile.
    pub id: UserId,
    /// Sign-in email address.
    pub email: Email,
    /// When the email address was confirmed, if it has been.
    pub email_confirmed_at: Option<DateTime<Utc>>,
    /// Attributes supplied at registration.
    #[serde(default)]
    pub metadata: IdentityMetadata,
}

impl Identity {
    /// Whether the identity has confirmed its email address.
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        self.email_confirmed_at.is_some()
    }

    /// Name to show for this identity.
    ///
    /// Falls back to the email local part when no usable name was supplied.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.metadata
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.email.local_part())
            .to_owned()
    }
}

/// Time-bounded credential material for an [`Identity`].
///
/// Tokens are kept in [`SecretString`] so they never show up in `Debug`
/// output or logs.
#[derive(Debug, Clone)]
pub struct Session {
    /// The identity this session authenticates.
    pub identity: Identity,
    access_token: SecretString,
    refresh_token: SecretString,
    /// When the access token stops being accepted.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Create a session from issued tokens.
    #[must_use]
    pub const fn new(
        identity: Identity,
        access_token: SecretString,
        refresh_token: SecretString,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identity,
            access_token,
            refresh_token,
            expires_at,
        }
    }

    /// Bearer token for authenticated requests.
    #[must_use]
    pub const fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    /// Token exchanged for a new session once this one expires.
    #[must_use]
    pub const fn refresh_token(&self) -> &SecretString {
        &self.refresh_token
    }

    /// Whether the access token will have expired `margin` from `now`.
    #[must_use]
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at <= now + margin
    }
}
