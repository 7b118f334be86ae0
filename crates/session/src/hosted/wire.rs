//! Wire formats of the hosted service.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use taskboard_core::{Email, Identity, IdentityMetadata, Session, UserId};

use crate::error::{AuthError, RepositoryError};

// =============================================================================
// Auth API
// =============================================================================

/// User object returned by the auth API.
#[derive(Debug, Deserialize)]
pub(super) struct WireUser {
    id: UserId,
    email: Option<String>,
    email_confirmed_at: Option<DateTime<Utc>>,
    /// Older deployments only report this field.
    confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    user_metadata: WireUserMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct WireUserMetadata {
    name: Option<String>,
    full_name: Option<String>,
}

impl WireUser {
    pub(super) fn into_identity(self) -> Result<Identity, AuthError> {
        let email = self.email.ok_or_else(|| {
            AuthError::MalformedResponse(format!("user {} has no email address", self.id))
        })?;
        let email = Email::parse(&email)
            .map_err(|e| AuthError::MalformedResponse(format!("user email: {e}")))?;

        Ok(Identity {
            id: self.id,
            email,
            email_confirmed_at: self.email_confirmed_at.or(self.confirmed_at),
            metadata: IdentityMetadata {
                name: self.user_metadata.name.or(self.user_metadata.full_name),
            },
        })
    }
}

/// Session object returned by the token and signup endpoints.
#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: Option<i64>,
    /// Unix seconds.
    expires_at: Option<i64>,
    user: WireUser,
}

impl TokenResponse {
    pub(super) fn into_session(self, now: DateTime<Utc>) -> Result<Session, AuthError> {
        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(at), _) => DateTime::from_timestamp(at, 0).ok_or_else(|| {
                AuthError::MalformedResponse(format!("expires_at out of range: {at}"))
            })?,
            (None, Some(secs)) => now + Duration::seconds(secs),
            (None, None) => {
                return Err(AuthError::MalformedResponse(
                    "session has no expiry".to_owned(),
                ));
            }
        };

        Ok(Session::new(
            self.user.into_identity()?,
            SecretString::from(self.access_token),
            SecretString::from(self.refresh_token),
            expires_at,
        ))
    }
}

/// The signup endpoint answers with a session when no confirmation is
/// required, and with the bare user otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum SignUpBody {
    Session(TokenResponse),
    User(WireUser),
}

/// Error body of the auth API. Fields vary between deployments.
#[derive(Debug, Default, Deserialize)]
pub(super) struct AuthErrorBody {
    error_code: Option<String>,
    error: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
}

impl AuthErrorBody {
    /// Translate into a typed error.
    pub(super) fn into_error(self, status: u16) -> AuthError {
        let message = self
            .msg
            .or(self.message)
            .or(self.error_description)
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| format!("HTTP {status}"));
        let lowered = message.to_lowercase();
        let code = self.error_code.or(self.error);

        match code.as_deref() {
            Some("invalid_credentials") => AuthError::InvalidCredentials,
            Some("email_not_confirmed") => AuthError::EmailNotConfirmed,
            Some("user_already_exists" | "email_exists") => AuthError::UserAlreadyExists,
            Some("weak_password") => AuthError::WeakPassword(message),
            Some("over_request_rate_limit" | "over_email_send_rate_limit") => {
                AuthError::RateLimited
            }
            Some("invalid_grant") if lowered.contains("email not confirmed") => {
                AuthError::EmailNotConfirmed
            }
            Some("invalid_grant" | "refresh_token_not_found" | "refresh_token_already_used") => {
                AuthError::InvalidCredentials
            }
            _ if status == 429 => AuthError::RateLimited,
            _ if lowered.contains("invalid login credentials") => AuthError::InvalidCredentials,
            _ if lowered.contains("email not confirmed") => AuthError::EmailNotConfirmed,
            _ if lowered.contains("already registered") => AuthError::UserAlreadyExists,
            _ => AuthError::Provider { status, message },
        }
    }
}

/// Session as kept in the provider's durable storage.
///
/// Unlike [`Session`], tokens are plain strings here: this is the one place
/// they are written out.
#[derive(Serialize, Deserialize)]
pub(super) struct StoredSession {
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
    identity: Identity,
}

impl From<&Session> for StoredSession {
    fn from(session: &Session) -> Self {
        Self {
            access_token: session.access_token().expose_secret().to_owned(),
            refresh_token: session.refresh_token().expose_secret().to_owned(),
            expires_at: session.expires_at,
            identity: session.identity.clone(),
        }
    }
}

impl From<StoredSession> for Session {
    fn from(stored: StoredSession) -> Self {
        Self::new(
            stored.identity,
            SecretString::from(stored.access_token),
            SecretString::from(stored.refresh_token),
            stored.expires_at,
        )
    }
}

// =============================================================================
// REST API
// =============================================================================

/// Error body of the REST API.
#[derive(Debug, Default, Deserialize)]
pub(super) struct RestErrorBody {
    code: Option<String>,
    message: Option<String>,
}

impl RestErrorBody {
    /// Translate into a typed error.
    pub(super) fn into_error(self, status: u16) -> RepositoryError {
        let message = self
            .message
            .unwrap_or_else(|| format!("HTTP {status}"));

        match (self.code.as_deref(), status) {
            // Zero rows where exactly one was requested.
            (Some("PGRST116"), _) | (None, 406) => RepositoryError::NotFound,
            (Some("23505"), _) | (_, 409) => RepositoryError::Conflict(message),
            _ => RepositoryError::Rejected { status, message },
        }
    }
}
