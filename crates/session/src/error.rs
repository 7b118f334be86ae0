//! Error types for the session core.
//!
//! Remote failures are translated into these tagged variants at the adapter
//! boundary. The store only ever matches on variants, never on provider text.

use thiserror::Error;

use taskboard_core::EmailError;

/// Errors reported by an [`IdentityProvider`](crate::IdentityProvider).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    /// Wrong password or unknown account.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The account exists but its email address has not been confirmed.
    #[error("email address not confirmed")]
    EmailNotConfirmed,

    /// Registration for an email that already has an account.
    #[error("user already exists")]
    UserAlreadyExists,

    /// The provider rejected the password.
    #[error("password validation failed: {0}")]
    WeakPassword(String),

    /// Too many attempts.
    #[error("rate limited")]
    RateLimited,

    /// The provider could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider answered with something we could not interpret.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    /// Any other provider-side failure.
    #[error("identity provider error ({status}): {message}")]
    Provider {
        /// HTTP status code.
        status: u16,
        /// Provider message.
        message: String,
    },
}

impl AuthError {
    /// Message suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidEmail(_) => "Please enter a valid email address.".to_owned(),
            Self::InvalidCredentials => "Invalid email or password.".to_owned(),
            Self::EmailNotConfirmed => {
                "Please confirm your email address before signing in.".to_owned()
            }
            Self::UserAlreadyExists => "An account with this email already exists.".to_owned(),
            Self::WeakPassword(reason) => reason.clone(),
            Self::RateLimited => "Too many attempts. Please wait a moment and try again.".to_owned(),
            Self::Transport(_) => {
                "Unable to reach the server. Check your connection and try again.".to_owned()
            }
            Self::MalformedResponse(_) | Self::Provider { .. } => {
                "Authentication failed. Please try again.".to_owned()
            }
        }
    }

    /// Whether the failure is about the user's credentials rather than the
    /// service.
    #[must_use]
    pub const fn is_credential_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidEmail(_) | Self::InvalidCredentials | Self::EmailNotConfirmed
        )
    }
}

/// Errors reported by a [`ProfileRepository`](crate::ProfileRepository).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// The requested record does not exist.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., a record with this id already exists).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// The store could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The store returned data we could not decode.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// The store refused the request.
    #[error("request rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Store message.
        message: String,
    },
}

impl RepositoryError {
    /// Message suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound => "Your profile could not be found.".to_owned(),
            Self::Transport(_) => {
                "Unable to reach the server. Check your connection and try again.".to_owned()
            }
            Self::Conflict(_) | Self::DataCorruption(_) | Self::Rejected { .. } => {
                "Could not save your profile. Please try again.".to_owned()
            }
        }
    }
}

/// Errors reported by a [`PersistenceAdapter`](crate::PersistenceAdapter).
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned by the gating [`SessionStore`](crate::SessionStore)
/// operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Authentication operation failed.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// Profile repository operation failed.
    #[error("profile error: {0}")]
    Repository(#[from] RepositoryError),
}

impl StoreError {
    /// Message suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth(err) => err.user_message(),
            Self::Repository(err) => err.user_message(),
        }
    }
}
