//! Identity provider seam.
//!
//! The provider owns sessions. Besides answering explicit calls it pushes
//! [`IdentityChange`] notifications whenever the remote identity changes on
//! its own (token refresh, sign-out elsewhere, an expired refresh token).

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::broadcast;

use taskboard_core::{Email, Identity, IdentityMetadata, Session};

use crate::error::AuthError;

/// Kind of identity-change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A user signed in.
    SignedIn,
    /// The user signed out, or the session was revoked.
    SignedOut,
    /// The session was renewed with fresh tokens.
    TokenRefreshed,
    /// Any other provider event, by its wire name.
    Other(String),
}

impl AuthEvent {
    /// Whether this event should trigger a profile fetch.
    #[must_use]
    pub const fn refreshes_profile(&self) -> bool {
        matches!(self, Self::SignedIn | Self::TokenRefreshed)
    }
}

/// Notification pushed by the provider when the identity changes.
#[derive(Debug, Clone)]
pub struct IdentityChange {
    /// What happened.
    pub event: AuthEvent,
    /// The session after the change, if any.
    pub session: Option<Session>,
}

/// Result of a registration.
#[derive(Debug, Clone)]
pub struct SignUpResponse {
    /// The registered identity.
    pub identity: Identity,
    /// Issued only when the provider does not require email confirmation.
    pub session: Option<Session>,
}

/// Remote identity service.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Return the provider's current session, if a previously issued one is
    /// still usable.
    async fn get_session(&self) -> Result<Option<Session>, AuthError>;

    /// Sign in with email and password.
    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<Session, AuthError>;

    /// Register a new account.
    async fn sign_up(
        &self,
        email: &Email,
        password: &SecretString,
        metadata: &IdentityMetadata,
    ) -> Result<SignUpResponse, AuthError>;

    /// End the current session.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Subscribe to identity-change notifications.
    fn subscribe(&self) -> broadcast::Receiver<IdentityChange>;
}
