//! The snapshot published to observers.

use taskboard_core::{Identity, Profile, Session, UserId};

/// Coarse lifecycle phase, derived from a [`StoreState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// `initialize` has not run yet.
    Uninitialized,
    /// `initialize` is retrieving the provider's session.
    Initializing,
    /// An identity is present.
    Authenticated {
        /// Whether the profile has been loaded.
        profile_loaded: bool,
    },
    /// No identity.
    Unauthenticated,
}

/// Session and profile state shared by all observers.
///
/// Observers receive clones; only [`SessionStore`](crate::SessionStore)
/// writes the authoritative copy.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    /// Authenticated identity.
    pub identity: Option<Identity>,
    /// Profile of `identity`, once loaded.
    pub profile: Option<Profile>,
    /// Session backing `identity`.
    pub session: Option<Session>,
    /// An explicit operation is in flight.
    pub is_loading: bool,
    /// `initialize` has completed. Never reverts.
    pub is_initialized: bool,
    /// User-facing message from the last completed operation.
    pub error: Option<String>,
}

impl StoreState {
    /// Current lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match (&self.identity, self.is_initialized) {
            (Some(_), _) => Phase::Authenticated {
                profile_loaded: self.profile.is_some(),
            },
            (None, true) => Phase::Unauthenticated,
            (None, false) if self.is_loading => Phase::Initializing,
            (None, false) => Phase::Uninitialized,
        }
    }

    /// Whether an identity is present.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    /// Id of the current identity.
    #[must_use]
    pub fn identity_id(&self) -> Option<UserId> {
        self.identity.as_ref().map(|identity| identity.id)
    }

    /// Whether the snapshot satisfies the ownership invariants: a profile
    /// belongs to the current identity, a session implies an identity, and
    /// the session authenticates that identity.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let id = self.identity_id();
        let profile_ok = self.profile.as_ref().is_none_or(|p| Some(p.id) == id);
        let session_ok = self
            .session
            .as_ref()
            .is_none_or(|s| Some(s.identity.id) == id);
        profile_ok && session_ok
    }

    /// Install a session and its identity. The profile is dropped when the
    /// identity changes.
    pub(crate) fn set_session(&mut self, session: Session) {
        self.set_identity(session.identity.clone());
        self.session = Some(session);
    }

    /// Install an identity without a session.
    pub(crate) fn set_identity(&mut self, identity: Identity) {
        if self.identity_id() != Some(identity.id) {
            self.profile = None;
            self.session = None;
        }
        self.identity = Some(identity);
    }

    /// Tear down to the unauthenticated shape.
    pub(crate) fn clear_auth(&mut self) {
        self.identity = None;
        self.profile = None;
        self.session = None;
    }
}
