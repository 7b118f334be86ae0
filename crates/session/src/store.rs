//! The session/profile store.
//!
//! One [`SessionStore`] is built at startup and cloned into every consumer.
//! All state changes go through its operations and are published on a
//! `watch` channel, so observers always see a whole, consistent snapshot.
//!
//! Two things can change the identity: explicit calls (`login`, `logout`,
//! ...) and notifications pushed by the provider. Both may trigger a profile
//! fetch; fetches for one identity are serialized so a missing profile is
//! created exactly once, and any result that lands after the identity has
//! changed is discarded.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use moka::future::Cache;
use secrecy::SecretString;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{OnceCell, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use taskboard_core::{Email, Identity, IdentityMetadata, NewProfile, Profile, ProfilePatch, UserId};

use crate::error::{RepositoryError, StoreError};
use crate::persistence::{
    MemoryPersistence, PersistPolicy, PersistedState, PersistenceAdapter, STORE_KEY,
};
use crate::provider::{AuthEvent, IdentityChange, IdentityProvider};
use crate::repository::ProfileRepository;
use crate::state::StoreState;

/// Shown after a registration that still needs email confirmation.
pub const CONFIRMATION_PENDING_MESSAGE: &str =
    "Check your email to confirm your account, then sign in.";

type ProfileLocks = Cache<UserId, Arc<tokio::sync::Mutex<()>>>;

/// Outcome of [`SessionStore::signup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignupOutcome {
    /// The account is active and the user is signed in.
    SignedIn,
    /// The provider is waiting for the user to confirm their email address.
    ConfirmationPending,
}

/// Process-wide session and profile state.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionStoreInner>,
}

struct SessionStoreInner {
    provider: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileRepository>,
    persistence: Arc<dyn PersistenceAdapter>,
    policy: PersistPolicy,
    state: watch::Sender<StoreState>,
    initialized: OnceCell<()>,
    listener: Mutex<Option<JoinHandle<()>>>,
    profile_locks: ProfileLocks,
    last_persisted: Mutex<Option<String>>,
}

impl Drop for SessionStoreInner {
    fn drop(&mut self) {
        let listener = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = listener.take() {
            handle.abort();
        }
    }
}

impl SessionStore {
    /// Create a store that keeps nothing across restarts.
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>, profiles: Arc<dyn ProfileRepository>) -> Self {
        Self::with_persistence(
            provider,
            profiles,
            Arc::new(MemoryPersistence::new()),
            PersistPolicy::Nothing,
        )
    }

    /// Create a store mirrored to `persistence` under `policy`.
    ///
    /// The stored snapshot is rehydrated immediately, before `initialize`.
    /// An unreadable snapshot is logged and ignored.
    #[must_use]
    pub fn with_persistence(
        provider: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileRepository>,
        persistence: Arc<dyn PersistenceAdapter>,
        policy: PersistPolicy,
    ) -> Self {
        let (initial, stored_raw) = rehydrate(persistence.as_ref(), policy);
        let (state, _) = watch::channel(initial);

        Self {
            inner: Arc::new(SessionStoreInner {
                provider,
                profiles,
                persistence,
                policy,
                state,
                initialized: OnceCell::new(),
                listener: Mutex::new(None),
                profile_locks: profile_lock_map(),
                last_persisted: Mutex::new(stored_raw),
            }),
        }
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Subscribe to state changes.
    ///
    /// The receiver starts at the current snapshot; `changed()` resolves on
    /// each subsequent change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.inner.state.subscribe()
    }

    /// Clone of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StoreState {
        self.inner.state.borrow().clone()
    }

    fn current_identity(&self) -> Option<Identity> {
        self.inner.state.borrow().identity.clone()
    }

    fn is_current(&self, id: UserId) -> bool {
        self.inner.state.borrow().identity_id() == Some(id)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Derive the state from the provider's existing session.
    ///
    /// Registers the identity-change subscription on first call. Later calls
    /// wait for the first one to finish and change nothing. If a caller is
    /// cancelled mid-way, the next call starts over. Never fails: provider
    /// errors are recorded in `error` and `is_initialized` is set on every
    /// path.
    #[instrument(skip(self))]
    pub async fn initialize(&self) {
        if self.inner.initialized.initialized() {
            debug!("Session store already initialized");
            return;
        }
        self.inner
            .initialized
            .get_or_init(|| self.load_initial_state())
            .await;
    }

    async fn load_initial_state(&self) {
        self.start_listener();
        self.update(|s| {
            s.is_loading = true;
            true
        });

        match self.inner.provider.get_session().await {
            Ok(Some(session)) => {
                info!(user_id = %session.identity.id, "Restored existing session");
                self.update(|s| {
                    s.set_session(session);
                    s.is_loading = false;
                    s.is_initialized = true;
                    true
                });
                self.fetch_profile().await;
            }
            Ok(None) => {
                debug!("No existing session");
                self.update(|s| {
                    s.clear_auth();
                    s.is_loading = false;
                    s.is_initialized = true;
                    true
                });
            }
            Err(e) => {
                warn!(error = %e, "Failed to retrieve session during initialization");
                self.update(|s| {
                    s.error = Some(e.user_message());
                    s.is_loading = false;
                    s.is_initialized = true;
                    true
                });
            }
        }
    }

    /// Spawn the task that applies provider notifications.
    fn start_listener(&self) {
        let mut listener = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if listener.is_some() {
            return;
        }

        let mut changes = self.inner.provider.subscribe();
        let weak: Weak<SessionStoreInner> = Arc::downgrade(&self.inner);

        *listener = Some(tokio::spawn(async move {
            loop {
                let change = match changes.recv().await {
                    Ok(change) => change,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Dropped identity-change notifications");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else { break };
                SessionStore { inner }.handle_identity_change(change);
            }
            debug!("Identity-change listener stopped");
        }));
    }

    /// Apply a provider notification. Never fails.
    fn handle_identity_change(&self, change: IdentityChange) {
        let IdentityChange { event, session } = change;

        match (event, session) {
            (AuthEvent::SignedOut, session) => {
                if session.is_some() {
                    warn!("Signed-out notification carried a session; ignoring it");
                }
                info!("Identity signed out");
                self.update(|s| {
                    s.clear_auth();
                    s.error = None;
                    true
                });
            }
            (event, Some(session)) => {
                debug!(?event, user_id = %session.identity.id, "Identity changed");
                self.update(|s| {
                    s.set_session(session);
                    s.error = None;
                    true
                });
                if event.refreshes_profile() {
                    let store = self.clone();
                    tokio::spawn(async move {
                        store.fetch_profile().await;
                    });
                }
            }
            (event, None) => {
                if event.refreshes_profile() {
                    warn!(?event, "Notification without a session; treating as signed out");
                }
                self.update(|s| {
                    s.clear_auth();
                    s.error = None;
                    true
                });
            }
        }
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Sign in with email and password, then load the profile.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Auth` for invalid credentials, an unconfirmed
    /// email, or a provider failure. The user-facing message is also stored
    /// in `error`.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &SecretString) -> Result<(), StoreError> {
        self.update(|s| {
            s.is_loading = true;
            s.error = None;
            true
        });

        let result = match Email::parse(email) {
            Ok(email) => {
                self.inner
                    .provider
                    .sign_in_with_password(&email, password)
                    .await
            }
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(session) => {
                info!(user_id = %session.identity.id, "Signed in");
                self.update(|s| {
                    s.set_session(session);
                    s.is_loading = false;
                    true
                });
                self.fetch_profile().await;
                Ok(())
            }
            Err(e) => {
                if e.is_credential_error() {
                    info!(error = %e, "Sign-in rejected");
                } else {
                    warn!(error = %e, "Sign-in failed");
                }
                self.update(|s| {
                    s.error = Some(e.user_message());
                    s.is_loading = false;
                    true
                });
                Err(e.into())
            }
        }
    }

    /// Register a new account with `name` as identity metadata.
    ///
    /// When the provider requires email confirmation, nothing is signed in:
    /// `error` carries an informational message and
    /// [`SignupOutcome::ConfirmationPending`] is returned.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Auth` if registration fails.
    #[instrument(skip(self, password, name))]
    pub async fn signup(
        &self,
        email: &str,
        password: &SecretString,
        name: &str,
    ) -> Result<SignupOutcome, StoreError> {
        self.update(|s| {
            s.is_loading = true;
            s.error = None;
            true
        });

        let name = name.trim();
        let metadata = IdentityMetadata {
            name: (!name.is_empty()).then(|| name.to_owned()),
        };
        let result = match Email::parse(email) {
            Ok(email) => self.inner.provider.sign_up(&email, password, &metadata).await,
            Err(e) => Err(e.into()),
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Registration failed");
                self.update(|s| {
                    s.error = Some(e.user_message());
                    s.is_loading = false;
                    true
                });
                return Err(e.into());
            }
        };

        if !response.identity.is_confirmed() {
            info!(user_id = %response.identity.id, "Registration awaiting email confirmation");
            self.update(|s| {
                s.error = Some(CONFIRMATION_PENDING_MESSAGE.to_owned());
                s.is_loading = false;
                true
            });
            return Ok(SignupOutcome::ConfirmationPending);
        }

        info!(user_id = %response.identity.id, "Registered and signed in");
        self.update(|s| {
            match response.session {
                Some(session) => s.set_session(session),
                None => s.set_identity(response.identity),
            }
            s.is_loading = false;
            true
        });
        self.fetch_profile().await;
        Ok(SignupOutcome::SignedIn)
    }

    /// Sign out. A no-op when nobody is signed in.
    ///
    /// State is only cleared once the provider confirms.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Auth` if the provider fails; the state is left
    /// unchanged apart from `error`.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<(), StoreError> {
        if self.current_identity().is_none() {
            debug!("Logout without identity; nothing to do");
            return Ok(());
        }

        self.update(|s| {
            s.is_loading = true;
            true
        });

        match self.inner.provider.sign_out().await {
            Ok(()) => {
                info!("Signed out");
                self.update(|s| {
                    s.clear_auth();
                    s.error = None;
                    s.is_loading = false;
                    true
                });
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Sign-out failed");
                self.update(|s| {
                    s.error = Some(e.user_message());
                    s.is_loading = false;
                    true
                });
                Err(e.into())
            }
        }
    }

    /// Clear the error annotation.
    pub fn clear_error(&self) {
        self.update(|s| s.error.take().is_some());
    }

    // =========================================================================
    // Profile
    // =========================================================================

    /// Load the current identity's profile, creating it if it does not exist.
    ///
    /// Best-effort: failures are logged and leave `profile` as it was. Returns
    /// the profile visible afterwards.
    #[instrument(skip(self))]
    pub async fn fetch_profile(&self) -> Option<Profile> {
        let Some(identity) = self.current_identity() else {
            debug!("No identity; skipping profile fetch");
            return None;
        };
        let id = identity.id;

        let lock = profile_lock(&self.inner.profile_locks, id).await;
        let _guard = lock.lock().await;

        if !self.is_current(id) {
            debug!(user_id = %id, "Identity changed while waiting; skipping profile fetch");
            return self.snapshot().profile;
        }

        let result = match self.inner.profiles.get_by_id(id).await {
            Err(RepositoryError::NotFound) => self.create_profile(&identity).await,
            other => other,
        };

        match result {
            Ok(profile) => {
                let applied = self.update(|s| {
                    if s.identity_id() != Some(id) || profile.id != id {
                        return false;
                    }
                    if s.profile.as_ref() == Some(&profile) {
                        return false;
                    }
                    s.profile = Some(profile);
                    true
                });
                if !applied && !self.is_current(id) {
                    debug!(user_id = %id, "Discarded profile for a previous identity");
                }
            }
            Err(e) => {
                warn!(user_id = %id, error = %e, "Profile fetch failed");
            }
        }

        self.snapshot().profile
    }

    /// Insert a profile seeded from the identity. If another client inserted
    /// it first, read theirs.
    async fn create_profile(&self, identity: &Identity) -> Result<Profile, RepositoryError> {
        let seed = NewProfile::seeded_from(identity);
        match self.inner.profiles.insert(&seed).await {
            Ok(profile) => {
                info!(user_id = %identity.id, "Created profile");
                Ok(profile)
            }
            Err(RepositoryError::Conflict(reason)) => {
                debug!(user_id = %identity.id, %reason, "Profile already exists; re-reading");
                self.inner.profiles.get_by_id(identity.id).await
            }
            Err(e) => Err(e),
        }
    }

    /// Apply a partial update to the current identity's profile.
    ///
    /// Returns the updated profile, or `None` when nobody is signed in or the
    /// identity changed while the update was in flight (the result is then
    /// discarded).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Repository` if the repository rejects the update;
    /// the previous profile is kept.
    #[instrument(skip(self, patch))]
    pub async fn update_profile(&self, patch: ProfilePatch) -> Result<Option<Profile>, StoreError> {
        let Some(id) = self.current_identity().map(|identity| identity.id) else {
            debug!("No identity; skipping profile update");
            return Ok(None);
        };
        if patch.is_empty() {
            return Ok(self.snapshot().profile);
        }

        self.update(|s| {
            s.is_loading = true;
            s.error = None;
            true
        });

        match self.inner.profiles.update_by_id(id, &patch).await {
            Ok(profile) => {
                let mut applied = None;
                self.update(|s| {
                    s.is_loading = false;
                    if s.identity_id() == Some(id) && profile.id == id {
                        s.profile = Some(profile);
                        applied.clone_from(&s.profile);
                    }
                    true
                });
                if applied.is_some() {
                    info!(user_id = %id, "Updated profile");
                } else {
                    debug!(user_id = %id, "Discarded profile update for a previous identity");
                }
                Ok(applied)
            }
            Err(e) => {
                warn!(user_id = %id, error = %e, "Profile update failed");
                self.update(|s| {
                    s.is_loading = false;
                    if s.identity_id() == Some(id) {
                        s.error = Some(e.user_message());
                    }
                    true
                });
                Err(e.into())
            }
        }
    }

    // =========================================================================
    // State plumbing
    // =========================================================================

    /// Mutate the state in one critical section. Observers are notified and
    /// the persisted subset refreshed only when `f` returns `true`.
    fn update(&self, f: impl FnOnce(&mut StoreState) -> bool) -> bool {
        let changed = self.inner.state.send_if_modified(|state| {
            let changed = f(state);
            debug_assert!(state.is_consistent(), "inconsistent store state: {state:?}");
            changed
        });
        if changed {
            self.persist();
        }
        changed
    }

    /// Write the policy-selected subset if it differs from the last write.
    ///
    /// The selection is taken under the write lock, so concurrent callers
    /// never overwrite a newer snapshot with an older one.
    fn persist(&self) {
        let mut last = self
            .inner
            .last_persisted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let selected = self.inner.policy.select(&self.inner.state.borrow());
        let json = match serde_json::to_string(&selected) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to encode store state");
                return;
            }
        };
        if last.as_deref() == Some(json.as_str()) {
            return;
        }
        match blocking(|| self.inner.persistence.save(STORE_KEY, &json)) {
            Ok(()) => *last = Some(json),
            Err(e) => warn!(error = %e, "Failed to persist store state"),
        }
    }
}

/// Per-identity fetch locks.
///
/// Entries are never evicted: a lock that is held must stay the only lock
/// for its identity. There is one small entry per identity seen.
fn profile_lock_map() -> ProfileLocks {
    Cache::builder().build()
}

async fn profile_lock(locks: &ProfileLocks, id: UserId) -> Arc<tokio::sync::Mutex<()>> {
    locks
        .get_with(id, async { Arc::new(tokio::sync::Mutex::new(())) })
        .await
}

/// Run storage I/O off the async worker where the runtime allows it.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Load the stored snapshot. Returns the initial state and the raw stored
/// value, so an unchanged selection is not written back.
fn rehydrate(
    persistence: &dyn PersistenceAdapter,
    policy: PersistPolicy,
) -> (StoreState, Option<String>) {
    let raw = match persistence.load(STORE_KEY) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "Failed to load persisted store state");
            return (StoreState::default(), None);
        }
    };
    let Some(raw) = raw else {
        return (StoreState::default(), None);
    };

    match serde_json::from_str::<PersistedState>(&raw) {
        Ok(persisted) => {
            let state = policy.rehydrate(persisted);
            debug!(
                restored_identity = state.identity.is_some(),
                "Rehydrated store state"
            );
            (state, Some(raw))
        }
        Err(e) => {
            warn!(error = %e, "Discarding unreadable persisted store state");
            (StoreState::default(), None)
        }
    }
}
