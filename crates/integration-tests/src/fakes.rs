//! Scripted in-process implementations of the store's seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Notify, broadcast};

use taskboard_core::{
    Email, Identity, IdentityMetadata, NewProfile, Profile, ProfilePatch, Session, UserId,
};
use taskboard_session::{
    AuthError, AuthEvent, IdentityChange, IdentityProvider, ProfileRepository, RepositoryError,
    SignUpResponse,
};

/// Build a confirmed identity.
#[must_use]
pub fn identity(email: &str, name: Option<&str>) -> Identity {
    Identity {
        id: UserId::generate(),
        email: email.parse().unwrap_or_else(|e| panic!("bad test email {email}: {e}")),
        email_confirmed_at: Some(Utc::now()),
        metadata: IdentityMetadata {
            name: name.map(str::to_owned),
        },
    }
}

/// Build a one-hour session for `identity`.
#[must_use]
pub fn session_for(identity: &Identity) -> Session {
    Session::new(
        identity.clone(),
        SecretString::from(format!("access-{}", identity.id)),
        SecretString::from(format!("refresh-{}", identity.id)),
        Utc::now() + chrono::Duration::hours(1),
    )
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Identity provider
// =============================================================================

struct Account {
    password: String,
    identity: Identity,
}

#[derive(Default)]
struct ProviderScript {
    accounts: HashMap<String, Account>,
    current: Option<Session>,
    get_session_error: Option<AuthError>,
    stall_next_get_session: bool,
    sign_out_error: Option<AuthError>,
    require_confirmation: bool,
}

/// In-memory identity provider.
///
/// Like the hosted client it pushes `SignedIn`/`SignedOut` notifications for
/// its own sign-in, registration and sign-out, unless built with
/// [`FakeIdentityProvider::silent`].
pub struct FakeIdentityProvider {
    script: Mutex<ProviderScript>,
    events: broadcast::Sender<IdentityChange>,
    notify_own_calls: AtomicBool,
    subscribe_calls: AtomicUsize,
    get_session_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
}

impl Default for FakeIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeIdentityProvider {
    /// Provider with no accounts and no session.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            script: Mutex::new(ProviderScript::default()),
            events,
            notify_own_calls: AtomicBool::new(true),
            subscribe_calls: AtomicUsize::new(0),
            get_session_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
        }
    }

    /// Provider that only notifies through [`Self::emit`].
    #[must_use]
    pub fn silent() -> Self {
        let provider = Self::new();
        provider.notify_own_calls.store(false, Ordering::SeqCst);
        provider
    }

    /// Register an account that can sign in with `password`.
    pub fn add_account(&self, identity: &Identity, password: &str) {
        lock(&self.script).accounts.insert(
            identity.email.as_str().to_owned(),
            Account {
                password: password.to_owned(),
                identity: identity.clone(),
            },
        );
    }

    /// Make `get_session` return `session`, as if left over from a previous run.
    pub fn set_current_session(&self, session: Option<Session>) {
        lock(&self.script).current = session;
    }

    /// Make `get_session` fail.
    pub fn fail_get_session(&self, error: AuthError) {
        lock(&self.script).get_session_error = Some(error);
    }

    /// Make the next `get_session` call never complete.
    pub fn stall_next_get_session(&self) {
        lock(&self.script).stall_next_get_session = true;
    }

    /// Make `sign_out` fail.
    pub fn fail_sign_out(&self, error: AuthError) {
        lock(&self.script).sign_out_error = Some(error);
    }

    /// Registrations return an unconfirmed identity and no session.
    pub fn require_confirmation(&self) {
        lock(&self.script).require_confirmation = true;
    }

    /// Push a notification to all subscribers.
    pub fn emit(&self, event: AuthEvent, session: Option<Session>) {
        let _ = self.events.send(IdentityChange { event, session });
    }

    /// How many times `subscribe` was called.
    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// How many times `get_session` was called.
    #[must_use]
    pub fn get_session_calls(&self) -> usize {
        self.get_session_calls.load(Ordering::SeqCst)
    }

    /// How many times `sign_out` was called.
    #[must_use]
    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    /// Number of live notification subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn notify_own(&self, event: AuthEvent, session: Option<Session>) {
        if self.notify_own_calls.load(Ordering::SeqCst) {
            self.emit(event, session);
        }
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        self.get_session_calls.fetch_add(1, Ordering::SeqCst);
        let stall = std::mem::take(&mut lock(&self.script).stall_next_get_session);
        if stall {
            std::future::pending::<()>().await;
        }
        let script = lock(&self.script);
        match &script.get_session_error {
            Some(error) => Err(error.clone()),
            None => Ok(script.current.clone()),
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<Session, AuthError> {
        let session = {
            let mut script = lock(&self.script);
            let account = script
                .accounts
                .get(email.as_str())
                .filter(|a| a.password == password.expose_secret())
                .ok_or(AuthError::InvalidCredentials)?;
            if !account.identity.is_confirmed() {
                return Err(AuthError::EmailNotConfirmed);
            }
            let session = session_for(&account.identity);
            script.current = Some(session.clone());
            session
        };
        self.notify_own(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &Email,
        password: &SecretString,
        metadata: &IdentityMetadata,
    ) -> Result<SignUpResponse, AuthError> {
        let response = {
            let mut script = lock(&self.script);
            if script.accounts.contains_key(email.as_str()) {
                return Err(AuthError::UserAlreadyExists);
            }
            let identity = Identity {
                id: UserId::generate(),
                email: email.clone(),
                email_confirmed_at: (!script.require_confirmation).then(Utc::now),
                metadata: metadata.clone(),
            };
            script.accounts.insert(
                email.as_str().to_owned(),
                Account {
                    password: password.expose_secret().to_owned(),
                    identity: identity.clone(),
                },
            );

            if script.require_confirmation {
                SignUpResponse {
                    identity,
                    session: None,
                }
            } else {
                let session = session_for(&identity);
                script.current = Some(session.clone());
                SignUpResponse {
                    identity,
                    session: Some(session),
                }
            }
        };
        if let Some(session) = &response.session {
            self.notify_own(AuthEvent::SignedIn, Some(session.clone()));
        }
        Ok(response)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut script = lock(&self.script);
            if let Some(error) = &script.sign_out_error {
                return Err(error.clone());
            }
            script.current = None;
        }
        self.notify_own(AuthEvent::SignedOut, None);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<IdentityChange> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.events.subscribe()
    }
}

// =============================================================================
// Profile repository
// =============================================================================

/// Handle for a paused repository call.
///
/// The call signals [`Gate::entered`] once it is in flight and then blocks
/// until [`Gate::release`].
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    /// Wait until a paused call is in flight.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the paused call finish.
    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

/// In-memory profile table.
#[derive(Default)]
pub struct FakeProfileRepository {
    rows: Mutex<HashMap<UserId, Profile>>,
    read_delay: Mutex<Option<Duration>>,
    update_gate: Mutex<Option<Arc<Gate>>>,
    update_error: Mutex<Option<RepositoryError>>,
    read_error: Mutex<Option<RepositoryError>>,
    get_calls: AtomicUsize,
    insert_calls: AtomicUsize,
    update_calls: AtomicUsize,
}

impl FakeProfileRepository {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `profile` directly.
    pub fn seed(&self, profile: Profile) {
        lock(&self.rows).insert(profile.id, profile);
    }

    /// Seed a profile for `identity` and return it.
    pub fn seed_for(&self, identity: &Identity, name: &str) -> Profile {
        let now = Utc::now();
        let profile = Profile {
            id: identity.id,
            email: identity.email.clone(),
            name: name.to_owned(),
            avatar_url: None,
            created_at: now,
            updated_at: now,
        };
        self.seed(profile.clone());
        profile
    }

    /// Stored row for `id`.
    #[must_use]
    pub fn stored(&self, id: UserId) -> Option<Profile> {
        lock(&self.rows).get(&id).cloned()
    }

    /// Number of stored rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        lock(&self.rows).len()
    }

    /// Delay every read, so concurrent callers overlap.
    pub fn delay_reads(&self, delay: Duration) {
        *lock(&self.read_delay) = Some(delay);
    }

    /// Pause the next update until the returned gate is released.
    pub fn pause_next_update(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *lock(&self.update_gate) = Some(Arc::clone(&gate));
        gate
    }

    /// Fail the next update.
    pub fn fail_next_update(&self, error: RepositoryError) {
        *lock(&self.update_error) = Some(error);
    }

    /// Fail the next read.
    pub fn fail_next_read(&self, error: RepositoryError) {
        *lock(&self.read_error) = Some(error);
    }

    /// How many times `get_by_id` was called.
    #[must_use]
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// How many times `insert` was called.
    #[must_use]
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// How many times `update_by_id` was called.
    #[must_use]
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileRepository for FakeProfileRepository {
    async fn get_by_id(&self, id: UserId) -> Result<Profile, RepositoryError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.read_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let error = lock(&self.read_error).take();
        if let Some(error) = error {
            return Err(error);
        }
        self.stored(id).ok_or(RepositoryError::NotFound)
    }

    async fn insert(&self, profile: &NewProfile) -> Result<Profile, RepositoryError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        let mut rows = lock(&self.rows);
        if rows.contains_key(&profile.id) {
            return Err(RepositoryError::Conflict(format!(
                "duplicate key value violates unique constraint (id)=({})",
                profile.id
            )));
        }
        let now = Utc::now();
        let created = Profile {
            id: profile.id,
            email: profile.email.clone(),
            name: profile.name.clone(),
            avatar_url: profile.avatar_url.clone(),
            created_at: now,
            updated_at: now,
        };
        rows.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_by_id(
        &self,
        id: UserId,
        patch: &ProfilePatch,
    ) -> Result<Profile, RepositoryError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let gate = lock(&self.update_gate).take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        let error = lock(&self.update_error).take();
        if let Some(error) = error {
            return Err(error);
        }

        let mut rows = lock(&self.rows);
        let current = rows.get(&id).ok_or(RepositoryError::NotFound)?;
        let updated = current.patched(patch, Utc::now());
        rows.insert(id, updated.clone());
        Ok(updated)
    }
}
