//! Integration tests for Taskboard.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p taskboard-integration-tests
//! ```
//!
//! Everything runs in-process: no external service is needed.
//!
//! # Test Categories
//!
//! - `session_store` - Store behavior against scripted fakes ([`fakes`])
//! - `persistence` - Rehydration and the persisted subset
//! - `hosted_adapters` - HTTP adapters against a local stub ([`hosted_stub`])

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod fakes;
pub mod hosted_stub;

use std::sync::Arc;
use std::time::Duration;

use taskboard_session::{PersistPolicy, PersistenceAdapter, SessionStore, StoreState};

use fakes::{FakeIdentityProvider, FakeProfileRepository};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// A store wired to fakes, with handles to the fakes.
pub struct TestContext {
    pub provider: Arc<FakeIdentityProvider>,
    pub profiles: Arc<FakeProfileRepository>,
    pub store: SessionStore,
}

impl TestContext {
    /// Store over a provider that only notifies when told to, and an empty
    /// profile table.
    #[must_use]
    pub fn new() -> Self {
        Self::with_provider(FakeIdentityProvider::silent())
    }

    /// Store over a provider that notifies on its own sign-in and sign-out.
    #[must_use]
    pub fn notifying() -> Self {
        Self::with_provider(FakeIdentityProvider::new())
    }

    /// Store over `provider` and an empty profile table.
    #[must_use]
    pub fn with_provider(provider: FakeIdentityProvider) -> Self {
        let provider = Arc::new(provider);
        let profiles = Arc::new(FakeProfileRepository::new());
        let store = SessionStore::new(provider.clone(), profiles.clone());
        Self {
            provider,
            profiles,
            store,
        }
    }

    /// Store mirrored to `persistence`.
    #[must_use]
    pub fn with_persistence(
        provider: FakeIdentityProvider,
        persistence: Arc<dyn PersistenceAdapter>,
        policy: PersistPolicy,
    ) -> Self {
        let provider = Arc::new(provider);
        let profiles = Arc::new(FakeProfileRepository::new());
        let store = SessionStore::with_persistence(
            provider.clone(),
            profiles.clone(),
            persistence,
            policy,
        );
        Self {
            provider,
            profiles,
            store,
        }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait until the store's state satisfies `predicate`.
///
/// # Panics
///
/// Panics if it does not within [`WAIT`].
pub async fn wait_for(store: &SessionStore, predicate: impl FnMut(&StoreState) -> bool) -> StoreState {
    let mut changes = store.subscribe();
    match tokio::time::timeout(WAIT, changes.wait_for(predicate)).await {
        Ok(Ok(state)) => state.clone(),
        Ok(Err(_)) => panic!("store closed while waiting"),
        Err(_) => panic!("timed out waiting for store state: {:?}", store.snapshot()),
    }
}
