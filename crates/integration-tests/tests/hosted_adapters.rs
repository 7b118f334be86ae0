//! Hosted auth and profile adapters against a local stub service.
//!
//! Run with: cargo test -p taskboard-integration-tests --test hosted_adapters

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use secrecy::SecretString;

use taskboard_core::{Email, NewProfile, ProfilePatch, UserId};
use taskboard_integration_tests::hosted_stub::StubService;
use taskboard_integration_tests::wait_for;
use taskboard_session::hosted::{AUTH_STORAGE_KEY, HostedAuthClient, HostedProfileRepository};
use taskboard_session::persistence::MemoryPersistence;
use taskboard_session::{
    AuthError, IdentityProvider, PersistenceAdapter, ProfileRepository, RepositoryError,
    SessionStore, SignupOutcome, StoreError,
};

struct Hosted {
    auth: HostedAuthClient,
    profiles: Arc<HostedProfileRepository>,
    store: SessionStore,
}

fn connect(stub: &StubService, storage: &Arc<dyn PersistenceAdapter>) -> Hosted {
    let config = stub.config();
    let auth = HostedAuthClient::new(&config, Arc::clone(storage)).unwrap();
    let profiles =
        Arc::new(HostedProfileRepository::new(&config, Arc::new(auth.clone())).unwrap());
    let store = SessionStore::new(Arc::new(auth.clone()), profiles.clone());
    Hosted {
        auth,
        profiles,
        store,
    }
}

fn storage() -> Arc<dyn PersistenceAdapter> {
    Arc::new(MemoryPersistence::new())
}

fn password(value: &str) -> SecretString {
    SecretString::from(value.to_owned())
}

// ============================================================================
// Sign-in
// ============================================================================

#[tokio::test]
async fn test_login_creates_profile_row() {
    let stub = StubService::start().await;
    let id = stub.add_user("hana@example.com", "correct-horse", true, Some("Hana"));
    let hosted = connect(&stub, &storage());
    hosted.store.initialize().await;

    hosted
        .store
        .login("hana@example.com", &password("correct-horse"))
        .await
        .unwrap();

    let state = hosted.store.snapshot();
    assert_eq!(state.identity_id(), Some(UserId::from_uuid(id)));
    assert_eq!(state.profile.as_ref().unwrap().name, "Hana");
    let row = stub.profile(id).unwrap();
    assert_eq!(row["name"], "Hana");
    assert_eq!(row["email"], "hana@example.com");
}

#[tokio::test]
async fn test_login_loads_existing_profile() {
    let stub = StubService::start().await;
    let id = stub.add_user("hana@example.com", "correct-horse", true, Some("Hana"));
    stub.seed_profile(id, "hana@example.com", "Hana Kowalski");
    let hosted = connect(&stub, &storage());
    hosted.store.initialize().await;

    hosted
        .store
        .login("hana@example.com", &password("correct-horse"))
        .await
        .unwrap();

    assert_eq!(
        hosted.store.snapshot().profile.unwrap().name,
        "Hana Kowalski"
    );
}

#[tokio::test]
async fn test_login_wrong_password() {
    let stub = StubService::start().await;
    stub.add_user("hana@example.com", "correct-horse", true, None);
    let hosted = connect(&stub, &storage());
    hosted.store.initialize().await;

    let result = hosted
        .store
        .login("hana@example.com", &password("battery-staple"))
        .await;

    assert!(matches!(
        result,
        Err(StoreError::Auth(AuthError::InvalidCredentials))
    ));
    assert_eq!(
        hosted.store.snapshot().error.as_deref(),
        Some("Invalid email or password.")
    );
}

#[tokio::test]
async fn test_login_unconfirmed_email() {
    let stub = StubService::start().await;
    stub.add_user("ivan@example.com", "correct-horse", false, None);
    let hosted = connect(&stub, &storage());
    hosted.store.initialize().await;

    let result = hosted
        .store
        .login("ivan@example.com", &password("correct-horse"))
        .await;

    assert!(matches!(
        result,
        Err(StoreError::Auth(AuthError::EmailNotConfirmed))
    ));
    assert_eq!(
        hosted.store.snapshot().error.as_deref(),
        Some("Please confirm your email address before signing in.")
    );
}

// ============================================================================
// Signup
// ============================================================================

#[tokio::test]
async fn test_signup_pending_confirmation() {
    let stub = StubService::start().await;
    stub.require_confirmation();
    let hosted = connect(&stub, &storage());
    hosted.store.initialize().await;

    let outcome = hosted
        .store
        .signup("ivan@example.com", &password("long-enough"), "Ivan")
        .await
        .unwrap();

    assert_eq!(outcome, SignupOutcome::ConfirmationPending);
    assert!(hosted.store.snapshot().identity.is_none());
}

#[tokio::test]
async fn test_signup_signs_in_with_metadata_name() {
    let stub = StubService::start().await;
    let hosted = connect(&stub, &storage());
    hosted.store.initialize().await;

    let outcome = hosted
        .store
        .signup("ivan@example.com", &password("long-enough"), "Ivan")
        .await
        .unwrap();

    assert_eq!(outcome, SignupOutcome::SignedIn);
    let state = hosted.store.snapshot();
    assert!(state.session.is_some());
    assert_eq!(state.profile.unwrap().name, "Ivan");
}

#[tokio::test]
async fn test_signup_weak_password_message_passes_through() {
    let stub = StubService::start().await;
    let hosted = connect(&stub, &storage());
    hosted.store.initialize().await;

    let result = hosted
        .store
        .signup("ivan@example.com", &password("pw"), "Ivan")
        .await;

    assert!(matches!(
        result,
        Err(StoreError::Auth(AuthError::WeakPassword(_)))
    ));
    assert_eq!(
        hosted.store.snapshot().error.as_deref(),
        Some("Password should be at least 6 characters.")
    );
}

// ============================================================================
// Profile
// ============================================================================

#[tokio::test]
async fn test_update_profile_writes_through() {
    let stub = StubService::start().await;
    let id = stub.add_user("hana@example.com", "correct-horse", true, Some("Hana"));
    let hosted = connect(&stub, &storage());
    hosted.store.initialize().await;
    hosted
        .store
        .login("hana@example.com", &password("correct-horse"))
        .await
        .unwrap();

    let updated = hosted
        .store
        .update_profile(
            ProfilePatch::default()
                .name("Hana K.")
                .avatar_url("https://cdn.example.com/hana.png"),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.name, "Hana K.");
    assert_eq!(stub.profile(id).unwrap()["avatar_url"], "https://cdn.example.com/hana.png");

    let cleared = hosted
        .store
        .update_profile(ProfilePatch::default().clear_avatar())
        .await
        .unwrap()
        .unwrap();
    assert!(cleared.avatar_url.is_none());
    assert!(stub.profile(id).unwrap()["avatar_url"].is_null());
    assert_eq!(stub.profile(id).unwrap()["name"], "Hana K.");
}

#[tokio::test]
async fn test_repository_maps_missing_and_duplicate_rows() {
    let stub = StubService::start().await;
    stub.add_user("hana@example.com", "correct-horse", true, Some("Hana"));
    let hosted = connect(&stub, &storage());
    let session = hosted
        .auth
        .sign_in_with_password(
            &Email::parse("hana@example.com").unwrap(),
            &password("correct-horse"),
        )
        .await
        .unwrap();
    let id = session.identity.id;

    assert_eq!(
        hosted.profiles.get_by_id(id).await,
        Err(RepositoryError::NotFound)
    );
    // Rows of other users are invisible, not forbidden.
    assert_eq!(
        hosted.profiles.get_by_id(UserId::generate()).await,
        Err(RepositoryError::NotFound)
    );

    let seed = NewProfile::seeded_from(&session.identity);
    let created = hosted.profiles.insert(&seed).await.unwrap();
    assert_eq!(created.id, id);
    assert_eq!(created.name, "Hana");
    assert!(matches!(
        hosted.profiles.insert(&seed).await,
        Err(RepositoryError::Conflict(_))
    ));
    assert_eq!(hosted.profiles.get_by_id(id).await.unwrap(), created);
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[tokio::test]
async fn test_new_client_restores_stored_session() {
    let stub = StubService::start().await;
    let id = stub.add_user("hana@example.com", "correct-horse", true, Some("Hana"));
    let shared = storage();

    let first = connect(&stub, &shared);
    first.store.initialize().await;
    first
        .store
        .login("hana@example.com", &password("correct-horse"))
        .await
        .unwrap();
    drop(first);

    let second = connect(&stub, &shared);
    second.store.initialize().await;

    let state = second.store.snapshot();
    assert_eq!(state.identity_id(), Some(UserId::from_uuid(id)));
    assert_eq!(state.profile.unwrap().name, "Hana");
    assert_eq!(stub.token_grants(), vec!["password".to_owned()]);
}

#[tokio::test]
async fn test_short_lived_session_is_refreshed_once() {
    let stub = StubService::start().await;
    let id = stub.add_user("hana@example.com", "correct-horse", true, Some("Hana"));
    stub.set_expires_in(30);
    let shared = storage();

    let first = connect(&stub, &shared);
    first.store.initialize().await;
    first
        .store
        .login("hana@example.com", &password("correct-horse"))
        .await
        .unwrap();
    drop(first);

    let second = connect(&stub, &shared);
    second.store.initialize().await;
    let state = wait_for(&second.store, |s| s.profile.is_some()).await;
    assert_eq!(state.identity_id(), Some(UserId::from_uuid(id)));

    // Further profile traffic reuses the refreshed token.
    second.store.fetch_profile().await;
    let refreshes = stub
        .token_grants()
        .iter()
        .filter(|grant| grant.as_str() == "refresh_token")
        .count();
    assert_eq!(refreshes, 1);
}

#[tokio::test]
async fn test_revoked_refresh_token_signs_out() {
    let stub = StubService::start().await;
    stub.add_user("hana@example.com", "correct-horse", true, Some("Hana"));
    stub.set_expires_in(30);
    let shared = storage();

    let first = connect(&stub, &shared);
    first.store.initialize().await;
    first
        .store
        .login("hana@example.com", &password("correct-horse"))
        .await
        .unwrap();
    drop(first);
    stub.revoke_refresh_tokens();

    let second = connect(&stub, &shared);
    second.store.initialize().await;

    let state = second.store.snapshot();
    assert!(state.is_initialized);
    assert!(state.identity.is_none());
    assert!(state.error.is_none());
    assert_eq!(shared.load(AUTH_STORAGE_KEY).unwrap(), None);
}

#[tokio::test]
async fn test_logout_revokes_remote_session() {
    let stub = StubService::start().await;
    stub.add_user("hana@example.com", "correct-horse", true, Some("Hana"));
    let shared = storage();

    let hosted = connect(&stub, &shared);
    hosted.store.initialize().await;
    hosted
        .store
        .login("hana@example.com", &password("correct-horse"))
        .await
        .unwrap();
    assert!(shared.load(AUTH_STORAGE_KEY).unwrap().is_some());

    hosted.store.logout().await.unwrap();

    assert_eq!(stub.logout_calls(), 1);
    assert_eq!(shared.load(AUTH_STORAGE_KEY).unwrap(), None);
    let state = hosted.store.snapshot();
    assert!(state.identity.is_none());
    assert!(state.profile.is_none());

    let restarted = connect(&stub, &shared);
    restarted.store.initialize().await;
    assert!(restarted.store.snapshot().identity.is_none());
}
