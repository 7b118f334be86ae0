//! Session store behavior against scripted fakes.
//!
//! Run with: cargo test -p taskboard-integration-tests --test session_store

#![allow(clippy::unwrap_used)]

use secrecy::SecretString;

use taskboard_core::ProfilePatch;
use taskboard_integration_tests::fakes::{identity, session_for};
use taskboard_integration_tests::{TestContext, wait_for};
use taskboard_session::store::CONFIRMATION_PENDING_MESSAGE;
use taskboard_session::{AuthError, AuthEvent, Phase, RepositoryError, StoreError, SignupOutcome};

fn password(value: &str) -> SecretString {
    SecretString::from(value.to_owned())
}

/// Initialized store with a confirmed account `hana@example.com` / `correct-horse`.
async fn signed_out_context() -> (TestContext, taskboard_core::Identity) {
    let ctx = TestContext::new();
    let hana = identity("hana@example.com", Some("Hana"));
    ctx.provider.add_account(&hana, "correct-horse");
    ctx.store.initialize().await;
    (ctx, hana)
}

// ============================================================================
// Initialization
// ============================================================================

#[tokio::test]
async fn test_initialize_restores_existing_session_and_profile() {
    let ctx = TestContext::new();
    let hana = identity("hana@example.com", Some("Hana"));
    ctx.provider.set_current_session(Some(session_for(&hana)));
    let stored = ctx.profiles.seed_for(&hana, "Hana K.");

    ctx.store.initialize().await;

    let state = ctx.store.snapshot();
    assert!(state.is_initialized);
    assert!(!state.is_loading);
    assert_eq!(state.identity_id(), Some(hana.id));
    assert_eq!(state.profile, Some(stored));
    assert!(state.session.is_some());
    assert_eq!(state.phase(), Phase::Authenticated { profile_loaded: true });
}

#[tokio::test]
async fn test_initialize_without_session() {
    let ctx = TestContext::new();

    assert_eq!(ctx.store.snapshot().phase(), Phase::Uninitialized);
    ctx.store.initialize().await;

    let state = ctx.store.snapshot();
    assert!(state.is_initialized);
    assert!(state.identity.is_none());
    assert!(state.error.is_none());
    assert_eq!(state.phase(), Phase::Unauthenticated);
    assert_eq!(ctx.profiles.get_calls(), 0);
}

#[tokio::test]
async fn test_initialize_provider_failure_still_initializes() {
    let ctx = TestContext::new();
    ctx.provider
        .fail_get_session(AuthError::Transport("connection refused".to_owned()));

    ctx.store.initialize().await;

    let state = ctx.store.snapshot();
    assert!(state.is_initialized);
    assert!(!state.is_loading);
    assert!(state.identity.is_none());
    assert_eq!(
        state.error.as_deref(),
        Some("Unable to reach the server. Check your connection and try again.")
    );
}

#[tokio::test]
async fn test_initialize_profile_failure_keeps_identity() {
    let ctx = TestContext::new();
    let hana = identity("hana@example.com", Some("Hana"));
    ctx.provider.set_current_session(Some(session_for(&hana)));
    ctx.profiles
        .fail_next_read(RepositoryError::Transport("timeout".to_owned()));

    ctx.store.initialize().await;

    let state = ctx.store.snapshot();
    assert!(state.is_initialized);
    assert_eq!(state.identity_id(), Some(hana.id));
    assert!(state.profile.is_none());
    assert!(state.error.is_none());
    assert_eq!(state.phase(), Phase::Authenticated { profile_loaded: false });
}

#[tokio::test]
async fn test_initialize_twice_subscribes_once() {
    let ctx = TestContext::new();

    tokio::join!(ctx.store.initialize(), ctx.store.initialize());
    ctx.store.initialize().await;

    assert_eq!(ctx.provider.subscribe_calls(), 1);
    assert_eq!(ctx.provider.get_session_calls(), 1);
    assert_eq!(ctx.provider.receiver_count(), 1);
    assert!(ctx.store.snapshot().is_initialized);
}

#[tokio::test]
async fn test_initialize_recovers_after_cancelled_attempt() {
    let ctx = TestContext::new();
    let hana = identity("hana@example.com", Some("Hana"));
    ctx.provider.set_current_session(Some(session_for(&hana)));
    ctx.provider.stall_next_get_session();

    let first =
        tokio::time::timeout(std::time::Duration::from_millis(50), ctx.store.initialize()).await;
    assert!(first.is_err());
    assert!(!ctx.store.snapshot().is_initialized);

    tokio::time::timeout(taskboard_integration_tests::WAIT, ctx.store.initialize())
        .await
        .unwrap();

    let state = ctx.store.snapshot();
    assert!(state.is_initialized);
    assert!(!state.is_loading);
    assert_eq!(state.identity_id(), Some(hana.id));
    assert_eq!(ctx.provider.get_session_calls(), 2);
    assert_eq!(ctx.provider.subscribe_calls(), 1);
}

#[tokio::test]
async fn test_dropping_store_stops_listener() {
    let ctx = TestContext::new();
    ctx.store.initialize().await;
    assert_eq!(ctx.provider.receiver_count(), 1);

    let TestContext {
        provider, store, ..
    } = ctx;
    drop(store);
    tokio::task::yield_now().await;

    // An aborted listener releases its receiver.
    tokio::time::timeout(taskboard_integration_tests::WAIT, async {
        while provider.receiver_count() > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

// ============================================================================
// Login / logout
// ============================================================================

#[tokio::test]
async fn test_login_creates_missing_profile_then_logout_clears() {
    let (ctx, hana) = signed_out_context().await;

    ctx.store
        .login("hana@example.com", &password("correct-horse"))
        .await
        .unwrap();

    let state = ctx.store.snapshot();
    assert_eq!(state.identity_id(), Some(hana.id));
    let profile = state.profile.unwrap();
    assert_eq!(profile.id, hana.id);
    assert_eq!(profile.name, "Hana");
    assert_eq!(profile.email, hana.email);
    assert_eq!(ctx.profiles.insert_calls(), 1);
    assert!(!state.is_loading);

    ctx.store.logout().await.unwrap();

    let state = ctx.store.snapshot();
    assert!(state.identity.is_none());
    assert!(state.profile.is_none());
    assert!(state.session.is_none());
    assert!(state.error.is_none());
    assert!(!state.is_loading);
    assert_eq!(ctx.provider.sign_out_calls(), 1);
}

#[tokio::test]
async fn test_login_wrong_password() {
    let (ctx, _) = signed_out_context().await;

    let result = ctx
        .store
        .login("hana@example.com", &password("wrong"))
        .await;

    assert!(matches!(
        result,
        Err(StoreError::Auth(AuthError::InvalidCredentials))
    ));
    let state = ctx.store.snapshot();
    assert!(state.identity.is_none());
    assert!(!state.is_loading);
    assert_eq!(state.error.as_deref(), Some("Invalid email or password."));
}

#[tokio::test]
async fn test_login_invalid_email_never_reaches_provider() {
    let (ctx, _) = signed_out_context().await;

    let result = ctx.store.login("not-an-email", &password("x")).await;

    assert!(matches!(
        result,
        Err(StoreError::Auth(AuthError::InvalidEmail(_)))
    ));
    assert_eq!(
        ctx.store.snapshot().error.as_deref(),
        Some("Please enter a valid email address.")
    );
}

#[tokio::test]
async fn test_login_clears_previous_error() {
    let (ctx, _) = signed_out_context().await;

    let _ = ctx.store.login("hana@example.com", &password("wrong")).await;
    assert!(ctx.store.snapshot().error.is_some());

    ctx.store
        .login("hana@example.com", &password("correct-horse"))
        .await
        .unwrap();
    assert!(ctx.store.snapshot().error.is_none());
}

#[tokio::test]
async fn test_logout_without_identity_is_noop() {
    let ctx = TestContext::new();
    ctx.store.initialize().await;

    ctx.store.logout().await.unwrap();

    assert_eq!(ctx.provider.sign_out_calls(), 0);
    assert!(!ctx.store.snapshot().is_loading);
}

#[tokio::test]
async fn test_logout_failure_keeps_state() {
    let (ctx, hana) = signed_out_context().await;
    ctx.store
        .login("hana@example.com", &password("correct-horse"))
        .await
        .unwrap();
    let before = ctx.store.snapshot();
    ctx.provider
        .fail_sign_out(AuthError::Transport("offline".to_owned()));

    let result = ctx.store.logout().await;

    assert!(matches!(result, Err(StoreError::Auth(AuthError::Transport(_)))));
    let state = ctx.store.snapshot();
    assert_eq!(state.identity_id(), Some(hana.id));
    assert_eq!(state.profile, before.profile);
    assert!(state.session.is_some());
    assert!(state.error.is_some());
    assert!(!state.is_loading);
}

#[tokio::test]
async fn test_clear_error() {
    let (ctx, _) = signed_out_context().await;
    let _ = ctx.store.login("hana@example.com", &password("wrong")).await;

    ctx.store.clear_error();

    assert!(ctx.store.snapshot().error.is_none());
}

// ============================================================================
// Signup
// ============================================================================

#[tokio::test]
async fn test_signup_requiring_confirmation() {
    let ctx = TestContext::new();
    ctx.provider.require_confirmation();
    ctx.store.initialize().await;

    let outcome = ctx
        .store
        .signup("ivan@example.com", &password("pw"), "Ivan")
        .await
        .unwrap();

    assert_eq!(outcome, SignupOutcome::ConfirmationPending);
    let state = ctx.store.snapshot();
    assert!(state.identity.is_none());
    assert!(state.profile.is_none());
    assert!(state.session.is_none());
    assert!(!state.is_loading);
    assert_eq!(state.error.as_deref(), Some(CONFIRMATION_PENDING_MESSAGE));
    assert_eq!(ctx.profiles.insert_calls(), 0);
}

#[tokio::test]
async fn test_signup_signs_in_and_seeds_profile_name() {
    let ctx = TestContext::new();
    ctx.store.initialize().await;

    let outcome = ctx
        .store
        .signup("ivan@example.com", &password("pw"), "  Ivan  ")
        .await
        .unwrap();

    assert_eq!(outcome, SignupOutcome::SignedIn);
    let state = ctx.store.snapshot();
    assert!(state.session.is_some());
    assert_eq!(state.profile.unwrap().name, "Ivan");
}

#[tokio::test]
async fn test_signup_blank_name_falls_back_to_email() {
    let ctx = TestContext::new();
    ctx.store.initialize().await;

    ctx.store
        .signup("ivan.petrov@example.com", &password("pw"), "   ")
        .await
        .unwrap();

    assert_eq!(ctx.store.snapshot().profile.unwrap().name, "ivan.petrov");
}

#[tokio::test]
async fn test_signup_existing_account() {
    let (ctx, _) = signed_out_context().await;

    let result = ctx
        .store
        .signup("hana@example.com", &password("pw"), "Hana")
        .await;

    assert!(matches!(
        result,
        Err(StoreError::Auth(AuthError::UserAlreadyExists))
    ));
    assert_eq!(
        ctx.store.snapshot().error.as_deref(),
        Some("An account with this email already exists.")
    );
}

// ============================================================================
// Profile
// ============================================================================

#[tokio::test]
async fn test_fetch_profile_is_idempotent() {
    let (ctx, _) = signed_out_context().await;
    ctx.store
        .login("hana@example.com", &password("correct-horse"))
        .await
        .unwrap();

    let first = ctx.store.fetch_profile().await;
    let second = ctx.store.fetch_profile().await;

    assert!(first.is_some());
    assert_eq!(first, second);
    assert_eq!(ctx.profiles.insert_calls(), 1);
    assert_eq!(ctx.profiles.row_count(), 1);
}

#[tokio::test]
async fn test_concurrent_fetches_create_profile_once() {
    let ctx = TestContext::new();
    let hana = identity("hana@example.com", Some("Hana"));
    ctx.provider.set_current_session(Some(session_for(&hana)));
    ctx.profiles
        .fail_next_read(RepositoryError::Transport("flaky".to_owned()));
    ctx.store.initialize().await;
    assert!(ctx.store.snapshot().profile.is_none());

    ctx.profiles
        .delay_reads(std::time::Duration::from_millis(20));
    let (a, b, c) = tokio::join!(
        ctx.store.fetch_profile(),
        ctx.store.fetch_profile(),
        ctx.store.fetch_profile()
    );

    assert_eq!(ctx.profiles.insert_calls(), 1);
    assert_eq!(ctx.profiles.row_count(), 1);
    assert!(a.is_some());
    assert_eq!(a, b);
    assert_eq!(b, c);
}

#[tokio::test]
async fn test_fetch_profile_without_identity() {
    let ctx = TestContext::new();
    ctx.store.initialize().await;

    assert!(ctx.store.fetch_profile().await.is_none());
    assert_eq!(ctx.profiles.get_calls(), 0);
}

#[tokio::test]
async fn test_insert_conflict_reads_existing_profile() {
    let ctx = TestContext::new();
    let hana = identity("hana@example.com", Some("Hana"));
    ctx.provider.set_current_session(Some(session_for(&hana)));
    // Another client created the row after our read missed it.
    let theirs = ctx.profiles.seed_for(&hana, "Created Elsewhere");
    ctx.profiles.fail_next_read(RepositoryError::NotFound);

    ctx.store.initialize().await;

    assert_eq!(ctx.profiles.insert_calls(), 1);
    assert_eq!(ctx.store.snapshot().profile, Some(theirs));
}

#[tokio::test]
async fn test_update_profile_leaves_identity_and_session() {
    let (ctx, hana) = signed_out_context().await;
    ctx.store
        .login("hana@example.com", &password("correct-horse"))
        .await
        .unwrap();
    let before = ctx.store.snapshot();

    let updated = ctx
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
    assert_eq!(
        updated.avatar_url.as_deref(),
        Some("https://cdn.example.com/hana.png")
    );
    let state = ctx.store.snapshot();
    assert_eq!(state.identity, before.identity);
    assert_eq!(
        state.session.as_ref().map(|s| s.expires_at),
        before.session.as_ref().map(|s| s.expires_at)
    );
    assert_eq!(state.profile, Some(updated.clone()));
    assert_eq!(ctx.profiles.stored(hana.id), Some(updated));
    assert!(!state.is_loading);
}

#[tokio::test]
async fn test_update_profile_clear_avatar() {
    let (ctx, _) = signed_out_context().await;
    ctx.store
        .login("hana@example.com", &password("correct-horse"))
        .await
        .unwrap();
    ctx.store
        .update_profile(ProfilePatch::default().avatar_url("https://cdn.example.com/a.png"))
        .await
        .unwrap();

    let updated = ctx
        .store
        .update_profile(ProfilePatch::default().clear_avatar())
        .await
        .unwrap()
        .unwrap();

    assert!(updated.avatar_url.is_none());
    assert_eq!(updated.name, "Hana");
}

#[tokio::test]
async fn test_update_profile_failure_keeps_profile() {
    let (ctx, _) = signed_out_context().await;
    ctx.store
        .login("hana@example.com", &password("correct-horse"))
        .await
        .unwrap();
    let before = ctx.store.snapshot().profile;
    ctx.profiles.fail_next_update(RepositoryError::Rejected {
        status: 403,
        message: "permission denied".to_owned(),
    });

    let result = ctx
        .store
        .update_profile(ProfilePatch::default().name("Nope"))
        .await;

    assert!(matches!(result, Err(StoreError::Repository(_))));
    let state = ctx.store.snapshot();
    assert_eq!(state.profile, before);
    assert_eq!(
        state.error.as_deref(),
        Some("Could not save your profile. Please try again.")
    );
    assert!(!state.is_loading);
}

#[tokio::test]
async fn test_update_profile_signed_out_is_noop() {
    let ctx = TestContext::new();
    ctx.store.initialize().await;

    let result = ctx
        .store
        .update_profile(ProfilePatch::default().name("Ghost"))
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(ctx.profiles.update_calls(), 0);
}

#[tokio::test]
async fn test_empty_patch_returns_current_profile() {
    let (ctx, _) = signed_out_context().await;
    ctx.store
        .login("hana@example.com", &password("correct-horse"))
        .await
        .unwrap();

    let result = ctx
        .store
        .update_profile(ProfilePatch::default())
        .await
        .unwrap();

    assert_eq!(result, ctx.store.snapshot().profile);
    assert_eq!(ctx.profiles.update_calls(), 0);
}

#[tokio::test]
async fn test_sign_out_during_update_discards_result() {
    let (ctx, hana) = signed_out_context().await;
    ctx.store
        .login("hana@example.com", &password("correct-horse"))
        .await
        .unwrap();
    let gate = ctx.profiles.pause_next_update();

    let store = ctx.store.clone();
    let pending = tokio::spawn(async move {
        store
            .update_profile(ProfilePatch::default().name("Renamed"))
            .await
    });
    gate.entered().await;

    ctx.provider.emit(AuthEvent::SignedOut, None);
    wait_for(&ctx.store, |s| s.identity.is_none()).await;
    gate.release();

    let result = pending.await.unwrap().unwrap();
    assert!(result.is_none());
    let state = ctx.store.snapshot();
    assert!(state.identity.is_none());
    assert!(state.profile.is_none());
    assert!(state.error.is_none());
    assert!(!state.is_loading);
    // The remote write itself went through.
    assert_eq!(ctx.profiles.stored(hana.id).unwrap().name, "Renamed");
}

// ============================================================================
// Provider notifications
// ============================================================================

#[tokio::test]
async fn test_signed_in_notification_loads_profile() {
    let ctx = TestContext::new();
    ctx.store.initialize().await;
    let hana = identity("hana@example.com", Some("Hana"));
    let stored = ctx.profiles.seed_for(&hana, "Hana");

    ctx.provider
        .emit(AuthEvent::SignedIn, Some(session_for(&hana)));

    let state = wait_for(&ctx.store, |s| s.profile.is_some()).await;
    assert_eq!(state.identity_id(), Some(hana.id));
    assert_eq!(state.profile, Some(stored));
}

#[tokio::test]
async fn test_token_refresh_keeps_profile() {
    let (ctx, hana) = signed_out_context().await;
    ctx.store
        .login("hana@example.com", &password("correct-horse"))
        .await
        .unwrap();
    let profile = ctx.store.snapshot().profile;

    let mut refreshed = session_for(&hana);
    refreshed.expires_at += chrono::Duration::hours(2);
    let expected_expiry = refreshed.expires_at;
    ctx.provider
        .emit(AuthEvent::TokenRefreshed, Some(refreshed));

    let state = wait_for(&ctx.store, |s| {
        s.session.as_ref().is_some_and(|x| x.expires_at == expected_expiry)
    })
    .await;
    assert_eq!(state.profile, profile);
    assert_eq!(ctx.profiles.insert_calls(), 1);
}

#[tokio::test]
async fn test_notification_for_other_identity_drops_profile() {
    let (ctx, _) = signed_out_context().await;
    ctx.store
        .login("hana@example.com", &password("correct-horse"))
        .await
        .unwrap();
    let ivan = identity("ivan@example.com", Some("Ivan"));

    ctx.provider
        .emit(AuthEvent::Other("USER_UPDATED".to_owned()), Some(session_for(&ivan)));

    let state = wait_for(&ctx.store, |s| s.identity_id() == Some(ivan.id)).await;
    // Not a profile-loading event: nothing is fetched for the new identity.
    assert!(state.profile.is_none());
    assert!(state.is_consistent());
}

#[tokio::test]
async fn test_notification_without_session_signs_out() {
    let (ctx, _) = signed_out_context().await;
    ctx.store
        .login("hana@example.com", &password("correct-horse"))
        .await
        .unwrap();
    let _ = ctx.store.login("hana@example.com", &password("wrong")).await;
    assert!(ctx.store.snapshot().error.is_some());

    ctx.provider.emit(AuthEvent::TokenRefreshed, None);

    let state = wait_for(&ctx.store, |s| s.identity.is_none()).await;
    assert!(state.profile.is_none());
    assert!(state.session.is_none());
    assert!(state.error.is_none());
}

#[tokio::test]
async fn test_provider_own_notifications_settle_consistently() {
    let ctx = TestContext::notifying();
    let hana = identity("hana@example.com", Some("Hana"));
    ctx.provider.add_account(&hana, "correct-horse");
    ctx.store.initialize().await;

    ctx.store
        .login("hana@example.com", &password("correct-horse"))
        .await
        .unwrap();
    ctx.store.logout().await.unwrap();

    let state = wait_for(&ctx.store, |s| s.identity.is_none()).await;
    assert!(state.is_consistent());
    assert!(ctx.profiles.insert_calls() <= 1);
}
