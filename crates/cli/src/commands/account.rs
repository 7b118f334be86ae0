//! Sign-in, registration and sign-out commands.
//!
//! # Usage
//!
//! ```bash
//! echo "$PASSWORD" | tb login -e hana@example.com
//! tb signup -e ivan@example.com -n "Ivan"
//! tb whoami
//! tb logout
//! ```

use taskboard_session::{SessionStore, SignupOutcome, StoreState};

use super::{CliError, read_password};

/// Sign in and print the resulting profile.
///
/// # Errors
///
/// Returns `CliError` if no password is supplied or sign-in fails.
#[allow(clippy::print_stdout)]
pub async fn login(store: &SessionStore, email: &str) -> Result<(), CliError> {
    let password = read_password()?;
    store.login(email, &password).await?;

    let state = store.snapshot();
    println!("Signed in.");
    print_state(&state);
    Ok(())
}

/// Register a new account.
///
/// # Errors
///
/// Returns `CliError` if no password is supplied or registration fails.
#[allow(clippy::print_stdout)]
pub async fn signup(store: &SessionStore, email: &str, name: &str) -> Result<(), CliError> {
    let password = read_password()?;

    match store.signup(email, &password, name).await? {
        SignupOutcome::SignedIn => {
            println!("Account created.");
            print_state(&store.snapshot());
        }
        SignupOutcome::ConfirmationPending => {
            let state = store.snapshot();
            println!("{}", state.error.as_deref().unwrap_or("Account created."));
            store.clear_error();
        }
    }
    Ok(())
}

/// Sign out.
///
/// # Errors
///
/// Returns `CliError` if the provider rejects the sign-out.
#[allow(clippy::print_stdout)]
pub async fn logout(store: &SessionStore) -> Result<(), CliError> {
    if !store.snapshot().is_authenticated() {
        println!("Not signed in.");
        return Ok(());
    }
    store.logout().await?;
    println!("Signed out.");
    Ok(())
}

/// Print the current identity and profile.
#[allow(clippy::print_stdout)]
pub fn whoami(store: &SessionStore) {
    let state = store.snapshot();
    if state.is_authenticated() {
        print_state(&state);
    } else {
        println!("Not signed in.");
    }
}

/// Human-readable summary of a snapshot.
#[allow(clippy::print_stdout)]
pub(super) fn print_state(state: &StoreState) {
    let Some(identity) = &state.identity else {
        println!("  (no identity)");
        return;
    };

    println!("  id:        {}", identity.id);
    println!("  email:     {}", identity.email);
    println!(
        "  confirmed: {}",
        if identity.is_confirmed() { "yes" } else { "no" }
    );

    match &state.profile {
        Some(profile) => {
            println!("  name:      {}", profile.name);
            println!(
                "  avatar:    {}",
                profile.avatar_url.as_deref().unwrap_or("(none)")
            );
            println!("  updated:   {}", profile.updated_at.to_rfc3339());
        }
        None => println!("  profile:   (not loaded)"),
    }
}
