//! Follow state changes, e.g. a token refresh or a sign-out elsewhere.

use taskboard_session::{Phase, SessionStore, StoreState};

use super::CliError;

/// Print each state change until Ctrl-C.
///
/// # Errors
///
/// Returns `CliError::Io` if the Ctrl-C handler cannot be installed.
#[allow(clippy::print_stdout)]
pub async fn run(store: &SessionStore) -> Result<(), CliError> {
    let mut changes = store.subscribe();
    println!("{}", describe(&changes.borrow_and_update()));

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("{}", describe(&changes.borrow_and_update()));
            }
        }
    }
    Ok(())
}

fn describe(state: &StoreState) -> String {
    let phase = match state.phase() {
        Phase::Uninitialized => "uninitialized".to_owned(),
        Phase::Initializing => "initializing".to_owned(),
        Phase::Unauthenticated => "signed out".to_owned(),
        Phase::Authenticated { profile_loaded } => {
            let who = state
                .identity
                .as_ref()
                .map_or_else(String::new, |i| i.email.to_string());
            if profile_loaded {
                format!("signed in as {who}")
            } else {
                format!("signed in as {who} (profile pending)")
            }
        }
    };

    let mut line = phase;
    if state.is_loading {
        line.push_str(" [loading]");
    }
    if let Some(error) = &state.error {
        line.push_str(&format!(" error: {error}"));
    }
    line
}
