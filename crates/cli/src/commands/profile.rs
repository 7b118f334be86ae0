//! Profile commands.

use taskboard_core::ProfilePatch;
use taskboard_session::SessionStore;

use super::CliError;
use super::account::print_state;

/// Apply a partial update to the signed-in user's profile.
///
/// # Errors
///
/// Returns `CliError::NotSignedIn` without a session, or the store error if
/// the update is rejected.
#[allow(clippy::print_stdout)]
pub async fn set(
    store: &SessionStore,
    name: Option<String>,
    avatar_url: Option<String>,
    clear_avatar: bool,
) -> Result<(), CliError> {
    if !store.snapshot().is_authenticated() {
        return Err(CliError::NotSignedIn);
    }

    let mut patch = ProfilePatch::default();
    if let Some(name) = name {
        patch = patch.name(name);
    }
    if let Some(url) = avatar_url {
        patch = patch.avatar_url(url);
    }
    if clear_avatar {
        patch = patch.clear_avatar();
    }

    if patch.is_empty() {
        println!("Nothing to update.");
        return Ok(());
    }

    match store.update_profile(patch).await? {
        Some(_) => {
            println!("Profile updated.");
            print_state(&store.snapshot());
        }
        None => println!("Signed out before the update completed; nothing applied."),
    }
    Ok(())
}
