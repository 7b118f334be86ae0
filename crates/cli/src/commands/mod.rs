//! CLI command implementations.

pub mod account;
pub mod profile;
pub mod watch;

use std::io::BufRead;
use std::sync::Arc;

use secrecy::SecretString;
use thiserror::Error;

use taskboard_session::config::{ConfigError, HostedConfig};
use taskboard_session::hosted::{HostedAuthClient, HostedError, HostedProfileRepository};
use taskboard_session::persistence::FilePersistence;
use taskboard_session::{PersistenceAdapter, PersistenceError, SessionStore, StoreError};

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Local state directory could not be used.
    #[error("Local state error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Hosted client construction failed.
    #[error(transparent)]
    Hosted(#[from] HostedError),

    /// A store operation failed.
    #[error("{}", .0.user_message())]
    Store(#[from] StoreError),

    /// Reading from the terminal failed.
    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),

    /// No password was supplied.
    #[error("A password is required (set TASKBOARD_PASSWORD or pipe it on stdin)")]
    MissingPassword,

    /// The command needs a signed-in user.
    #[error("Not signed in. Run `tb login` first.")]
    NotSignedIn,
}

/// Build the store from the environment and derive its initial state.
///
/// # Errors
///
/// Returns `CliError` if configuration, local storage, or client setup fails.
pub async fn connect() -> Result<SessionStore, CliError> {
    let config = HostedConfig::from_env()?;
    tracing::debug!(?config, "Loaded configuration");

    let persistence: Arc<dyn PersistenceAdapter> =
        Arc::new(FilePersistence::new(&config.state_dir)?);
    let auth = HostedAuthClient::new(&config, Arc::clone(&persistence))?;
    let profiles = HostedProfileRepository::new(&config, Arc::new(auth.clone()))?;

    let store = SessionStore::with_persistence(
        Arc::new(auth),
        Arc::new(profiles),
        persistence,
        config.persist_policy,
    );
    store.initialize().await;

    if let Some(error) = store.snapshot().error {
        tracing::warn!(%error, "Session could not be restored");
    }
    Ok(store)
}

/// Password from `TASKBOARD_PASSWORD`, else the first line of stdin.
fn read_password() -> Result<SecretString, CliError> {
    if let Ok(password) = std::env::var("TASKBOARD_PASSWORD") {
        if !password.is_empty() {
            return Ok(SecretString::from(password));
        }
    }

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        return Err(CliError::MissingPassword);
    }
    Ok(SecretString::from(password.to_owned()))
}
