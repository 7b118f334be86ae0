//! Durable key/value storage for store state.
//!
//! The store mirrors a policy-selected subset of its state under
//! [`STORE_KEY`] and rehydrates it at construction, before `initialize`
//! runs. The hosted auth client uses the same adapter for its own session.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use taskboard_core::{Identity, Profile};

use crate::error::PersistenceError;
use crate::state::StoreState;

/// Key the store state is mirrored under.
pub const STORE_KEY: &str = "taskboard.session-store";

/// String key/value storage that survives process restarts.
///
/// Not a secure store: callers decide what is safe to put in it.
pub trait PersistenceAdapter: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::Io` if the backing storage fails.
    fn load(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::Io` if the backing storage fails.
    fn save(&self, key: &str, value: &str) -> Result<(), PersistenceError>;

    /// Remove `key`. Removing a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::Io` if the backing storage fails.
    fn remove(&self, key: &str) -> Result<(), PersistenceError>;
}

// =============================================================================
// Policy
// =============================================================================

/// Which parts of the store state survive a restart.
///
/// Session tokens are never retained by the store; the identity provider
/// keeps its own durable session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PersistPolicy {
    /// Retain nothing. Every start re-derives state from the provider.
    #[default]
    Nothing,
    /// Retain the last identity and profile so observers can render before
    /// `initialize` finishes.
    WarmStart,
}

impl PersistPolicy {
    /// Select the fields of `state` this policy retains.
    #[must_use]
    pub fn select(self, state: &StoreState) -> PersistedState {
        match self {
            Self::Nothing => PersistedState::default(),
            Self::WarmStart => PersistedState {
                identity: state.identity.clone(),
                profile: state.profile.clone(),
            },
        }
    }

    /// Build the initial store state from a stored snapshot.
    ///
    /// Fields the policy does not retain are ignored even if present, and a
    /// profile that does not belong to the stored identity is dropped.
    #[must_use]
    pub fn rehydrate(self, persisted: PersistedState) -> StoreState {
        let retained = match self {
            Self::Nothing => PersistedState::default(),
            Self::WarmStart => persisted,
        };
        let profile = retained
            .profile
            .filter(|p| retained.identity.as_ref().is_some_and(|i| i.id == p.id));

        StoreState {
            identity: retained.identity,
            profile,
            ..StoreState::default()
        }
    }
}

impl FromStr for PersistPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "nothing" => Ok(Self::Nothing),
            "warm-start" | "warm_start" => Ok(Self::WarmStart),
            other => Err(format!(
                "unknown persistence policy '{other}' (expected 'none' or 'warm-start')"
            )),
        }
    }
}

/// The persisted subset of [`StoreState`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Last known identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    /// Last known profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
}

// =============================================================================
// Adapters
// =============================================================================

/// Process-local storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryPersistence {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceAdapter for MemoryPersistence {
    fn load(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a state directory.
///
/// Writes go to a temporary file that is renamed over the target, so a crash
/// mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    dir: PathBuf,
}

impl FilePersistence {
    /// Use `dir` as the state directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::Io` if the directory cannot be created.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Path of the file backing `key`.
    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl PersistenceAdapter for FilePersistence {
    fn load(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let target = self.path_for(key);
        let tmp = target.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp, value)?;
        if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
