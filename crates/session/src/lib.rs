//! Taskboard Session - Session and profile synchronization core.
//!
//! Tracks whether the user is authenticated, keeps the local profile record
//! consistent with the remote identity, and publishes one consistent
//! [`StoreState`] snapshot to every observer.
//!
//! # Architecture
//!
//! - [`SessionStore`] owns the only mutable copy of the state and exposes the
//!   imperative operations (`initialize`, `login`, `signup`, `logout`,
//!   `fetch_profile`, `update_profile`, `clear_error`)
//! - [`IdentityProvider`], [`ProfileRepository`] and [`PersistenceAdapter`]
//!   are the seams to the outside world
//! - [`hosted`] implements the first two against a hosted auth/data service
//!   over HTTP; [`persistence`] ships file and in-memory adapters
//!
//! # Example
//!
//! ```rust,ignore
//! use taskboard_session::{SessionStore, config::HostedConfig, hosted};
//!
//! let config = HostedConfig::from_env()?;
//! let persistence = Arc::new(FilePersistence::new(&config.state_dir)?);
//! let auth = hosted::HostedAuthClient::new(&config, persistence.clone())?;
//! let profiles = hosted::HostedProfileRepository::new(&config, Arc::new(auth.clone()))?;
//!
//! let store = SessionStore::with_persistence(
//!     Arc::new(auth),
//!     Arc::new(profiles),
//!     persistence,
//!     config.persist_policy,
//! );
//! store.initialize().await;
//!
//! let mut changes = store.subscribe();
//! while changes.changed().await.is_ok() {
//!     render(&changes.borrow_and_update());
//! }
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod error;
pub mod hosted;
pub mod persistence;
pub mod provider;
pub mod repository;
pub mod state;
pub mod store;

pub use error::{AuthError, PersistenceError, RepositoryError, StoreError};
pub use persistence::{PersistPolicy, PersistenceAdapter};
pub use provider::{AuthEvent, IdentityChange, IdentityProvider, SignUpResponse};
pub use repository::ProfileRepository;
pub use state::{Phase, StoreState};
pub use store::{SessionStore, SignupOutcome};
