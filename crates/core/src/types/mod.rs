//! Core types for Taskboard.
//!
//! This module provides type-safe wrappers for the authentication and
//! profile domain.

pub mod email;
pub mod id;
pub mod identity;
pub mod profile;

pub use email::{Email, EmailError};
pub use id::{UserId, UserIdError};
pub use identity::{Identity, IdentityMetadata, Session};
pub use profile::{NewProfile, Profile, ProfilePatch};
