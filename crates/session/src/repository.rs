//! Profile repository seam.

use async_trait::async_trait;

use taskboard_core::{NewProfile, Profile, ProfilePatch, UserId};

use crate::error::RepositoryError;

/// Durable owner of profile records.
///
/// Implementations must report a missing record as
/// [`RepositoryError::NotFound`] and nothing else; the store creates the
/// profile only on that signal.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Look up the profile for an identity.
    async fn get_by_id(&self, id: UserId) -> Result<Profile, RepositoryError>;

    /// Create a profile. Reports [`RepositoryError::Conflict`] if one already
    /// exists for the id.
    async fn insert(&self, profile: &NewProfile) -> Result<Profile, RepositoryError>;

    /// Apply a partial update and return the stored record.
    async fn update_by_id(
        &self,
        id: UserId,
        patch: &ProfilePatch,
    ) -> Result<Profile, RepositoryError>;
}
