//! REST data API client for the profiles table.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument, warn};
use url::Url;

use taskboard_core::{NewProfile, Profile, ProfilePatch, UserId};

use super::wire::RestErrorBody;
use super::{AccessTokenSource, HostedError, excerpt, http_client, service_url};
use crate::config::HostedConfig;
use crate::error::{AuthError, RepositoryError};
use crate::repository::ProfileRepository;

/// Ask for a single JSON object instead of an array; zero rows then becomes
/// an error the store can recognize as "not found".
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// Profile repository backed by the hosted REST API.
pub struct HostedProfileRepository {
    client: reqwest::Client,
    table_url: Url,
    anon_key: SecretString,
    tokens: Arc<dyn AccessTokenSource>,
}

impl HostedProfileRepository {
    /// Create a new repository.
    ///
    /// # Errors
    ///
    /// Returns `HostedError` if the HTTP client or table URL cannot be built.
    pub fn new(
        config: &HostedConfig,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Result<Self, HostedError> {
        let table_url = service_url(
            &config.api_url,
            &format!("rest/v1/{}", config.profiles_table),
        )?;

        Ok(Self {
            client: http_client(config)?,
            table_url,
            anon_key: config.anon_key.clone(),
            tokens,
        })
    }

    fn row_url(&self, id: UserId) -> Url {
        let mut url = self.table_url.clone();
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{id}"))
            .append_pair("select", "*");
        url
    }

    /// Attach the API key and the best available bearer token. Signed-out
    /// requests fall back to the anonymous key and are subject to row-level
    /// security.
    async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, RepositoryError> {
        let token = self.tokens.access_token().await.map_err(|e| match e {
            AuthError::Transport(reason) => RepositoryError::Transport(reason),
            other => RepositoryError::Rejected {
                status: 401,
                message: other.to_string(),
            },
        })?;
        let bearer = token.unwrap_or_else(|| self.anon_key.clone());

        Ok(request
            .header("apikey", self.anon_key.expose_secret())
            .header("Accept", SINGLE_OBJECT)
            .bearer_auth(bearer.expose_secret()))
    }

    /// Send a request expected to return exactly one profile.
    async fn fetch_one(&self, request: reqwest::RequestBuilder) -> Result<Profile, RepositoryError> {
        let response = self.authorize(request).await?.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            debug!(status = %status, body = %excerpt(&body), "Data API returned an error");
            let parsed: RestErrorBody = serde_json::from_str(&body).unwrap_or_default();
            return Err(parsed.into_error(status.as_u16()));
        }

        serde_json::from_str(&body).map_err(|e| {
            warn!(error = %e, body = %excerpt(&body), "Failed to decode profile row");
            RepositoryError::DataCorruption(format!("invalid profile row: {e}"))
        })
    }
}

#[async_trait]
impl ProfileRepository for HostedProfileRepository {
    #[instrument(skip(self))]
    async fn get_by_id(&self, id: UserId) -> Result<Profile, RepositoryError> {
        self.fetch_one(self.client.get(self.row_url(id))).await
    }

    #[instrument(skip(self, profile), fields(user_id = %profile.id))]
    async fn insert(&self, profile: &NewProfile) -> Result<Profile, RepositoryError> {
        let request = self
            .client
            .post(self.table_url.clone())
            .header("Prefer", "return=representation")
            .json(profile);
        self.fetch_one(request).await
    }

    #[instrument(skip(self, patch))]
    async fn update_by_id(
        &self,
        id: UserId,
        patch: &ProfilePatch,
    ) -> Result<Profile, RepositoryError> {
        let request = self
            .client
            .patch(self.row_url(id))
            .header("Prefer", "return=representation")
            .json(patch);
        self.fetch_one(request).await
    }
}
