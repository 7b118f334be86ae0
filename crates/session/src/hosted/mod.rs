//! Adapters for the hosted auth and data service.
//!
//! # Architecture
//!
//! - [`HostedAuthClient`] talks to the auth API (`/auth/v1`) and implements
//!   [`IdentityProvider`](crate::IdentityProvider). It keeps its own durable
//!   session and pushes identity-change notifications.
//! - [`HostedProfileRepository`] talks to the REST data API (`/rest/v1`) and
//!   implements [`ProfileRepository`](crate::ProfileRepository). Requests are
//!   authorized with the signed-in user's access token.
//!
//! Provider error bodies come in several shapes; they are translated into
//! [`AuthError`] / [`RepositoryError`] variants here and nowhere else.

mod auth;
mod profiles;
mod wire;

pub use auth::{AUTH_STORAGE_KEY, HostedAuthClient};
pub use profiles::HostedProfileRepository;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use crate::config::HostedConfig;
use crate::error::{AuthError, RepositoryError};

/// Errors building a hosted client.
#[derive(Debug, Error)]
pub enum HostedError {
    /// HTTP client construction failed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// A service URL could not be built.
    #[error("invalid service URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Source of the bearer token for data requests.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    /// The current user's access token, or `None` when signed out.
    async fn access_token(&self) -> Result<Option<SecretString>, AuthError>;
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<reqwest::Error> for RepositoryError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Build the shared HTTP client.
fn http_client(config: &HostedConfig) -> Result<reqwest::Client, HostedError> {
    Ok(reqwest::Client::builder()
        .timeout(config.http_timeout)
        .user_agent(concat!("taskboard/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Resolve `path` below the service base URL, whatever the base's own path.
fn service_url(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path)
}

/// First 500 characters of a response body, for logs.
fn excerpt(body: &str) -> String {
    body.chars().take(500).collect()
}
