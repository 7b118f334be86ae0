//! Auth API client.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, instrument, warn};
use url::Url;

use taskboard_core::{Email, IdentityMetadata, Session};

use super::wire::{AuthErrorBody, SignUpBody, StoredSession, TokenResponse};
use super::{AccessTokenSource, HostedError, excerpt, http_client, service_url};
use crate::config::HostedConfig;
use crate::error::AuthError;
use crate::persistence::PersistenceAdapter;
use crate::provider::{AuthEvent, IdentityChange, IdentityProvider, SignUpResponse};

/// Key the client keeps its session under.
pub const AUTH_STORAGE_KEY: &str = "taskboard.auth-token";

/// Sessions this close to expiry are refreshed before being handed out.
/// Capped at half the lifetime of freshly issued tokens, so a short-lived
/// token is not refreshed on every use.
const REFRESH_MARGIN_SECS: i64 = 60;

const EVENT_CAPACITY: usize = 32;

/// Client for the hosted auth API.
///
/// Keeps the current session in memory and in `storage`, so a restarted
/// process can pick it up again through [`IdentityProvider::get_session`].
#[derive(Clone)]
pub struct HostedAuthClient {
    inner: Arc<HostedAuthClientInner>,
}

struct HostedAuthClientInner {
    client: reqwest::Client,
    auth_url: Url,
    anon_key: SecretString,
    storage: Arc<dyn PersistenceAdapter>,
    session: Mutex<SessionSlot>,
    events: broadcast::Sender<IdentityChange>,
}

/// In-memory copy of the stored session, loaded lazily.
struct SessionSlot {
    loaded: bool,
    current: Option<Session>,
    refresh_margin: Duration,
}

impl Default for SessionSlot {
    fn default() -> Self {
        Self {
            loaded: false,
            current: None,
            refresh_margin: Duration::seconds(REFRESH_MARGIN_SECS),
        }
    }
}

impl HostedAuthClient {
    /// Create a new auth client.
    ///
    /// # Errors
    ///
    /// Returns `HostedError` if the HTTP client or service URL cannot be built.
    pub fn new(
        config: &HostedConfig,
        storage: Arc<dyn PersistenceAdapter>,
    ) -> Result<Self, HostedError> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(HostedAuthClientInner {
                client: http_client(config)?,
                auth_url: service_url(&config.api_url, "auth/v1/")?,
                anon_key: config.anon_key.clone(),
                storage,
                session: Mutex::new(SessionSlot::default()),
                events,
            }),
        })
    }

    /// Exchange the refresh token for a new session, even if the current one
    /// is still valid.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Transport` if the service cannot be reached. A
    /// rejected refresh token signs the user out and yields `Ok(None)`.
    pub async fn refresh_session(&self) -> Result<Option<Session>, AuthError> {
        let mut slot = self.inner.session.lock().await;
        self.load(&mut slot);
        match slot.current.clone() {
            Some(session) => self.refresh_locked(&mut slot, &session).await,
            None => Ok(None),
        }
    }

    // =========================================================================
    // Session bookkeeping
    // =========================================================================

    fn load(&self, slot: &mut SessionSlot) {
        if slot.loaded {
            return;
        }
        slot.loaded = true;
        slot.current = match self.inner.storage.load(AUTH_STORAGE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<StoredSession>(&raw) {
                Ok(stored) => Some(stored.into()),
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable stored session");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read stored session");
                None
            }
        };
    }

    fn store(&self, slot: &mut SessionSlot, session: Option<Session>) {
        let result = match &session {
            Some(session) => serde_json::to_string(&StoredSession::from(session))
                .map_err(Into::into)
                .and_then(|json| self.inner.storage.save(AUTH_STORAGE_KEY, &json)),
            None => self.inner.storage.remove(AUTH_STORAGE_KEY),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist session");
        }
        if let Some(session) = &session {
            let lifetime = session.expires_at - Utc::now();
            slot.refresh_margin = (lifetime / 2).min(Duration::seconds(REFRESH_MARGIN_SECS));
        }
        slot.loaded = true;
        slot.current = session;
    }

    fn emit(&self, event: AuthEvent, session: Option<Session>) {
        debug!(?event, "Emitting identity change");
        // No receivers is fine.
        let _ = self.inner.events.send(IdentityChange { event, session });
    }

    async fn refresh_locked(
        &self,
        slot: &mut SessionSlot,
        session: &Session,
    ) -> Result<Option<Session>, AuthError> {
        let body = serde_json::json!({
            "refresh_token": session.refresh_token().expose_secret(),
        });
        match self.request_token("refresh_token", &body).await {
            Ok(refreshed) => {
                debug!(user_id = %refreshed.identity.id, "Refreshed session");
                self.store(slot, Some(refreshed.clone()));
                self.emit(AuthEvent::TokenRefreshed, Some(refreshed.clone()));
                Ok(Some(refreshed))
            }
            Err(e @ (AuthError::Transport(_) | AuthError::RateLimited)) => Err(e),
            Err(e) => {
                info!(error = %e, "Refresh token rejected; signing out");
                self.store(slot, None);
                self.emit(AuthEvent::SignedOut, None);
                Ok(None)
            }
        }
    }

    // =========================================================================
    // HTTP
    // =========================================================================

    fn endpoint(&self, path: &str) -> Result<Url, AuthError> {
        self.inner
            .auth_url
            .join(path)
            .map_err(|e| AuthError::MalformedResponse(format!("bad endpoint {path}: {e}")))
    }

    /// Send a request, returning the body of a successful response.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, AuthError> {
        let response = request
            .header("apikey", self.inner.anon_key.expose_secret())
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return Ok(body);
        }

        debug!(status = %status, body = %excerpt(&body), "Auth API returned an error");
        let parsed: AuthErrorBody = serde_json::from_str(&body).unwrap_or_default();
        Err(parsed.into_error(status.as_u16()))
    }

    fn parse<T: DeserializeOwned>(body: &str) -> Result<T, AuthError> {
        serde_json::from_str(body).map_err(|e| {
            warn!(error = %e, body = %excerpt(body), "Failed to parse auth API response");
            AuthError::MalformedResponse(e.to_string())
        })
    }

    async fn request_token(
        &self,
        grant_type: &str,
        body: &serde_json::Value,
    ) -> Result<Session, AuthError> {
        let mut url = self.endpoint("token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);

        let body = self.send(self.inner.client.post(url).json(body)).await?;
        Self::parse::<TokenResponse>(&body)?.into_session(Utc::now())
    }
}

#[async_trait]
impl IdentityProvider for HostedAuthClient {
    #[instrument(skip(self))]
    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        let mut slot = self.inner.session.lock().await;
        self.load(&mut slot);

        let Some(session) = slot.current.clone() else {
            return Ok(None);
        };
        if session.expires_within(Utc::now(), slot.refresh_margin) {
            return self.refresh_locked(&mut slot, &session).await;
        }
        Ok(Some(session))
    }

    #[instrument(skip(self, password))]
    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<Session, AuthError> {
        let body = serde_json::json!({
            "email": email.as_str(),
            "password": password.expose_secret(),
        });
        let session = self.request_token("password", &body).await?;

        let mut slot = self.inner.session.lock().await;
        self.store(&mut slot, Some(session.clone()));
        drop(slot);

        info!(user_id = %session.identity.id, "Signed in with password");
        self.emit(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    #[instrument(skip(self, password, metadata))]
    async fn sign_up(
        &self,
        email: &Email,
        password: &SecretString,
        metadata: &IdentityMetadata,
    ) -> Result<SignUpResponse, AuthError> {
        let body = serde_json::json!({
            "email": email.as_str(),
            "password": password.expose_secret(),
            "data": metadata,
        });
        let url = self.endpoint("signup")?;
        let body = self.send(self.inner.client.post(url).json(&body)).await?;

        match Self::parse::<SignUpBody>(&body)? {
            SignUpBody::Session(token) => {
                let session = token.into_session(Utc::now())?;
                let mut slot = self.inner.session.lock().await;
                self.store(&mut slot, Some(session.clone()));
                drop(slot);

                info!(user_id = %session.identity.id, "Registered with immediate session");
                self.emit(AuthEvent::SignedIn, Some(session.clone()));
                Ok(SignUpResponse {
                    identity: session.identity.clone(),
                    session: Some(session),
                })
            }
            SignUpBody::User(user) => {
                let identity = user.into_identity()?;
                info!(user_id = %identity.id, "Registered; confirmation required");
                Ok(SignUpResponse {
                    identity,
                    session: None,
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn sign_out(&self) -> Result<(), AuthError> {
        let mut slot = self.inner.session.lock().await;
        self.load(&mut slot);

        if let Some(session) = slot.current.clone() {
            let url = self.endpoint("logout")?;
            let request = self
                .inner
                .client
                .post(url)
                .bearer_auth(session.access_token().expose_secret());
            match self.send(request).await {
                Ok(_) => {}
                // The token is already unusable; the session is gone either way.
                Err(AuthError::InvalidCredentials | AuthError::Provider { status: 401..=404, .. }) => {
                    debug!("Session already invalid at sign-out");
                }
                Err(e) => return Err(e),
            }
        }

        self.store(&mut slot, None);
        drop(slot);

        info!("Signed out");
        self.emit(AuthEvent::SignedOut, None);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<IdentityChange> {
        self.inner.events.subscribe()
    }
}

#[async_trait]
impl AccessTokenSource for HostedAuthClient {
    async fn access_token(&self) -> Result<Option<SecretString>, AuthError> {
        Ok(self
            .get_session()
            .await?
            .map(|session| session.access_token().clone()))
    }
}
