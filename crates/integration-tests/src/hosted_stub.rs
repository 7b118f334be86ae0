//! Local stand-in for the hosted auth and data service.
//!
//! Speaks just enough of the auth (`/auth/v1`) and REST (`/rest/v1`) APIs
//! for the hosted adapters: password and refresh-token grants, signup,
//! logout, and single-row reads/writes on `profiles` with row-level access
//! limited to the bearer's own row.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

use taskboard_session::config::HostedConfig;

/// API key the stub accepts.
pub const STUB_ANON_KEY: &str = "stub-anon-key-4f1c9a";

struct StubUser {
    id: Uuid,
    email: String,
    password: String,
    confirmed: bool,
    name: Option<String>,
}

#[derive(Default)]
struct StubState {
    users: Vec<StubUser>,
    /// Access token -> user id.
    access: HashMap<String, Uuid>,
    /// Refresh token -> user id.
    refresh: HashMap<String, Uuid>,
    profiles: HashMap<Uuid, Value>,
    require_confirmation: bool,
    expires_in: i64,
    logout_calls: usize,
    token_grants: Vec<String>,
}

type Shared = Arc<Mutex<StubState>>;

fn lock(state: &Shared) -> std::sync::MutexGuard<'_, StubState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A running stub service. Shuts down on drop.
pub struct StubService {
    base_url: Url,
    state: Shared,
    server: JoinHandle<()>,
}

impl Drop for StubService {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl StubService {
    /// Bind to an ephemeral local port and start serving.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot be bound.
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(StubState {
            expires_in: 3600,
            ..StubState::default()
        }));

        let router = Router::new()
            .route("/auth/v1/token", post(token))
            .route("/auth/v1/signup", post(signup))
            .route("/auth/v1/logout", post(logout))
            .route(
                "/rest/v1/profiles",
                post(insert_profile)
                    .get(get_profile)
                    .patch(update_profile),
            )
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|e| panic!("failed to bind stub listener: {e}"));
        let addr = listener
            .local_addr()
            .unwrap_or_else(|e| panic!("stub listener has no address: {e}"));
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        let base_url = Url::parse(&format!("http://{addr}"))
            .unwrap_or_else(|e| panic!("bad stub URL: {e}"));
        Self {
            base_url,
            state,
            server,
        }
    }

    /// Client configuration pointing at this stub.
    #[must_use]
    pub fn config(&self) -> HostedConfig {
        HostedConfig::new(self.base_url.clone(), SecretString::from(STUB_ANON_KEY))
    }

    /// Register a user directly. Returns its id.
    pub fn add_user(&self, email: &str, password: &str, confirmed: bool, name: Option<&str>) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.state).users.push(StubUser {
            id,
            email: email.to_owned(),
            password: password.to_owned(),
            confirmed,
            name: name.map(str::to_owned),
        });
        id
    }

    /// Registrations return a bare, unconfirmed user.
    pub fn require_confirmation(&self) {
        lock(&self.state).require_confirmation = true;
    }

    /// Lifetime of newly issued access tokens.
    pub fn set_expires_in(&self, seconds: i64) {
        lock(&self.state).expires_in = seconds;
    }

    /// Invalidate every issued refresh token.
    pub fn revoke_refresh_tokens(&self) {
        lock(&self.state).refresh.clear();
    }

    /// Stored profile row.
    #[must_use]
    pub fn profile(&self, id: Uuid) -> Option<Value> {
        lock(&self.state).profiles.get(&id).cloned()
    }

    /// Insert a profile row directly.
    pub fn seed_profile(&self, id: Uuid, email: &str, name: &str) {
        let now = Utc::now().to_rfc3339();
        lock(&self.state).profiles.insert(
            id,
            json!({
                "id": id, "email": email, "name": name, "avatar_url": null,
                "created_at": now, "updated_at": now,
            }),
        );
    }

    /// Number of logout requests received.
    #[must_use]
    pub fn logout_calls(&self) -> usize {
        lock(&self.state).logout_calls
    }

    /// Grant types of the token requests received, in order.
    #[must_use]
    pub fn token_grants(&self) -> Vec<String> {
        lock(&self.state).token_grants.clone()
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn error(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn has_api_key(headers: &HeaderMap) -> bool {
    headers
        .get("apikey")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == STUB_ANON_KEY)
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

fn user_json(user: &StubUser) -> Value {
    let confirmed_at = user.confirmed.then(|| Utc::now().to_rfc3339());
    json!({
        "id": user.id,
        "aud": "authenticated",
        "email": user.email,
        "email_confirmed_at": confirmed_at,
        "user_metadata": { "name": user.name },
    })
}

fn issue_tokens(state: &mut StubState, user_index: usize) -> Value {
    let Some(user) = state.users.get(user_index) else {
        return json!({});
    };
    let access = format!("at-{}", Uuid::new_v4().simple());
    let refresh = format!("rt-{}", Uuid::new_v4().simple());
    let id = user.id;
    let body = json!({
        "access_token": access,
        "token_type": "bearer",
        "expires_in": state.expires_in,
        "expires_at": Utc::now().timestamp() + state.expires_in,
        "refresh_token": refresh,
        "user": user_json(user),
    });
    state.access.insert(access, id);
    state.refresh.insert(refresh, id);
    body
}

fn row_id(query: &HashMap<String, String>) -> Option<Uuid> {
    query
        .get("id")
        .and_then(|v| v.strip_prefix("eq."))
        .and_then(|v| v.parse().ok())
}

fn no_rows() -> Response {
    error(
        StatusCode::NOT_ACCEPTABLE,
        json!({
            "code": "PGRST116",
            "details": "The result contains 0 rows",
            "message": "JSON object requested, multiple (or no) rows returned",
        }),
    )
}

/// Row visible to the bearer, or `None` for anonymous/unknown tokens.
fn caller(state: &StubState, headers: &HeaderMap) -> Option<Uuid> {
    bearer(headers).and_then(|token| state.access.get(&token).copied())
}

// =============================================================================
// Auth API
// =============================================================================

async fn token(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    if !has_api_key(&headers) {
        return error(StatusCode::UNAUTHORIZED, json!({"message": "No API key found in request"}));
    }
    let mut state = lock(&state);
    let grant = query.get("grant_type").cloned().unwrap_or_default();
    state.token_grants.push(grant.clone());

    match grant.as_str() {
        "password" => {
            let email = body["email"].as_str().unwrap_or_default();
            let password = body["password"].as_str().unwrap_or_default();
            let Some(index) = state
                .users
                .iter()
                .position(|u| u.email == email && u.password == password)
            else {
                return error(
                    StatusCode::BAD_REQUEST,
                    json!({"code": 400, "error_code": "invalid_credentials", "msg": "Invalid login credentials"}),
                );
            };
            if state.users.get(index).is_some_and(|u| !u.confirmed) {
                return error(
                    StatusCode::BAD_REQUEST,
                    json!({"code": 400, "error_code": "email_not_confirmed", "msg": "Email not confirmed"}),
                );
            }
            Json(issue_tokens(&mut state, index)).into_response()
        }
        "refresh_token" => {
            let presented = body["refresh_token"].as_str().unwrap_or_default();
            let Some(id) = state.refresh.remove(presented) else {
                return error(
                    StatusCode::BAD_REQUEST,
                    json!({"code": 400, "error_code": "refresh_token_not_found", "msg": "Invalid Refresh Token: Refresh Token Not Found"}),
                );
            };
            match state.users.iter().position(|u| u.id == id) {
                Some(index) => Json(issue_tokens(&mut state, index)).into_response(),
                None => error(StatusCode::BAD_REQUEST, json!({"error_code": "user_not_found", "msg": "User not found"})),
            }
        }
        other => error(
            StatusCode::BAD_REQUEST,
            json!({"error_code": "validation_failed", "msg": format!("unsupported grant_type {other}")}),
        ),
    }
}

async fn signup(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !has_api_key(&headers) {
        return error(StatusCode::UNAUTHORIZED, json!({"message": "No API key found in request"}));
    }
    let mut state = lock(&state);
    let email = body["email"].as_str().unwrap_or_default().to_owned();
    let password = body["password"].as_str().unwrap_or_default().to_owned();

    if state.users.iter().any(|u| u.email == email) {
        return error(
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({"code": 422, "error_code": "user_already_exists", "msg": "User already registered"}),
        );
    }
    if password.len() < 6 {
        return error(
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({"code": 422, "error_code": "weak_password", "msg": "Password should be at least 6 characters."}),
        );
    }

    let confirmed = !state.require_confirmation;
    state.users.push(StubUser {
        id: Uuid::new_v4(),
        email,
        password,
        confirmed,
        name: body["data"]["name"].as_str().map(str::to_owned),
    });
    let index = state.users.len() - 1;

    if confirmed {
        return Json(issue_tokens(&mut state, index)).into_response();
    }
    match state.users.get(index) {
        Some(user) => Json(user_json(user)).into_response(),
        None => error(StatusCode::INTERNAL_SERVER_ERROR, json!({"msg": "user vanished"})),
    }
}

async fn logout(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let mut state = lock(&state);
    state.logout_calls += 1;
    let Some(id) = caller(&state, &headers) else {
        return error(
            StatusCode::UNAUTHORIZED,
            json!({"code": 401, "error_code": "bad_jwt", "msg": "invalid JWT"}),
        );
    };
    state.access.retain(|_, owner| *owner != id);
    state.refresh.retain(|_, owner| *owner != id);
    StatusCode::NO_CONTENT.into_response()
}

// =============================================================================
// REST API
// =============================================================================

async fn get_profile(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let state = lock(&state);
    let (Some(id), Some(caller)) = (row_id(&query), caller(&state, &headers)) else {
        return no_rows();
    };
    if id != caller {
        return no_rows();
    }
    match state.profiles.get(&id) {
        Some(row) => Json(row.clone()).into_response(),
        None => no_rows(),
    }
}

async fn insert_profile(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut state = lock(&state);
    let id = body["id"].as_str().and_then(|v| v.parse::<Uuid>().ok());
    let Some(id) = id.filter(|id| caller(&state, &headers) == Some(*id)) else {
        return error(
            StatusCode::FORBIDDEN,
            json!({"code": "42501", "message": "new row violates row-level security policy for table \"profiles\""}),
        );
    };
    if state.profiles.contains_key(&id) {
        return error(
            StatusCode::CONFLICT,
            json!({"code": "23505", "message": "duplicate key value violates unique constraint \"profiles_pkey\""}),
        );
    }

    let now = Utc::now().to_rfc3339();
    let row = json!({
        "id": id,
        "email": body["email"],
        "name": body["name"],
        "avatar_url": body.get("avatar_url").cloned().unwrap_or(Value::Null),
        "created_at": now,
        "updated_at": now,
    });
    state.profiles.insert(id, row.clone());
    (StatusCode::CREATED, Json(row)).into_response()
}

async fn update_profile(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = lock(&state);
    let (Some(id), Some(caller)) = (row_id(&query), caller(&state, &headers)) else {
        return no_rows();
    };
    if id != caller {
        return no_rows();
    }
    let Some(row) = state.profiles.get_mut(&id) else {
        return no_rows();
    };

    if let (Some(fields), Some(target)) = (body.as_object(), row.as_object_mut()) {
        for key in ["name", "avatar_url"] {
            if let Some(value) = fields.get(key) {
                target.insert(key.to_owned(), value.clone());
            }
        }
        target.insert("updated_at".to_owned(), json!(Utc::now().to_rfc3339()));
    }
    Json(row.clone()).into_response()
}
