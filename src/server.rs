//! HTTP API consumed by the dashboard frontend.
//!
//! Every data call is a thin pass-through to a gateway held in [`AppState`];
//! the only computation is the weekly aggregation behind
//! `GET /dashboard/tree-stats`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Welcome message |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `{prefix}/register` | Create an account and its profile |
//! | `POST` | `{prefix}/login` | Password sign-in, sets session cookies |
//! | `POST` | `{prefix}/refresh` | Exchange the refresh cookie for a new session |
//! | `POST` | `{prefix}/logout` | Revoke the session, clear cookies |
//! | `GET`  | `{prefix}/me` | Current user |
//! | `GET`  | `{prefix}/dashboard/tree-stats` | Weekly counts for one tree type |
//! | `GET`  | `{prefix}/inference-results/` | Paginated detections |
//! | `DELETE` | `{prefix}/inference-results/{id}` | Delete one detection |
//! | `GET`  | `{prefix}/users/` | Paginated, searchable users |
//! | `DELETE` | `{prefix}/users/{id}` | Delete a user and their account |
//!
//! `{prefix}` is `server.api_prefix` (default `/api/v1`).
//!
//! # Error Contract
//!
//! Validation, auth and internal failures answer with
//!
//! ```json
//! { "detail": "limit must be between 1 and 100 (got 0)" }
//! ```
//!
//! The dashboard and inference-result endpoints instead keep their own
//! envelopes and flag failures with `has_error`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{
        rejection::{FormRejection, JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Form, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use banana_vision_core::aggregate::{TreeStats, WeeklyAggregator};
use banana_vision_core::error::ValidationError;
use banana_vision_core::models::{DeleteOutcome, InferenceResult, TreeType, UserProfile};
use banana_vision_core::pagination::PageRequest;
use banana_vision_core::store::{ResultStore, UserDirectory};

use crate::auth::{AuthError, CredentialAuthority, PlatformAuthority, Registration, Session, User};
use crate::config::Config;
use crate::platform::PlatformClient;
use crate::results::PlatformResultStore;
use crate::users::PlatformUserDirectory;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub results: Arc<dyn ResultStore>,
    pub users: Arc<dyn UserDirectory>,
    pub auth: Arc<dyn CredentialAuthority>,
    pub aggregator: WeeklyAggregator,
}

impl AppState {
    /// Assemble state from already-built gateways. The aggregator reads
    /// through `results` with the configured window length.
    pub fn new(
        config: Config,
        results: Arc<dyn ResultStore>,
        users: Arc<dyn UserDirectory>,
        auth: Arc<dyn CredentialAuthority>,
    ) -> anyhow::Result<Self> {
        let aggregator = WeeklyAggregator::new(results.clone(), config.dashboard.window_weeks)
            .context("Invalid dashboard configuration")?;
        Ok(Self {
            config: Arc::new(config),
            results,
            users,
            auth,
            aggregator,
        })
    }
}

/// Build the production state: one [`PlatformClient`] shared by every
/// gateway.
pub fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let client = PlatformClient::new(&config.platform)?;
    let results: Arc<dyn ResultStore> = Arc::new(PlatformResultStore::new(client.clone()));
    let users: Arc<dyn UserDirectory> = Arc::new(PlatformUserDirectory::new(client.clone()));
    let auth: Arc<dyn CredentialAuthority> =
        Arc::new(PlatformAuthority::new(client, users.clone()));
    AppState::new(config.clone(), results, users, auth)
}

/// The complete application router with CORS and request tracing.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/register", post(handle_register))
        .route("/login", post(handle_login))
        .route("/refresh", post(handle_refresh))
        .route("/logout", post(handle_logout))
        .route("/me", get(handle_me))
        .route("/dashboard/tree-stats", get(handle_tree_stats))
        .route("/inference-results/", get(handle_list_results))
        .route("/inference-results/{id}", delete(handle_delete_result))
        .route("/users/", get(handle_list_users).delete(handle_delete_user_without_id))
        .route("/users/{id}", delete(handle_delete_user));

    let prefix = state.config.server.api_prefix.clone();
    let app = Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health));
    let app = if prefix.is_empty() {
        app.merge(api)
    } else {
        app.nest(&prefix, api)
    };

    app.layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = build_state(config)?;
    let app = router(state);

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    tracing::info!(
        addr = %bind_addr,
        prefix = %config.server.api_prefix,
        window_weeks = config.dashboard.window_weeks,
        "{} listening",
        config.server.project_name
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, detail)
    }

    fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            detail: self.detail,
        });
        if self.status == StatusCode::UNAUTHORIZED {
            let challenge = [(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"))];
            (self.status, challenge, body).into_response()
        } else {
            (self.status, body).into_response()
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::bad_request(e.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Rejected(msg) => ApiError::unauthorized(msg),
            AuthError::BadRequest(msg) => ApiError::bad_request(msg),
            AuthError::Upstream(msg) => ApiError::internal(msg),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        ApiError::bad_request(e.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(e: PathRejection) -> Self {
        ApiError::bad_request(e.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::bad_request(e.body_text())
    }
}

impl From<FormRejection> for ApiError {
    fn from(e: FormRejection) -> Self {
        ApiError::bad_request(e.body_text())
    }
}

// ============ GET / and GET /health ============

#[derive(Serialize)]
struct WelcomeResponse {
    message: String,
}

async fn handle_root(State(state): State<AppState>) -> Json<WelcomeResponse> {
    Json(WelcomeResponse {
        message: format!("Welcome to {}", state.config.server.project_name),
    })
}

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Handler for `GET /health`. Used by load balancers and monitoring.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Auth ============

/// OAuth2-style password form; `username` carries the email.
#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct SessionUser {
    id: Uuid,
    email: String,
    first_name: String,
    last_name: String,
    role: String,
}

/// Body returned by login and refresh.
#[derive(Serialize)]
struct SessionResponse {
    message: &'static str,
    access_token: String,
    refresh_token: String,
    token_type: &'static str,
    user: SessionUser,
}

fn session_cookie(name: &'static str, value: String, max_age: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::None)
        .path("/")
        .max_age(time::Duration::seconds(max_age))
        .build()
}

/// Set both session cookies and render the session body.
fn session_response(
    state: &AppState,
    jar: CookieJar,
    session: Session,
    message: &'static str,
) -> (CookieJar, Json<SessionResponse>) {
    let auth = &state.config.auth;
    let jar = jar
        .add(session_cookie(
            ACCESS_COOKIE,
            session.access_token.clone(),
            auth.access_cookie_max_age,
            auth.secure_cookies,
        ))
        .add(session_cookie(
            REFRESH_COOKIE,
            session.refresh_token.clone(),
            auth.refresh_cookie_max_age,
            auth.secure_cookies,
        ));

    let user = session.user;
    let body = SessionResponse {
        message,
        access_token: session.access_token,
        refresh_token: session.refresh_token,
        token_type: "bearer",
        user: SessionUser {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
        },
    };
    (jar, Json(body))
}

/// Bearer token from the `Authorization` header, else the access cookie.
fn bearer_token(headers: &HeaderMap, jar: &CookieJar) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| jar.get(ACCESS_COOKIE).map(|c| c.value().to_string()))
}

/// Handler for `POST /register`. Answers 201 with the created user.
async fn handle_register(
    State(state): State<AppState>,
    body: Result<Json<Registration>, JsonRejection>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let Json(registration) = body?;
    registration.validate()?;
    let user = state.auth.sign_up(&registration).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn handle_login(
    State(state): State<AppState>,
    jar: CookieJar,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Result<(CookieJar, Json<SessionResponse>), ApiError> {
    let Form(form) = form?;
    let session = state.auth.sign_in(&form.username, &form.password).await?;
    Ok(session_response(&state, jar, session, "Login successful"))
}

async fn handle_refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<SessionResponse>), ApiError> {
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("No refresh token"))?;
    let session = state.auth.refresh(&token).await?;
    Ok(session_response(&state, jar, session, "Token refreshed"))
}

/// Handler for `POST /logout`.
///
/// Revocation failures are logged only; the cookies are cleared regardless.
async fn handle_logout(State(state): State<AppState>, jar: CookieJar) -> (StatusCode, CookieJar) {
    match jar.get(ACCESS_COOKIE).map(|c| c.value().to_string()) {
        Some(token) => match state.auth.sign_out(&token).await {
            Ok(()) => tracing::info!("session revoked"),
            Err(e) => tracing::error!(error = %e, "failed to revoke session"),
        },
        None => tracing::warn!("logout without access token cookie"),
    }

    let jar = jar
        .remove(Cookie::build(ACCESS_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_COOKIE).path("/"));
    (StatusCode::NO_CONTENT, jar)
}

async fn handle_me(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<User>, ApiError> {
    let token = bearer_token(&headers, &jar)
        .ok_or_else(|| ApiError::unauthorized("Could not validate credentials"))?;
    let user = state.auth.current_user(&token).await?;
    Ok(Json(user))
}

// ============ GET /dashboard/tree-stats ============

#[derive(Deserialize)]
struct TreeStatsParams {
    tree_type: Option<String>,
}

/// Handler for `GET /dashboard/tree-stats`.
///
/// Answers 200 with the series, or 500 (504 on timeout) with the same
/// envelope and `has_error: true`.
async fn handle_tree_stats(
    State(state): State<AppState>,
    params: Result<Query<TreeStatsParams>, QueryRejection>,
) -> Result<(StatusCode, Json<TreeStats>), ApiError> {
    let Query(params) = params?;
    let tree_type = match params.tree_type.as_deref() {
        Some(raw) => raw.parse::<TreeType>()?,
        None => TreeType::default(),
    };

    let limit = Duration::from_secs(state.config.dashboard.timeout_secs);
    let name = tree_type.display_name();
    let outcome = tokio::time::timeout(
        limit,
        state
            .aggregator
            .weekly_stats(&tree_type.fusion_decision(), Utc::now()),
    )
    .await;

    let (status, stats) = match outcome {
        Ok(Ok(series)) => (StatusCode::OK, TreeStats::from_series(name, series)),
        Ok(Err(e)) => {
            tracing::error!(error = %e, tree_type = name, "tree stats failed");
            (StatusCode::INTERNAL_SERVER_ERROR, TreeStats::failed(e.to_string()))
        }
        Err(_) => {
            tracing::error!(tree_type = name, timeout_secs = limit.as_secs(), "tree stats timed out");
            (
                StatusCode::GATEWAY_TIMEOUT,
                TreeStats::failed(format!(
                    "Aggregation timed out after {}s",
                    limit.as_secs()
                )),
            )
        }
    };
    Ok((status, Json(stats)))
}

// ============ Inference results ============

#[derive(Deserialize)]
struct PageParams {
    page: Option<i64>,
    limit: Option<i64>,
}

#[derive(Serialize)]
struct ResultsEnvelope {
    data: Vec<InferenceResult>,
    total: u64,
    has_error: bool,
    error: Option<String>,
}

/// Handler for `GET /inference-results/`, newest first.
async fn handle_list_results(
    State(state): State<AppState>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<(StatusCode, Json<ResultsEnvelope>), ApiError> {
    let Query(params) = params?;
    let page = PageRequest::new(params.page, params.limit)?;

    let (status, envelope) = match state.results.list_page(page.offset(), page.limit()).await {
        Ok(found) => (
            StatusCode::OK,
            ResultsEnvelope {
                data: found.rows,
                total: found.total,
                has_error: false,
                error: None,
            },
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ResultsEnvelope {
                data: Vec::new(),
                total: 0,
                has_error: true,
                error: Some(format!("{:#}", e)),
            },
        ),
    };
    Ok((status, Json(envelope)))
}

#[derive(Serialize)]
struct DeleteEnvelope {
    success: bool,
    has_error: bool,
    error: Option<String>,
}

impl DeleteEnvelope {
    fn failed(status: StatusCode, message: String) -> (StatusCode, Json<DeleteEnvelope>) {
        (
            status,
            Json(DeleteEnvelope {
                success: false,
                has_error: true,
                error: Some(message),
            }),
        )
    }
}

async fn handle_delete_result(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<(StatusCode, Json<DeleteEnvelope>), ApiError> {
    let Path(id) = id?;
    let response = match state.results.delete_by_id(id).await {
        Ok(DeleteOutcome::Deleted) => (
            StatusCode::OK,
            Json(DeleteEnvelope {
                success: true,
                has_error: false,
                error: None,
            }),
        ),
        Ok(DeleteOutcome::NotFound) => {
            DeleteEnvelope::failed(StatusCode::NOT_FOUND, "No row deleted".to_string())
        }
        Err(e) => DeleteEnvelope::failed(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    };
    Ok(response)
}

// ============ Users ============

#[derive(Deserialize)]
struct UserListParams {
    page: Option<i64>,
    limit: Option<i64>,
    search: Option<String>,
}

#[derive(Serialize)]
struct UsersEnvelope {
    users: Vec<UserProfile>,
    total: u64,
    error: Option<String>,
}

/// Handler for `GET /users/`, optionally filtered by `search`.
async fn handle_list_users(
    State(state): State<AppState>,
    params: Result<Query<UserListParams>, QueryRejection>,
) -> Result<Json<UsersEnvelope>, ApiError> {
    let Query(params) = params?;
    let page = PageRequest::new(params.page, params.limit)?;

    let found = state
        .users
        .list_page(page.offset(), page.limit(), params.search.as_deref())
        .await
        .map_err(|e| ApiError::internal(format!("{:#}", e)))?;

    Ok(Json(UsersEnvelope {
        users: found.rows,
        total: found.total,
        error: None,
    }))
}

/// Handler for `DELETE /users/{id}`. Removes the profile and the account.
async fn handle_delete_user(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    match state.users.delete(id).await {
        Ok(DeleteOutcome::Deleted) => Ok(StatusCode::NO_CONTENT),
        Ok(DeleteOutcome::NotFound) => Err(ApiError::not_found("User not found")),
        Err(e) => {
            tracing::error!(error = %e, %id, "user deletion failed");
            Err(ApiError::internal(format!("{:#}", e)))
        }
    }
}

/// Handler for `DELETE /users/`, a deletion with the id left out.
async fn handle_delete_user_without_id() -> ApiError {
    ApiError::bad_request("User id is required")
}
