//! Data platform REST client.
//!
//! A thin wrapper over `reqwest` for the two APIs the service consumes
//! from its Supabase-compatible backend:
//!
//! | API | Base path | Used by |
//! |-----|-----------|---------|
//! | PostgREST data API | `/rest/v1/<table>` | [`crate::results`], [`crate::users`] |
//! | GoTrue auth API | `/auth/v1/...` | [`crate::auth`] |
//!
//! Every request carries an `apikey` header and a bearer token. Two keys
//! are configured: the standard key (subject to row-level security) and
//! the elevated service key. Callers choose per request with [`KeyKind`].
//!
//! # Retries
//!
//! Idempotent reads (`GET`/`HEAD`) are retried on HTTP 429, 5xx, and
//! network errors with exponential backoff (200ms, 400ms, 800ms, ...), up
//! to `platform.max_retries` extra attempts. Writes are never retried.
//!
//! # Exact counts
//!
//! PostgREST reports the size of the full matching set in the
//! `Content-Range` response header (`0-9/42`, or `*/42` for an empty page)
//! when asked with `Prefer: count=exact`. See [`parse_content_range`].

use std::time::Duration;

use anyhow::Result;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_RANGE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::config::PlatformConfig;

/// Failure talking to the data platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("data platform unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The platform answered with a non-success status.
    #[error("{message}")]
    Api { status: StatusCode, message: String },

    #[error("unexpected data platform response: {0}")]
    Decode(String),
}

impl PlatformError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            PlatformError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }
}

/// Which credential a request is made with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Standard key; row-level security applies.
    Anon,
    /// Service key; bypasses row-level security.
    Service,
}

/// A filter/ordering parameter list for a PostgREST query.
pub type Query = Vec<(String, String)>;

/// Shared handle to the data platform.
///
/// Cheap to clone; the inner `reqwest::Client` pools connections.
#[derive(Clone)]
pub struct PlatformClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    service_key: String,
    max_retries: u32,
}

impl PlatformClient {
    pub fn new(config: &PlatformConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("banana-vision/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            service_key: config.service_key.clone(),
            max_retries: config.max_retries,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    pub fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn key(&self, kind: KeyKind) -> &str {
        match kind {
            KeyKind::Anon => &self.anon_key,
            KeyKind::Service => &self.service_key,
        }
    }

    /// Start a request authenticated with `kind`. When `bearer` is given it
    /// replaces the key in the `Authorization` header (acting as that user).
    pub fn request(
        &self,
        method: Method,
        url: &str,
        kind: KeyKind,
        bearer: Option<&str>,
    ) -> RequestBuilder {
        let key = self.key(kind);
        self.http
            .request(method, url)
            .header("apikey", key)
            .header(AUTHORIZATION, format!("Bearer {}", bearer.unwrap_or(key)))
    }

    /// Send a request once and turn non-success statuses into
    /// [`PlatformError::Api`].
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, PlatformError> {
        let response = request.send().await?;
        check_status(response).await
    }

    /// Send an idempotent request, retrying transient failures.
    async fn send_idempotent(
        &self,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Response, PlatformError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(200 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        let err = check_status(response)
                            .await
                            .err()
                            .unwrap_or_else(|| PlatformError::Decode(status.to_string()));
                        tracing::warn!(%status, attempt, "data platform busy, retrying");
                        last_err = Some(err);
                        continue;
                    }
                    return check_status(response).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "data platform request failed, retrying");
                    last_err = Some(PlatformError::Transport(e));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| PlatformError::Decode("no attempts made".to_string())))
    }

    /// `GET /rest/v1/<table>` returning the rows and, if `exact_count`, the
    /// size of the full matching set.
    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query,
        exact_count: bool,
    ) -> Result<(Vec<T>, Option<u64>), PlatformError> {
        let url = self.rest_url(table);
        let response = self
            .send_idempotent(|| {
                let req = self.request(Method::GET, &url, KeyKind::Service, None).query(query);
                if exact_count {
                    req.header("Prefer", "count=exact")
                } else {
                    req
                }
            })
            .await?;

        let total = if exact_count {
            Some(content_range_total(&response)?)
        } else {
            None
        };
        let rows = response
            .json::<Vec<T>>()
            .await
            .map_err(|e| PlatformError::Decode(e.to_string()))?;
        Ok((rows, total))
    }

    /// Exact number of rows matching `query`, without transferring them.
    pub async fn count(&self, table: &str, query: &Query) -> Result<u64, PlatformError> {
        let url = self.rest_url(table);
        let response = self
            .send_idempotent(|| {
                self.request(Method::HEAD, &url, KeyKind::Service, None)
                    .query(query)
                    .header("Prefer", "count=exact")
            })
            .await?;
        content_range_total(&response)
    }

    /// `DELETE /rest/v1/<table>` returning the deleted rows.
    pub async fn delete_returning<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query,
    ) -> Result<Vec<T>, PlatformError> {
        let request = self
            .request(Method::DELETE, &self.rest_url(table), KeyKind::Service, None)
            .query(query)
            .header("Prefer", "return=representation");
        self.send(request)
            .await?
            .json::<Vec<T>>()
            .await
            .map_err(|e| PlatformError::Decode(e.to_string()))
    }

    /// `POST /rest/v1/<table>` with a single row.
    pub async fn insert<B: Serialize + ?Sized>(
        &self,
        table: &str,
        row: &B,
    ) -> Result<(), PlatformError> {
        let request = self
            .request(Method::POST, &self.rest_url(table), KeyKind::Service, None)
            .header("Prefer", "return=minimal")
            .json(row);
        self.send(request).await?;
        Ok(())
    }

    /// Call an auth endpoint and decode its JSON body.
    pub async fn auth_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, PlatformError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| PlatformError::Decode(e.to_string()))
    }
}

async fn check_status(response: Response) -> Result<Response, PlatformError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PlatformError::Api {
        status,
        message: error_message(status, &body),
    })
}

fn content_range_total(response: &Response) -> Result<u64, PlatformError> {
    let header = response
        .headers()
        .get(CONTENT_RANGE)
        .map(HeaderValue::to_str)
        .transpose()
        .map_err(|e| PlatformError::Decode(e.to_string()))?
        .ok_or_else(|| PlatformError::Decode("missing Content-Range header".to_string()))?;
    parse_content_range(header)
}

/// Extract the total from a PostgREST `Content-Range` header value.
pub fn parse_content_range(value: &str) -> Result<u64, PlatformError> {
    let (_, total) = value
        .trim()
        .rsplit_once('/')
        .ok_or_else(|| PlatformError::Decode(format!("malformed Content-Range: {}", value)))?;
    total
        .parse::<u64>()
        .map_err(|_| PlatformError::Decode(format!("Content-Range has no exact total: {}", value)))
}

/// Pull a human-readable message out of a platform error body.
///
/// PostgREST answers `{"message": ...}`; GoTrue uses `msg`,
/// `error_description`, or `error` depending on the endpoint and version.
pub fn error_message(status: StatusCode, body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let from_json = parsed.as_ref().and_then(|json| {
        ["message", "msg", "error_description", "error"]
            .iter()
            .find_map(|field| json.get(field).and_then(|v| v.as_str()))
            .map(str::to_string)
    });

    match from_json {
        Some(message) => message,
        None if !body.trim().is_empty() => body.trim().to_string(),
        None => format!("data platform returned {}", status),
    }
}
