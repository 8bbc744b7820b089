//! Credential exchange with the data platform's auth API.
//!
//! The service never hashes passwords or mints tokens itself. It forwards
//! credentials to the platform (GoTrue), relays the issued session, and
//! keeps the `profiles` table in step with newly registered accounts.
//!
//! # Endpoints used
//!
//! | Operation | Platform call |
//! |-----------|---------------|
//! | sign up | `POST /auth/v1/signup` |
//! | sign in | `POST /auth/v1/token?grant_type=password` |
//! | refresh | `POST /auth/v1/token?grant_type=refresh_token` |
//! | sign out | `POST /auth/v1/logout` |
//! | current user | `GET /auth/v1/user` |
//! | delete account | `DELETE /auth/v1/admin/users/{id}` (service key) |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use banana_vision_core::error::ValidationError;
use banana_vision_core::models::{DeleteOutcome, Role, UserProfile};
use banana_vision_core::store::UserDirectory;

use crate::platform::{KeyKind, PlatformClient, PlatformError};

pub const MIN_PASSWORD_LEN: usize = 8;

/// Why a credential operation failed, already phrased for the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Credentials or tokens were refused.
    #[error("{0}")]
    Rejected(String),

    /// The request itself was unacceptable.
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Upstream(String),
}

impl From<ValidationError> for AuthError {
    fn from(e: ValidationError) -> Self {
        AuthError::BadRequest(e.to_string())
    }
}

/// Registration payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
}

impl Registration {
    /// Check field rules and return the parsed role.
    pub fn validate(&self) -> Result<Role, ValidationError> {
        if !is_plausible_email(&self.email) {
            return Err(ValidationError::Field {
                field: "email",
                reason: "not a valid email address",
            });
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::Field {
                field: "password",
                reason: "must be at least 8 characters",
            });
        }
        if self.first_name.trim().is_empty() {
            return Err(ValidationError::Field {
                field: "first_name",
                reason: "must not be empty",
            });
        }
        if self.last_name.trim().is_empty() {
            return Err(ValidationError::Field {
                field: "last_name",
                reason: "must not be empty",
            });
        }
        self.role.parse()
    }
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.trim().split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

/// An authenticated account as presented to the frontend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Tokens issued by the platform for one sign-in.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user: User,
}

/// Issues and validates bearer tokens.
#[async_trait]
pub trait CredentialAuthority: Send + Sync {
    async fn sign_up(&self, registration: &Registration) -> Result<User, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError>;

    /// Revoke the session behind `access_token`.
    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;

    async fn current_user(&self, access_token: &str) -> Result<User, AuthError>;

    /// Remove the account itself. Profiles are not touched.
    async fn delete_user(&self, id: Uuid) -> Result<DeleteOutcome, AuthError>;
}

// ============ Platform wire shapes ============

#[derive(Debug, Deserialize)]
struct PlatformUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: serde_json::Value,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl PlatformUser {
    fn metadata(&self, key: &str) -> Option<String> {
        self.user_metadata
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    fn into_user(self) -> User {
        User {
            first_name: self.metadata("first_name").unwrap_or_default(),
            last_name: self.metadata("last_name").unwrap_or_default(),
            role: self
                .metadata("role")
                .unwrap_or_else(|| Role::Farmer.as_str().to_string()),
            id: self.id,
            email: self.email.unwrap_or_default(),
            is_active: true,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    user: PlatformUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            user: self.user.into_user(),
        }
    }
}

/// Sign-up answers with a bare user when email confirmation is pending and
/// with a full session (user nested under `user`) otherwise.
fn signup_user(body: serde_json::Value) -> Result<PlatformUser, AuthError> {
    let user = match body.get("user") {
        Some(nested) if nested.is_object() => nested.clone(),
        _ => body,
    };
    serde_json::from_value(user)
        .map_err(|_| AuthError::BadRequest("Failed to create user".to_string()))
}

/// Map a sign-in failure to the message shown to the user.
pub fn classify_sign_in_error(message: &str) -> String {
    let lower = message.to_lowercase();
    if lower.contains("email not confirmed") {
        "Email not verified. Please check your email to verify your account.".to_string()
    } else if lower.contains("invalid login credentials") {
        "Invalid email or password".to_string()
    } else {
        format!("Authentication error: {}", message)
    }
}

/// Map a refresh failure to the message shown to the user.
pub fn classify_refresh_error(message: &str) -> String {
    let lower = message.to_lowercase();
    if lower.contains("invalid refresh token") {
        "Invalid refresh token".to_string()
    } else if lower.contains("token expired") || lower.contains("already used") {
        "Refresh token expired".to_string()
    } else {
        format!("Refresh token error: {}", message)
    }
}

/// Remove an account from the platform's auth schema.
pub async fn delete_auth_user(
    client: &PlatformClient,
    id: Uuid,
) -> Result<DeleteOutcome, PlatformError> {
    let url = client.auth_url(&format!("admin/users/{}", id));
    match client
        .send(client.request(Method::DELETE, &url, KeyKind::Service, None))
        .await
    {
        Ok(_) => Ok(DeleteOutcome::Deleted),
        Err(e) if e.is_not_found() => Ok(DeleteOutcome::NotFound),
        Err(e) => Err(e),
    }
}

/// [`CredentialAuthority`] backed by the platform's GoTrue API.
#[derive(Clone)]
pub struct PlatformAuthority {
    client: PlatformClient,
    directory: Arc<dyn UserDirectory>,
}

impl PlatformAuthority {
    pub fn new(client: PlatformClient, directory: Arc<dyn UserDirectory>) -> Self {
        Self { client, directory }
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<TokenResponse, PlatformError> {
        let request = self
            .client
            .request(Method::POST, &self.client.auth_url("token"), KeyKind::Anon, None)
            .query(&[("grant_type", grant_type)])
            .json(&body);
        self.client.auth_json(request).await
    }
}

#[async_trait]
impl CredentialAuthority for PlatformAuthority {
    async fn sign_up(&self, registration: &Registration) -> Result<User, AuthError> {
        let role = registration.validate()?;

        let body = serde_json::json!({
            "email": registration.email.trim(),
            "password": registration.password,
            "data": {
                "first_name": registration.first_name,
                "last_name": registration.last_name,
                "role": role.as_str(),
            }
        });
        let request = self
            .client
            .request(Method::POST, &self.client.auth_url("signup"), KeyKind::Anon, None)
            .json(&body);
        let response: serde_json::Value = self.client.auth_json(request).await.map_err(|e| {
            tracing::error!(error = %e, email = %registration.email, "sign-up failed");
            AuthError::BadRequest(e.to_string())
        })?;
        let created = signup_user(response)?;

        let mut user = created.into_user();
        user.first_name = registration.first_name.clone();
        user.last_name = registration.last_name.clone();
        user.role = role.as_str().to_string();
        if user.email.is_empty() {
            user.email = registration.email.trim().to_string();
        }

        let profile = UserProfile {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: user.role.clone(),
            is_active: true,
            created_at: user.created_at,
            updated_at: user.updated_at,
        };
        if let Err(e) = self.directory.create_profile(&profile).await {
            tracing::error!(error = %e, id = %user.id, "profile creation failed, rolling back account");
            if let Err(rollback) = self.delete_user(user.id).await {
                tracing::error!(error = %rollback, id = %user.id, "failed to delete auth user");
            }
            return Err(AuthError::Upstream("Error creating user profile".to_string()));
        }

        tracing::info!(id = %user.id, email = %user.email, "user registered");
        Ok(user)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let body = serde_json::json!({ "email": email, "password": password });
        let token = self.token_grant("password", body).await.map_err(|e| {
            tracing::warn!(error = %e, email, "sign-in refused");
            AuthError::Rejected(classify_sign_in_error(&e.to_string()))
        })?;
        tracing::info!(email, "sign-in succeeded");
        Ok(token.into_session())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let body = serde_json::json!({ "refresh_token": refresh_token });
        let token = self
            .token_grant("refresh_token", body)
            .await
            .map_err(|e| AuthError::Rejected(classify_refresh_error(&e.to_string())))?;
        Ok(token.into_session())
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let request = self.client.request(
            Method::POST,
            &self.client.auth_url("logout"),
            KeyKind::Anon,
            Some(access_token),
        );
        self.client
            .send(request)
            .await
            .map_err(|e| AuthError::Upstream(e.to_string()))?;
        Ok(())
    }

    async fn current_user(&self, access_token: &str) -> Result<User, AuthError> {
        let request = self.client.request(
            Method::GET,
            &self.client.auth_url("user"),
            KeyKind::Anon,
            Some(access_token),
        );
        let user: PlatformUser = self.client.auth_json(request).await.map_err(|e| {
            tracing::debug!(error = %e, "token validation failed");
            AuthError::Rejected("Could not validate credentials".to_string())
        })?;
        Ok(user.into_user())
    }

    async fn delete_user(&self, id: Uuid) -> Result<DeleteOutcome, AuthError> {
        delete_auth_user(&self.client, id)
            .await
            .map_err(|e| AuthError::Upstream(e.to_string()))
    }
}
