//! Core data models shared by the gateways, the aggregation engine, and
//! the HTTP layer.
//!
//! Gateway adapters are responsible for normalizing whatever the data
//! platform returns into these fixed shapes; nothing downstream inspects
//! raw JSON.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::week::parse_timestamp;

/// A single detection produced by the external inference pipeline.
///
/// Rows are written by the pipeline, never by this service. The only
/// mutation available here is deletion.
///
/// `created_at` is nullable upstream; a null or unreadable value becomes
/// `None` so the row still lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub id: Uuid,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub regular_result: Option<serde_json::Value>,
    #[serde(default)]
    pub thermal_result: Option<serde_json::Value>,
    #[serde(default)]
    pub fused_confidence: Option<f64>,
    #[serde(default)]
    pub fusion_decision: Option<String>,
    #[serde(default)]
    pub regular_output_url: Option<String>,
    #[serde(default)]
    pub thermal_output_url: Option<String>,
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(|v| v.as_str()).and_then(parse_timestamp))
}

/// The `created_at` projection read by the aggregation engine.
///
/// Kept as the raw string so that a malformed value can be skipped by the
/// engine instead of failing the whole fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRow {
    #[serde(default)]
    pub created_at: Option<String>,
}

impl TimestampRow {
    pub fn new(created_at: impl Into<String>) -> Self {
        Self {
            created_at: Some(created_at.into()),
        }
    }

    pub fn missing() -> Self {
        Self { created_at: None }
    }
}

/// A row of the `profiles` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_role() -> String {
    Role::Farmer.as_str().to_string()
}

fn default_active() -> bool {
    true
}

/// Result of a delete call against a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Account role stored in user metadata and on the profile row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Farmer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Farmer => "farmer",
        }
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "farmer" => Ok(Role::Farmer),
            other => Err(ValidationError::Role(other.to_string())),
        }
    }
}

/// Tree category shown on the dashboard.
///
/// The display name (`Healthy`) is what the API echoes back as the series
/// name; the stored `fusion_decision` is the lowercase form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeType {
    #[default]
    Healthy,
    Infected,
}

impl TreeType {
    pub fn display_name(&self) -> &'static str {
        match self {
            TreeType::Healthy => "Healthy",
            TreeType::Infected => "Infected",
        }
    }

    /// The `fusion_decision` label this category matches.
    pub fn fusion_decision(&self) -> String {
        self.display_name().to_lowercase()
    }
}

impl fmt::Display for TreeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for TreeType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "healthy" => Ok(TreeType::Healthy),
            "infected" => Ok(TreeType::Infected),
            _ => Err(ValidationError::Category(s.to_string())),
        }
    }
}
