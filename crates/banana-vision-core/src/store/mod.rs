//! Gateway abstractions over the data platform.
//!
//! The [`ResultStore`] and [`UserDirectory`] traits define every read and
//! delete the service performs, so handlers and the aggregation engine can
//! run against the REST adapters in production and the in-memory stores
//! in [`memory`] under test.
//!
//! Implementations must be `Send + Sync` to be shared across request tasks.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{DeleteOutcome, InferenceResult, TimestampRow, UserProfile};
use crate::pagination::Page;

/// Read/delete access to the inference result collection.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`list_created_at`](ResultStore::list_created_at) | Timestamps of one category, ascending |
/// | [`count_before`](ResultStore::count_before) | Exact count of one category older than an instant |
/// | [`list_page`](ResultStore::list_page) | Newest-first page with exact total |
/// | [`delete_by_id`](ResultStore::delete_by_id) | Delete a single row |
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// `created_at` of every row whose `fusion_decision` equals `category`,
    /// restricted to `created_at >= since` when given, ordered ascending.
    async fn list_created_at(
        &self,
        category: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<TimestampRow>>;

    /// Number of rows of `category` with `created_at < before`.
    async fn count_before(&self, category: &str, before: DateTime<Utc>) -> Result<u64>;

    /// Rows ordered by `created_at` descending.
    async fn list_page(&self, offset: u64, limit: u32) -> Result<Page<InferenceResult>>;

    async fn delete_by_id(&self, id: Uuid) -> Result<DeleteOutcome>;
}

/// Read/delete access to user profiles.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// A page of profiles, optionally filtered by a case-insensitive partial
    /// match on email, first name, or last name.
    async fn list_page(
        &self,
        offset: u64,
        limit: u32,
        search: Option<&str>,
    ) -> Result<Page<UserProfile>>;

    /// Insert the profile row for a freshly registered account.
    async fn create_profile(&self, profile: &UserProfile) -> Result<()>;

    /// Remove the profile and its backing auth account.
    async fn delete(&self, id: Uuid) -> Result<DeleteOutcome>;
}

/// Normalize a free-text user search term.
///
/// Trims whitespace, drops characters that carry meaning in PostgREST
/// filter syntax, and maps an empty result to `None`.
pub fn normalize_search(search: Option<&str>) -> Option<String> {
    let cleaned: String = search?
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '(' | ')' | '*' | '%'))
        .collect();
    let cleaned = cleaned.trim().to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}
