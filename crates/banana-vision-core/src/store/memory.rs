//! In-memory [`ResultStore`] and [`UserDirectory`] implementations for
//! tests and offline demos.
//!
//! Rows live in a `Vec` behind `std::sync::RwLock`. Result rows keep their
//! `created_at` as the raw string so malformed values can be exercised
//! end to end.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{DeleteOutcome, InferenceResult, TimestampRow, UserProfile};
use crate::pagination::Page;
use crate::week::parse_timestamp;

use super::{normalize_search, ResultStore, UserDirectory};

struct StoredResult {
    id: Uuid,
    created_at: Option<String>,
    fusion_decision: Option<String>,
    record: InferenceResult,
}

impl StoredResult {
    fn parsed_at(&self) -> Option<DateTime<Utc>> {
        self.created_at.as_deref().and_then(parse_timestamp)
    }

    fn matches(&self, category: &str) -> bool {
        self.fusion_decision.as_deref() == Some(category)
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

/// In-memory inference result store.
#[derive(Default)]
pub struct InMemoryResultStore {
    rows: RwLock<Vec<StoredResult>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a well-formed result.
    pub fn insert(&self, result: InferenceResult) -> Result<()> {
        let mut rows = write(&self.rows)?;
        rows.push(StoredResult {
            id: result.id,
            created_at: result.created_at.map(|at| at.to_rfc3339()),
            fusion_decision: result.fusion_decision.clone(),
            record: result,
        });
        Ok(())
    }

    /// Store a row with an arbitrary (possibly missing or unparsable)
    /// timestamp. Returns the generated id.
    pub fn insert_raw(&self, created_at: Option<&str>, fusion_decision: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let record = InferenceResult {
            id,
            created_at: created_at.and_then(parse_timestamp),
            regular_result: None,
            thermal_result: None,
            fused_confidence: None,
            fusion_decision: Some(fusion_decision.to_string()),
            regular_output_url: None,
            thermal_output_url: None,
        };
        let mut rows = write(&self.rows)?;
        rows.push(StoredResult {
            id,
            created_at: created_at.map(str::to_string),
            fusion_decision: Some(fusion_decision.to_string()),
            record,
        });
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn list_created_at(
        &self,
        category: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<TimestampRow>> {
        let rows = read(&self.rows)?;
        let mut matched: Vec<(Option<DateTime<Utc>>, TimestampRow)> = rows
            .iter()
            .filter(|r| r.matches(category))
            .filter(|r| match (since, r.parsed_at()) {
                (None, _) => true,
                (Some(since), Some(at)) => at >= since,
                // Unreadable values cannot be range-filtered; hand them to the
                // caller. A missing value never satisfies a range filter.
                (Some(_), None) => r.created_at.is_some(),
            })
            .map(|r| {
                (
                    r.parsed_at(),
                    TimestampRow {
                        created_at: r.created_at.clone(),
                    },
                )
            })
            .collect();
        matched.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(matched.into_iter().map(|(_, row)| row).collect())
    }

    async fn count_before(&self, category: &str, before: DateTime<Utc>) -> Result<u64> {
        let rows = read(&self.rows)?;
        let count = rows
            .iter()
            .filter(|r| r.matches(category))
            .filter(|r| r.parsed_at().is_some_and(|at| at < before))
            .count();
        Ok(count as u64)
    }

    async fn list_page(&self, offset: u64, limit: u32) -> Result<Page<InferenceResult>> {
        let rows = read(&self.rows)?;
        let mut records: Vec<InferenceResult> = rows.iter().map(|r| r.record.clone()).collect();
        // Newest first, rows without a timestamp last.
        records.sort_by(|a, b| match (a.created_at, b.created_at) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        let total = records.len() as u64;
        let rows = records
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit as usize)
            .collect();
        Ok(Page { rows, total })
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<DeleteOutcome> {
        let mut rows = write(&self.rows)?;
        let before = rows.len();
        rows.retain(|r| r.id != id);
        Ok(if rows.len() < before {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::NotFound
        })
    }
}

/// In-memory profile directory.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    profiles: RwLock<Vec<UserProfile>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: Vec<UserProfile>) -> Self {
        Self {
            profiles: RwLock::new(profiles),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<UserProfile> {
        self.profiles
            .read()
            .ok()?
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }
}

fn profile_matches(profile: &UserProfile, needle: &str) -> bool {
    [&profile.email, &profile.first_name, &profile.last_name]
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn list_page(
        &self,
        offset: u64,
        limit: u32,
        search: Option<&str>,
    ) -> Result<Page<UserProfile>> {
        let needle = normalize_search(search).map(|s| s.to_lowercase());
        let profiles = read(&self.profiles)?;
        let matched: Vec<&UserProfile> = profiles
            .iter()
            .filter(|p| needle.as_deref().map_or(true, |n| profile_matches(p, n)))
            .collect();
        let total = matched.len() as u64;
        let rows = matched
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(Page { rows, total })
    }

    async fn create_profile(&self, profile: &UserProfile) -> Result<()> {
        let mut profiles = write(&self.profiles)?;
        if profiles.iter().any(|p| p.id == profile.id) {
            anyhow::bail!("duplicate key value violates unique constraint \"profiles_pkey\"");
        }
        profiles.push(profile.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<DeleteOutcome> {
        let mut profiles = write(&self.profiles)?;
        let before = profiles.len();
        profiles.retain(|p| p.id != id);
        Ok(if profiles.len() < before {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::NotFound
        })
    }
}
