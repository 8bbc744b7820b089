//! Inference result gateway backed by the data platform.
//!
//! Implements [`ResultStore`] over the `inference_results` table. Rows are
//! produced by the external detection pipeline; this service only reads
//! and deletes them, always with the service key.

use std::future::Future;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use banana_vision_core::models::{DeleteOutcome, InferenceResult, TimestampRow};
use banana_vision_core::pagination::Page;
use banana_vision_core::store::ResultStore;

use crate::platform::{PlatformClient, PlatformError, Query};

pub const TABLE: &str = "inference_results";

/// Rows requested per timestamp page. The platform may return fewer when
/// its own row cap is lower.
pub const TIMESTAMP_PAGE_SIZE: u32 = 1000;

/// Columns returned by the listing endpoint.
pub const LIST_COLUMNS: &str = "id,created_at,regular_result,thermal_result,fused_confidence,\
fusion_decision,regular_output_url,thermal_output_url";

/// [`ResultStore`] over PostgREST.
#[derive(Clone)]
pub struct PlatformResultStore {
    client: PlatformClient,
}

impl PlatformResultStore {
    pub fn new(client: PlatformClient) -> Self {
        Self { client }
    }
}

fn pg_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Query for the ascending `created_at` projection of one category.
pub fn timestamps_query(category: &str, since: Option<DateTime<Utc>>) -> Query {
    let mut query = vec![
        ("select".to_string(), "created_at".to_string()),
        ("fusion_decision".to_string(), format!("eq.{}", category)),
    ];
    if let Some(since) = since {
        query.push(("created_at".to_string(), format!("gte.{}", pg_timestamp(since))));
    }
    query.push(("order".to_string(), "created_at.asc,id.asc".to_string()));
    query
}

/// `query` restricted to one page.
pub fn paged(mut query: Query, offset: u64, limit: u32) -> Query {
    query.push(("offset".to_string(), offset.to_string()));
    query.push(("limit".to_string(), limit.to_string()));
    query
}

/// Drain a paged listing.
///
/// `fetch(offset, limit)` returns one page and, when known, the exact size
/// of the whole set. Offsets advance by the rows actually received, so a
/// server that caps pages below `limit` is still read to the end. Without a
/// count, a short page ends the listing.
pub async fn collect_pages<T, F, Fut>(limit: u32, mut fetch: F) -> Result<Vec<T>, PlatformError>
where
    F: FnMut(u64, u32) -> Fut,
    Fut: Future<Output = Result<(Vec<T>, Option<u64>), PlatformError>>,
{
    let mut rows = Vec::new();
    let mut expected = None;
    loop {
        let (page, total) = fetch(rows.len() as u64, limit).await?;
        expected = expected.or(total);
        let received = page.len();
        rows.extend(page);
        let done = match expected {
            Some(total) => rows.len() as u64 >= total,
            None => received < limit as usize,
        };
        if done || received == 0 {
            return Ok(rows);
        }
    }
}

/// Filter for rows of one category older than `before`.
pub fn older_than_query(category: &str, before: DateTime<Utc>) -> Query {
    vec![
        ("fusion_decision".to_string(), format!("eq.{}", category)),
        ("created_at".to_string(), format!("lt.{}", pg_timestamp(before))),
    ]
}

/// Newest-first page query; rows without a timestamp sort last.
pub fn page_query(offset: u64, limit: u32) -> Query {
    vec![
        ("select".to_string(), LIST_COLUMNS.to_string()),
        ("order".to_string(), "created_at.desc.nullslast".to_string()),
        ("offset".to_string(), offset.to_string()),
        ("limit".to_string(), limit.to_string()),
    ]
}

fn id_query(id: Uuid) -> Query {
    vec![("id".to_string(), format!("eq.{}", id))]
}

#[async_trait]
impl ResultStore for PlatformResultStore {
    async fn list_created_at(
        &self,
        category: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<TimestampRow>> {
        let query = timestamps_query(category, since);
        let client = &self.client;
        let rows = collect_pages(TIMESTAMP_PAGE_SIZE, |offset, limit| {
            let page = paged(query.clone(), offset, limit);
            async move { client.select::<TimestampRow>(TABLE, &page, true).await }
        })
        .await
        .inspect_err(|e| tracing::error!(error = %e, category, "fetching timestamps failed"))?;
        tracing::debug!(category, fetched = rows.len(), "fetched timestamps");
        Ok(rows)
    }

    async fn count_before(&self, category: &str, before: DateTime<Utc>) -> Result<u64> {
        let count = self
            .client
            .count(TABLE, &older_than_query(category, before))
            .await
            .inspect_err(|e| tracing::error!(error = %e, category, "counting results failed"))?;
        Ok(count)
    }

    async fn list_page(&self, offset: u64, limit: u32) -> Result<Page<InferenceResult>> {
        let (rows, total) = self
            .client
            .select::<InferenceResult>(TABLE, &page_query(offset, limit), true)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "listing results failed"))?;
        tracing::debug!(offset, limit, returned = rows.len(), ?total, "listed results");
        Ok(Page {
            rows,
            total: total.unwrap_or_default(),
        })
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<DeleteOutcome> {
        let deleted: Vec<serde_json::Value> = self
            .client
            .delete_returning(TABLE, &id_query(id))
            .await
            .inspect_err(|e| tracing::error!(error = %e, %id, "deleting result failed"))?;
        tracing::info!(%id, deleted = deleted.len(), "delete inference result");
        Ok(if deleted.is_empty() {
            DeleteOutcome::NotFound
        } else {
            DeleteOutcome::Deleted
        })
    }
}
