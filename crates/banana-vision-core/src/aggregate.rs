//! Weekly time-series aggregation for the dashboard.
//!
//! Buckets inference results of one category into ISO weeks and reports a
//! fixed-length trailing window ending at the current week, plus the grand
//! total of the category.
//!
//! # Algorithm
//!
//! 1. Build the window of `W` week keys ending at the ISO week of `now`.
//! 2. Ask the store for the timestamps of matching rows created on or after
//!    the Monday that opens the oldest window week, and for the exact count
//!    of matching rows created before it.
//! 3. Parse each timestamp, skipping missing or malformed values.
//! 4. Count rows per ISO week; look each window week up (zero if absent).
//! 5. `total` = parsed fetched rows + older rows, so it reflects the whole
//!    category while only the window's rows travel over the wire.
//!
//! The engine is a pure function of the store contents and `now`. It never
//! returns partial data: a store failure yields
//! [`AggregationError::Upstream`] and nothing else.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AggregationError;
use crate::models::TimestampRow;
use crate::store::ResultStore;
use crate::week::{parse_timestamp, trailing_window, WeekKey};

/// Window length used when none is configured.
pub const DEFAULT_WINDOW_WEEKS: usize = 6;

/// Longest window accepted; one ISO year at most.
pub const MAX_WINDOW_WEEKS: usize = 53;

/// Weekly counts for the trailing window, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeeklySeries {
    pub labels: Vec<WeekKey>,
    pub counts: Vec<u64>,
    /// Every matching row with a valid timestamp, inside the window or not.
    pub total: u64,
}

impl WeeklySeries {
    /// Sum of the counts shown in the window.
    pub fn windowed_sum(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Bucket already-fetched rows into the trailing window ending at `now`.
///
/// `older` is the number of matching rows known to predate the window; it
/// is added to `total` as-is.
pub fn bucket_weekly(
    rows: &[TimestampRow],
    now: DateTime<Utc>,
    window: usize,
    older: u64,
) -> WeeklySeries {
    let mut per_week: HashMap<WeekKey, u64> = HashMap::new();
    let mut parsed: u64 = 0;
    let mut skipped: usize = 0;

    for row in rows {
        match row.created_at.as_deref().and_then(parse_timestamp) {
            Some(at) => {
                *per_week.entry(WeekKey::of(at)).or_insert(0) += 1;
                parsed += 1;
            }
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::debug!(skipped, "skipped rows with missing or malformed created_at");
    }

    let labels = trailing_window(now, window);
    let counts = labels
        .iter()
        .map(|week| per_week.get(week).copied().unwrap_or(0))
        .collect();

    WeeklySeries {
        labels,
        counts,
        total: parsed + older,
    }
}

/// Computes [`WeeklySeries`] against an injected [`ResultStore`].
#[derive(Clone)]
pub struct WeeklyAggregator {
    store: Arc<dyn ResultStore>,
    window: usize,
}

impl WeeklyAggregator {
    pub fn new(store: Arc<dyn ResultStore>, window: usize) -> Result<Self, AggregationError> {
        if window == 0 || window > MAX_WINDOW_WEEKS {
            return Err(AggregationError::Window(window));
        }
        Ok(Self { store, window })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Weekly counts for `category` (compared lowercase against
    /// `fusion_decision`) over the window ending at `now`.
    pub async fn weekly_stats(
        &self,
        category: &str,
        now: DateTime<Utc>,
    ) -> Result<WeeklySeries, AggregationError> {
        let category = category.to_lowercase();
        let since = trailing_window(now, self.window)
            .first()
            .and_then(WeekKey::start);

        let rows = self
            .store
            .list_created_at(&category, since)
            .await
            .map_err(|e| AggregationError::Upstream(format!("{:#}", e)))?;

        let older = match since {
            Some(since) => self
                .store
                .count_before(&category, since)
                .await
                .map_err(|e| AggregationError::Upstream(format!("{:#}", e)))?,
            None => 0,
        };

        let series = bucket_weekly(&rows, now, self.window, older);
        tracing::info!(
            category = %category,
            total = series.total,
            weeks = ?series.labels.iter().map(ToString::to_string).collect::<Vec<_>>(),
            counts = ?series.counts,
            "computed weekly stats"
        );
        Ok(series)
    }
}

/// One named line of the dashboard chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedSeries {
    pub name: String,
    pub data: Vec<u64>,
}

/// Dashboard response envelope.
///
/// On failure every data field is empty or zero and `has_error` carries the
/// flag; callers check it instead of relying on partial data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub series: Vec<NamedSeries>,
    pub weeks: Vec<String>,
    #[serde(rename = "totalTrees")]
    pub total_trees: u64,
    pub has_error: bool,
    pub error: Option<String>,
}

impl TreeStats {
    pub fn from_series(name: &str, series: WeeklySeries) -> Self {
        Self {
            weeks: series.labels.iter().map(ToString::to_string).collect(),
            series: vec![NamedSeries {
                name: name.to_string(),
                data: series.counts,
            }],
            total_trees: series.total,
            has_error: false,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            series: Vec::new(),
            weeks: Vec::new(),
            total_trees: 0,
            has_error: true,
            error: Some(message.into()),
        }
    }

    pub fn from_result(name: &str, result: Result<WeeklySeries, AggregationError>) -> Self {
        match result {
            Ok(series) => Self::from_series(name, series),
            Err(e) => Self::failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeleteOutcome, InferenceResult};
    use crate::pagination::Page;
    use crate::store::memory::InMemoryResultStore;
    use anyhow::Result;
    use async_trait::async_trait;
    use uuid::Uuid;

    fn utc(s: &str) -> DateTime<Utc> {
        parse_timestamp(s).unwrap()
    }

    fn labels(series: &WeeklySeries) -> Vec<String> {
        series.labels.iter().map(ToString::to_string).collect()
    }

    /// A store whose reads always fail.
    struct FailingStore;

    #[async_trait]
    impl ResultStore for FailingStore {
        async fn list_created_at(
            &self,
            _category: &str,
            _since: Option<DateTime<Utc>>,
        ) -> Result<Vec<TimestampRow>> {
            anyhow::bail!("connection refused")
        }

        async fn count_before(&self, _category: &str, _before: DateTime<Utc>) -> Result<u64> {
            anyhow::bail!("connection refused")
        }

        async fn list_page(&self, _offset: u64, _limit: u32) -> Result<Page<InferenceResult>> {
            anyhow::bail!("connection refused")
        }

        async fn delete_by_id(&self, _id: Uuid) -> Result<DeleteOutcome> {
            anyhow::bail!("connection refused")
        }
    }

    /// Succeeds on the window fetch, fails on the count.
    struct CountFailsStore(InMemoryResultStore);

    #[async_trait]
    impl ResultStore for CountFailsStore {
        async fn list_created_at(
            &self,
            category: &str,
            since: Option<DateTime<Utc>>,
        ) -> Result<Vec<TimestampRow>> {
            self.0.list_created_at(category, since).await
        }

        async fn count_before(&self, _category: &str, _before: DateTime<Utc>) -> Result<u64> {
            anyhow::bail!("statement timeout")
        }

        async fn list_page(&self, offset: u64, limit: u32) -> Result<Page<InferenceResult>> {
            self.0.list_page(offset, limit).await
        }

        async fn delete_by_id(&self, id: Uuid) -> Result<DeleteOutcome> {
            self.0.delete_by_id(id).await
        }
    }

    #[test]
    fn test_scenario_two_records_six_week_window() {
        let rows = vec![
            TimestampRow::new("2024-02-05T10:00:00Z"),
            TimestampRow::new("2024-02-19T10:00:00Z"),
        ];
        let series = bucket_weekly(&rows, utc("2024-02-19T12:00:00Z"), 6, 0);

        assert_eq!(
            labels(&series),
            vec!["2024-W03", "2024-W04", "2024-W05", "2024-W06", "2024-W07", "2024-W08"]
        );
        assert_eq!(series.counts, vec![0, 0, 0, 1, 0, 1]);
        assert_eq!(series.total, 2);
    }

    #[test]
    fn test_sparse_weeks_render_as_zero() {
        // Only the first and fourth window weeks have data.
        let rows = vec![
            TimestampRow::new("2024-01-02T09:00:00Z"), // 2024-W01
            TimestampRow::new("2024-01-23T09:00:00Z"), // 2024-W04
            TimestampRow::new("2024-01-24T09:00:00Z"), // 2024-W04
        ];
        let series = bucket_weekly(&rows, utc("2024-02-07T00:00:00Z"), 6, 0);

        assert_eq!(labels(&series)[0], "2024-W01");
        assert_eq!(series.counts, vec![1, 0, 0, 2, 0, 0]);
        assert_eq!(series.counts.len(), 6);
    }

    #[test]
    fn test_malformed_timestamps_are_skipped() {
        let rows = vec![
            TimestampRow::missing(),
            TimestampRow::new("garbage"),
            TimestampRow::new(""),
            TimestampRow::new("2024-02-19T10:00:00Z"),
        ];
        let series = bucket_weekly(&rows, utc("2024-02-19T12:00:00Z"), 6, 0);

        assert_eq!(series.total, 1);
        assert_eq!(series.windowed_sum(), 1);
    }

    #[test]
    fn test_total_counts_rows_outside_window() {
        let rows = vec![
            TimestampRow::new("2024-02-19T10:00:00Z"),
            // After "now": outside the window but part of the category.
            TimestampRow::new("2024-04-01T10:00:00Z"),
        ];
        let series = bucket_weekly(&rows, utc("2024-02-19T12:00:00Z"), 6, 5);

        assert_eq!(series.windowed_sum(), 1);
        assert_eq!(series.total, 7);
        assert!(series.windowed_sum() <= series.total);
    }

    #[test]
    fn test_year_boundary_into_53_week_year() {
        let series = bucket_weekly(&[], utc("2021-01-05T00:00:00Z"), 6, 0);
        assert_eq!(
            labels(&series),
            vec!["2020-W49", "2020-W50", "2020-W51", "2020-W52", "2020-W53", "2021-W01"]
        );
    }

    #[test]
    fn test_year_boundary_into_52_week_year() {
        let series = bucket_weekly(&[], utc("2024-01-03T00:00:00Z"), 3, 0);
        assert_eq!(labels(&series), vec!["2023-W51", "2023-W52", "2024-W01"]);
        assert_eq!(series.counts, vec![0, 0, 0]);
        assert_eq!(series.total, 0);
    }

    #[test]
    fn test_bucketing_uses_utc_week() {
        // Sunday 23:30 at -05:00 is Monday 04:30 UTC, i.e. the next ISO week.
        let rows = vec![TimestampRow::new("2024-02-18T23:30:00-05:00")];
        let series = bucket_weekly(&rows, utc("2024-02-19T12:00:00Z"), 2, 0);
        assert_eq!(labels(&series), vec!["2024-W07", "2024-W08"]);
        assert_eq!(series.counts, vec![0, 1]);
    }

    #[test]
    fn test_bucket_weekly_is_idempotent() {
        let rows = vec![
            TimestampRow::new("2024-02-05T10:00:00Z"),
            TimestampRow::new("2024-02-06T10:00:00Z"),
            TimestampRow::new("2023-11-01T10:00:00Z"),
        ];
        let now = utc("2024-02-19T12:00:00Z");
        assert_eq!(bucket_weekly(&rows, now, 6, 3), bucket_weekly(&rows, now, 6, 3));
    }

    #[test]
    fn test_rejects_bad_window() {
        let store: Arc<dyn ResultStore> = Arc::new(InMemoryResultStore::new());
        assert_eq!(
            WeeklyAggregator::new(store.clone(), 0).err(),
            Some(AggregationError::Window(0))
        );
        assert!(WeeklyAggregator::new(store.clone(), 54).is_err());
        assert_eq!(WeeklyAggregator::new(store, 12).unwrap().window(), 12);
    }

    #[tokio::test]
    async fn test_engine_scenario_against_store() {
        let store = InMemoryResultStore::new();
        store.insert_raw(Some("2024-02-05T10:00:00Z"), "healthy").unwrap();
        store.insert_raw(Some("2024-02-19T10:00:00Z"), "healthy").unwrap();
        store.insert_raw(Some("2024-02-12T10:00:00Z"), "infected").unwrap();

        let engine = WeeklyAggregator::new(Arc::new(store), 6).unwrap();
        let series = engine
            .weekly_stats("Healthy", utc("2024-02-19T12:00:00Z"))
            .await
            .unwrap();

        assert_eq!(series.counts, vec![0, 0, 0, 1, 0, 1]);
        assert_eq!(series.total, 2);
    }

    #[tokio::test]
    async fn test_engine_total_includes_history_before_window() {
        let store = InMemoryResultStore::new();
        store.insert_raw(Some("2022-05-01T10:00:00Z"), "infected").unwrap();
        store.insert_raw(Some("2023-12-31T23:59:59Z"), "infected").unwrap();
        store.insert_raw(Some("2024-02-19T10:00:00Z"), "infected").unwrap();
        store.insert_raw(None, "infected").unwrap();
        store.insert_raw(Some("unparsable"), "infected").unwrap();

        let engine = WeeklyAggregator::new(Arc::new(store), 6).unwrap();
        let series = engine
            .weekly_stats("infected", utc("2024-02-19T12:00:00Z"))
            .await
            .unwrap();

        assert_eq!(series.windowed_sum(), 1);
        assert_eq!(series.total, 3);
    }

    #[tokio::test]
    async fn test_engine_window_edge_is_inclusive() {
        let store = InMemoryResultStore::new();
        // Monday 00:00 UTC of 2024-W03, the oldest week of the window.
        store.insert_raw(Some("2024-01-15T00:00:00Z"), "healthy").unwrap();
        // One second earlier belongs to 2024-W02.
        store.insert_raw(Some("2024-01-14T23:59:59Z"), "healthy").unwrap();

        let engine = WeeklyAggregator::new(Arc::new(store), 6).unwrap();
        let series = engine
            .weekly_stats("healthy", utc("2024-02-19T12:00:00Z"))
            .await
            .unwrap();

        assert_eq!(series.counts[0], 1);
        assert_eq!(series.windowed_sum(), 1);
        assert_eq!(series.total, 2);
    }

    #[tokio::test]
    async fn test_engine_upstream_failure_is_tagged() {
        let engine = WeeklyAggregator::new(Arc::new(FailingStore), 6).unwrap();
        let err = engine
            .weekly_stats("healthy", utc("2024-02-19T12:00:00Z"))
            .await
            .unwrap_err();
        assert_eq!(err, AggregationError::Upstream("connection refused".to_string()));

        let stats = TreeStats::from_result("Healthy", Err(err));
        assert!(stats.has_error);
        assert!(stats.series.is_empty());
        assert!(stats.weeks.is_empty());
        assert_eq!(stats.total_trees, 0);
        assert_eq!(stats.error.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_engine_count_failure_returns_no_partial_data() {
        let inner = InMemoryResultStore::new();
        inner.insert_raw(Some("2024-02-19T10:00:00Z"), "healthy").unwrap();
        let engine = WeeklyAggregator::new(Arc::new(CountFailsStore(inner)), 6).unwrap();

        let result = engine
            .weekly_stats("healthy", utc("2024-02-19T12:00:00Z"))
            .await;
        assert!(matches!(result, Err(AggregationError::Upstream(ref m)) if m == "statement timeout"));
    }

    #[test]
    fn test_tree_stats_json_shape() {
        let series = bucket_weekly(
            &[TimestampRow::new("2024-02-19T10:00:00Z")],
            utc("2024-02-19T12:00:00Z"),
            2,
            0,
        );
        let json = serde_json::to_value(TreeStats::from_series("Healthy", series)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "series": [{"name": "Healthy", "data": [0, 1]}],
                "weeks": ["2024-W07", "2024-W08"],
                "totalTrees": 1,
                "has_error": false,
                "error": null
            })
        );

        let failed = serde_json::to_value(TreeStats::failed("boom")).unwrap();
        assert_eq!(
            failed,
            serde_json::json!({
                "series": [],
                "weeks": [],
                "totalTrees": 0,
                "has_error": true,
                "error": "boom"
            })
        );
    }
}
