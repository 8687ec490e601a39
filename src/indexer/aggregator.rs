//! Aggregator: rebuilds rollup buckets and current-value projections
//!
//! Both operations recompute from RawEvent and overwrite their outputs, so
//! re-running them is always safe. They only read RawEvent and may run while
//! ingestion is writing.

use super::error::StoreError;
use crate::chain::ChainError;
use super::projection::{fold_projection, ProjectionKey};
use super::rollup::{build_buckets, Granularity, Metric};
use super::sink::EventSource;
use super::types::{Bucket, Projection};
use async_trait::async_trait;
use std::sync::Arc;

/// Storage for derived tables
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Atomically make `rows` the complete set of rows for `metric_key`
    /// with `window_start <= bucket_start < window_end`.
    async fn replace_buckets(
        &self,
        granularity: Granularity,
        metric_key: &str,
        window_start: i64,
        window_end: i64,
        rows: &[Bucket],
    ) -> Result<(), StoreError>;

    async fn load_buckets(
        &self,
        granularity: Granularity,
        metric_key: &str,
        window_start: i64,
        window_end: i64,
    ) -> Result<Vec<Bucket>, StoreError>;

    /// Store `projection` unless the stored row has a higher `as_of_block`.
    /// Returns whichever row is stored afterwards.
    async fn save_projection(&self, projection: &Projection) -> Result<Projection, StoreError>;

    async fn load_projection(&self, entity_key: &str) -> Result<Option<Projection>, StoreError>;
}

#[derive(Debug)]
pub enum AggregateError {
    UnknownMetric(String),
    UnknownEntity(String),
    InvalidWindow { start: i64, end: i64 },
    Store(StoreError),
    /// Direct chain read for a projection failed
    Chain(ChainError),
}

impl From<StoreError> for AggregateError {
    fn from(err: StoreError) -> Self {
        AggregateError::Store(err)
    }
}

impl From<ChainError> for AggregateError {
    fn from(err: ChainError) -> Self {
        AggregateError::Chain(err)
    }
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateError::UnknownMetric(key) => write!(f, "Unknown metric: {}", key),
            AggregateError::UnknownEntity(key) => write!(f, "Unknown projection entity: {}", key),
            AggregateError::InvalidWindow { start, end } => {
                write!(f, "Invalid window: start {} >= end {}", start, end)
            }
            AggregateError::Store(e) => write!(f, "{}", e),
            AggregateError::Chain(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AggregateError {}

#[derive(Debug, Clone, PartialEq)]
pub struct RebucketReport {
    pub metric_key: String,
    pub events_scanned: usize,
    pub hourly_rows: usize,
    pub daily_rows: usize,
}

pub struct Aggregator {
    events: Arc<dyn EventSource>,
    store: Arc<dyn AggregateStore>,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl Aggregator {
    pub fn new(events: Arc<dyn EventSource>, store: Arc<dyn AggregateStore>) -> Self {
        Self::new_with_timestamp_fn(
            events,
            store,
            Box::new(|| chrono::Utc::now().timestamp()),
        )
    }

    pub fn new_with_timestamp_fn(
        events: Arc<dyn EventSource>,
        store: Arc<dyn AggregateStore>,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        Self {
            events,
            store,
            now_fn,
        }
    }

    /// Recompute hourly and daily buckets of `metric_key` over the window,
    /// widened outward to whole buckets, replacing whatever was stored.
    pub async fn rebucket(
        &self,
        metric_key: &str,
        window_start: i64,
        window_end: i64,
    ) -> Result<RebucketReport, AggregateError> {
        let metric = Metric::from_key(metric_key)
            .ok_or_else(|| AggregateError::UnknownMetric(metric_key.to_string()))?;

        if window_start >= window_end {
            return Err(AggregateError::InvalidWindow {
                start: window_start,
                end: window_end,
            });
        }

        // Daily alignment always covers the hourly one
        let outer_start = Granularity::Daily.floor(window_start);
        let outer_end = Granularity::Daily.ceil(window_end);
        let events = self
            .events
            .events_in_time_range(metric.kinds(), outer_start, outer_end)
            .await?;

        let mut report = RebucketReport {
            metric_key: metric_key.to_string(),
            events_scanned: events.len(),
            hourly_rows: 0,
            daily_rows: 0,
        };

        for granularity in Granularity::all() {
            let start = granularity.floor(window_start);
            let end = granularity.ceil(window_end);
            let in_window: Vec<_> = events
                .iter()
                .filter(|e| e.block_timestamp >= start && e.block_timestamp < end)
                .cloned()
                .collect();

            let rows = build_buckets(metric, granularity, &in_window);
            self.store
                .replace_buckets(granularity, metric_key, start, end, &rows)
                .await?;

            match granularity {
                Granularity::Hourly => report.hourly_rows = rows.len(),
                Granularity::Daily => report.daily_rows = rows.len(),
            }
        }

        log::debug!(
            "📊 Rebucketed {} [{}, {}): {} events → {} hourly / {} daily rows",
            metric_key,
            window_start,
            window_end,
            report.events_scanned,
            report.hourly_rows,
            report.daily_rows
        );

        Ok(report)
    }

    pub async fn rebucket_all(
        &self,
        window_start: i64,
        window_end: i64,
    ) -> Result<Vec<RebucketReport>, AggregateError> {
        let mut reports = Vec::new();
        for metric in Metric::all() {
            reports.push(self.rebucket(metric.key(), window_start, window_end).await?);
        }
        Ok(reports)
    }

    /// Fold every relevant event for `entity_key` and store the result.
    ///
    /// The stored `as_of_block` never moves backwards; if a newer projection
    /// is already stored, that one is returned unchanged.
    pub async fn project_current(&self, entity_key: &str) -> Result<Projection, AggregateError> {
        let key = ProjectionKey::parse(entity_key)
            .ok_or_else(|| AggregateError::UnknownEntity(entity_key.to_string()))?;

        let events = self.events.events_for_kinds(key.kinds()).await?;
        let (value, as_of_block) = fold_projection(&key, &events);

        let candidate = Projection {
            entity_key: key.as_key(),
            value,
            as_of_block,
            updated_at: (self.now_fn)(),
        };

        let stored = self.store.save_projection(&candidate).await?;
        if stored.as_of_block > candidate.as_of_block {
            log::warn!(
                "⚠️  Projection {} kept at block {} (recomputed only to {})",
                stored.entity_key,
                stored.as_of_block,
                candidate.as_of_block
            );
        }

        Ok(stored)
    }
}
