//! PostgREST (Supabase) backend
//!
//! Same tables as the SQLite schema, reached over `/rest/v1/<table>`:
//! - select: `GET` with `column=op.value` filters
//! - upsert: `POST` with `on_conflict` and `Prefer: resolution=...`
//! - conditional update: `PATCH` with a filter in the query string
//! - cleanup: `DELETE` with filters
//!
//! A single PostgREST request runs in one database transaction, which is
//! what makes `upsert_batch` all-or-nothing here.
//!
//! The tables are created from `sql/postgrest/schema.sql`, which the
//! indexer does not apply itself. `raw_events.payload` is a jsonb column
//! on this side; SQLite keeps the same map as `payload_json` text.

use super::aggregator::AggregateStore;
use super::checkpoint::{check_advance, check_expected, CheckpointError, CheckpointStore};
use super::error::StoreError;
use super::events::EventKind;
use super::rollup::Granularity;
use super::sink::{EventSink, EventSource};
use super::types::{Bucket, Checkpoint, Projection, RawEvent};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const PAGE_SIZE: usize = 1000;

#[derive(Debug, Deserialize)]
struct LastBlockRow {
    last_block: u64,
}

pub struct RestIndexStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl RestIndexStore {
    /// `project_url` is the Supabase project URL, without `/rest/v1`
    pub fn new(project_url: &str, api_key: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: format!("{}/rest/v1", project_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            now_fn: Box::new(|| chrono::Utc::now().timestamp()),
        })
    }

    pub fn with_timestamp_fn(mut self, now_fn: Box<dyn Fn() -> i64 + Send + Sync>) -> Self {
        self.now_fn = now_fn;
        self
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base_url, table))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn check(response: Response, what: &str) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Http(format!("{} failed: HTTP {}: {}", what, status, body)))
    }

    pub async fn load_checkpoint_row(&self, stream_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let response = self
            .request(Method::GET, "indexer_checkpoints")
            .query(&[
                ("select", "stream_id,last_block,updated_at".to_string()),
                ("stream_id", format!("eq.{}", stream_id)),
            ])
            .send()
            .await?;
        let rows: Vec<Checkpoint> = Self::check(response, "load checkpoint").await?.json().await?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_events(&self, filters: Vec<(&'static str, String)>) -> Result<Vec<RawEvent>, StoreError> {
        let mut events = Vec::new();
        let mut offset = 0;

        loop {
            let mut query = filters.clone();
            query.push(("select", "*".to_string()));
            query.push(("order", "block_number.asc,log_index.asc".to_string()));
            query.push(("limit", PAGE_SIZE.to_string()));
            query.push(("offset", offset.to_string()));

            let response = self
                .request(Method::GET, "raw_events")
                .query(&query)
                .send()
                .await?;
            let page: Vec<RawEvent> = Self::check(response, "select raw_events").await?.json().await?;

            let fetched = page.len();
            events.extend(page);
            if fetched < PAGE_SIZE {
                break;
            }
            offset += fetched;
        }

        Ok(events)
    }
}

fn kinds_filter(kinds: &[EventKind]) -> String {
    let names: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
    format!("in.({})", names.join(","))
}

#[async_trait]
impl CheckpointStore for RestIndexStore {
    async fn load(&self, stream_id: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.load_checkpoint_row(stream_id).await?.map(|c| c.last_block))
    }

    async fn advance(
        &self,
        stream_id: &str,
        expected: Option<u64>,
        new_block: u64,
    ) -> Result<(), CheckpointError> {
        check_advance(expected, new_block)?;
        let now = (self.now_fn)();

        let Some(expected_block) = expected else {
            let response = self
                .request(Method::POST, "indexer_checkpoints")
                .header("Prefer", "return=minimal")
                .json(&json!({
                    "stream_id": stream_id,
                    "last_block": new_block,
                    "updated_at": now,
                }))
                .send()
                .await
                .map_err(StoreError::from)?;

            // 409: another writer created the row first
            if response.status().as_u16() == 409 {
                let found = self.load(stream_id).await?;
                return Err(CheckpointError::Conflict { expected, found });
            }
            Self::check(response, "insert checkpoint").await?;
            return Ok(());
        };

        // Only matches while the stored value is still the one we read
        let response = self
            .request(Method::PATCH, "indexer_checkpoints")
            .query(&[
                ("stream_id", format!("eq.{}", stream_id)),
                ("last_block", format!("eq.{}", expected_block)),
            ])
            .header("Prefer", "return=representation")
            .json(&json!({ "last_block": new_block, "updated_at": now }))
            .send()
            .await
            .map_err(StoreError::from)?;
        let updated: Vec<LastBlockRow> = Self::check(response, "advance checkpoint")
            .await?
            .json()
            .await
            .map_err(StoreError::from)?;

        if updated.is_empty() {
            let found = self.load(stream_id).await?;
            check_expected(expected, found)?;
            return Err(CheckpointError::Store(StoreError::Http(format!(
                "checkpoint update for {} matched no rows",
                stream_id
            ))));
        }

        Ok(())
    }
}

#[async_trait]
impl EventSink for RestIndexStore {
    async fn upsert_batch(&self, events: &[RawEvent]) -> Result<usize, StoreError> {
        if events.is_empty() {
            return Ok(0);
        }

        // ignore-duplicates + return=representation echoes only new rows
        let response = self
            .request(Method::POST, "raw_events")
            .query(&[("on_conflict", "tx_hash,log_index"), ("select", "tx_hash")])
            .header("Prefer", "resolution=ignore-duplicates,return=representation")
            .json(events)
            .send()
            .await?;
        let inserted: Vec<serde_json::Value> =
            Self::check(response, "upsert raw_events").await?.json().await?;

        log::debug!("✅ Stored {} of {} events via REST", inserted.len(), events.len());
        Ok(inserted.len())
    }
}

#[async_trait]
impl EventSource for RestIndexStore {
    async fn events_in_time_range(
        &self,
        kinds: &[EventKind],
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<RawEvent>, StoreError> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_events(vec![
            ("event_kind", kinds_filter(kinds)),
            ("block_timestamp", format!("gte.{}", from_ts)),
            ("block_timestamp", format!("lt.{}", to_ts)),
        ])
        .await
    }

    async fn events_for_kinds(&self, kinds: &[EventKind]) -> Result<Vec<RawEvent>, StoreError> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_events(vec![("event_kind", kinds_filter(kinds))]).await
    }
}

#[async_trait]
impl AggregateStore for RestIndexStore {
    /// Upsert the new rows, then delete rows in the window that were not
    /// part of this set. Readers may briefly see both; rows are a cache.
    async fn replace_buckets(
        &self,
        granularity: Granularity,
        metric_key: &str,
        window_start: i64,
        window_end: i64,
        rows: &[Bucket],
    ) -> Result<(), StoreError> {
        let table = granularity.table();

        if !rows.is_empty() {
            let response = self
                .request(Method::POST, table)
                .query(&[("on_conflict", "metric_key,bucket_start")])
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(rows)
                .send()
                .await?;
            Self::check(response, "upsert buckets").await?;
        }

        let mut query = vec![
            ("metric_key", format!("eq.{}", metric_key)),
            ("bucket_start", format!("gte.{}", window_start)),
            ("bucket_start", format!("lt.{}", window_end)),
        ];
        if !rows.is_empty() {
            let keep: Vec<String> = rows.iter().map(|r| r.bucket_start.to_string()).collect();
            query.push(("bucket_start", format!("not.in.({})", keep.join(","))));
        }

        let response = self.request(Method::DELETE, table).query(&query).send().await?;
        Self::check(response, "delete stale buckets").await?;
        Ok(())
    }

    async fn load_buckets(
        &self,
        granularity: Granularity,
        metric_key: &str,
        window_start: i64,
        window_end: i64,
    ) -> Result<Vec<Bucket>, StoreError> {
        let response = self
            .request(Method::GET, granularity.table())
            .query(&[
                ("select", "metric_key,bucket_start,value,sample_count".to_string()),
                ("metric_key", format!("eq.{}", metric_key)),
                ("bucket_start", format!("gte.{}", window_start)),
                ("bucket_start", format!("lt.{}", window_end)),
                ("order", "bucket_start.asc".to_string()),
            ])
            .send()
            .await?;
        Ok(Self::check(response, "select buckets").await?.json().await?)
    }

    async fn save_projection(&self, projection: &Projection) -> Result<Projection, StoreError> {
        if let Some(stored) = self.load_projection(&projection.entity_key).await? {
            if stored.as_of_block > projection.as_of_block {
                return Ok(stored);
            }
        }

        let response = self
            .request(Method::POST, "current_projections")
            .query(&[("on_conflict", "entity_key")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(projection)
            .send()
            .await?;
        Self::check(response, "upsert projection").await?;
        Ok(projection.clone())
    }

    async fn load_projection(&self, entity_key: &str) -> Result<Option<Projection>, StoreError> {
        let response = self
            .request(Method::GET, "current_projections")
            .query(&[
                ("select", "entity_key,value,as_of_block,updated_at".to_string()),
                ("entity_key", format!("eq.{}", entity_key)),
            ])
            .send()
            .await?;
        let rows: Vec<Projection> = Self::check(response, "select projection").await?.json().await?;
        Ok(rows.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_filter() {
        assert_eq!(kinds_filter(&[EventKind::Mint, EventKind::Burn]), "in.(mint,burn)");
    }

    #[test]
    fn test_postgrest_schema_covers_serialized_columns() {
        let schema = include_str!("../../sql/postgrest/schema.sql");
        let table = |name: &str| {
            let start = schema
                .find(&format!("CREATE TABLE IF NOT EXISTS {} (", name))
                .unwrap();
            let end = start + schema[start..].find(");").unwrap();
            schema[start..end].to_string()
        };

        let event = RawEvent {
            tx_hash: "0xaa".to_string(),
            log_index: 0,
            stream_id: "bpd_supply".to_string(),
            contract_address: "0xc0".to_string(),
            block_number: 1,
            block_timestamp: 2,
            event_kind: EventKind::Mint,
            payload: Default::default(),
            processed_at: 3,
        };
        let raw_events = table("raw_events");
        for column in serde_json::to_value(&event).unwrap().as_object().unwrap().keys() {
            assert!(raw_events.contains(&format!("    {} ", column)), "raw_events.{}", column);
        }
        assert!(raw_events.contains("payload           JSONB"));
        assert!(raw_events.contains("PRIMARY KEY (tx_hash, log_index)"));

        for buckets in ["hourly_buckets", "daily_buckets"] {
            assert!(table(buckets).contains("PRIMARY KEY (metric_key, bucket_start)"));
        }
        assert!(table("current_projections").contains("entity_key   TEXT PRIMARY KEY"));
        assert!(table("indexer_checkpoints").contains("stream_id   TEXT PRIMARY KEY"));
    }

    #[test]
    fn test_base_url_normalized() {
        let store = RestIndexStore::new("https://abc.supabase.co/", "key", Duration::from_secs(1)).unwrap();
        assert_eq!(store.base_url, "https://abc.supabase.co/rest/v1");
    }
}
