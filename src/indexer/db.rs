//! SQLite backend for checkpoints, raw events and derived tables
//!
//! Tables (see `/sql/`):
//! - `indexer_checkpoints` - one row per stream, advanced under an IMMEDIATE transaction
//! - `raw_events` - INSERT OR IGNORE on (tx_hash, log_index)
//! - `hourly_buckets` / `daily_buckets` - replaced per metric window
//! - `current_projections` - UPSERT guarded by as_of_block

use super::aggregator::AggregateStore;
use super::checkpoint::{check_advance, check_expected, CheckpointError, CheckpointStore};
use super::error::StoreError;
use super::events::EventKind;
use super::rollup::Granularity;
use super::sink::{EventSink, EventSource};
use super::types::{Bucket, Checkpoint, Projection, RawEvent};
use crate::sqlite_pragma::apply_optimized_pragmas;
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Embedded schema, applied in order. Every statement is IF NOT EXISTS.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "00_indexer_checkpoints.sql",
        include_str!("../../sql/00_indexer_checkpoints.sql"),
    ),
    ("01_raw_events.sql", include_str!("../../sql/01_raw_events.sql")),
    ("02_buckets.sql", include_str!("../../sql/02_buckets.sql")),
    (
        "03_current_projections.sql",
        include_str!("../../sql/03_current_projections.sql"),
    ),
];

/// Apply the embedded schema
pub fn run_schema_migrations(conn: &Connection) -> Result<(), StoreError> {
    log::info!("🔧 Running schema migrations");

    for (name, sql) in MIGRATIONS {
        log::debug!("   ├─ Executing: {}", name);
        conn.execute_batch(sql)?;
    }

    log::info!("   └─ ✅ {} migrations applied", MIGRATIONS.len());
    Ok(())
}

const EVENT_COLUMNS: &str = "tx_hash, log_index, stream_id, contract_address, block_number, \
     block_timestamp, event_kind, payload_json, processed_at";

pub struct SqliteIndexStore {
    conn: Arc<Mutex<Connection>>,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl SqliteIndexStore {
    /// Open (creating if needed) the database file and apply the schema
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Database(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        apply_optimized_pragmas(&conn)?;
        run_schema_migrations(&conn)?;

        log::info!("✅ SQLite index store ready: {}", path.display());
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        run_schema_migrations(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            now_fn: Box::new(|| chrono::Utc::now().timestamp()),
        }
    }

    /// Override the clock used for `updated_at` columns
    pub fn with_timestamp_fn(mut self, now_fn: Box<dyn Fn() -> i64 + Send + Sync>) -> Self {
        self.now_fn = now_fn;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection mutex poisoned".to_string()))
    }

    pub fn load_checkpoint_row(&self, stream_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT stream_id, last_block, updated_at FROM indexer_checkpoints WHERE stream_id = ?1",
                [stream_id],
                |row| {
                    Ok(Checkpoint {
                        stream_id: row.get(0)?,
                        last_block: row.get::<_, i64>(1)? as u64,
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Total stored events, used by tests and the one-shot trigger
    pub fn count_events(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM raw_events", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn query_events(&self, where_clause: &str, args: Vec<Value>) -> Result<Vec<RawEvent>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM raw_events WHERE {} ORDER BY block_number ASC, log_index ASC",
            EVENT_COLUMNS, where_clause
        );
        let mut stmt = conn.prepare(&sql)?;

        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, i64>(8)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (tx_hash, log_index, stream_id, contract_address, block, ts, kind, payload, processed_at) =
                row?;
            let event_kind = EventKind::from_str(&kind)
                .ok_or_else(|| StoreError::Database(format!("unknown event_kind {:?} in raw_events", kind)))?;
            let payload: BTreeMap<String, String> = serde_json::from_str(&payload)?;

            events.push(RawEvent {
                tx_hash,
                log_index: log_index as u64,
                stream_id,
                contract_address,
                block_number: block as u64,
                block_timestamp: ts,
                event_kind,
                payload,
                processed_at,
            });
        }
        Ok(events)
    }
}

fn kind_filter(kinds: &[EventKind], args: &mut Vec<Value>) -> String {
    let placeholders: Vec<String> = kinds
        .iter()
        .map(|k| {
            args.push(Value::Text(k.as_str().to_string()));
            format!("?{}", args.len())
        })
        .collect();
    format!("event_kind IN ({})", placeholders.join(", "))
}

#[async_trait]
impl CheckpointStore for SqliteIndexStore {
    async fn load(&self, stream_id: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.load_checkpoint_row(stream_id)?.map(|c| c.last_block))
    }

    async fn advance(
        &self,
        stream_id: &str,
        expected: Option<u64>,
        new_block: u64,
    ) -> Result<(), CheckpointError> {
        check_advance(expected, new_block)?;
        let now = (self.now_fn)();
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<i64> = tx
            .query_row(
                "SELECT last_block FROM indexer_checkpoints WHERE stream_id = ?1",
                [stream_id],
                |row| row.get(0),
            )
            .optional()?;
        check_expected(expected, current.map(|c| c as u64))?;

        tx.execute(
            "INSERT INTO indexer_checkpoints (stream_id, last_block, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(stream_id) DO UPDATE SET
                last_block = excluded.last_block,
                updated_at = excluded.updated_at",
            params![stream_id, new_block as i64, now],
        )?;
        tx.commit()?;

        Ok(())
    }
}

#[async_trait]
impl EventSink for SqliteIndexStore {
    async fn upsert_batch(&self, events: &[RawEvent]) -> Result<usize, StoreError> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR IGNORE INTO raw_events ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                EVENT_COLUMNS
            ))?;

            for event in events {
                let payload = serde_json::to_string(&event.payload)?;
                inserted += stmt.execute(params![
                    event.tx_hash,
                    event.log_index as i64,
                    event.stream_id,
                    event.contract_address,
                    event.block_number as i64,
                    event.block_timestamp,
                    event.event_kind.as_str(),
                    payload,
                    event.processed_at,
                ])?;
            }
        }

        tx.commit()?;
        log::debug!("✅ Stored {} of {} events", inserted, events.len());
        Ok(inserted)
    }
}

#[async_trait]
impl EventSource for SqliteIndexStore {
    async fn events_in_time_range(
        &self,
        kinds: &[EventKind],
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<RawEvent>, StoreError> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = Vec::new();
        let kinds_sql = kind_filter(kinds, &mut args);
        args.push(Value::Integer(from_ts));
        let from_idx = args.len();
        args.push(Value::Integer(to_ts));
        let to_idx = args.len();

        let clause = format!(
            "{} AND block_timestamp >= ?{} AND block_timestamp < ?{}",
            kinds_sql, from_idx, to_idx
        );
        self.query_events(&clause, args)
    }

    async fn events_for_kinds(&self, kinds: &[EventKind]) -> Result<Vec<RawEvent>, StoreError> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = Vec::new();
        let clause = kind_filter(kinds, &mut args);
        self.query_events(&clause, args)
    }
}

#[async_trait]
impl AggregateStore for SqliteIndexStore {
    async fn replace_buckets(
        &self,
        granularity: Granularity,
        metric_key: &str,
        window_start: i64,
        window_end: i64,
        rows: &[Bucket],
    ) -> Result<(), StoreError> {
        let table = granularity.table();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            &format!(
                "DELETE FROM {} WHERE metric_key = ?1 AND bucket_start >= ?2 AND bucket_start < ?3",
                table
            ),
            params![metric_key, window_start, window_end],
        )?;

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (metric_key, bucket_start, value, sample_count)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(metric_key, bucket_start) DO UPDATE SET
                    value = excluded.value,
                    sample_count = excluded.sample_count",
                table
            ))?;
            for row in rows {
                stmt.execute(params![
                    metric_key,
                    row.bucket_start,
                    row.value,
                    row.sample_count as i64
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    async fn load_buckets(
        &self,
        granularity: Granularity,
        metric_key: &str,
        window_start: i64,
        window_end: i64,
    ) -> Result<Vec<Bucket>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT metric_key, bucket_start, value, sample_count FROM {}
             WHERE metric_key = ?1 AND bucket_start >= ?2 AND bucket_start < ?3
             ORDER BY bucket_start ASC",
            granularity.table()
        ))?;

        let rows = stmt.query_map(params![metric_key, window_start, window_end], |row| {
            Ok(Bucket {
                metric_key: row.get(0)?,
                bucket_start: row.get(1)?,
                value: row.get(2)?,
                sample_count: row.get::<_, i64>(3)? as u64,
            })
        })?;

        let mut buckets = Vec::new();
        for row in rows {
            buckets.push(row?);
        }
        Ok(buckets)
    }

    async fn save_projection(&self, projection: &Projection) -> Result<Projection, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO current_projections (entity_key, value, as_of_block, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(entity_key) DO UPDATE SET
                value = excluded.value,
                as_of_block = excluded.as_of_block,
                updated_at = excluded.updated_at
             WHERE excluded.as_of_block >= current_projections.as_of_block",
            params![
                projection.entity_key,
                projection.value,
                projection.as_of_block as i64,
                projection.updated_at
            ],
        )?;

        let stored = tx.query_row(
            "SELECT entity_key, value, as_of_block, updated_at FROM current_projections WHERE entity_key = ?1",
            [&projection.entity_key],
            |row| {
                Ok(Projection {
                    entity_key: row.get(0)?,
                    value: row.get(1)?,
                    as_of_block: row.get::<_, i64>(2)? as u64,
                    updated_at: row.get(3)?,
                })
            },
        )?;

        tx.commit()?;
        Ok(stored)
    }

    async fn load_projection(&self, entity_key: &str) -> Result<Option<Projection>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT entity_key, value, as_of_block, updated_at FROM current_projections WHERE entity_key = ?1",
                [entity_key],
                |row| {
                    Ok(Projection {
                        entity_key: row.get(0)?,
                        value: row.get(1)?,
                        as_of_block: row.get::<_, i64>(2)? as u64,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}
