//! Ingestion Engine - one checkpointed cycle per stream
//!
//! ## Cycle
//!
//! ```text
//! Idle
//!   ↓  load checkpoint C, read chain head
//! Fetching      eth_getLogs over (C+1, target) in chunks, with backoff
//!   ↓
//! Normalizing   decode logs, count skips, fetch block timestamps
//!   ↓
//! Persisting    EventSink::upsert_batch (all-or-nothing)
//!   ↓
//! Advancing     CheckpointStore::advance(C -> target)
//!   ↓
//! Idle
//! ```
//!
//! `target = min(head - confirmation_lag, C + max_batch_blocks)`. While
//! `head < confirmation_lag` no block is confirmed and nothing is planned.
//! The checkpoint is written last, so a cycle that fails or is dropped at
//! any earlier point leaves it untouched and the next cycle re-reads the
//! same range. Replays are harmless because the sink ignores known keys.
//! The advance is a compare-and-set against C, so a second process that
//! moved the stream in the meantime turns this cycle into `Busy`.

use super::backoff::ExponentialBackoff;
use super::checkpoint::{CheckpointError, CheckpointStore};
use super::error::IndexerError;
use super::normalizer::{normalize, DecodeError};
use super::sink::EventSink;
use super::streams::StreamSpec;
use super::types::RawEvent;
use crate::chain::{ChainError, ChainReader};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Blocks behind head treated as final
    pub confirmation_lag: u64,
    /// Upper bound on blocks processed per cycle
    pub max_batch_blocks: u64,
    /// Upper bound on blocks per eth_getLogs request
    pub log_chunk_blocks: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_max_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confirmation_lag: 12,
            max_batch_blocks: 500,
            log_chunk_blocks: 100,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 30_000,
            backoff_max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Fetching,
    Normalizing,
    Persisting,
    Advancing,
    ErrorBackoff,
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Idle => "idle",
            CycleState::Fetching => "fetching",
            CycleState::Normalizing => "normalizing",
            CycleState::Persisting => "persisting",
            CycleState::Advancing => "advancing",
            CycleState::ErrorBackoff => "error_backoff",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Advanced,
    UpToDate,
    Busy,
    Failed,
}

/// Result of one cycle, reported on success and failure alike
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub stream_id: String,
    /// Checkpoint after the cycle (`None` if the stream never completed one)
    pub block_number: Option<u64>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub chain_head: Option<u64>,
    pub safe_head: Option<u64>,
    pub events_processed: usize,
    pub events_inserted: usize,
    pub events_by_kind: BTreeMap<String, usize>,
    pub skipped: usize,
    pub skipped_by_reason: BTreeMap<String, usize>,
    pub retries: u32,
    pub status: CycleStatus,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl CycleSummary {
    fn new(stream_id: &str) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            block_number: None,
            from_block: None,
            to_block: None,
            chain_head: None,
            safe_head: None,
            events_processed: 0,
            events_inserted: 0,
            events_by_kind: BTreeMap::new(),
            skipped: 0,
            skipped_by_reason: BTreeMap::new(),
            retries: 0,
            status: CycleStatus::UpToDate,
            error: None,
            duration_ms: 0,
        }
    }

    fn record_skip(&mut self, err: &DecodeError) {
        self.skipped += 1;
        *self.skipped_by_reason.entry(err.reason().to_string()).or_insert(0) += 1;
    }

    /// True when the checkpoint has reached the safe head
    pub fn is_caught_up(&self) -> bool {
        match (self.block_number, self.safe_head) {
            (Some(checkpoint), Some(safe)) => checkpoint >= safe,
            (None, Some(_)) => self.status == CycleStatus::UpToDate,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CycleError {
    pub summary: CycleSummary,
    pub error: IndexerError,
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cycle for {} failed: {}", self.summary.stream_id, self.error)
    }
}

impl std::error::Error for CycleError {}

/// Inclusive block range for one cycle and the head it was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePlan {
    pub safe_head: u64,
    pub range: Option<(u64, u64)>,
}

/// Compute the next range to ingest. `None` range means up to date.
///
/// While `head < confirmation_lag` nothing is confirmed yet, so no range
/// is planned even for a stream starting at block 0.
pub fn plan_range(
    checkpoint: Option<u64>,
    genesis_block: u64,
    head: u64,
    confirmation_lag: u64,
    max_batch_blocks: u64,
) -> RangePlan {
    let Some(safe_head) = head.checked_sub(confirmation_lag) else {
        return RangePlan {
            safe_head: 0,
            range: None,
        };
    };
    let next = match checkpoint {
        Some(c) => c.saturating_add(1),
        None => genesis_block,
    };
    // next - 1 + max_batch_blocks == C + max_batch_blocks
    let batch_end = next.saturating_add(max_batch_blocks.max(1) - 1);
    let target = safe_head.min(batch_end);

    RangePlan {
        safe_head,
        range: if target >= next { Some((next, target)) } else { None },
    }
}

/// Split `[from, to]` into consecutive sub-ranges of at most `chunk` blocks
pub fn split_range(from: u64, to: u64, chunk: u64) -> Vec<(u64, u64)> {
    let chunk = chunk.max(1);
    let mut ranges = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(chunk - 1).min(to);
        ranges.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    ranges
}

/// Per-stream single-flight guards
#[derive(Default)]
struct StreamLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl StreamLocks {
    fn try_acquire(&self, stream_id: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            locks.entry(stream_id.to_string()).or_default().clone()
        };
        lock.try_lock_owned().ok()
    }
}

pub struct IngestionEngine {
    reader: Arc<dyn ChainReader>,
    checkpoints: Arc<dyn CheckpointStore>,
    sink: Arc<dyn EventSink>,
    config: EngineConfig,
    locks: StreamLocks,
    states: Mutex<HashMap<String, CycleState>>,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl IngestionEngine {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        checkpoints: Arc<dyn CheckpointStore>,
        sink: Arc<dyn EventSink>,
        config: EngineConfig,
    ) -> Self {
        Self::new_with_timestamp_fn(
            reader,
            checkpoints,
            sink,
            config,
            Box::new(|| chrono::Utc::now().timestamp()),
        )
    }

    /// Same as `new` with an injectable clock for `processed_at`
    pub fn new_with_timestamp_fn(
        reader: Arc<dyn ChainReader>,
        checkpoints: Arc<dyn CheckpointStore>,
        sink: Arc<dyn EventSink>,
        config: EngineConfig,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        Self {
            reader,
            checkpoints,
            sink,
            config,
            locks: StreamLocks::default(),
            states: Mutex::new(HashMap::new()),
            now_fn,
        }
    }

    pub fn state(&self, stream_id: &str) -> CycleState {
        self.states
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(stream_id)
            .copied()
            .unwrap_or(CycleState::Idle)
    }

    fn transition(&self, stream_id: &str, next: CycleState) {
        let mut states = self.states.lock().unwrap_or_else(|p| p.into_inner());
        let prev = states.insert(stream_id.to_string(), next).unwrap_or(CycleState::Idle);
        if prev != next {
            log::debug!("🔁 {}: {} → {}", stream_id, prev.as_str(), next.as_str());
        }
    }

    /// Run one poll → fetch → normalize → persist → advance cycle
    pub async fn run_cycle(&self, stream: &StreamSpec) -> Result<CycleSummary, CycleError> {
        let started = Instant::now();
        let mut summary = CycleSummary::new(&stream.id);

        let Some(_guard) = self.locks.try_acquire(&stream.id) else {
            summary.status = CycleStatus::Busy;
            let error = IndexerError::CycleInProgress(stream.id.clone());
            summary.error = Some(error.to_string());
            return Err(CycleError { summary, error });
        };

        let result = self.execute(stream, &mut summary).await;
        self.transition(&stream.id, CycleState::Idle);
        summary.duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                match summary.status {
                    CycleStatus::Advanced => log::info!(
                        "✅ {} advanced to block {} ({}-{}, {} events, {} new, {} skipped)",
                        stream.id,
                        summary.block_number.unwrap_or_default(),
                        summary.from_block.unwrap_or_default(),
                        summary.to_block.unwrap_or_default(),
                        summary.events_processed,
                        summary.events_inserted,
                        summary.skipped
                    ),
                    _ => log::debug!(
                        "💤 {} up to date (checkpoint {:?}, safe head {:?})",
                        stream.id,
                        summary.block_number,
                        summary.safe_head
                    ),
                }
                Ok(summary)
            }
            Err(error) => {
                summary.status = match error {
                    IndexerError::CycleInProgress(_) => CycleStatus::Busy,
                    _ => CycleStatus::Failed,
                };
                summary.error = Some(error.to_string());
                if error.is_fatal() {
                    log::error!("❌ {} cycle aborted: {}", stream.id, error);
                } else {
                    log::warn!("⚠️  {} cycle failed, checkpoint unchanged: {}", stream.id, error);
                }
                Err(CycleError { summary, error })
            }
        }
    }

    async fn execute(&self, stream: &StreamSpec, summary: &mut CycleSummary) -> Result<(), IndexerError> {
        self.transition(&stream.id, CycleState::Fetching);

        let checkpoint = self.checkpoints.load(&stream.id).await?;
        summary.block_number = checkpoint;

        let head = self
            .with_retry(&stream.id, "eth_blockNumber", summary, move || {
                self.reader.current_height()
            })
            .await?;

        let plan = plan_range(
            checkpoint,
            stream.genesis_block,
            head,
            self.config.confirmation_lag,
            self.config.max_batch_blocks,
        );
        summary.chain_head = Some(head);
        summary.safe_head = Some(plan.safe_head);

        let Some((from, target)) = plan.range else {
            summary.status = CycleStatus::UpToDate;
            return Ok(());
        };
        summary.from_block = Some(from);
        summary.to_block = Some(target);

        let mut logs = Vec::new();
        for (chunk_from, chunk_to) in split_range(from, target, self.config.log_chunk_blocks) {
            for filter in &stream.filters {
                log::debug!(
                    "   ├─ {} eth_getLogs {} [{}, {}]",
                    stream.id,
                    filter.address,
                    chunk_from,
                    chunk_to
                );
                let chunk = self
                    .with_retry(&stream.id, "eth_getLogs", summary, move || {
                        self.reader.get_logs(filter, chunk_from, chunk_to)
                    })
                    .await?;
                logs.extend(chunk);
            }
        }

        let mut seen = HashSet::new();
        logs.retain(|l| seen.insert((l.transaction_hash.clone(), l.log_index)));
        logs.sort_by_key(|l| (l.block_number, l.log_index));

        self.transition(&stream.id, CycleState::Normalizing);
        let mut normalized = Vec::with_capacity(logs.len());
        for log in &logs {
            match normalize(log) {
                Ok(event) => normalized.push(event),
                Err(err) => {
                    summary.record_skip(&err);
                    match err {
                        DecodeError::UntrackedTransfer => log::debug!(
                            "   ├─ {} skipping {}:{}: {}",
                            stream.id,
                            log.transaction_hash,
                            log.log_index,
                            err
                        ),
                        _ => log::warn!(
                            "⚠️  {} skipping log {}:{} at block {}: {}",
                            stream.id,
                            log.transaction_hash,
                            log.log_index,
                            log.block_number,
                            err
                        ),
                    }
                }
            }
        }

        let mut timestamps: HashMap<u64, i64> = HashMap::new();
        for event in &normalized {
            if timestamps.contains_key(&event.block_number) {
                continue;
            }
            let number = event.block_number;
            let block = self
                .with_retry(&stream.id, "eth_getBlockByNumber", summary, move || {
                    self.reader.get_block(number)
                })
                .await?;
            timestamps.insert(number, block.timestamp);
        }

        let processed_at = (self.now_fn)();
        let events: Vec<RawEvent> = normalized
            .iter()
            .map(|e| {
                let ts = timestamps.get(&e.block_number).copied().unwrap_or_default();
                RawEvent::from_normalized(&stream.id, e, ts, processed_at)
            })
            .collect();

        summary.events_processed = events.len();
        for event in &events {
            *summary
                .events_by_kind
                .entry(event.event_kind.as_str().to_string())
                .or_insert(0) += 1;
        }

        self.transition(&stream.id, CycleState::Persisting);
        summary.events_inserted = self.sink.upsert_batch(&events).await?;

        self.transition(&stream.id, CycleState::Advancing);
        match self.checkpoints.advance(&stream.id, checkpoint, target).await {
            Ok(()) => {}
            Err(CheckpointError::Conflict { expected, found }) => {
                log::warn!(
                    "⚠️  {} checkpoint moved from {:?} to {:?} by another writer",
                    stream.id,
                    expected,
                    found
                );
                summary.block_number = found;
                return Err(IndexerError::CycleInProgress(stream.id.clone()));
            }
            Err(CheckpointError::Regression { current, attempted }) => {
                return Err(IndexerError::CheckpointRegression {
                    stream_id: stream.id.clone(),
                    current,
                    attempted,
                });
            }
            Err(CheckpointError::Store(e)) => return Err(e.into()),
        }

        summary.block_number = Some(target);
        summary.status = CycleStatus::Advanced;
        Ok(())
    }

    /// Retry `op` on `UpstreamUnavailable` with bounded exponential backoff
    async fn with_retry<T, F, Fut>(
        &self,
        stream_id: &str,
        what: &str,
        summary: &mut CycleSummary,
        mut op: F,
    ) -> Result<T, IndexerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let mut backoff = ExponentialBackoff::new(
            self.config.backoff_initial_ms,
            self.config.backoff_max_ms,
            self.config.backoff_max_retries,
        );
        let resume = self.state(stream_id);

        loop {
            match op().await {
                Ok(value) => {
                    if backoff.attempts() > 0 {
                        self.transition(stream_id, resume);
                    }
                    return Ok(value);
                }
                Err(ChainError::UpstreamUnavailable(msg)) => {
                    log::warn!("⚠️  {} {} failed: {}", stream_id, what, msg);
                    self.transition(stream_id, CycleState::ErrorBackoff);
                    if backoff.sleep().await.is_err() {
                        return Err(IndexerError::UpstreamUnavailable(format!(
                            "{} gave up after {} retries: {}",
                            what,
                            backoff.attempts(),
                            msg
                        )));
                    }
                    summary.retries += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
