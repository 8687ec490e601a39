//! Background schedulers: one ingestion loop per stream plus the aggregation loop
//!
//! Each stream loop owns its `StreamSpec` and only ever calls
//! `IngestionEngine::run_cycle` for it, so streams progress independently.

use super::aggregator::Aggregator;
use super::balances::PoolBalanceTracker;
use super::engine::{CycleStatus, CycleSummary, IngestionEngine};
use super::error::IndexerError;
use super::streams::StreamSpec;
use std::sync::Arc;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct StreamSchedule {
    pub poll_interval_ms: u64,
    pub cycle_timeout_ms: u64,
    pub stall_warn_cycles: u32,
}

/// Warns when a stream repeatedly fails to move while blocks are pending
#[derive(Debug)]
pub struct StallDetector {
    threshold: u32,
    stalled_cycles: u32,
    last_checkpoint: Option<u64>,
}

impl StallDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            stalled_cycles: 0,
            last_checkpoint: None,
        }
    }

    /// Record one cycle outcome. Returns true when the stall threshold is hit.
    pub fn observe(&mut self, summary: &CycleSummary) -> bool {
        let moved = summary.block_number != self.last_checkpoint;
        let pending = !summary.is_caught_up();
        self.last_checkpoint = summary.block_number;

        if moved || !pending {
            self.stalled_cycles = 0;
            return false;
        }

        self.stalled_cycles += 1;
        self.stalled_cycles % self.threshold == 0
    }

    /// Record a cycle that never produced a summary (timed out)
    pub fn observe_timeout(&mut self) -> bool {
        self.stalled_cycles += 1;
        self.stalled_cycles % self.threshold == 0
    }

    pub fn stalled_cycles(&self) -> u32 {
        self.stalled_cycles
    }
}

/// Stream scheduler task - runs cycles for one stream until a fatal error
///
/// Within a tick, cycles repeat back-to-back while the stream is behind the
/// safe head, so a restart after downtime catches up without waiting
/// `poll_interval_ms` between batches.
///
/// Returns the fatal error that stopped the stream.
pub async fn stream_scheduler_task(
    engine: Arc<IngestionEngine>,
    stream: StreamSpec,
    schedule: StreamSchedule,
) -> IndexerError {
    log::info!(
        "⏰ Starting {} scheduler (interval: {}ms, timeout: {}ms)",
        stream.id,
        schedule.poll_interval_ms,
        schedule.cycle_timeout_ms
    );

    let mut timer = interval(Duration::from_millis(schedule.poll_interval_ms));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stalls = StallDetector::new(schedule.stall_warn_cycles);

    loop {
        timer.tick().await;

        loop {
            let outcome = timeout(
                Duration::from_millis(schedule.cycle_timeout_ms),
                engine.run_cycle(&stream),
            )
            .await;

            let summary = match outcome {
                Err(_) => {
                    log::warn!(
                        "⚠️  {} cycle exceeded {}ms and was cancelled, checkpoint unchanged",
                        stream.id,
                        schedule.cycle_timeout_ms
                    );
                    if stalls.observe_timeout() {
                        log::warn!("🐌 {} stalled for {} cycles", stream.id, stalls.stalled_cycles());
                    }
                    break;
                }
                Ok(Ok(summary)) => summary,
                Ok(Err(failure)) => {
                    if failure.error.is_fatal() {
                        log::error!("❌ {} scheduler stopped: {}", stream.id, failure.error);
                        return failure.error;
                    }
                    failure.summary
                }
            };

            if stalls.observe(&summary) {
                log::warn!(
                    "🐌 {} stalled for {} cycles at checkpoint {:?} (safe head {:?})",
                    stream.id,
                    stalls.stalled_cycles(),
                    summary.block_number,
                    summary.safe_head
                );
            }

            if summary.status != CycleStatus::Advanced || summary.is_caught_up() {
                break;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregationSchedule {
    pub interval_ms: u64,
    pub lookback_hours: i64,
    pub projections: Vec<String>,
}

/// Projections refreshed on every aggregation pass
pub const DEFAULT_PROJECTIONS: [&str; 5] =
    ["bpd_supply", "mp_total_staked", "mp_stakers", "total_collateral", "active_vaults"];

/// Aggregation scheduler task - rebuckets the recent window and refreshes projections
///
/// Runs indefinitely; failures are logged and retried on the next tick.
pub async fn aggregation_scheduler_task(
    aggregator: Arc<Aggregator>,
    pools: Option<Arc<PoolBalanceTracker>>,
    schedule: AggregationSchedule,
) {
    log::info!(
        "⏰ Starting aggregation scheduler (interval: {}ms, lookback: {}h)",
        schedule.interval_ms,
        schedule.lookback_hours
    );

    let mut timer = interval(Duration::from_millis(schedule.interval_ms));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        timer.tick().await;
        run_aggregation_pass(
            &aggregator,
            pools.as_deref(),
            &schedule,
            chrono::Utc::now().timestamp(),
        )
        .await;
    }
}

/// One rebucket + projection pass ending at `now`, plus a pool balance
/// refresh when a tracker is given
pub async fn run_aggregation_pass(
    aggregator: &Aggregator,
    pools: Option<&PoolBalanceTracker>,
    schedule: &AggregationSchedule,
    now: i64,
) {
    let start = now - schedule.lookback_hours.max(1) * 3600;

    match aggregator.rebucket_all(start, now).await {
        Ok(reports) => {
            let rows: usize = reports.iter().map(|r| r.hourly_rows + r.daily_rows).sum();
            log::debug!("📊 Rebucketed {} metrics ({} rows)", reports.len(), rows);
        }
        Err(e) => log::error!("❌ Rebucket pass failed: {}", e),
    }

    for key in &schedule.projections {
        match aggregator.project_current(key).await {
            Ok(p) => log::debug!("   ├─ {} = {} @ block {}", p.entity_key, p.value, p.as_of_block),
            Err(e) => log::error!("❌ Projection {} failed: {}", key, e),
        }
    }

    if let Some(tracker) = pools {
        match tracker.refresh().await {
            Ok(Some(report)) => log::debug!(
                "   ├─ pool balances @ block {} (drift {:+.6})",
                report.as_of_block,
                report.drift
            ),
            Ok(None) => {}
            Err(e) => log::error!("❌ Pool balance refresh failed: {}", e),
        }
    }
}
