//! Run one ingestion cycle per stream and print the summaries as JSON
//!
//! Usage:
//!   run_cycle [--stream <id>]... [--aggregate]
//!
//! Without `--stream`, every enabled stream runs once. `--aggregate` also
//! runs one rebucket + projection pass afterwards, including pool balances
//! unless `TRACK_POOL_BALANCES=false`. Exits non-zero if any
//! cycle hit a fatal error.

use dotenv::dotenv;
use mp_indexer::chain::JsonRpcClient;
use mp_indexer::indexer::{
    backend::open_store,
    config::IndexerConfig,
    scheduler::{run_aggregation_pass, AggregationSchedule, DEFAULT_PROJECTIONS},
    Aggregator, IngestionEngine, PoolBalanceTracker,
};
use std::env;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let requested: Vec<String> = args
        .iter()
        .enumerate()
        .filter(|(_, a)| a.as_str() == "--stream")
        .filter_map(|(i, _)| args.get(i + 1).cloned())
        .collect();
    let aggregate = args.iter().any(|a| a == "--aggregate");

    let config = IndexerConfig::from_env()?;
    let streams: Vec<_> = config
        .streams()
        .into_iter()
        .filter(|s| requested.is_empty() || requested.contains(&s.id))
        .collect();

    if streams.is_empty() {
        return Err(format!("no enabled stream matches {:?}", requested).into());
    }

    let timeout = Duration::from_millis(config.rpc_timeout_ms);
    let reader = Arc::new(JsonRpcClient::new(&config.rpc_url, timeout)?);
    let store = open_store(&config.store, timeout)?;
    let engine = IngestionEngine::new(
        reader.clone(),
        store.checkpoints.clone(),
        store.sink.clone(),
        config.engine.clone(),
    );

    let mut summaries = Vec::new();
    let mut fatal = false;
    for stream in &streams {
        match engine.run_cycle(stream).await {
            Ok(summary) => summaries.push(summary),
            Err(failure) => {
                fatal |= failure.error.is_fatal();
                summaries.push(failure.summary);
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&summaries)?);

    if aggregate {
        let aggregator = Aggregator::new(store.events.clone(), store.aggregates.clone());
        let schedule = AggregationSchedule {
            interval_ms: config.aggregate_interval_ms,
            lookback_hours: config.aggregate_lookback_hours,
            projections: DEFAULT_PROJECTIONS.iter().map(|s| s.to_string()).collect(),
        };
        let pools = config.track_pool_balances.then(|| {
            PoolBalanceTracker::new(
                reader,
                store.checkpoints.clone(),
                store.events.clone(),
                store.aggregates.clone(),
                config.contracts.clone(),
                config.pool_drift_warn,
            )
        });
        run_aggregation_pass(
            &aggregator,
            pools.as_ref(),
            &schedule,
            chrono::Utc::now().timestamp(),
        )
        .await;
    }

    if fatal {
        std::process::exit(1);
    }
    Ok(())
}
