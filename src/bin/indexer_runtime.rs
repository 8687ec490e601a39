//! Indexer Runtime - long-running ingestion and aggregation
//!
//! This binary:
//! - Opens the configured store (SQLite file or Supabase REST)
//! - Spawns one ingestion scheduler per enabled stream
//! - Spawns the aggregation scheduler (rollups, projections, pool balances)
//! - Runs until CTRL+C or until every stream has stopped on a fatal error
//!
//! Usage:
//!   cargo run --release --bin indexer_runtime
//!
//! Configuration is read from the environment (see `IndexerConfig::from_env`).

use dotenv::dotenv;
use log::{error, info, warn};
use mp_indexer::chain::JsonRpcClient;
use mp_indexer::indexer::{
    backend::open_store,
    config::IndexerConfig,
    scheduler::{
        aggregation_scheduler_task, stream_scheduler_task, AggregationSchedule, StreamSchedule,
        DEFAULT_PROJECTIONS,
    },
    Aggregator, IngestionEngine, PoolBalanceTracker,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    info!("🚀 MP Indexer Runtime");

    let config = IndexerConfig::from_env()?;
    let streams = config.streams();

    info!("   ├─ RPC: {}", config.rpc_url);
    info!("   ├─ Store: {}", config.store.as_str());
    info!(
        "   ├─ Confirmation lag: {} blocks, batch: {} blocks, chunk: {} blocks",
        config.engine.confirmation_lag, config.engine.max_batch_blocks, config.engine.log_chunk_blocks
    );
    info!("   ├─ Genesis block: {}", config.genesis_block);
    info!("   └─ Streams: {}", config.enabled_streams.join(", "));

    let timeout = Duration::from_millis(config.rpc_timeout_ms);
    let reader = Arc::new(JsonRpcClient::new(&config.rpc_url, timeout)?);
    let store = open_store(&config.store, timeout)?;

    let engine = Arc::new(IngestionEngine::new(
        reader.clone(),
        store.checkpoints.clone(),
        store.sink.clone(),
        config.engine.clone(),
    ));
    let aggregator = Arc::new(Aggregator::new(store.events.clone(), store.aggregates.clone()));
    let pools = config.track_pool_balances.then(|| {
        Arc::new(PoolBalanceTracker::new(
            reader,
            store.checkpoints.clone(),
            store.events.clone(),
            store.aggregates.clone(),
            config.contracts.clone(),
            config.pool_drift_warn,
        ))
    });

    let schedule = StreamSchedule {
        poll_interval_ms: config.poll_interval_ms,
        cycle_timeout_ms: config.cycle_timeout_ms,
        stall_warn_cycles: config.stall_warn_cycles,
    };

    info!("🚀 Spawning stream schedulers...");
    let mut streams_running = JoinSet::new();
    for stream in streams {
        let engine = engine.clone();
        let schedule = schedule.clone();
        let id = stream.id.clone();
        streams_running.spawn(async move { (id, stream_scheduler_task(engine, stream, schedule).await) });
    }

    let aggregation = AggregationSchedule {
        interval_ms: config.aggregate_interval_ms,
        lookback_hours: config.aggregate_lookback_hours,
        projections: DEFAULT_PROJECTIONS.iter().map(|s| s.to_string()).collect(),
    };
    let aggregation_handle = tokio::spawn(aggregation_scheduler_task(aggregator, pools, aggregation));
    info!("   └─ ✅ Aggregation scheduler spawned");

    info!("🔄 Press CTRL+C to shutdown gracefully");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => warn!("⚠️  Received CTRL+C, shutting down..."),
                    Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
                }
                break;
            }
            joined = streams_running.join_next() => {
                match joined {
                    Some(Ok((id, fatal))) => error!("❌ Stream {} stopped: {}", id, fatal),
                    Some(Err(e)) => error!("❌ Stream task panicked: {}", e),
                    None => {
                        error!("❌ All streams stopped");
                        break;
                    }
                }
            }
        }
    }

    // In-flight cycles are dropped here; checkpoints only move at cycle end
    streams_running.shutdown().await;
    aggregation_handle.abort();

    info!("✅ Indexer runtime stopped");
    Ok(())
}
