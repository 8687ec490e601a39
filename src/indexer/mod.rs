//! # Incremental event indexer
//!
//! Tails Money Protocol contracts on RSK, stores every tracked event once,
//! and derives rollups and current-value projections from the stored events.
//!
//! ## Data flow
//!
//! ```text
//! ChainReader ─► normalizer ─► IngestionEngine ─► EventSink (raw_events)
//!                                   │                  │
//!                                   ▼                  ▼
//!                            CheckpointStore      Aggregator ─► buckets / projections
//! ```
//!
//! ## Streams
//!
//! - `vault_events` - VaultManager: VaultUpdated, VaultLiquidated, Redemption
//! - `staking_events` - MPStaking totals, per-staker stakes and claims, BorrowerOperations fees
//! - `bpd_supply` - BPD token mints and burns
//!
//! Each stream has its own checkpoint and runs independently.
//!
//! Pool balances (`balances::PoolBalanceTracker`) are read from chain state
//! at the `vault_events` checkpoint rather than derived from events.
//!
//! ## Storage backends
//!
//! - `db::SqliteIndexStore` - local SQLite file (default)
//! - `rest_store::RestIndexStore` - Supabase / PostgREST

pub mod aggregator;
pub mod backend;
pub mod balances;
pub mod backoff;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod normalizer;
pub mod projection;
pub mod rest_store;
pub mod rollup;
pub mod scheduler;
pub mod sink;
pub mod streams;
pub mod types;

pub use aggregator::{AggregateError, AggregateStore, Aggregator};
pub use balances::{PoolBalanceReport, PoolBalanceTracker};
pub use checkpoint::{CheckpointError, CheckpointStore};
pub use engine::{CycleError, CycleStatus, CycleSummary, EngineConfig, IngestionEngine};
pub use error::{IndexerError, StoreError};
pub use sink::{EventSink, EventSource};
pub use streams::StreamSpec;
pub use types::{Bucket, Checkpoint, Projection, RawEvent};
