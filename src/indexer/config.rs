//! Indexer configuration from environment variables
//!
//! `from_env` is what the binaries call; `from_lookup` takes any key lookup
//! so tests do not have to mutate the process environment.

use super::engine::EngineConfig;
use super::streams::{ContractAddresses, StreamSpec, ALL_STREAMS};
use std::env;
use std::str::FromStr;

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite { db_path: String },
    Rest { url: String, api_key: String },
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Sqlite { .. } => "sqlite",
            StoreBackend::Rest { .. } => "rest",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// JSON-RPC endpoint of the RSK node
    pub rpc_url: String,

    /// Per-request timeout for RPC and REST calls
    pub rpc_timeout_ms: u64,

    pub store: StoreBackend,

    pub engine: EngineConfig,

    /// First block indexed by a stream that has no checkpoint
    pub genesis_block: u64,

    /// Delay between scheduled cycles for one stream
    pub poll_interval_ms: u64,

    /// Upper bound on a single cycle, including retries
    pub cycle_timeout_ms: u64,

    /// Consecutive non-advancing cycles before a stall warning
    pub stall_warn_cycles: u32,

    pub aggregate_interval_ms: u64,

    /// How far back each aggregation pass rebuckets
    pub aggregate_lookback_hours: i64,

    pub enabled_streams: Vec<String>,

    pub contracts: ContractAddresses,

    /// Read pool balances on every aggregation pass
    pub track_pool_balances: bool,

    /// RBTC gap between ActivePool and recorded vault collateral that logs a warning
    pub pool_drift_warn: f64,
}

fn parse_or<T: FromStr>(lookup: &dyn Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Invalid {} '{}', using default", key, raw);
                default
            }
        },
    }
}

fn string_or(lookup: &dyn Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn require_http(key: &str, url: &str) -> Result<(), ConfigError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::InvalidValue(format!(
            "{} must start with http:// or https://",
            key
        )));
    }
    Ok(())
}

impl IndexerConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `RSK_RPC_URL` (default: https://public-node.rsk.co)
    /// - `RPC_TIMEOUT_MS` (default: 15000)
    /// - `STORE_BACKEND` (default: sqlite; `rest` needs `SUPABASE_URL` and `SUPABASE_ANON_KEY`)
    /// - `INDEXER_DB_PATH` (default: data/mp_indexer.db)
    /// - `CONFIRMATION_LAG` (default: 12)
    /// - `MAX_BATCH_BLOCKS` (default: 500)
    /// - `LOG_CHUNK_BLOCKS` (default: 100)
    /// - `GENESIS_BLOCK` (default: 6680000)
    /// - `POLL_INTERVAL_MS` (default: 30000)
    /// - `CYCLE_TIMEOUT_MS` (default: 120000)
    /// - `BACKOFF_INITIAL_MS` / `BACKOFF_MAX_MS` / `BACKOFF_MAX_RETRIES` (default: 1000 / 30000 / 3)
    /// - `STALL_WARN_CYCLES` (default: 10)
    /// - `AGGREGATE_INTERVAL_MS` (default: 300000)
    /// - `AGGREGATE_LOOKBACK_HOURS` (default: 48)
    /// - `ENABLED_STREAMS` (default: vault_events,staking_events,bpd_supply)
    /// - `VAULT_MANAGER_ADDRESS`, `MP_STAKING_ADDRESS`, `BPD_TOKEN_ADDRESS`,
    ///   `BORROWER_OPERATIONS_ADDRESS` (default: mainnet deployment)
    /// - `ACTIVE_POOL_ADDRESS`, `DEFAULT_POOL_ADDRESS`, `STABILITY_POOL_ADDRESS`,
    ///   `COLL_SURPLUS_POOL_ADDRESS` (default: mainnet deployment)
    /// - `TRACK_POOL_BALANCES` (default: true)
    /// - `POOL_DRIFT_WARN_BTC` (default: 0.01)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup: &dyn Fn(&str) -> Option<String> = &lookup;

        let rpc_url = string_or(lookup, "RSK_RPC_URL", "https://public-node.rsk.co");
        require_http("RSK_RPC_URL", &rpc_url)?;

        let store = match string_or(lookup, "STORE_BACKEND", "sqlite").to_lowercase().as_str() {
            "sqlite" => StoreBackend::Sqlite {
                db_path: string_or(lookup, "INDEXER_DB_PATH", "data/mp_indexer.db"),
            },
            "rest" => {
                let url = lookup("SUPABASE_URL")
                    .ok_or_else(|| ConfigError::MissingVariable("SUPABASE_URL".to_string()))?;
                require_http("SUPABASE_URL", &url)?;
                let api_key = lookup("SUPABASE_ANON_KEY")
                    .ok_or_else(|| ConfigError::MissingVariable("SUPABASE_ANON_KEY".to_string()))?;
                StoreBackend::Rest { url, api_key }
            }
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "STORE_BACKEND must be sqlite or rest, got {}",
                    other
                )))
            }
        };

        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            confirmation_lag: parse_or(lookup, "CONFIRMATION_LAG", defaults.confirmation_lag),
            max_batch_blocks: parse_or(lookup, "MAX_BATCH_BLOCKS", defaults.max_batch_blocks),
            log_chunk_blocks: parse_or(lookup, "LOG_CHUNK_BLOCKS", defaults.log_chunk_blocks),
            backoff_initial_ms: parse_or(lookup, "BACKOFF_INITIAL_MS", defaults.backoff_initial_ms),
            backoff_max_ms: parse_or(lookup, "BACKOFF_MAX_MS", defaults.backoff_max_ms),
            backoff_max_retries: parse_or(lookup, "BACKOFF_MAX_RETRIES", defaults.backoff_max_retries),
        };

        if engine.max_batch_blocks == 0 {
            return Err(ConfigError::InvalidValue("MAX_BATCH_BLOCKS must be > 0".to_string()));
        }
        if engine.log_chunk_blocks == 0 {
            return Err(ConfigError::InvalidValue("LOG_CHUNK_BLOCKS must be > 0".to_string()));
        }

        let enabled_streams: Vec<String> = string_or(lookup, "ENABLED_STREAMS", &ALL_STREAMS.join(","))
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if let Some(unknown) = enabled_streams.iter().find(|s| !ALL_STREAMS.contains(&s.as_str())) {
            return Err(ConfigError::InvalidValue(format!("unknown stream in ENABLED_STREAMS: {}", unknown)));
        }

        let default_contracts = ContractAddresses::default();
        let address = |key: &str, default: &str| string_or(lookup, key, default).to_lowercase();
        let contracts = ContractAddresses {
            vault_manager: address("VAULT_MANAGER_ADDRESS", &default_contracts.vault_manager),
            mp_staking: address("MP_STAKING_ADDRESS", &default_contracts.mp_staking),
            bpd_token: address("BPD_TOKEN_ADDRESS", &default_contracts.bpd_token),
            borrower_operations: address(
                "BORROWER_OPERATIONS_ADDRESS",
                &default_contracts.borrower_operations,
            ),
            active_pool: address("ACTIVE_POOL_ADDRESS", &default_contracts.active_pool),
            default_pool: address("DEFAULT_POOL_ADDRESS", &default_contracts.default_pool),
            stability_pool: address("STABILITY_POOL_ADDRESS", &default_contracts.stability_pool),
            coll_surplus_pool: address(
                "COLL_SURPLUS_POOL_ADDRESS",
                &default_contracts.coll_surplus_pool,
            ),
        };

        // tokio::time::interval panics on a zero period
        let poll_interval_ms = parse_or(lookup, "POLL_INTERVAL_MS", 30_000);
        let aggregate_interval_ms = parse_or(lookup, "AGGREGATE_INTERVAL_MS", 300_000);
        if poll_interval_ms == 0 || aggregate_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "POLL_INTERVAL_MS and AGGREGATE_INTERVAL_MS must be > 0".to_string(),
            ));
        }

        Ok(Self {
            rpc_url,
            rpc_timeout_ms: parse_or(lookup, "RPC_TIMEOUT_MS", 15_000),
            store,
            engine,
            genesis_block: parse_or(lookup, "GENESIS_BLOCK", 6_680_000),
            poll_interval_ms,
            cycle_timeout_ms: parse_or(lookup, "CYCLE_TIMEOUT_MS", 120_000),
            stall_warn_cycles: parse_or(lookup, "STALL_WARN_CYCLES", 10),
            aggregate_interval_ms,
            aggregate_lookback_hours: parse_or(lookup, "AGGREGATE_LOOKBACK_HOURS", 48),
            enabled_streams,
            contracts,
            track_pool_balances: parse_or(lookup, "TRACK_POOL_BALANCES", true),
            pool_drift_warn: parse_or(lookup, "POOL_DRIFT_WARN_BTC", 0.01),
        })
    }

    /// Stream specs for every enabled stream, in configured order
    pub fn streams(&self) -> Vec<StreamSpec> {
        self.enabled_streams
            .iter()
            .filter_map(|id| StreamSpec::build(id, &self.contracts, self.genesis_block))
            .collect()
    }
}
