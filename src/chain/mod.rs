//! Chain Reader: block-oriented access to an EVM-compatible JSON-RPC node
//!
//! The reader only fetches what it is asked for. It never splits a range on
//! its own; bounding the size of `get_logs` ranges is the ingestion engine's job.

pub mod rpc_client;

use async_trait::async_trait;
use primitive_types::U256;

pub use rpc_client::JsonRpcClient;

/// A log exactly as returned by `eth_getLogs`, with quantities decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u64,
}

/// Block metadata needed to timestamp events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub number: u64,
    pub timestamp: i64,
    pub tx_count: usize,
}

/// Address plus positional topic filter (`None` matches any topic)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: String,
    pub topics: Vec<Option<Vec<String>>>,
}

impl LogFilter {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_lowercase(),
            topics: Vec::new(),
        }
    }

    /// Match any of the given signatures in topic position 0
    pub fn with_signatures(mut self, signatures: &[&str]) -> Self {
        let sigs = signatures.iter().map(|s| s.to_lowercase()).collect();
        if self.topics.is_empty() {
            self.topics.push(Some(sigs));
        } else {
            self.topics[0] = Some(sigs);
        }
        self
    }

    /// Pin topic position `index` to a single value
    pub fn with_topic(mut self, index: usize, topic: &str) -> Self {
        while self.topics.len() <= index {
            self.topics.push(None);
        }
        self.topics[index] = Some(vec![topic.to_lowercase()]);
        self
    }

    /// Whether a log satisfies this filter (same rules as `eth_getLogs`)
    pub fn matches(&self, log: &RawLog) -> bool {
        if !log.address.eq_ignore_ascii_case(&self.address) {
            return false;
        }
        self.topics.iter().enumerate().all(|(i, wanted)| match wanted {
            None => true,
            Some(options) => log
                .topics
                .get(i)
                .map(|t| options.iter().any(|o| o.eq_ignore_ascii_case(t)))
                .unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Network failure, timeout, rate limit, 5xx or RPC-level error
    UpstreamUnavailable(String),
    InvalidRange { from: u64, to: u64 },
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::UpstreamUnavailable(msg) => write!(f, "Upstream unavailable: {}", msg),
            ChainError::InvalidRange { from, to } => {
                write!(f, "Invalid block range: from {} > to {}", from, to)
            }
        }
    }
}

impl std::error::Error for ChainError {}

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Latest block number known to the node
    async fn current_height(&self) -> Result<u64, ChainError>;

    /// Logs matching `filter` in the inclusive range `[from_block, to_block]`
    async fn get_logs(
        &self,
        filter: &LogFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainError>;

    async fn get_block(&self, number: u64) -> Result<BlockInfo, ChainError>;

    /// Native balance of `address` in wei as of block `number`
    async fn get_balance(&self, address: &str, number: u64) -> Result<U256, ChainError>;
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_hex_u64(value: &str) -> Result<u64, ChainError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::UpstreamUnavailable(format!("bad hex quantity {:?}: {}", value, e)))
}

/// Parse a `0x`-prefixed hex quantity wider than 64 bits
pub fn parse_hex_u256(value: &str) -> Result<U256, ChainError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| ChainError::UpstreamUnavailable(format!("bad hex quantity {:?}: {:?}", value, e)))
}
