//! JSON-RPC 2.0 client over reqwest
//!
//! Methods used: `eth_blockNumber`, `eth_getBlockByNumber`, `eth_getLogs`,
//! `eth_getBalance`.
//! Every failure that might clear up on its own (transport error, timeout,
//! HTTP 429/5xx, JSON-RPC error object, block not yet served) surfaces as
//! `ChainError::UpstreamUnavailable` so the caller can back off.

use super::{parse_hex_u256, parse_hex_u64, BlockInfo, ChainError, ChainReader, LogFilter, RawLog};
use async_trait::async_trait;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
    #[serde(rename = "transactionHash")]
    transaction_hash: String,
    #[serde(rename = "logIndex")]
    log_index: String,
    #[serde(default)]
    removed: bool,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    number: String,
    timestamp: String,
    #[serde(default)]
    transactions: Vec<Value>,
}

pub struct JsonRpcClient {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::UpstreamUnavailable(format!("client build failed: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::UpstreamUnavailable(format!("{}: {}", method, e)))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ChainError::UpstreamUnavailable(format!(
                "{}: rate limited (HTTP 429)",
                method
            )));
        }
        if !status.is_success() {
            return Err(ChainError::UpstreamUnavailable(format!(
                "{}: HTTP {}",
                method, status
            )));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| ChainError::UpstreamUnavailable(format!("{}: bad response body: {}", method, e)))?;

        if let Some(err) = body.error {
            return Err(ChainError::UpstreamUnavailable(format!(
                "{}: RPC error {}: {}",
                method, err.code, err.message
            )));
        }

        Ok(body.result.unwrap_or(Value::Null))
    }

    fn decode<T: for<'de> Deserialize<'de>>(method: &str, value: Value) -> Result<T, ChainError> {
        serde_json::from_value(value)
            .map_err(|e| ChainError::UpstreamUnavailable(format!("{}: unexpected result shape: {}", method, e)))
    }
}

fn to_hex(n: u64) -> String {
    format!("0x{:x}", n)
}

fn filter_topics_json(filter: &LogFilter) -> Value {
    Value::Array(
        filter
            .topics
            .iter()
            .map(|slot| match slot {
                None => Value::Null,
                Some(options) if options.len() == 1 => Value::String(options[0].clone()),
                Some(options) => json!(options),
            })
            .collect(),
    )
}

#[async_trait]
impl ChainReader for JsonRpcClient {
    async fn current_height(&self) -> Result<u64, ChainError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let hex: String = Self::decode("eth_blockNumber", result)?;
        parse_hex_u64(&hex)
    }

    async fn get_logs(
        &self,
        filter: &LogFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainError> {
        if from_block > to_block {
            return Err(ChainError::InvalidRange {
                from: from_block,
                to: to_block,
            });
        }

        let params = json!([{
            "address": filter.address,
            "topics": filter_topics_json(filter),
            "fromBlock": to_hex(from_block),
            "toBlock": to_hex(to_block),
        }]);

        let result = self.call("eth_getLogs", params).await?;
        let logs: Vec<RpcLog> = Self::decode("eth_getLogs", result)?;

        let mut out = Vec::with_capacity(logs.len());
        for log in logs {
            if log.removed {
                log::warn!(
                    "⚠️  Dropping removed log {}:{} (reorg inside confirmation lag?)",
                    log.transaction_hash,
                    log.log_index
                );
                continue;
            }
            out.push(RawLog {
                address: log.address.to_lowercase(),
                topics: log.topics.iter().map(|t| t.to_lowercase()).collect(),
                data: log.data,
                block_number: parse_hex_u64(&log.block_number)?,
                transaction_hash: log.transaction_hash.to_lowercase(),
                log_index: parse_hex_u64(&log.log_index)?,
            });
        }

        Ok(out)
    }

    async fn get_block(&self, number: u64) -> Result<BlockInfo, ChainError> {
        let result = self
            .call("eth_getBlockByNumber", json!([to_hex(number), false]))
            .await?;

        if result.is_null() {
            return Err(ChainError::UpstreamUnavailable(format!(
                "block {} not available",
                number
            )));
        }

        let block: RpcBlock = Self::decode("eth_getBlockByNumber", result)?;
        let timestamp = parse_hex_u64(&block.timestamp)?;

        Ok(BlockInfo {
            number: parse_hex_u64(&block.number)?,
            timestamp: timestamp as i64,
            tx_count: block.transactions.len(),
        })
    }

    async fn get_balance(&self, address: &str, number: u64) -> Result<U256, ChainError> {
        let result = self
            .call("eth_getBalance", json!([address.to_lowercase(), to_hex(number)]))
            .await?;
        let hex: String = Self::decode("eth_getBalance", result)?;
        parse_hex_u256(&hex)
    }
}
