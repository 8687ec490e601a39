//! Stored record types shared by the engine, the sinks and the aggregator

use super::events::EventKind;
use super::normalizer::NormalizedEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Last fully ingested block for one stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stream_id: String,
    pub last_block: u64,
    pub updated_at: i64,
}

/// One normalized event as persisted, keyed by `(tx_hash, log_index)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub tx_hash: String,
    pub log_index: u64,
    pub stream_id: String,
    pub contract_address: String,
    pub block_number: u64,
    pub block_timestamp: i64,
    pub event_kind: EventKind,
    pub payload: BTreeMap<String, String>,
    pub processed_at: i64,
}

impl RawEvent {
    pub fn from_normalized(
        stream_id: &str,
        event: &NormalizedEvent,
        block_timestamp: i64,
        processed_at: i64,
    ) -> Self {
        Self {
            tx_hash: event.key.tx_hash.clone(),
            log_index: event.key.log_index,
            stream_id: stream_id.to_string(),
            contract_address: event.contract_address.clone(),
            block_number: event.block_number,
            block_timestamp,
            event_kind: event.event.kind(),
            payload: event.event.payload(),
            processed_at,
        }
    }

    /// On-chain emission order
    pub fn order_key(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.payload.get(name).map(|s| s.as_str())
    }
}

/// Hourly or daily rollup row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub metric_key: String,
    pub bucket_start: i64,
    pub value: f64,
    pub sample_count: u64,
}

/// Latest folded value for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub entity_key: String,
    pub value: f64,
    pub as_of_block: u64,
    pub updated_at: i64,
}
