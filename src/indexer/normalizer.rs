//! Event Normalizer: `RawLog -> Result<NormalizedEvent, DecodeError>`
//!
//! Pure and deterministic. A decode error only ever means "skip this log";
//! the engine counts it and moves on.

use super::events::{DomainEvent, EventSchema, SchemaId, ZERO_ADDRESS};
use crate::chain::RawLog;
use primitive_types::U256;

/// Natural identity of an on-chain log
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub tx_hash: String,
    pub log_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub key: EventKey,
    pub block_number: u64,
    pub contract_address: String,
    pub event: DomainEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    NoTopics,
    UnknownSignature(String),
    MissingTopic { index: usize },
    MalformedData(String),
    /// ERC-20 transfer between two non-zero addresses
    UntrackedTransfer,
}

impl DecodeError {
    /// Short label used for skip counters
    pub fn reason(&self) -> &'static str {
        match self {
            DecodeError::NoTopics => "no_topics",
            DecodeError::UnknownSignature(_) => "unknown_signature",
            DecodeError::MissingTopic { .. } => "missing_topic",
            DecodeError::MalformedData(_) => "malformed_data",
            DecodeError::UntrackedTransfer => "untracked_transfer",
        }
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::NoTopics => write!(f, "Log has no topics"),
            DecodeError::UnknownSignature(sig) => write!(f, "Unknown event signature: {}", sig),
            DecodeError::MissingTopic { index } => write!(f, "Missing indexed topic {}", index),
            DecodeError::MalformedData(msg) => write!(f, "Malformed log data: {}", msg),
            DecodeError::UntrackedTransfer => write!(f, "Transfer is neither a mint nor a burn"),
        }
    }
}

impl std::error::Error for DecodeError {}

pub fn normalize(log: &RawLog) -> Result<NormalizedEvent, DecodeError> {
    let topic0 = log.topics.first().ok_or(DecodeError::NoTopics)?;
    let schema = EventSchema::lookup(topic0)
        .ok_or_else(|| DecodeError::UnknownSignature(topic0.to_lowercase()))?;

    if log.topics.len() < schema.indexed + 1 {
        return Err(DecodeError::MissingTopic {
            index: log.topics.len(),
        });
    }

    let words = decode_words(&log.data)?;
    if words.len() < schema.data_words {
        return Err(DecodeError::MalformedData(format!(
            "{} expects {} data words, got {}",
            schema.name,
            schema.data_words,
            words.len()
        )));
    }

    let event = match schema.id {
        SchemaId::VaultUpdated => DomainEvent::VaultUpdated {
            borrower: topic_address(&log.topics[1])?,
            debt: words[0],
            collateral: words[1],
            stake: words[2],
            operation: small_uint(words[3])?,
        },
        SchemaId::VaultLiquidated => DomainEvent::VaultLiquidated {
            borrower: topic_address(&log.topics[1])?,
            debt: words[0],
            collateral: words[1],
            operation: small_uint(words[2])?,
        },
        SchemaId::TotalStakedUpdated => DomainEvent::StakeUpdated {
            total_staked: words[0],
        },
        SchemaId::MpStake => DomainEvent::StakerStakeChanged {
            staker: topic_address(&log.topics[1])?,
            new_stake: words[0],
        },
        SchemaId::StakingGainsWithdrawn => DomainEvent::GainsClaimed {
            staker: topic_address(&log.topics[1])?,
            bpd_gain: words[0],
            btc_gain: words[1],
        },
        SchemaId::Redemption => DomainEvent::Redemption {
            attempted_bpd: words[0],
            actual_bpd: words[1],
            btc_sent: words[2],
            btc_fee: words[3],
        },
        SchemaId::BorrowingFeePaid => DomainEvent::BorrowingFee {
            borrower: topic_address(&log.topics[1])?,
            bpd_fee: words[0],
        },
        SchemaId::Transfer => {
            let from = topic_address(&log.topics[1])?;
            let to = topic_address(&log.topics[2])?;
            if from == ZERO_ADDRESS {
                DomainEvent::Mint { to, value: words[0] }
            } else if to == ZERO_ADDRESS {
                DomainEvent::Burn { from, value: words[0] }
            } else {
                return Err(DecodeError::UntrackedTransfer);
            }
        }
    };

    Ok(NormalizedEvent {
        key: EventKey {
            tx_hash: log.transaction_hash.to_lowercase(),
            log_index: log.log_index,
        },
        block_number: log.block_number,
        contract_address: log.address.to_lowercase(),
        event,
    })
}

/// Split ABI-encoded `data` into 32-byte big-endian words
fn decode_words(data: &str) -> Result<Vec<U256>, DecodeError> {
    let digits = data.strip_prefix("0x").unwrap_or(data);
    let bytes = hex::decode(digits).map_err(|e| DecodeError::MalformedData(e.to_string()))?;

    if bytes.len() % 32 != 0 {
        return Err(DecodeError::MalformedData(format!(
            "data length {} is not a multiple of 32",
            bytes.len()
        )));
    }

    Ok(bytes.chunks(32).map(U256::from_big_endian).collect())
}

/// Last 20 bytes of a 32-byte topic, as a lowercase address
fn topic_address(topic: &str) -> Result<String, DecodeError> {
    let digits = topic.strip_prefix("0x").unwrap_or(topic);
    if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DecodeError::MalformedData(format!("bad address topic {}", topic)));
    }
    Ok(format!("0x{}", digits[24..].to_lowercase()))
}

fn small_uint(word: U256) -> Result<u8, DecodeError> {
    if word > U256::from(u8::MAX) {
        return Err(DecodeError::MalformedData(format!("operation {} out of range", word)));
    }
    Ok(word.low_u32() as u8)
}
