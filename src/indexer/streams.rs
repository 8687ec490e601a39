//! Stream definitions: which contracts and signatures each stream tails

use super::events::{
    BPD_BORROWING_FEE_PAID_SIG, MP_STAKE_SIG, REDEMPTION_SIG, STAKING_GAINS_WITHDRAWN_SIG,
    TOTAL_MP_STAKED_UPDATED_SIG, TRANSFER_SIG, VAULT_LIQUIDATED_SIG, VAULT_UPDATED_SIG,
    ZERO_ADDRESS_TOPIC,
};
use crate::chain::LogFilter;

pub const VAULT_EVENTS: &str = "vault_events";
pub const STAKING_EVENTS: &str = "staking_events";
pub const BPD_SUPPLY: &str = "bpd_supply";

pub const ALL_STREAMS: [&str; 3] = [VAULT_EVENTS, STAKING_EVENTS, BPD_SUPPLY];

/// Deployed Money Protocol contracts on RSK mainnet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractAddresses {
    pub vault_manager: String,
    pub mp_staking: String,
    pub bpd_token: String,
    pub borrower_operations: String,
    pub active_pool: String,
    pub default_pool: String,
    pub stability_pool: String,
    pub coll_surplus_pool: String,
}

impl Default for ContractAddresses {
    fn default() -> Self {
        Self {
            vault_manager: "0x0eccca821f078f394f2bb1f3d615ad73729a9892".to_string(),
            mp_staking: "0x6651e5d0c04cbefca1ce9eddd479ba8f7b4a6976".to_string(),
            bpd_token: "0xf023155de70a8d1de2d0c31b70bbedf06fd36f23".to_string(),
            borrower_operations: "0xa8437a34a61b64764ea261e9cf85403c0bb57e25".to_string(),
            active_pool: "0x061c6a8ebb521fe74d3e07c9b835a236ac051e8f".to_string(),
            default_pool: "0x9bca57f7d3712f46cd2d650a78f68e7928e866e2".to_string(),
            stability_pool: "0x11ad81e3e29dba233af88dcb4b169670fa2b8c65".to_string(),
            coll_surplus_pool: "0x753d525ac3cd099d4a4efc2685b0cc665513b5d5".to_string(),
        }
    }
}

/// Everything a cycle needs to know about one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub id: String,
    pub filters: Vec<LogFilter>,
    /// First block to index when no checkpoint exists
    pub genesis_block: u64,
}

impl StreamSpec {
    pub fn build(id: &str, contracts: &ContractAddresses, genesis_block: u64) -> Option<Self> {
        let filters = match id {
            VAULT_EVENTS => vec![LogFilter::new(&contracts.vault_manager).with_signatures(&[
                VAULT_UPDATED_SIG,
                VAULT_LIQUIDATED_SIG,
                REDEMPTION_SIG,
            ])],
            STAKING_EVENTS => vec![
                LogFilter::new(&contracts.mp_staking).with_signatures(&[
                    TOTAL_MP_STAKED_UPDATED_SIG,
                    MP_STAKE_SIG,
                    STAKING_GAINS_WITHDRAWN_SIG,
                ]),
                LogFilter::new(&contracts.borrower_operations)
                    .with_signatures(&[BPD_BORROWING_FEE_PAID_SIG]),
            ],
            // Mints (from = 0) and burns (to = 0) only
            BPD_SUPPLY => vec![
                LogFilter::new(&contracts.bpd_token)
                    .with_signatures(&[TRANSFER_SIG])
                    .with_topic(1, ZERO_ADDRESS_TOPIC),
                LogFilter::new(&contracts.bpd_token)
                    .with_signatures(&[TRANSFER_SIG])
                    .with_topic(2, ZERO_ADDRESS_TOPIC),
            ],
            _ => return None,
        };

        Some(Self {
            id: id.to_string(),
            filters,
            genesis_block,
        })
    }
}
