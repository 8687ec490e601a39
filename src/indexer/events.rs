//! Domain event types and the signature-keyed schema table
//!
//! Every tracked on-chain event has exactly one `EventSchema` entry. The
//! normalizer looks up `topic0` here and decodes into the matching
//! `DomainEvent` variant; anything not in the table is skipped upstream.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const VAULT_UPDATED_SIG: &str =
    "0x1682adcf84a5197a236a80c9ffe2e7233619140acb7839754c27cdc21799192c";
pub const VAULT_LIQUIDATED_SIG: &str =
    "0x7495fe27166ca7c7fb38d10e09b0d0f029a5704bac8952a9545063644de73c10";
pub const TOTAL_MP_STAKED_UPDATED_SIG: &str =
    "0xb2b3cfae184c4d1b9099b4e0ba91c76319a2a3f31f8908cd2849701b2c910a6b";
/// Per-staker MP stake change, `MPStake(address indexed staker, uint256 newStake)`
pub const MP_STAKE_SIG: &str =
    "0x6b5cf27595af4428271524e0a5abd2b63f6fee1a61e31970490f5a10e257a1cd";
pub const STAKING_GAINS_WITHDRAWN_SIG: &str =
    "0xf744d34ca1cb25acfa4180df5f09a67306107110a9f4b6ed99bb3be259738215";
pub const REDEMPTION_SIG: &str =
    "0x43a3f4082a4dbc33d78e317d2497d3a730bc7fc3574159dcea1056e62e5d9ad8";
pub const BPD_BORROWING_FEE_PAID_SIG: &str =
    "0xe3f81eee9eb7b21bda5672f049187ddcd1833f6de3018f5ff2a716efba828df0";
pub const TRANSFER_SIG: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Topic-encoded zero address (mint source / burn destination)
pub const ZERO_ADDRESS_TOPIC: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000000";

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    VaultUpdated,
    VaultLiquidated,
    StakeUpdated,
    StakerStakeChanged,
    GainsClaimed,
    Mint,
    Burn,
    Redemption,
    BorrowingFee,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::VaultUpdated => "vault_updated",
            EventKind::VaultLiquidated => "vault_liquidated",
            EventKind::StakeUpdated => "stake_updated",
            EventKind::StakerStakeChanged => "staker_stake_changed",
            EventKind::GainsClaimed => "gains_claimed",
            EventKind::Mint => "mint",
            EventKind::Burn => "burn",
            EventKind::Redemption => "redemption",
            EventKind::BorrowingFee => "borrowing_fee",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|k| k.as_str() == s)
    }

    pub fn all() -> &'static [EventKind] {
        &[
            EventKind::VaultUpdated,
            EventKind::VaultLiquidated,
            EventKind::StakeUpdated,
            EventKind::StakerStakeChanged,
            EventKind::GainsClaimed,
            EventKind::Mint,
            EventKind::Burn,
            EventKind::Redemption,
            EventKind::BorrowingFee,
        ]
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which decoder a schema entry dispatches to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaId {
    VaultUpdated,
    VaultLiquidated,
    TotalStakedUpdated,
    MpStake,
    StakingGainsWithdrawn,
    Redemption,
    BorrowingFeePaid,
    Transfer,
}

#[derive(Debug, Clone, Copy)]
pub struct EventSchema {
    pub id: SchemaId,
    pub name: &'static str,
    pub signature: &'static str,
    /// Indexed parameters, not counting topic0
    pub indexed: usize,
    /// 32-byte words expected in `data`
    pub data_words: usize,
}

pub const SCHEMA_TABLE: &[EventSchema] = &[
    EventSchema {
        id: SchemaId::VaultUpdated,
        name: "VaultUpdated",
        signature: VAULT_UPDATED_SIG,
        indexed: 1,
        data_words: 4,
    },
    EventSchema {
        id: SchemaId::VaultLiquidated,
        name: "VaultLiquidated",
        signature: VAULT_LIQUIDATED_SIG,
        indexed: 1,
        data_words: 3,
    },
    EventSchema {
        id: SchemaId::TotalStakedUpdated,
        name: "TotalMPStakedUpdated",
        signature: TOTAL_MP_STAKED_UPDATED_SIG,
        indexed: 0,
        data_words: 1,
    },
    EventSchema {
        id: SchemaId::MpStake,
        name: "MPStake",
        signature: MP_STAKE_SIG,
        indexed: 1,
        data_words: 1,
    },
    EventSchema {
        id: SchemaId::StakingGainsWithdrawn,
        name: "StakingGainsWithdrawn",
        signature: STAKING_GAINS_WITHDRAWN_SIG,
        indexed: 1,
        data_words: 2,
    },
    EventSchema {
        id: SchemaId::Redemption,
        name: "Redemption",
        signature: REDEMPTION_SIG,
        indexed: 0,
        data_words: 4,
    },
    EventSchema {
        id: SchemaId::BorrowingFeePaid,
        name: "BPDBorrowingFeePaid",
        signature: BPD_BORROWING_FEE_PAID_SIG,
        indexed: 1,
        data_words: 1,
    },
    EventSchema {
        id: SchemaId::Transfer,
        name: "Transfer",
        signature: TRANSFER_SIG,
        indexed: 2,
        data_words: 1,
    },
];

impl EventSchema {
    pub fn lookup(topic0: &str) -> Option<&'static EventSchema> {
        SCHEMA_TABLE
            .iter()
            .find(|s| s.signature.eq_ignore_ascii_case(topic0))
    }
}

/// Decoded event payload, one variant per tracked event kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    VaultUpdated {
        borrower: String,
        debt: U256,
        collateral: U256,
        stake: U256,
        operation: u8,
    },
    VaultLiquidated {
        borrower: String,
        debt: U256,
        collateral: U256,
        operation: u8,
    },
    StakeUpdated {
        total_staked: U256,
    },
    StakerStakeChanged {
        staker: String,
        new_stake: U256,
    },
    GainsClaimed {
        staker: String,
        bpd_gain: U256,
        btc_gain: U256,
    },
    Mint {
        to: String,
        value: U256,
    },
    Burn {
        from: String,
        value: U256,
    },
    Redemption {
        attempted_bpd: U256,
        actual_bpd: U256,
        btc_sent: U256,
        btc_fee: U256,
    },
    BorrowingFee {
        borrower: String,
        bpd_fee: U256,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::VaultUpdated { .. } => EventKind::VaultUpdated,
            DomainEvent::VaultLiquidated { .. } => EventKind::VaultLiquidated,
            DomainEvent::StakeUpdated { .. } => EventKind::StakeUpdated,
            DomainEvent::StakerStakeChanged { .. } => EventKind::StakerStakeChanged,
            DomainEvent::GainsClaimed { .. } => EventKind::GainsClaimed,
            DomainEvent::Mint { .. } => EventKind::Mint,
            DomainEvent::Burn { .. } => EventKind::Burn,
            DomainEvent::Redemption { .. } => EventKind::Redemption,
            DomainEvent::BorrowingFee { .. } => EventKind::BorrowingFee,
        }
    }

    /// Flatten to the stored field map. Amounts are base-10 wei strings.
    pub fn payload(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        let mut put = |k: &str, v: String| {
            map.insert(k.to_string(), v);
        };

        match self {
            DomainEvent::VaultUpdated {
                borrower,
                debt,
                collateral,
                stake,
                operation,
            } => {
                put("borrower", borrower.clone());
                put("debt", debt.to_string());
                put("collateral", collateral.to_string());
                put("stake", stake.to_string());
                put("operation", operation.to_string());
            }
            DomainEvent::VaultLiquidated {
                borrower,
                debt,
                collateral,
                operation,
            } => {
                put("borrower", borrower.clone());
                put("debt", debt.to_string());
                put("collateral", collateral.to_string());
                put("operation", operation.to_string());
            }
            DomainEvent::StakeUpdated { total_staked } => {
                put("total_staked", total_staked.to_string());
            }
            DomainEvent::StakerStakeChanged { staker, new_stake } => {
                put("staker", staker.clone());
                put("new_stake", new_stake.to_string());
            }
            DomainEvent::GainsClaimed {
                staker,
                bpd_gain,
                btc_gain,
            } => {
                put("staker", staker.clone());
                put("bpd_gain", bpd_gain.to_string());
                put("btc_gain", btc_gain.to_string());
            }
            DomainEvent::Mint { to, value } => {
                put("to", to.clone());
                put("value", value.to_string());
            }
            DomainEvent::Burn { from, value } => {
                put("from", from.clone());
                put("value", value.to_string());
            }
            DomainEvent::Redemption {
                attempted_bpd,
                actual_bpd,
                btc_sent,
                btc_fee,
            } => {
                put("attempted_bpd", attempted_bpd.to_string());
                put("actual_bpd", actual_bpd.to_string());
                put("btc_sent", btc_sent.to_string());
                put("btc_fee", btc_fee.to_string());
            }
            DomainEvent::BorrowingFee { borrower, bpd_fee } => {
                put("borrower", borrower.clone());
                put("bpd_fee", bpd_fee.to_string());
            }
        }

        map
    }
}
