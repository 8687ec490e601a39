//! Current-value projections folded from stored events

use super::events::EventKind;
use super::rollup::token_amount;
use super::types::RawEvent;
use std::collections::BTreeMap;

const VAULT_KINDS: &[EventKind] = &[EventKind::VaultUpdated, EventKind::VaultLiquidated];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionKey {
    BpdSupply,
    MpTotalStaked,
    TotalCollateral,
    ActiveVaults,
    VaultCollateral(String),
    VaultDebt(String),
    /// Stakers whose latest stake is non-zero
    MpStakers,
    MpStake(String),
}

impl ProjectionKey {
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "bpd_supply" => Some(ProjectionKey::BpdSupply),
            "mp_total_staked" => Some(ProjectionKey::MpTotalStaked),
            "total_collateral" => Some(ProjectionKey::TotalCollateral),
            "active_vaults" => Some(ProjectionKey::ActiveVaults),
            "mp_stakers" => Some(ProjectionKey::MpStakers),
            _ => match key.split_once(':') {
                Some(("vault_collateral", addr)) if !addr.is_empty() => {
                    Some(ProjectionKey::VaultCollateral(addr.to_lowercase()))
                }
                Some(("vault_debt", addr)) if !addr.is_empty() => {
                    Some(ProjectionKey::VaultDebt(addr.to_lowercase()))
                }
                Some(("mp_stake", addr)) if !addr.is_empty() => {
                    Some(ProjectionKey::MpStake(addr.to_lowercase()))
                }
                _ => None,
            },
        }
    }

    pub fn as_key(&self) -> String {
        match self {
            ProjectionKey::BpdSupply => "bpd_supply".to_string(),
            ProjectionKey::MpTotalStaked => "mp_total_staked".to_string(),
            ProjectionKey::TotalCollateral => "total_collateral".to_string(),
            ProjectionKey::ActiveVaults => "active_vaults".to_string(),
            ProjectionKey::VaultCollateral(addr) => format!("vault_collateral:{}", addr),
            ProjectionKey::VaultDebt(addr) => format!("vault_debt:{}", addr),
            ProjectionKey::MpStakers => "mp_stakers".to_string(),
            ProjectionKey::MpStake(addr) => format!("mp_stake:{}", addr),
        }
    }

    pub fn kinds(&self) -> &'static [EventKind] {
        match self {
            ProjectionKey::BpdSupply => &[EventKind::Mint, EventKind::Burn],
            ProjectionKey::MpTotalStaked => &[EventKind::StakeUpdated],
            ProjectionKey::MpStakers | ProjectionKey::MpStake(_) => &[EventKind::StakerStakeChanged],
            _ => VAULT_KINDS,
        }
    }

    /// `(payload field, address)` when the key is scoped to one account
    fn subject(&self) -> Option<(&'static str, &str)> {
        match self {
            ProjectionKey::VaultCollateral(addr) | ProjectionKey::VaultDebt(addr) => {
                Some(("borrower", addr))
            }
            ProjectionKey::MpStake(addr) => Some(("staker", addr)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct VaultState {
    collateral: f64,
    debt: f64,
}

/// Fold events for `key` in `(block_number, log_index)` order.
///
/// Returns `(value, as_of_block)` where `as_of_block` is the highest block
/// among the folded events, or 0 when nothing applied.
pub fn fold_projection(key: &ProjectionKey, events: &[RawEvent]) -> (f64, u64) {
    let mut ordered: Vec<&RawEvent> = events
        .iter()
        .filter(|e| key.kinds().contains(&e.event_kind))
        .filter(|e| match key.subject() {
            Some((field, addr)) => e
                .field(field)
                .map(|b| b.eq_ignore_ascii_case(addr))
                .unwrap_or(false),
            None => true,
        })
        .collect();
    ordered.sort_by_key(|e| e.order_key());

    let as_of_block = ordered.last().map(|e| e.block_number).unwrap_or(0);

    let value = match key {
        ProjectionKey::BpdSupply => ordered.iter().fold(0.0, |supply, e| {
            let amount = token_amount(e, "value").unwrap_or(0.0);
            match e.event_kind {
                EventKind::Burn => supply - amount,
                _ => supply + amount,
            }
        }),
        ProjectionKey::MpTotalStaked => ordered
            .iter()
            .filter_map(|e| token_amount(e, "total_staked"))
            .last()
            .unwrap_or(0.0),
        ProjectionKey::MpStake(_) => ordered
            .iter()
            .filter_map(|e| token_amount(e, "new_stake"))
            .last()
            .unwrap_or(0.0),
        ProjectionKey::MpStakers => {
            let mut stakes: BTreeMap<String, f64> = BTreeMap::new();
            for event in &ordered {
                if let Some(staker) = event.field("staker") {
                    let stake = token_amount(event, "new_stake").unwrap_or(0.0);
                    stakes.insert(staker.to_lowercase(), stake);
                }
            }
            stakes.values().filter(|s| **s > 0.0).count() as f64
        }
        _ => {
            let vaults = fold_vaults(&ordered);
            match key {
                ProjectionKey::TotalCollateral => vaults.values().map(|v| v.collateral).sum(),
                ProjectionKey::ActiveVaults => {
                    vaults.values().filter(|v| v.collateral > 0.0).count() as f64
                }
                ProjectionKey::VaultCollateral(addr) => {
                    vaults.get(addr).map(|v| v.collateral).unwrap_or(0.0)
                }
                ProjectionKey::VaultDebt(addr) => vaults.get(addr).map(|v| v.debt).unwrap_or(0.0),
                _ => 0.0,
            }
        }
    };

    (value, as_of_block)
}

fn fold_vaults(ordered: &[&RawEvent]) -> BTreeMap<String, VaultState> {
    let mut vaults: BTreeMap<String, VaultState> = BTreeMap::new();
    for event in ordered {
        let Some(borrower) = event.field("borrower") else {
            continue;
        };
        let state = match event.event_kind {
            EventKind::VaultUpdated => VaultState {
                collateral: token_amount(event, "collateral").unwrap_or(0.0),
                debt: token_amount(event, "debt").unwrap_or(0.0),
            },
            EventKind::VaultLiquidated => VaultState::default(),
            _ => continue,
        };
        vaults.insert(borrower.to_lowercase(), state);
    }
    vaults
}
