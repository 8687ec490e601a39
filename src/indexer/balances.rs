//! Pool balance projections read straight from chain state
//!
//! Every refresh reads native balances at the `vault_events` checkpoint,
//! so a `pool_balance:<pool>` row and the event-folded vault projections
//! describe the same block. The ActivePool balance is then reconciled
//! against the collateral recorded by `VaultUpdated` events up to that
//! block. DefaultPool holds redistributed collateral that vault records
//! only pick up on their next update, so it is reported but not compared.

use super::aggregator::{AggregateError, AggregateStore};
use super::checkpoint::CheckpointStore;
use super::projection::{fold_projection, ProjectionKey};
use super::rollup::WEI_PER_TOKEN;
use super::sink::EventSource;
use super::streams::{ContractAddresses, VAULT_EVENTS};
use super::types::Projection;
use crate::chain::ChainReader;
use primitive_types::U256;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    Active,
    Default,
    Stability,
    CollSurplus,
}

impl Pool {
    pub fn all() -> &'static [Pool] {
        &[Pool::Active, Pool::Default, Pool::Stability, Pool::CollSurplus]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Pool::Active => "active_pool",
            Pool::Default => "default_pool",
            Pool::Stability => "stability_pool",
            Pool::CollSurplus => "coll_surplus_pool",
        }
    }

    pub fn entity_key(&self) -> String {
        format!("pool_balance:{}", self.as_str())
    }

    pub fn address<'a>(&self, contracts: &'a ContractAddresses) -> &'a str {
        match self {
            Pool::Active => &contracts.active_pool,
            Pool::Default => &contracts.default_pool,
            Pool::Stability => &contracts.stability_pool,
            Pool::CollSurplus => &contracts.coll_surplus_pool,
        }
    }
}

/// Outcome of one balance refresh
#[derive(Debug, Clone, PartialEq)]
pub struct PoolBalanceReport {
    pub as_of_block: u64,
    /// RBTC per pool, keyed by `Pool::as_str`
    pub balances: BTreeMap<String, f64>,
    /// Collateral folded from vault events up to `as_of_block`
    pub recorded_collateral: f64,
    /// ActivePool balance minus `recorded_collateral`
    pub drift: f64,
}

impl PoolBalanceReport {
    /// ActivePool plus DefaultPool, the collateral held by the system
    pub fn system_collateral(&self) -> f64 {
        [Pool::Active, Pool::Default]
            .iter()
            .filter_map(|p| self.balances.get(p.as_str()))
            .sum()
    }
}

pub fn wei_to_tokens(wei: U256) -> f64 {
    wei.to_string().parse::<f64>().unwrap_or(0.0) / WEI_PER_TOKEN
}

pub struct PoolBalanceTracker {
    reader: Arc<dyn ChainReader>,
    checkpoints: Arc<dyn CheckpointStore>,
    events: Arc<dyn EventSource>,
    store: Arc<dyn AggregateStore>,
    contracts: ContractAddresses,
    drift_warn: f64,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl PoolBalanceTracker {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        checkpoints: Arc<dyn CheckpointStore>,
        events: Arc<dyn EventSource>,
        store: Arc<dyn AggregateStore>,
        contracts: ContractAddresses,
        drift_warn: f64,
    ) -> Self {
        Self {
            reader,
            checkpoints,
            events,
            store,
            contracts,
            drift_warn,
            now_fn: Box::new(|| chrono::Utc::now().timestamp()),
        }
    }

    pub fn with_timestamp_fn(mut self, now_fn: Box<dyn Fn() -> i64 + Send + Sync>) -> Self {
        self.now_fn = now_fn;
        self
    }

    /// Read every pool at the vault checkpoint and store the projections.
    ///
    /// Returns `None` while `vault_events` has no checkpoint yet.
    pub async fn refresh(&self) -> Result<Option<PoolBalanceReport>, AggregateError> {
        let Some(block) = self.checkpoints.load(VAULT_EVENTS).await? else {
            log::debug!("💤 Pool balances skipped: {} has no checkpoint", VAULT_EVENTS);
            return Ok(None);
        };

        let now = (self.now_fn)();
        let mut balances = BTreeMap::new();
        for pool in Pool::all() {
            let wei = self
                .reader
                .get_balance(pool.address(&self.contracts), block)
                .await?;
            let value = wei_to_tokens(wei);

            self.store
                .save_projection(&Projection {
                    entity_key: pool.entity_key(),
                    value,
                    as_of_block: block,
                    updated_at: now,
                })
                .await?;
            balances.insert(pool.as_str().to_string(), value);
        }

        let key = ProjectionKey::TotalCollateral;
        let settled: Vec<_> = self
            .events
            .events_for_kinds(key.kinds())
            .await?
            .into_iter()
            .filter(|e| e.block_number <= block)
            .collect();
        let (recorded_collateral, _) = fold_projection(&key, &settled);

        let active = balances.get(Pool::Active.as_str()).copied().unwrap_or(0.0);
        let report = PoolBalanceReport {
            as_of_block: block,
            balances,
            recorded_collateral,
            drift: active - recorded_collateral,
        };

        if report.drift.abs() > self.drift_warn {
            log::warn!(
                "⚠️  ActivePool holds {:.6} RBTC at block {} but vault events record {:.6} (drift {:+.6})",
                active,
                block,
                recorded_collateral,
                report.drift
            );
        } else {
            log::debug!(
                "   ├─ pool balances @ block {}: system collateral {:.6} RBTC",
                block,
                report.system_collateral()
            );
        }

        Ok(Some(report))
    }
}
