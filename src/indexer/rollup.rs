//! Bucket granularities, metric definitions and the bucket fold

use super::events::EventKind;
use super::types::{Bucket, RawEvent};
use std::collections::BTreeMap;

/// 18-decimal fixed point used by BPD, MP and RBTC amounts
pub const WEI_PER_TOKEN: f64 = 1e18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Hourly,
    Daily,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Granularity::Hourly => "hourly_buckets",
            Granularity::Daily => "daily_buckets",
        }
    }

    pub fn duration_secs(&self) -> i64 {
        match self {
            Granularity::Hourly => 60 * 60,
            Granularity::Daily => 24 * 60 * 60,
        }
    }

    /// Start of the bucket containing `ts`
    pub fn floor(&self, ts: i64) -> i64 {
        ts - ts.rem_euclid(self.duration_secs())
    }

    /// Smallest bucket boundary `>= ts`
    pub fn ceil(&self, ts: i64) -> i64 {
        let floor = self.floor(ts);
        if floor == ts {
            ts
        } else {
            floor + self.duration_secs()
        }
    }

    pub fn all() -> [Granularity; 2] {
        [Granularity::Hourly, Granularity::Daily]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Count,
    /// Last sample in emission order
    Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    BpdMinted,
    BpdBurned,
    BpdNetSupplyChange,
    MpTotalStaked,
    StakingBtcClaimed,
    StakingBpdClaimed,
    RedemptionBpdRedeemed,
    RedemptionBtcFee,
    BorrowingFeeBpd,
    VaultOperations,
    VaultLiquidations,
}

impl Metric {
    pub fn key(&self) -> &'static str {
        match self {
            Metric::BpdMinted => "bpd_minted",
            Metric::BpdBurned => "bpd_burned",
            Metric::BpdNetSupplyChange => "bpd_net_supply_change",
            Metric::MpTotalStaked => "mp_total_staked",
            Metric::StakingBtcClaimed => "staking_btc_claimed",
            Metric::StakingBpdClaimed => "staking_bpd_claimed",
            Metric::RedemptionBpdRedeemed => "redemption_bpd_redeemed",
            Metric::RedemptionBtcFee => "redemption_btc_fee",
            Metric::BorrowingFeeBpd => "borrowing_fee_bpd",
            Metric::VaultOperations => "vault_operations",
            Metric::VaultLiquidations => "vault_liquidations",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::all().into_iter().find(|m| m.key() == key)
    }

    pub fn all() -> [Metric; 11] {
        [
            Metric::BpdMinted,
            Metric::BpdBurned,
            Metric::BpdNetSupplyChange,
            Metric::MpTotalStaked,
            Metric::StakingBtcClaimed,
            Metric::StakingBpdClaimed,
            Metric::RedemptionBpdRedeemed,
            Metric::RedemptionBtcFee,
            Metric::BorrowingFeeBpd,
            Metric::VaultOperations,
            Metric::VaultLiquidations,
        ]
    }

    pub fn kinds(&self) -> &'static [EventKind] {
        match self {
            Metric::BpdMinted => &[EventKind::Mint],
            Metric::BpdBurned => &[EventKind::Burn],
            Metric::BpdNetSupplyChange => &[EventKind::Mint, EventKind::Burn],
            Metric::MpTotalStaked => &[EventKind::StakeUpdated],
            Metric::StakingBtcClaimed | Metric::StakingBpdClaimed => &[EventKind::GainsClaimed],
            Metric::RedemptionBpdRedeemed | Metric::RedemptionBtcFee => &[EventKind::Redemption],
            Metric::BorrowingFeeBpd => &[EventKind::BorrowingFee],
            Metric::VaultOperations => &[EventKind::VaultUpdated],
            Metric::VaultLiquidations => &[EventKind::VaultLiquidated],
        }
    }

    pub fn aggregation(&self) -> Aggregation {
        match self {
            Metric::MpTotalStaked => Aggregation::Last,
            Metric::VaultOperations | Metric::VaultLiquidations => Aggregation::Count,
            _ => Aggregation::Sum,
        }
    }

    /// Value one event contributes, `None` if the event does not apply
    pub fn sample(&self, event: &RawEvent) -> Option<f64> {
        if !self.kinds().contains(&event.event_kind) {
            return None;
        }
        match self {
            Metric::BpdMinted | Metric::BpdBurned => token_amount(event, "value"),
            Metric::BpdNetSupplyChange => {
                let value = token_amount(event, "value")?;
                match event.event_kind {
                    EventKind::Burn => Some(-value),
                    _ => Some(value),
                }
            }
            Metric::MpTotalStaked => token_amount(event, "total_staked"),
            Metric::StakingBtcClaimed => token_amount(event, "btc_gain"),
            Metric::StakingBpdClaimed => token_amount(event, "bpd_gain"),
            Metric::RedemptionBpdRedeemed => token_amount(event, "actual_bpd"),
            Metric::RedemptionBtcFee => token_amount(event, "btc_fee"),
            Metric::BorrowingFeeBpd => token_amount(event, "bpd_fee"),
            Metric::VaultOperations | Metric::VaultLiquidations => Some(1.0),
        }
    }
}

/// Decimal wei string in `field` converted to token units
pub fn token_amount(event: &RawEvent, field: &str) -> Option<f64> {
    event
        .field(field)?
        .parse::<f64>()
        .ok()
        .map(|wei| wei / WEI_PER_TOKEN)
}

/// Fold events into bucket rows for one metric and granularity
///
/// Events are folded in `(block_number, log_index)` order regardless of
/// input order, so the same event set always yields the same rows.
pub fn build_buckets(metric: Metric, granularity: Granularity, events: &[RawEvent]) -> Vec<Bucket> {
    let mut ordered: Vec<&RawEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.order_key());

    let mut acc: BTreeMap<i64, (f64, u64)> = BTreeMap::new();
    for event in ordered {
        let Some(sample) = metric.sample(event) else {
            continue;
        };
        let slot = acc
            .entry(granularity.floor(event.block_timestamp))
            .or_insert((0.0, 0));

        match metric.aggregation() {
            Aggregation::Sum | Aggregation::Count => slot.0 += sample,
            Aggregation::Last => slot.0 = sample,
        }
        slot.1 += 1;
    }

    acc.into_iter()
        .map(|(bucket_start, (value, sample_count))| Bucket {
            metric_key: metric.key().to_string(),
            bucket_start,
            value,
            sample_count,
        })
        .collect()
}
