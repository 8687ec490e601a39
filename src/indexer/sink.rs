//! Event Sink (write side) and event source (read side) over stored RawEvents

use super::error::StoreError;
use super::events::EventKind;
use super::types::RawEvent;
use async_trait::async_trait;

#[async_trait]
pub trait EventSink: Send + Sync {
    /// Insert the batch in one all-or-nothing write.
    ///
    /// Rows whose `(tx_hash, log_index)` already exist are left untouched and
    /// are not counted. Returns the number of newly inserted rows.
    async fn upsert_batch(&self, events: &[RawEvent]) -> Result<usize, StoreError>;
}

/// Read access used by the aggregator. Results are always ordered by
/// `(block_number, log_index)` ascending.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Events of the given kinds with `from_ts <= block_timestamp < to_ts`
    async fn events_in_time_range(
        &self,
        kinds: &[EventKind],
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<RawEvent>, StoreError>;

    async fn events_for_kinds(&self, kinds: &[EventKind]) -> Result<Vec<RawEvent>, StoreError>;
}
