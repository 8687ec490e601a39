//! Opens the configured store and hands out its trait objects

use super::aggregator::AggregateStore;
use super::checkpoint::CheckpointStore;
use super::config::StoreBackend;
use super::db::SqliteIndexStore;
use super::error::StoreError;
use super::rest_store::RestIndexStore;
use super::sink::{EventSink, EventSource};
use std::sync::Arc;
use std::time::Duration;

/// One backend seen through every role the indexer needs
#[derive(Clone)]
pub struct StoreHandles {
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub sink: Arc<dyn EventSink>,
    pub events: Arc<dyn EventSource>,
    pub aggregates: Arc<dyn AggregateStore>,
}

impl StoreHandles {
    pub fn from_sqlite(store: Arc<SqliteIndexStore>) -> Self {
        Self {
            checkpoints: store.clone(),
            sink: store.clone(),
            events: store.clone(),
            aggregates: store,
        }
    }

    pub fn from_rest(store: Arc<RestIndexStore>) -> Self {
        Self {
            checkpoints: store.clone(),
            sink: store.clone(),
            events: store.clone(),
            aggregates: store,
        }
    }
}

pub fn open_store(backend: &StoreBackend, timeout: Duration) -> Result<StoreHandles, StoreError> {
    match backend {
        StoreBackend::Sqlite { db_path } => {
            let store = SqliteIndexStore::open(db_path)?;
            Ok(StoreHandles::from_sqlite(Arc::new(store)))
        }
        StoreBackend::Rest { url, api_key } => {
            let store = RestIndexStore::new(url, api_key, timeout)?;
            log::info!("✅ REST index store ready: {}", url);
            Ok(StoreHandles::from_rest(Arc::new(store)))
        }
    }
}
