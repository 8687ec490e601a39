//! Integration tests for the ingestion engine
//!
//! A scripted in-memory chain stands in for the RSK node and a temp-file
//! SQLite store is the durable side, so every test goes through the same
//! fetch → normalize → persist → advance path as the runtime.

#[cfg(test)]
mod ingestion_integration_tests {
    use async_trait::async_trait;
    use mp_indexer::chain::{BlockInfo, ChainError, ChainReader, LogFilter, RawLog};
    use primitive_types::U256;
    use mp_indexer::indexer::db::SqliteIndexStore;
    use mp_indexer::indexer::events::{EventKind, TRANSFER_SIG, VAULT_UPDATED_SIG, ZERO_ADDRESS_TOPIC};
    use mp_indexer::indexer::streams::{ContractAddresses, BPD_SUPPLY, VAULT_EVENTS};
    use mp_indexer::indexer::{
        CheckpointError, CheckpointStore, CycleStatus, EngineConfig, EventSink, EventSource, IndexerError,
        IngestionEngine, RawEvent, StoreError, StreamSpec,
    };
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const WEI: u128 = 1_000_000_000_000_000_000;
    const BORROWER: &str = "0x1111111111111111111111111111111111111111";

    /// Scripted chain: fixed logs, adjustable head, injectable getLogs failures
    struct MockChain {
        head: AtomicU64,
        logs: Mutex<Vec<RawLog>>,
        failures_left: AtomicU32,
        head_delay_ms: u64,
        requested: Mutex<Vec<(u64, u64)>>,
    }

    impl MockChain {
        fn new(head: u64, logs: Vec<RawLog>) -> Self {
            Self {
                head: AtomicU64::new(head),
                logs: Mutex::new(logs),
                failures_left: AtomicU32::new(0),
                head_delay_ms: 0,
                requested: Mutex::new(Vec::new()),
            }
        }

        fn failing(self, failures: u32) -> Self {
            self.failures_left.store(failures, Ordering::SeqCst);
            self
        }

        fn slow(mut self, delay_ms: u64) -> Self {
            self.head_delay_ms = delay_ms;
            self
        }

        fn requested(&self) -> Vec<(u64, u64)> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChainReader for MockChain {
        async fn current_height(&self) -> Result<u64, ChainError> {
            if self.head_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.head_delay_ms)).await;
            }
            Ok(self.head.load(Ordering::SeqCst))
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
            self.requested.lock().unwrap().push((from_block, to_block));

            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(ChainError::UpstreamUnavailable("HTTP 503".to_string()));
            }

            Ok(self
                .logs
                .lock()
                .unwrap()
                .iter()
                .filter(|l| filter.matches(l))
                .filter(|l| l.block_number >= from_block && l.block_number <= to_block)
                .cloned()
                .collect())
        }

        async fn get_block(&self, number: u64) -> Result<BlockInfo, ChainError> {
            Ok(BlockInfo {
                number,
                timestamp: 1_700_000_000 + number as i64 * 30,
                tx_count: 1,
            })
        }

        async fn get_balance(&self, _address: &str, _number: u64) -> Result<U256, ChainError> {
            Ok(U256::zero())
        }
    }

    /// Sink that always fails, as if the database were unreachable
    struct FailingSink;

    #[async_trait]
    impl EventSink for FailingSink {
        async fn upsert_batch(&self, _events: &[RawEvent]) -> Result<usize, StoreError> {
            Err(StoreError::Database("database is locked".to_string()))
        }
    }

    /// Checkpoint store whose first `advance` fails after the batch was written
    struct CrashOnceCheckpoints {
        inner: Arc<SqliteIndexStore>,
        crashed: AtomicU32,
    }

    #[async_trait]
    impl CheckpointStore for CrashOnceCheckpoints {
        async fn load(&self, stream_id: &str) -> Result<Option<u64>, StoreError> {
            self.inner.load(stream_id).await
        }

        async fn advance(
            &self,
            stream_id: &str,
            expected: Option<u64>,
            new_block: u64,
        ) -> Result<(), CheckpointError> {
            if self.crashed.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(CheckpointError::Store(StoreError::Database(
                    "connection reset".to_string(),
                )));
            }
            self.inner.advance(stream_id, expected, new_block).await
        }
    }

    /// Checkpoint store that reports an old value, as a second writer would see it
    struct StaleCheckpoints {
        inner: Arc<SqliteIndexStore>,
        stale: u64,
    }

    #[async_trait]
    impl CheckpointStore for StaleCheckpoints {
        async fn load(&self, _stream_id: &str) -> Result<Option<u64>, StoreError> {
            Ok(Some(self.stale))
        }

        async fn advance(
            &self,
            stream_id: &str,
            expected: Option<u64>,
            new_block: u64,
        ) -> Result<(), CheckpointError> {
            self.inner.advance(stream_id, expected, new_block).await
        }
    }

    fn word(v: u128) -> String {
        format!("{:064x}", v)
    }

    fn address_topic(addr: &str) -> String {
        format!("0x{:0>64}", addr.trim_start_matches("0x"))
    }

    fn vault_updated(block: u64, log_index: u64, tx: &str, collateral_tokens: u128) -> RawLog {
        RawLog {
            address: ContractAddresses::default().vault_manager,
            topics: vec![VAULT_UPDATED_SIG.to_string(), address_topic(BORROWER)],
            data: format!(
                "0x{}{}{}{}",
                word(1_000 * WEI),
                word(collateral_tokens * WEI),
                word(collateral_tokens * WEI),
                word(0)
            ),
            block_number: block,
            transaction_hash: tx.to_string(),
            log_index,
        }
    }

    fn mint(block: u64, log_index: u64, tx: &str, tokens: u128) -> RawLog {
        RawLog {
            address: ContractAddresses::default().bpd_token,
            topics: vec![
                TRANSFER_SIG.to_string(),
                ZERO_ADDRESS_TOPIC.to_string(),
                address_topic(BORROWER),
            ],
            data: format!("0x{}", word(tokens * WEI)),
            block_number: block,
            transaction_hash: tx.to_string(),
            log_index,
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            confirmation_lag: 5,
            max_batch_blocks: 20,
            log_chunk_blocks: 100,
            backoff_initial_ms: 1,
            backoff_max_ms: 5,
            backoff_max_retries: 3,
        }
    }

    fn create_test_store() -> (Arc<SqliteIndexStore>, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = SqliteIndexStore::open(temp_file.path())
            .unwrap()
            .with_timestamp_fn(Box::new(|| 1_700_000_000));
        (Arc::new(store), temp_file)
    }

    fn vault_stream(genesis: u64) -> StreamSpec {
        StreamSpec::build(VAULT_EVENTS, &ContractAddresses::default(), genesis).unwrap()
    }

    fn engine(
        chain: Arc<MockChain>,
        store: Arc<SqliteIndexStore>,
        config: EngineConfig,
    ) -> IngestionEngine {
        IngestionEngine::new_with_timestamp_fn(
            chain,
            store.clone(),
            store,
            config,
            Box::new(|| 1_700_000_500),
        )
    }

    #[tokio::test]
    async fn test_cycle_reads_up_to_safe_head_and_advances() {
        let (store, _temp) = create_test_store();
        store.advance(VAULT_EVENTS, None, 90).await.unwrap();

        let chain = Arc::new(MockChain::new(
            100,
            vec![
                vault_updated(92, 0, "0xaa", 10),
                vault_updated(97, 0, "0xbb", 20), // above safe head 95
            ],
        ));
        let engine = engine(chain.clone(), store.clone(), test_config());

        let summary = engine.run_cycle(&vault_stream(0)).await.unwrap();

        assert_eq!(chain.requested(), vec![(91, 95)]);
        assert_eq!(summary.status, CycleStatus::Advanced);
        assert_eq!(summary.from_block, Some(91));
        assert_eq!(summary.to_block, Some(95));
        assert_eq!(summary.safe_head, Some(95));
        assert_eq!(summary.chain_head, Some(100));
        assert_eq!(summary.events_processed, 1);
        assert_eq!(summary.events_inserted, 1);
        assert_eq!(summary.events_by_kind.get("vault_updated"), Some(&1));
        assert_eq!(store.load(VAULT_EVENTS).await.unwrap(), Some(95));
        assert_eq!(store.count_events().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_batch_limit_caps_target() {
        let (store, _temp) = create_test_store();
        store.advance(VAULT_EVENTS, None, 100).await.unwrap();

        let chain = Arc::new(MockChain::new(1_000, vec![]));
        let engine = engine(chain.clone(), store.clone(), test_config());

        let summary = engine.run_cycle(&vault_stream(0)).await.unwrap();

        assert_eq!(chain.requested(), vec![(101, 120)]);
        assert_eq!(summary.block_number, Some(120));
        assert!(!summary.is_caught_up());
    }

    #[tokio::test]
    async fn test_up_to_date_makes_no_log_requests() {
        let (store, _temp) = create_test_store();
        store.advance(VAULT_EVENTS, None, 95).await.unwrap();

        let chain = Arc::new(MockChain::new(100, vec![]));
        let engine = engine(chain.clone(), store.clone(), test_config());

        let summary = engine.run_cycle(&vault_stream(0)).await.unwrap();

        assert_eq!(summary.status, CycleStatus::UpToDate);
        assert!(chain.requested().is_empty());
        assert_eq!(store.load(VAULT_EVENTS).await.unwrap(), Some(95));
    }

    #[tokio::test]
    async fn test_first_cycle_starts_at_genesis() {
        let (store, _temp) = create_test_store();
        let chain = Arc::new(MockChain::new(100, vec![vault_updated(80, 2, "0xaa", 5)]));
        let mut config = test_config();
        config.max_batch_blocks = 10;
        let engine = engine(chain.clone(), store.clone(), config);

        let summary = engine.run_cycle(&vault_stream(80)).await.unwrap();

        assert_eq!(chain.requested(), vec![(80, 89)]);
        assert_eq!(summary.events_inserted, 1);
        assert_eq!(store.load(VAULT_EVENTS).await.unwrap(), Some(89));
    }

    #[tokio::test]
    async fn test_unknown_signature_is_skipped_and_batch_commits() {
        let (store, _temp) = create_test_store();
        store.advance(VAULT_EVENTS, None, 90).await.unwrap();

        let mut unknown = vault_updated(93, 1, "0xcc", 1);
        unknown.topics[0] = format!("0x{}", "ab".repeat(32));

        // The unknown topic must still reach the normalizer, so widen the filter
        let mut stream = vault_stream(0);
        stream.filters = vec![LogFilter::new(&ContractAddresses::default().vault_manager)];

        let chain = Arc::new(MockChain::new(
            100,
            vec![vault_updated(92, 0, "0xaa", 10), unknown, vault_updated(94, 0, "0xdd", 12)],
        ));
        let engine = engine(chain, store.clone(), test_config());

        let summary = engine.run_cycle(&stream).await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.skipped_by_reason.get("unknown_signature"), Some(&1));
        assert_eq!(summary.events_inserted, 2);
        assert_eq!(store.load(VAULT_EVENTS).await.unwrap(), Some(95));
    }

    #[tokio::test]
    async fn test_supply_stream_collects_mints_and_burns() {
        let (store, _temp) = create_test_store();
        let contracts = ContractAddresses::default();
        let stream = StreamSpec::build(BPD_SUPPLY, &contracts, 90).unwrap();

        let mut burn = mint(92, 4, "0xbb", 20);
        burn.topics.swap(1, 2);
        let mut plain = mint(93, 1, "0xcc", 7);
        plain.topics[1] = address_topic("0x2222222222222222222222222222222222222222");

        let chain = Arc::new(MockChain::new(100, vec![mint(91, 0, "0xaa", 500), burn, plain]));
        let engine = engine(chain.clone(), store.clone(), test_config());

        let summary = engine.run_cycle(&stream).await.unwrap();

        // Plain transfers match neither zero-address filter
        assert_eq!(summary.events_processed, 2);
        assert_eq!(summary.events_by_kind.get("mint"), Some(&1));
        assert_eq!(summary.events_by_kind.get("burn"), Some(&1));
        assert_eq!(summary.skipped, 0);
        assert_eq!(chain.requested(), vec![(90, 95), (90, 95)]);
    }

    #[tokio::test]
    async fn test_untracked_transfer_is_counted_as_skip() {
        let (store, _temp) = create_test_store();
        let contracts = ContractAddresses::default();
        let mut stream = StreamSpec::build(BPD_SUPPLY, &contracts, 90).unwrap();
        stream.filters = vec![LogFilter::new(&contracts.bpd_token).with_signatures(&[TRANSFER_SIG])];

        let mut plain = mint(93, 1, "0xcc", 7);
        plain.topics[1] = address_topic("0x2222222222222222222222222222222222222222");

        let chain = Arc::new(MockChain::new(100, vec![mint(91, 0, "0xaa", 500), plain]));
        let engine = engine(chain, store.clone(), test_config());

        let summary = engine.run_cycle(&stream).await.unwrap();

        assert_eq!(summary.events_processed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.skipped_by_reason.get("untracked_transfer"), Some(&1));
        assert_eq!(store.load(BPD_SUPPLY).await.unwrap(), Some(95));
    }

    #[tokio::test]
    async fn test_duplicate_logs_across_filters_are_deduplicated() {
        let (store, _temp) = create_test_store();
        let contracts = ContractAddresses::default();
        let mut stream = StreamSpec::build(BPD_SUPPLY, &contracts, 90).unwrap();
        // Same filter twice returns every log twice
        stream.filters = vec![stream.filters[0].clone(), stream.filters[0].clone()];

        let chain = Arc::new(MockChain::new(100, vec![mint(91, 0, "0xaa", 500)]));
        let engine = engine(chain, store.clone(), test_config());

        let summary = engine.run_cycle(&stream).await.unwrap();

        assert_eq!(summary.events_processed, 1);
        assert_eq!(store.count_events().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_long_range_is_fetched_in_chunks() {
        let (store, _temp) = create_test_store();
        store.advance(VAULT_EVENTS, None, 90).await.unwrap();

        let chain = Arc::new(MockChain::new(
            100,
            vec![vault_updated(91, 0, "0xaa", 1), vault_updated(95, 0, "0xbb", 2)],
        ));
        let mut config = test_config();
        config.log_chunk_blocks = 2;
        let engine = engine(chain.clone(), store.clone(), config);

        let summary = engine.run_cycle(&vault_stream(0)).await.unwrap();

        assert_eq!(chain.requested(), vec![(91, 92), (93, 94), (95, 95)]);
        assert_eq!(summary.events_inserted, 2);
        assert_eq!(store.load(VAULT_EVENTS).await.unwrap(), Some(95));
    }

    #[tokio::test]
    async fn test_replayed_range_inserts_nothing_new() {
        let (store, _temp) = create_test_store();
        store.advance(VAULT_EVENTS, None, 90).await.unwrap();

        let chain = Arc::new(MockChain::new(100, vec![vault_updated(92, 0, "0xaa", 10)]));
        let crashing = Arc::new(CrashOnceCheckpoints {
            inner: store.clone(),
            crashed: AtomicU32::new(0),
        });
        let engine = IngestionEngine::new(chain, crashing, store.clone(), test_config());
        let stream = vault_stream(0);

        // Batch lands, then the checkpoint write fails
        let failure = engine.run_cycle(&stream).await.unwrap_err();
        assert!(matches!(failure.error, IndexerError::PersistenceFailure(_)));
        assert_eq!(failure.summary.status, CycleStatus::Failed);
        assert_eq!(failure.summary.events_inserted, 1);
        assert_eq!(store.load(VAULT_EVENTS).await.unwrap(), Some(90));
        let before = store.events_for_kinds(EventKind::all()).await.unwrap();

        // Rerun covers the same range and converges on the same rows
        let summary = engine.run_cycle(&stream).await.unwrap();
        assert_eq!(summary.from_block, Some(91));
        assert_eq!(summary.events_processed, 1);
        assert_eq!(summary.events_inserted, 0);
        assert_eq!(store.load(VAULT_EVENTS).await.unwrap(), Some(95));
        assert_eq!(store.events_for_kinds(EventKind::all()).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_persistence_failure_leaves_checkpoint() {
        let (store, _temp) = create_test_store();
        store.advance(VAULT_EVENTS, None, 90).await.unwrap();

        let chain = Arc::new(MockChain::new(100, vec![vault_updated(92, 0, "0xaa", 10)]));
        let engine = IngestionEngine::new(chain, store.clone(), Arc::new(FailingSink), test_config());

        let failure = engine.run_cycle(&vault_stream(0)).await.unwrap_err();

        assert!(matches!(failure.error, IndexerError::PersistenceFailure(_)));
        assert!(!failure.error.is_fatal());
        assert_eq!(failure.summary.error.as_deref().map(|e| e.contains("locked")), Some(true));
        assert_eq!(store.load(VAULT_EVENTS).await.unwrap(), Some(90));
    }

    #[tokio::test]
    async fn test_stale_checkpoint_read_conflicts_instead_of_regressing() {
        let (store, _temp) = create_test_store();
        store.advance(VAULT_EVENTS, None, 200).await.unwrap();

        let chain = Arc::new(MockChain::new(100, vec![]));
        let stale = Arc::new(StaleCheckpoints {
            inner: store.clone(),
            stale: 90,
        });
        let engine = IngestionEngine::new(chain, stale, store.clone(), test_config());

        let failure = engine.run_cycle(&vault_stream(0)).await.unwrap_err();

        assert_eq!(failure.error, IndexerError::CycleInProgress(VAULT_EVENTS.to_string()));
        assert!(!failure.error.is_fatal());
        assert_eq!(failure.summary.status, CycleStatus::Busy);
        assert_eq!(failure.summary.block_number, Some(200));
        assert_eq!(store.load(VAULT_EVENTS).await.unwrap(), Some(200));
    }

    #[tokio::test]
    async fn test_overlapping_processes_on_one_store_do_not_stop_the_stream() {
        let (store_a, temp) = create_test_store();
        store_a.advance(VAULT_EVENTS, None, 90).await.unwrap();
        // Second process: its own connection to the same file
        let store_b = Arc::new(SqliteIndexStore::open(temp.path()).unwrap());

        let slow_chain = Arc::new(MockChain::new(100, vec![vault_updated(92, 0, "0xaa", 10)]).slow(300));
        let fast_chain = Arc::new(MockChain::new(101, vec![vault_updated(92, 0, "0xaa", 10)]));
        let engine_a = Arc::new(engine(slow_chain, store_a.clone(), test_config()));
        let engine_b = engine(fast_chain, store_b.clone(), test_config());
        let stream = vault_stream(0);

        let first = {
            let engine_a = engine_a.clone();
            let stream = stream.clone();
            tokio::spawn(async move { engine_a.run_cycle(&stream).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = engine_b.run_cycle(&stream).await.unwrap();
        assert_eq!(second.status, CycleStatus::Advanced);
        assert_eq!(second.block_number, Some(96));

        let failure = first.await.unwrap().unwrap_err();
        assert_eq!(failure.error, IndexerError::CycleInProgress(VAULT_EVENTS.to_string()));
        assert!(!failure.error.is_fatal());
        assert_eq!(failure.summary.status, CycleStatus::Busy);
        assert_eq!(store_a.load(VAULT_EVENTS).await.unwrap(), Some(96));
        assert_eq!(store_a.count_events().unwrap(), 1);

        // The stream keeps going from where the other process left it
        let next = engine_a.run_cycle(&stream).await.unwrap();
        assert_eq!(next.status, CycleStatus::UpToDate);
        assert_eq!(next.block_number, Some(96));
    }

    #[tokio::test]
    async fn test_head_inside_confirmation_lag_plans_nothing() {
        let (store, _temp) = create_test_store();
        let contracts = ContractAddresses::default();
        let stream = StreamSpec::build(BPD_SUPPLY, &contracts, 0).unwrap();

        // Head 3 with lag 5: block 0 is not confirmed yet
        let chain = Arc::new(MockChain::new(3, vec![mint(0, 0, "0xaa", 500)]));
        let engine = engine(chain.clone(), store.clone(), test_config());

        let summary = engine.run_cycle(&stream).await.unwrap();

        assert_eq!(summary.status, CycleStatus::UpToDate);
        assert_eq!(summary.safe_head, Some(0));
        assert!(chain.requested().is_empty());
        assert_eq!(store.load(BPD_SUPPLY).await.unwrap(), None);
        assert_eq!(store.count_events().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upstream_outage_recovers_with_backoff() {
        let (store, _temp) = create_test_store();
        store.advance(VAULT_EVENTS, None, 90).await.unwrap();

        let chain = Arc::new(MockChain::new(100, vec![vault_updated(92, 0, "0xaa", 10)]).failing(2));
        let engine = engine(chain.clone(), store.clone(), test_config());

        let summary = engine.run_cycle(&vault_stream(0)).await.unwrap();

        assert_eq!(summary.retries, 2);
        assert_eq!(chain.requested().len(), 3);
        assert_eq!(store.load(VAULT_EVENTS).await.unwrap(), Some(95));
    }

    #[tokio::test]
    async fn test_upstream_outage_exhausts_retries() {
        let (store, _temp) = create_test_store();
        store.advance(VAULT_EVENTS, None, 90).await.unwrap();

        let chain = Arc::new(MockChain::new(100, vec![]).failing(100));
        let engine = engine(chain.clone(), store.clone(), test_config());

        let failure = engine.run_cycle(&vault_stream(0)).await.unwrap_err();

        assert!(matches!(failure.error, IndexerError::UpstreamUnavailable(_)));
        assert!(failure.error.is_retryable());
        assert_eq!(failure.summary.retries, 3);
        // First attempt plus three retries
        assert_eq!(chain.requested().len(), 4);
        assert_eq!(store.load(VAULT_EVENTS).await.unwrap(), Some(90));
    }

    #[tokio::test]
    async fn test_concurrent_cycle_for_same_stream_is_rejected() {
        let (store, _temp) = create_test_store();
        let chain = Arc::new(MockChain::new(100, vec![]).slow(300));
        let engine = Arc::new(engine(chain, store.clone(), test_config()));
        let stream = vault_stream(50);

        let first = {
            let engine = engine.clone();
            let stream = stream.clone();
            tokio::spawn(async move { engine.run_cycle(&stream).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let busy = engine.run_cycle(&stream).await.unwrap_err();
        assert_eq!(busy.error, IndexerError::CycleInProgress(VAULT_EVENTS.to_string()));
        assert_eq!(busy.summary.status, CycleStatus::Busy);

        // Other streams are not blocked by it
        let other = StreamSpec::build(BPD_SUPPLY, &ContractAddresses::default(), 50).unwrap();
        let first_other = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_cycle(&other).await })
        };

        let summary = first.await.unwrap().unwrap();
        assert_eq!(summary.status, CycleStatus::Advanced);
        assert!(first_other.await.unwrap().is_ok());
        assert_eq!(store.load(VAULT_EVENTS).await.unwrap(), Some(69));
    }

    #[tokio::test]
    async fn test_summary_serializes_for_callers() {
        let (store, _temp) = create_test_store();
        store.advance(VAULT_EVENTS, None, 90).await.unwrap();
        let chain = Arc::new(MockChain::new(100, vec![vault_updated(92, 0, "0xaa", 10)]));
        let engine = engine(chain, store, test_config());

        let summary = engine.run_cycle(&vault_stream(0)).await.unwrap();
        let json = serde_json::to_value(&summary).unwrap();

        assert_eq!(json["streamId"], "vault_events");
        assert_eq!(json["blockNumber"], 95);
        assert_eq!(json["eventsProcessed"], 1);
        assert_eq!(json["status"], "advanced");
    }
}
