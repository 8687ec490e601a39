//! Integration tests for rollups and projections over a SQLite store

#[cfg(test)]
mod aggregator_integration_tests {
    use mp_indexer::indexer::events::EventKind;
    use mp_indexer::indexer::db::SqliteIndexStore;
    use mp_indexer::indexer::rollup::Granularity;
    use mp_indexer::indexer::{
        AggregateError, AggregateStore, Aggregator, EventSink, Projection, RawEvent,
    };
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    const DAY_START: i64 = 1_700_006_400; // 2023-11-15T00:00:00Z
    const HOUR: i64 = 3600;
    const BORROWER: &str = "0x1111111111111111111111111111111111111111";

    fn wei(tokens: u64) -> String {
        format!("{}000000000000000000", tokens)
    }

    fn make_event(
        kind: EventKind,
        block: u64,
        log_index: u64,
        ts: i64,
        fields: &[(&str, String)],
    ) -> RawEvent {
        let payload: BTreeMap<String, String> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        RawEvent {
            tx_hash: format!("0x{:04x}{:04x}", block, log_index),
            log_index,
            stream_id: "bpd_supply".to_string(),
            contract_address: "0xf023155de70a8d1de2d0c31b70bbedf06fd36f23".to_string(),
            block_number: block,
            block_timestamp: ts,
            event_kind: kind,
            payload,
            processed_at: DAY_START,
        }
    }

    fn mint(block: u64, log_index: u64, ts: i64, tokens: u64) -> RawEvent {
        make_event(EventKind::Mint, block, log_index, ts, &[("to", BORROWER.to_string()), ("value", wei(tokens))])
    }

    fn burn(block: u64, log_index: u64, ts: i64, tokens: u64) -> RawEvent {
        make_event(EventKind::Burn, block, log_index, ts, &[("from", BORROWER.to_string()), ("value", wei(tokens))])
    }

    fn create_test_setup() -> (Arc<SqliteIndexStore>, Aggregator, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = Arc::new(SqliteIndexStore::open(temp_file.path()).unwrap());
        let aggregator = Aggregator::new_with_timestamp_fn(
            store.clone(),
            store.clone(),
            Box::new(|| DAY_START + 2 * 86_400),
        );
        (store, aggregator, temp_file)
    }

    #[tokio::test]
    async fn test_rebucket_is_deterministic() {
        let (store, aggregator, _temp) = create_test_setup();
        store
            .upsert_batch(&[
                mint(100, 0, DAY_START + 10, 50),
                mint(101, 2, DAY_START + 20, 25),
                mint(140, 0, DAY_START + 3 * HOUR + 5, 10),
            ])
            .await
            .unwrap();

        let window = (DAY_START, DAY_START + 6 * HOUR);
        aggregator.rebucket("bpd_minted", window.0, window.1).await.unwrap();
        let first = store
            .load_buckets(Granularity::Hourly, "bpd_minted", DAY_START, DAY_START + 86_400)
            .await
            .unwrap();

        let report = aggregator.rebucket("bpd_minted", window.0, window.1).await.unwrap();
        let second = store
            .load_buckets(Granularity::Hourly, "bpd_minted", DAY_START, DAY_START + 86_400)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(report.hourly_rows, 2);
        assert_eq!(report.daily_rows, 1);
        assert_eq!(first[0].bucket_start, DAY_START);
        assert!((first[0].value - 75.0).abs() < 1e-9);
        assert_eq!(first[0].sample_count, 2);
        assert_eq!(first[1].bucket_start, DAY_START + 3 * HOUR);
    }

    #[tokio::test]
    async fn test_rebucket_picks_up_late_events() {
        let (store, aggregator, _temp) = create_test_setup();
        store.upsert_batch(&[mint(100, 0, DAY_START + 10, 50)]).await.unwrap();
        aggregator.rebucket("bpd_minted", DAY_START, DAY_START + HOUR).await.unwrap();

        store.upsert_batch(&[mint(102, 0, DAY_START + 30, 5)]).await.unwrap();
        aggregator.rebucket("bpd_minted", DAY_START, DAY_START + HOUR).await.unwrap();

        let daily = store
            .load_buckets(Granularity::Daily, "bpd_minted", DAY_START, DAY_START + 86_400)
            .await
            .unwrap();
        assert_eq!(daily.len(), 1);
        assert!((daily[0].value - 55.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_net_supply_change_subtracts_burns() {
        let (store, aggregator, _temp) = create_test_setup();
        store
            .upsert_batch(&[mint(100, 0, DAY_START + 10, 80), burn(100, 1, DAY_START + 10, 30)])
            .await
            .unwrap();

        aggregator
            .rebucket("bpd_net_supply_change", DAY_START, DAY_START + HOUR)
            .await
            .unwrap();
        let rows = store
            .load_buckets(Granularity::Hourly, "bpd_net_supply_change", DAY_START, DAY_START + HOUR)
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert!((rows[0].value - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rebucket_rejects_unknown_metric_and_empty_window() {
        let (_store, aggregator, _temp) = create_test_setup();

        assert!(matches!(
            aggregator.rebucket("token_price", DAY_START, DAY_START + HOUR).await,
            Err(AggregateError::UnknownMetric(_))
        ));
        assert!(matches!(
            aggregator.rebucket("bpd_minted", DAY_START, DAY_START).await,
            Err(AggregateError::InvalidWindow { .. })
        ));
    }

    #[tokio::test]
    async fn test_project_current_folds_in_chain_order() {
        let (store, aggregator, _temp) = create_test_setup();
        // Inserted out of order: (10,1) (10,0) (9,5)
        store
            .upsert_batch(&[
                make_event(EventKind::StakeUpdated, 10, 1, DAY_START, &[("total_staked", wei(5))]),
                make_event(EventKind::StakeUpdated, 10, 0, DAY_START, &[("total_staked", wei(3))]),
                make_event(EventKind::StakeUpdated, 9, 5, DAY_START, &[("total_staked", wei(1))]),
            ])
            .await
            .unwrap();

        let projection = aggregator.project_current("mp_total_staked").await.unwrap();

        assert_eq!(projection.entity_key, "mp_total_staked");
        assert!((projection.value - 5.0).abs() < 1e-9);
        assert_eq!(projection.as_of_block, 10);
        assert_eq!(store.load_projection("mp_total_staked").await.unwrap(), Some(projection));
    }

    #[tokio::test]
    async fn test_project_current_supply() {
        let (store, aggregator, _temp) = create_test_setup();
        store
            .upsert_batch(&[mint(100, 0, DAY_START, 100), burn(105, 3, DAY_START + 60, 30)])
            .await
            .unwrap();

        let projection = aggregator.project_current("bpd_supply").await.unwrap();

        assert!((projection.value - 70.0).abs() < 1e-9);
        assert_eq!(projection.as_of_block, 105);
        assert_eq!(projection.updated_at, DAY_START + 2 * 86_400);
    }

    #[tokio::test]
    async fn test_projection_never_moves_backwards() {
        let (store, aggregator, _temp) = create_test_setup();
        store.upsert_batch(&[mint(100, 0, DAY_START, 100)]).await.unwrap();

        let newer = Projection {
            entity_key: "bpd_supply".to_string(),
            value: 999.0,
            as_of_block: 5_000,
            updated_at: DAY_START,
        };
        store.save_projection(&newer).await.unwrap();

        let projection = aggregator.project_current("bpd_supply").await.unwrap();

        assert_eq!(projection, newer);
        assert_eq!(store.load_projection("bpd_supply").await.unwrap(), Some(newer));
    }

    #[tokio::test]
    async fn test_project_per_staker_stake() {
        let (store, aggregator, _temp) = create_test_setup();
        let other = "0x2222222222222222222222222222222222222222";
        let stake = |block: u64, who: &str, tokens: u64| {
            make_event(
                EventKind::StakerStakeChanged,
                block,
                0,
                DAY_START,
                &[("staker", who.to_string()), ("new_stake", wei(tokens))],
            )
        };
        store
            .upsert_batch(&[stake(20, BORROWER, 100), stake(21, other, 40), stake(25, other, 0)])
            .await
            .unwrap();

        let mine = aggregator
            .project_current(&format!("mp_stake:{}", BORROWER))
            .await
            .unwrap();
        assert!((mine.value - 100.0).abs() < 1e-9);
        assert_eq!(mine.as_of_block, 20);

        let stakers = aggregator.project_current("mp_stakers").await.unwrap();
        assert_eq!(stakers.value, 1.0);
        assert_eq!(stakers.as_of_block, 25);
    }

    #[tokio::test]
    async fn test_project_unknown_entity() {
        let (_store, aggregator, _temp) = create_test_setup();
        assert!(matches!(
            aggregator.project_current("token_price").await,
            Err(AggregateError::UnknownEntity(_))
        ));
    }
}
