//! Behavior-driven tests for the Acquisition Pipeline.
//!
//! Scripted in-memory providers stand in for network sources so fallback,
//! rate limiting, deadlines and imports can be observed end to end.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use support::{chain, daily_bars, day, open_warehouse, pipeline, symbol, Script, ScriptedSource};
use tempfile::tempdir;
use tickvault_core::{
    AcquisitionPipeline, Bar, DataSource, LocalPartitionProvider, ProviderErrorKind,
    ProviderStateRegistry, QueryEngine, Resolution,
};
use tickvault_warehouse::Warehouse;

/// Stored partitions first, then `network`.
fn local_first(warehouse: &Warehouse, network: &Arc<ScriptedSource>) -> AcquisitionPipeline {
    let local: Arc<dyn DataSource> =
        Arc::new(LocalPartitionProvider::new(QueryEngine::new(warehouse.clone())));
    AcquisitionPipeline::new(
        warehouse.clone(),
        vec![local, Arc::clone(network) as Arc<dyn DataSource>],
        Arc::new(ProviderStateRegistry::default()),
    )
}

fn seed(warehouse: &Warehouse, bars: &[Bar]) {
    let rows = bars.iter().map(Bar::to_record).collect::<Vec<_>>();
    warehouse
        .write_bars("SPY", Resolution::OneDay.dataset(), &rows, "seed")
        .expect("seed");
}

// =============================================================================
// Fallback
// =============================================================================

#[tokio::test]
async fn when_first_provider_fails_second_provider_serves_and_is_imported() {
    // Given: provider A fails, provider B has five SPY daily bars
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path());
    let a = Arc::new(ScriptedSource::new("A", 1, Script::Fail(ProviderErrorKind::Unavailable)));
    let b = Arc::new(
        ScriptedSource::new("B", 2, Script::Rows).with_bars(daily_bars("SPY", "2024-01-01", 5, 470.0)),
    );
    let pipeline = pipeline(&warehouse, &[a.clone(), b.clone()]);

    // When: bars for 2024-01-01..05 are acquired
    let result = pipeline
        .acquire_bars(&symbol("SPY"), Resolution::OneDay, day("2024-01-01"), day("2024-01-05"), None)
        .await
        .expect("acquisition runs");

    // Then: B's bars are reported and stored
    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.bars_acquired, 5);
    assert_eq!(result.successful_providers, vec![String::from("B")]);
    assert_eq!(result.failed_providers, vec![String::from("A")]);
    assert_eq!(result.failures[0].kind, ProviderErrorKind::Unavailable);
    assert_eq!(result.partitions_written.len(), 1);

    let stored = QueryEngine::new(warehouse)
        .query_bars(
            &symbol("SPY"),
            Resolution::OneDay,
            day("2024-01-01"),
            day("2024-01-05"),
            Duration::from_secs(5),
        )
        .await
        .expect("query");
    assert_eq!(stored.len(), 5);
    assert_eq!(stored[4].close, 474.0);
}

#[tokio::test]
async fn when_every_provider_fails_nothing_is_written() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path());
    let a = Arc::new(ScriptedSource::new("A", 1, Script::Fail(ProviderErrorKind::Unavailable)));
    let b = Arc::new(ScriptedSource::new("B", 2, Script::Fail(ProviderErrorKind::Auth)));
    let pipeline = pipeline(&warehouse, &[a, b]);

    let result = pipeline
        .acquire_bars(&symbol("SPY"), Resolution::OneDay, day("2024-01-01"), day("2024-01-05"), None)
        .await
        .expect("acquisition runs");

    assert!(!result.success);
    assert_eq!(result.bars_acquired, 0);
    assert!(result.successful_providers.is_empty());
    assert_eq!(result.failed_providers, vec![String::from("A"), String::from("B")]);
    let message = result.error_message.expect("error message");
    assert!(message.contains("A:"), "{message}");
    assert!(message.contains("B:"), "{message}");
    assert!(warehouse.partitions().is_empty());
}

#[tokio::test]
async fn invalid_provider_rows_fall_back_without_import() {
    // Given: A returns a bar whose high is below its low
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path());
    let mut broken = daily_bars("SPY", "2024-01-01", 3, 100.0);
    broken[1].high = broken[1].low - 1.0;
    let a = Arc::new(ScriptedSource::new("A", 1, Script::Rows).with_bars(broken));
    let b = Arc::new(
        ScriptedSource::new("B", 2, Script::Rows).with_bars(daily_bars("SPY", "2024-01-01", 3, 200.0)),
    );
    let pipeline = pipeline(&warehouse, &[a, b]);

    let result = pipeline
        .acquire_bars(&symbol("SPY"), Resolution::OneDay, day("2024-01-01"), day("2024-01-03"), None)
        .await
        .expect("acquisition runs");

    // Then: A is an invalid-data failure and only B's rows are stored
    assert!(result.success);
    assert_eq!(result.failures[0].kind, ProviderErrorKind::InvalidData);
    assert_eq!(result.successful_providers, vec![String::from("B")]);
    let stored = QueryEngine::new(warehouse)
        .query_bars(
            &symbol("SPY"),
            Resolution::OneDay,
            day("2024-01-01"),
            day("2024-01-03"),
            Duration::from_secs(5),
        )
        .await
        .expect("query");
    assert!(stored.iter().all(|bar| bar.close >= 200.0));
}

#[tokio::test]
async fn invalid_request_stops_the_fallback_loop() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path());
    let a = Arc::new(ScriptedSource::new("A", 1, Script::Fail(ProviderErrorKind::InvalidRequest)));
    let b = Arc::new(
        ScriptedSource::new("B", 2, Script::Rows).with_bars(daily_bars("SPY", "2024-01-01", 2, 10.0)),
    );
    let pipeline = pipeline(&warehouse, &[a, b.clone()]);

    let result = pipeline
        .acquire_bars(&symbol("SPY"), Resolution::OneDay, day("2024-01-01"), day("2024-01-02"), None)
        .await
        .expect("acquisition runs");

    assert!(!result.success);
    assert_eq!(b.calls(), 0);
}

#[tokio::test]
async fn unconfigured_providers_are_skipped_without_an_attempt() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path());
    let keyless = Arc::new(ScriptedSource::new("keyless", 1, Script::Rows).unavailable());
    let b = Arc::new(
        ScriptedSource::new("B", 2, Script::Rows).with_bars(daily_bars("SPY", "2024-01-01", 2, 10.0)),
    );
    let pipeline = pipeline(&warehouse, &[keyless.clone(), b]);

    let result = pipeline
        .acquire_bars(&symbol("SPY"), Resolution::OneDay, day("2024-01-01"), day("2024-01-02"), None)
        .await
        .expect("acquisition runs");

    assert!(result.success);
    assert_eq!(keyless.calls(), 0);
    assert!(result.failed_providers.is_empty());
}

#[tokio::test]
async fn providers_are_tried_in_priority_order_regardless_of_registration_order() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path());
    let late = Arc::new(
        ScriptedSource::new("late", 50, Script::Rows).with_bars(daily_bars("SPY", "2024-01-01", 1, 10.0)),
    );
    let early = Arc::new(
        ScriptedSource::new("early", 5, Script::Rows).with_bars(daily_bars("SPY", "2024-01-01", 1, 20.0)),
    );
    let pipeline = pipeline(&warehouse, &[late.clone(), early]);

    let result = pipeline
        .acquire_bars(&symbol("SPY"), Resolution::OneDay, day("2024-01-01"), day("2024-01-01"), None)
        .await
        .expect("acquisition runs");

    assert_eq!(result.successful_providers, vec![String::from("early")]);
    assert_eq!(late.calls(), 0);
}

// =============================================================================
// Rate limiting and health
// =============================================================================

#[tokio::test]
async fn exhausted_rate_budget_fails_fast_and_falls_back() {
    // Given: A allows a single request per minute
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path());
    let a = Arc::new(
        ScriptedSource::new("A", 1, Script::Rows)
            .with_bars(daily_bars("SPY", "2024-01-01", 10, 10.0))
            .with_requests_per_minute(1),
    );
    let b = Arc::new(
        ScriptedSource::new("B", 2, Script::Rows).with_bars(daily_bars("SPY", "2024-01-01", 10, 10.0)),
    );
    let pipeline = pipeline(&warehouse, &[a.clone(), b]);

    // When: two acquisitions run back to back
    let first = pipeline
        .acquire_bars(&symbol("SPY"), Resolution::OneDay, day("2024-01-01"), day("2024-01-03"), None)
        .await
        .expect("first");
    let second = pipeline
        .acquire_bars(&symbol("SPY"), Resolution::OneDay, day("2024-01-04"), day("2024-01-06"), None)
        .await
        .expect("second");

    // Then: the second attempt on A never reaches the provider
    assert_eq!(first.successful_providers, vec![String::from("A")]);
    assert_eq!(second.successful_providers, vec![String::from("B")]);
    assert_eq!(second.failures[0].kind, ProviderErrorKind::RateLimited);
    assert_eq!(a.calls(), 1);

    let status = pipeline.provider_status();
    assert_eq!(status[0].name, "A");
    assert_eq!(status[0].rate_limit.requests_per_minute, 1);
    assert_eq!(status[0].rate_limit.requests_remaining, 0);
}

#[tokio::test]
async fn consecutive_failures_mark_a_provider_unhealthy_but_keep_trying_it() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path());
    let a = Arc::new(ScriptedSource::new("A", 1, Script::Fail(ProviderErrorKind::Unavailable)));
    let b = Arc::new(
        ScriptedSource::new("B", 2, Script::Rows).with_bars(daily_bars("SPY", "2024-01-01", 2, 10.0)),
    );
    let pipeline = pipeline(&warehouse, &[a.clone(), b]);

    for _ in 0..3 {
        pipeline
            .acquire_bars(&symbol("SPY"), Resolution::OneDay, day("2024-01-01"), day("2024-01-02"), None)
            .await
            .expect("acquisition runs");
    }

    let status = pipeline.provider_status();
    assert!(!status[0].healthy);
    assert_eq!(status[0].consecutive_failures, 3);
    assert!(status[1].healthy);
    assert!(status[1].response_time_ms.is_some());
    assert_eq!(a.calls(), 3);
}

// =============================================================================
// Deadlines, empty ranges, idempotence
// =============================================================================

#[tokio::test]
async fn deadline_aborts_a_slow_provider_and_imports_nothing() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path());
    let slow = Arc::new(
        ScriptedSource::new("slow", 1, Script::Slow(Duration::from_secs(5)))
            .with_bars(daily_bars("SPY", "2024-01-01", 5, 10.0)),
    );
    let b = Arc::new(
        ScriptedSource::new("B", 2, Script::Rows).with_bars(daily_bars("SPY", "2024-01-01", 5, 10.0)),
    );
    let pipeline = pipeline(&warehouse, &[slow, b.clone()]);

    let started = Instant::now();
    let result = pipeline
        .acquire_bars(
            &symbol("SPY"),
            Resolution::OneDay,
            day("2024-01-01"),
            day("2024-01-05"),
            Some(Instant::now() + Duration::from_millis(100)),
        )
        .await
        .expect("acquisition runs");

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!result.success);
    assert_eq!(result.failures[0].kind, ProviderErrorKind::Timeout);
    assert!(result
        .error_message
        .as_deref()
        .is_some_and(|message| message.contains("deadline exceeded")));
    assert_eq!(b.calls(), 0);
    assert!(warehouse.partitions().is_empty());
}

#[tokio::test]
async fn reversed_range_is_an_empty_success_without_provider_calls() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path());
    let a = Arc::new(
        ScriptedSource::new("A", 1, Script::Rows).with_bars(daily_bars("SPY", "2024-01-01", 5, 10.0)),
    );
    let pipeline = pipeline(&warehouse, &[a.clone()]);

    let result = pipeline
        .acquire_bars(&symbol("SPY"), Resolution::OneDay, day("2024-01-05"), day("2024-01-01"), None)
        .await
        .expect("acquisition runs");

    assert!(result.success);
    assert_eq!(result.bars_acquired, 0);
    assert!(result.successful_providers.is_empty());
    assert_eq!(a.calls(), 0);
}

#[tokio::test]
async fn acquiring_the_same_range_twice_leaves_the_partition_unchanged() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path());
    let a = Arc::new(
        ScriptedSource::new("A", 1, Script::Rows).with_bars(daily_bars("SPY", "2024-01-01", 5, 10.0)),
    );
    let pipeline = pipeline(&warehouse, &[a]);

    for _ in 0..2 {
        let result = pipeline
            .acquire_bars(&symbol("SPY"), Resolution::OneDay, day("2024-01-01"), day("2024-01-05"), None)
            .await
            .expect("acquisition runs");
        assert!(result.success);
    }

    let partitions = warehouse.partitions();
    assert_eq!(partitions.len(), 1);
    assert_eq!(partitions[0].row_count, 5);
}

// =============================================================================
// Option chains and concurrency
// =============================================================================

#[tokio::test]
async fn option_chain_acquisition_imports_contracts() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path());
    let a = Arc::new(
        ScriptedSource::new("A", 1, Script::Rows).with_chain(chain("SPY", "2024-01-19", &[470.0, 475.0])),
    );
    let pipeline = pipeline(&warehouse, &[a]);

    let result = pipeline
        .acquire_options(&symbol("SPY"), day("2024-01-19"), None)
        .await
        .expect("acquisition runs");

    assert!(result.success);
    assert_eq!(result.contracts_acquired, Some(4));
    assert_eq!(result.rows_acquired(), 4);

    let stored = QueryEngine::new(warehouse)
        .query_options(&symbol("SPY"), day("2024-01-19"), Duration::from_secs(5))
        .await
        .expect("query");
    assert_eq!(stored.len(), 4);
    assert_eq!(stored[0].strike, 470.0);
}

#[tokio::test]
async fn acquisitions_for_different_symbols_run_concurrently() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path());
    let mut bars = daily_bars("SPY", "2024-01-01", 3, 10.0);
    bars.extend(daily_bars("QQQ", "2024-01-01", 3, 20.0));
    let a = Arc::new(ScriptedSource::new("A", 1, Script::Rows).with_bars(bars));
    let pipeline = pipeline(&warehouse, &[a]);
    let spy = symbol("SPY");
    let qqq = symbol("QQQ");

    let (left, right) = tokio::join!(
        pipeline.acquire_bars(&spy, Resolution::OneDay, day("2024-01-01"), day("2024-01-03"), None),
        pipeline.acquire_bars(&qqq, Resolution::OneDay, day("2024-01-01"), day("2024-01-03"), None),
    );

    let left = left.expect("spy");
    let right = right.expect("qqq");
    assert_eq!(left.bars_acquired, 3);
    assert_eq!(right.bars_acquired, 3);
    assert_eq!(warehouse.partitions().len(), 2);
}

// =============================================================================
// Stored partitions as the first source
// =============================================================================

#[tokio::test]
async fn partially_stored_range_is_completed_from_the_network() {
    // Given: one stored bar in January and a network source with the whole month
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path());
    seed(&warehouse, &daily_bars("SPY", "2024-01-15", 1, 470.0));
    let network = Arc::new(
        ScriptedSource::new("net", 1, Script::Rows).with_bars(daily_bars("SPY", "2024-01-01", 31, 400.0)),
    );
    let pipeline = local_first(&warehouse, &network);

    // When: the month is acquired
    let result = pipeline
        .acquire_bars(&symbol("SPY"), Resolution::OneDay, day("2024-01-01"), day("2024-01-31"), None)
        .await
        .expect("acquisition runs");

    // Then: the network fills the gap and the partition holds the whole month
    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.successful_providers, vec![String::from("net")]);
    assert!(result.failed_providers.is_empty());
    assert_eq!(result.bars_acquired, 31);
    assert_eq!(network.calls(), 1);

    let stored = QueryEngine::new(warehouse)
        .query_bars(
            &symbol("SPY"),
            Resolution::OneDay,
            day("2024-01-01"),
            day("2024-01-31"),
            Duration::from_secs(5),
        )
        .await
        .expect("query");
    assert_eq!(stored.len(), 31);
}

#[tokio::test]
async fn fully_stored_range_is_served_locally_without_import() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path());
    seed(&warehouse, &daily_bars("SPY", "2024-01-01", 10, 470.0));
    let network = Arc::new(
        ScriptedSource::new("net", 1, Script::Rows).with_bars(daily_bars("SPY", "2024-01-01", 10, 400.0)),
    );
    let pipeline = local_first(&warehouse, &network);

    let result = pipeline
        .acquire_bars(&symbol("SPY"), Resolution::OneDay, day("2024-01-02"), day("2024-01-08"), None)
        .await
        .expect("acquisition runs");

    assert_eq!(result.successful_providers, vec![String::from("local")]);
    assert_eq!(result.bars_acquired, 7);
    assert!(result.partitions_written.is_empty());
    assert_eq!(network.calls(), 0);
}

#[tokio::test]
async fn empty_local_store_is_a_miss_not_a_provider_failure() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path());
    let network = Arc::new(
        ScriptedSource::new("net", 1, Script::Rows).with_bars(daily_bars("SPY", "2024-01-01", 31, 400.0)),
    );
    let pipeline = local_first(&warehouse, &network);

    for (from, to) in [("2024-01-01", "2024-01-05"), ("2024-01-10", "2024-01-14"), ("2024-01-20", "2024-01-24")] {
        let result = pipeline
            .acquire_bars(&symbol("SPY"), Resolution::OneDay, day(from), day(to), None)
            .await
            .expect("acquisition runs");
        assert_eq!(result.successful_providers, vec![String::from("net")]);
        assert!(result.failed_providers.is_empty(), "{:?}", result.failed_providers);
        assert!(result.failures.is_empty());
    }

    let status = pipeline.provider_status();
    assert_eq!(status[0].name, "local");
    assert!(status[0].healthy);
    assert_eq!(status[0].consecutive_failures, 0);
    assert_eq!(network.calls(), 3);
}

#[tokio::test]
async fn local_miss_with_no_network_data_fails_without_blaming_local() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path());
    let network = Arc::new(ScriptedSource::new("net", 1, Script::Fail(ProviderErrorKind::Unavailable)));
    let pipeline = local_first(&warehouse, &network);

    let result = pipeline
        .acquire_bars(&symbol("SPY"), Resolution::OneDay, day("2024-01-01"), day("2024-01-05"), None)
        .await
        .expect("acquisition runs");

    assert!(!result.success);
    assert_eq!(result.failed_providers, vec![String::from("net")]);
    let message = result.error_message.expect("message");
    assert!(message.contains("stored rows do not cover the request"), "{message}");
}
