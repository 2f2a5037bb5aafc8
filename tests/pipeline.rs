mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{CannedTransport, FlakyStore, pipeline};
use roster_sync::error::FetchError;
use roster_sync::pipeline::{CycleOutcome, CycleState, ExecutionGuard, SkipReason};
use roster_sync::storage::{PlayerReader, WriteStrategy};
use serde_json::json;

fn completed(outcome: CycleOutcome) -> roster_sync::pipeline::CycleResult {
    match outcome {
        CycleOutcome::Completed(result) => result,
        CycleOutcome::Skipped(reason) => panic!("cycle skipped: {reason:?}"),
    }
}

#[tokio::test]
async fn test_cycle_transforms_dedupes_and_writes() {
    let transport = CannedTransport::new();
    transport.serve(
        "US1",
        json!([
            { "Uid": "1", "Username": { "Username": "[ABC] One", "Timestamp": "2026-01-01T00:00:00Z" } },
            null,
            { "Username": { "Username": "NoId" } },
            { "Uid": "2", "Username": { "Username": "Two | XYZ" } }
        ]),
    );
    transport.serve(
        "EU1",
        json!([
            { "Uid": "1", "Username": { "Username": "[ABC] One (EU)", "Timestamp": "2026-01-02T00:00:00Z" } }
        ]),
    );
    transport.fail("SEA", FetchError::Timeout(800));

    let store = FlakyStore::new();
    let guard = ExecutionGuard::default();
    let pipeline = pipeline(transport, &["US1", "EU1", "SEA"], store.clone(), guard.clone());
    let state = CycleState::new();

    let result = completed(pipeline.process(&state).await);

    assert_eq!(result.fetch.successful, 2);
    assert_eq!(result.fetch.failed, 1);
    assert_eq!(result.fetch.total_items, 5);
    assert_eq!(result.valid_count + result.reject_count, 5);
    assert_eq!(result.valid_count, 3);
    assert_eq!(result.reject_count, 2);
    assert_eq!(result.duplicate_count, 1);
    assert_eq!(result.written(), 2);
    assert_eq!(result.strategy_used(), Some(WriteStrategy::SingleTransaction));
    assert!(result.error.is_none());

    let one = store.inner.get("1").unwrap();
    assert_eq!(one.display_name, "[ABC] One (EU)");
    assert_eq!(one.crew_tag.as_deref(), Some("ABC"));
    assert_eq!(store.inner.get("2").unwrap().crew_tag.as_deref(), Some("XYZ"));

    assert!(store.inner.last_sync_timestamp().await.unwrap().is_some());
    assert!(!guard.has_outstanding());
    assert!(!state.in_progress());
    assert_eq!(state.completed_cycles(), 1);
}

#[tokio::test]
async fn test_cycle_with_nothing_valid_skips_write() {
    let transport = CannedTransport::new();
    transport.serve("US1", json!([null, { "Uid": "" }]));

    let store = FlakyStore::new();
    let pipeline = pipeline(transport, &["US1"], store.clone(), ExecutionGuard::default());
    let state = CycleState::new();

    let result = completed(pipeline.process(&state).await);
    assert_eq!(result.reject_count, 2);
    assert!(result.write.is_none());
    assert!(store.calls().is_empty());
    assert_eq!(state.failed_cycles(), 0);
}

#[tokio::test]
async fn test_write_failure_marks_cycle_failed() {
    let transport = CannedTransport::new();
    transport.serve("US1", json!([{ "Uid": "1" }, { "Uid": "2" }]));

    let store = FlakyStore::new();
    store.fail_upsert_many.store(true, Ordering::SeqCst);
    let guard = ExecutionGuard::default();
    let pipeline = pipeline(transport, &["US1"], store.clone(), guard.clone());
    let state = CycleState::new();

    let result = completed(pipeline.process(&state).await);
    assert!(result.failed());
    assert!(!store.calls().contains(&"record_sync"));
    assert_eq!(state.failed_cycles(), 1);
    assert_eq!(state.completed_cycles(), 0);
    assert!(!guard.has_outstanding());
}

#[tokio::test]
async fn test_cycle_skipped_while_previous_in_progress() {
    let transport = CannedTransport::new();
    let store = FlakyStore::new();
    let pipeline = pipeline(transport.clone(), &["US1"], store, ExecutionGuard::default());
    let state = CycleState::new();

    let claim = state.try_begin().unwrap();
    let outcome = pipeline.process(&state).await;
    assert!(matches!(outcome, CycleOutcome::Skipped(SkipReason::InProgress)));
    assert_eq!(transport.requests.load(Ordering::SeqCst), 0);
    assert_eq!(state.skipped_cycles(), 1);
    assert_eq!(state.failed_cycles(), 0);
    drop(claim);
}

#[tokio::test]
async fn test_cycle_not_started_after_shutdown() {
    let transport = CannedTransport::new();
    let guard = ExecutionGuard::default();
    let pipeline = pipeline(transport.clone(), &["US1"], FlakyStore::new(), guard.clone());

    guard.begin_shutdown();
    let outcome = pipeline.process(&CycleState::new()).await;
    assert!(matches!(outcome, CycleOutcome::Skipped(SkipReason::ShuttingDown)));
    assert_eq!(transport.requests.load(Ordering::SeqCst), 0);
    assert!(!guard.has_outstanding());
    guard.await_drain().await;
}

#[tokio::test]
async fn test_panicking_cycle_still_releases_lock() {
    let transport = CannedTransport::new();
    transport.panics.store(true, Ordering::SeqCst);

    let guard = ExecutionGuard::new(Duration::from_millis(5));
    let pipeline = Arc::new(pipeline(transport, &["US1"], FlakyStore::new(), guard.clone()));
    let state = Arc::new(CycleState::new());

    let cycle = tokio::spawn({
        let pipeline = pipeline.clone();
        let state = state.clone();
        async move { pipeline.process(&state).await }
    });
    assert!(cycle.await.unwrap_err().is_panic());

    assert!(!state.in_progress());
    assert!(guard.list_outstanding().is_empty());

    guard.begin_shutdown();
    tokio::time::timeout(Duration::from_secs(2), guard.await_drain())
        .await
        .expect("drain should finish after a panicked cycle");
}

#[tokio::test]
async fn test_lock_held_during_cycle_and_drain_waits() {
    let transport = CannedTransport::new();
    transport.serve("US1", json!([{ "Uid": "1" }]));
    transport.set_latency(Duration::from_millis(100));

    let guard = ExecutionGuard::new(Duration::from_millis(5));
    let pipeline = Arc::new(pipeline(transport, &["US1"], FlakyStore::new(), guard.clone()));
    let state = Arc::new(CycleState::new());

    let cycle = tokio::spawn({
        let pipeline = pipeline.clone();
        let state = state.clone();
        async move { pipeline.process(&state).await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(guard.list_outstanding(), ["sync_players"]);

    guard.begin_shutdown();
    guard.await_drain().await;
    assert!(!guard.has_outstanding());

    let result = completed(cycle.await.unwrap());
    assert_eq!(result.written(), 1);
}
