//! End-to-end processor behavior over the in-memory stores: ordering,
//! batching, retry backoff, dead-lettering and recurring rescheduling, all
//! driven by a manually advanced clock.

mod support;

use chrono::{TimeZone, Utc};
use duroq_core::config::EngineConfig;
use duroq_core::port::clock::Clock;
use duroq_core::port::outbox::{OutboxRecord, OutboxStore};
use duroq_core::port::scheduled::{ScheduledRecord, ScheduledStore};
use duroq_core::processor::outbox::OutboxProcessor;
use duroq_core::processor::scheduler::SchedulerProcessor;
use duroq_memory::{InMemoryOutboxStore, InMemoryScheduledStore, ManualClock};
use std::sync::Arc;
use std::time::Duration;
use support::{registry, RecordingDispatcher, ShipOrder};
use tokio_util::sync::CancellationToken;

fn outbox_processor(
    store: &InMemoryOutboxStore,
    dispatcher: &Arc<RecordingDispatcher>,
    clock: &ManualClock,
    config: EngineConfig,
) -> OutboxProcessor {
    OutboxProcessor::new(
        Arc::new(store.clone()),
        dispatcher.clone(),
        registry(),
        Arc::new(clock.clone()),
        config,
    )
}

fn scheduler_processor(
    store: &InMemoryScheduledStore,
    dispatcher: &Arc<RecordingDispatcher>,
    clock: &ManualClock,
    config: EngineConfig,
) -> SchedulerProcessor {
    SchedulerProcessor::new(
        Arc::new(store.clone()),
        dispatcher.clone(),
        registry(),
        Arc::new(clock.clone()),
        config,
    )
}

#[tokio::test]
async fn test_outbox_settles_pending_records_oldest_first() {
    let store = InMemoryOutboxStore::new();
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
    let processor = outbox_processor(&store, &dispatcher, &clock, EngineConfig::default());

    let mut ids = Vec::new();
    for order in ["ord-1", "ord-2", "ord-3"] {
        let record = OutboxRecord::new("ShipOrder", ShipOrder::bytes(order), clock.now());
        ids.push(record.id);
        store.add(record).await.unwrap();
        clock.advance(Duration::from_secs(1));
    }

    let cancel = CancellationToken::new();
    let report = processor.process_batch(&cancel).await.unwrap();
    assert_eq!(report.processed, 3);
    assert_eq!(report.succeeded, 3);
    assert_eq!(dispatcher.call_count(), 3);

    for id in ids {
        let record = store.get(id).await.unwrap().unwrap();
        assert!(record.is_settled());
        assert!(record.last_error.is_none());
    }

    // Settled records are not picked up again.
    let report = processor.process_batch(&cancel).await.unwrap();
    assert!(report.is_empty());
    assert_eq!(dispatcher.call_count(), 3);
}

#[tokio::test]
async fn test_outbox_batch_size_limits_a_pass() {
    let store = InMemoryOutboxStore::new();
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let clock = ManualClock::new(Utc::now());
    let config = EngineConfig::default().with_batch_size(2);
    let processor = outbox_processor(&store, &dispatcher, &clock, config);

    for order in ["ord-1", "ord-2", "ord-3", "ord-4", "ord-5"] {
        store
            .add(OutboxRecord::new("ShipOrder", ShipOrder::bytes(order), clock.now()))
            .await
            .unwrap();
        clock.advance(Duration::from_millis(10));
    }

    let cancel = CancellationToken::new();
    let report = processor.process_batch(&cancel).await.unwrap();
    assert_eq!(report.processed, 2);

    let report = processor.process_batch(&cancel).await.unwrap();
    assert_eq!(report.processed, 2);

    let report = processor.process_batch(&cancel).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(dispatcher.call_count(), 5);
}

#[tokio::test]
async fn test_outbox_failure_backs_off_then_retries() {
    let store = InMemoryOutboxStore::new();
    let dispatcher = Arc::new(RecordingDispatcher::failing(1));
    let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let clock = ManualClock::new(t0);
    let config = EngineConfig::default().with_base_retry_delay(Duration::from_secs(5));
    let processor = outbox_processor(&store, &dispatcher, &clock, config);

    let record = OutboxRecord::new("ShipOrder", ShipOrder::bytes("ord-1"), t0);
    let id = record.id;
    store.add(record).await.unwrap();

    let cancel = CancellationToken::new();
    let report = processor.process_batch(&cancel).await.unwrap();
    assert_eq!(report.failed, 1);

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.retry_count, 1);
    assert_eq!(stored.last_error.as_deref(), Some("dispatch failed: simulated failure"));
    assert_eq!(stored.next_retry_at, Some(t0 + chrono::Duration::seconds(5)));

    // Not yet due two seconds later.
    clock.advance(Duration::from_secs(2));
    let report = processor.process_batch(&cancel).await.unwrap();
    assert!(report.is_empty());
    assert_eq!(dispatcher.call_count(), 1);

    // Due at six seconds; the retry succeeds and settles the record.
    clock.advance(Duration::from_secs(4));
    let report = processor.process_batch(&cancel).await.unwrap();
    assert_eq!(report.succeeded, 1);
    let stored = store.get(id).await.unwrap().unwrap();
    assert!(stored.is_settled());
    assert!(stored.last_error.is_none());
    assert!(stored.next_retry_at.is_none());
}

#[tokio::test]
async fn test_outbox_exhausted_budget_dead_letters() {
    let store = InMemoryOutboxStore::new();
    let dispatcher = Arc::new(RecordingDispatcher::failing(u32::MAX));
    let clock = ManualClock::new(Utc::now());
    let config = EngineConfig::default()
        .with_max_retries(2)
        .with_base_retry_delay(Duration::from_secs(1));
    let processor = outbox_processor(&store, &dispatcher, &clock, config);

    let record = OutboxRecord::new("ShipOrder", ShipOrder::bytes("ord-1"), clock.now());
    let id = record.id;
    store.add(record).await.unwrap();

    let cancel = CancellationToken::new();
    processor.process_batch(&cancel).await.unwrap();
    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.retry_count, 1);
    assert!(stored.next_retry_at.is_some());

    clock.advance(Duration::from_secs(2));
    processor.process_batch(&cancel).await.unwrap();

    // Out of budget: no retry schedule, excluded from pending, still stored.
    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.retry_count, 2);
    assert!(stored.next_retry_at.is_none());
    assert!(!stored.is_settled());

    clock.advance(Duration::from_secs(60));
    let report = processor.process_batch(&cancel).await.unwrap();
    assert!(report.is_empty());
    assert_eq!(dispatcher.call_count(), 2);
}

#[tokio::test]
async fn test_outbox_unregistered_payload_type_is_a_failed_attempt() {
    let store = InMemoryOutboxStore::new();
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let clock = ManualClock::new(Utc::now());
    let processor = outbox_processor(&store, &dispatcher, &clock, EngineConfig::default());

    let record = OutboxRecord::new("NeverRegistered", b"{}".to_vec(), clock.now());
    let id = record.id;
    store.add(record).await.unwrap();

    let cancel = CancellationToken::new();
    let report = processor.process_batch(&cancel).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(dispatcher.call_count(), 0);

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.retry_count, 1);
    assert_eq!(
        stored.last_error.as_deref(),
        Some("unknown payload type: NeverRegistered")
    );
}

#[tokio::test]
async fn test_outbox_cancelled_batch_leaves_work_pending() {
    let store = InMemoryOutboxStore::new();
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let clock = ManualClock::new(Utc::now());
    let processor = outbox_processor(&store, &dispatcher, &clock, EngineConfig::default());

    store
        .add(OutboxRecord::new("ShipOrder", ShipOrder::bytes("ord-1"), clock.now()))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = processor.process_batch(&cancel).await.unwrap();
    assert_eq!(report.processed, 0);
    assert_eq!(dispatcher.call_count(), 0);

    // The record is untouched and picked up once processing resumes.
    let report = processor
        .process_batch(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);
}

#[tokio::test]
async fn test_scheduler_one_shot_settles_once_due() {
    let store = InMemoryScheduledStore::new();
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let clock = ManualClock::new(Utc::now());
    let processor = scheduler_processor(&store, &dispatcher, &clock, EngineConfig::default());

    let due_at = clock.now() + chrono::Duration::seconds(30);
    let record = ScheduledRecord::one_shot("ShipOrder", ShipOrder::bytes("ord-1"), due_at, clock.now());
    let id = record.id;
    store.add(record).await.unwrap();

    // Not due yet.
    let cancel = CancellationToken::new();
    let report = processor.process_batch(&cancel).await.unwrap();
    assert!(report.is_empty());

    clock.advance(Duration::from_secs(31));
    let report = processor.process_batch(&cancel).await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(dispatcher.calls(), vec!["ShipOrder".to_string()]);

    let stored = store.get(id).await.unwrap().unwrap();
    assert!(stored.is_settled());
    assert_eq!(stored.last_executed_at, Some(clock.now()));

    // Settled one-shots never fire again.
    clock.advance(Duration::from_secs(600));
    let report = processor.process_batch(&cancel).await.unwrap();
    assert!(report.is_empty());
}

#[tokio::test]
async fn test_scheduler_recurring_reschedules_strictly_after_execution() {
    let store = InMemoryScheduledStore::new();
    let dispatcher = Arc::new(RecordingDispatcher::new());
    // Created before the first fire; first occurrence is day one at 09:00.
    let created = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
    let clock = ManualClock::new(created);
    let processor = scheduler_processor(&store, &dispatcher, &clock, EngineConfig::default());

    let record =
        ScheduledRecord::recurring("ShipOrder", ShipOrder::bytes("ord-1"), "0 0 9 * * *", created)
            .unwrap();
    let id = record.id;
    assert_eq!(record.scheduled_at, Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap());
    store.add(record).await.unwrap();

    // The processor gets to it five seconds late.
    clock.set(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 5).unwrap());
    let cancel = CancellationToken::new();
    let report = processor.process_batch(&cancel).await.unwrap();
    assert_eq!(report.succeeded, 1);

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(
        stored.scheduled_at,
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    );
    assert_eq!(
        stored.last_executed_at,
        Some(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 5).unwrap())
    );
    assert!(stored.processed_at.is_none());
    assert_eq!(stored.retry_count, 0);

    // Not due again until tomorrow.
    let report = processor.process_batch(&cancel).await.unwrap();
    assert!(report.is_empty());

    clock.set(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap());
    let report = processor.process_batch(&cancel).await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(dispatcher.call_count(), 2);
}

#[tokio::test]
async fn test_scheduler_dead_lettered_recurring_stops_until_rescheduled() {
    let store = InMemoryScheduledStore::new();
    let dispatcher = Arc::new(RecordingDispatcher::failing(u32::MAX));
    let created = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
    let clock = ManualClock::new(created);
    let config = EngineConfig::default()
        .with_max_retries(1)
        .with_base_retry_delay(Duration::from_secs(1));
    let processor = scheduler_processor(&store, &dispatcher, &clock, config);

    let record =
        ScheduledRecord::recurring("ShipOrder", ShipOrder::bytes("ord-1"), "0 0 9 * * *", created)
            .unwrap();
    let id = record.id;
    store.add(record).await.unwrap();

    clock.set(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 1).unwrap());
    let cancel = CancellationToken::new();
    let report = processor.process_batch(&cancel).await.unwrap();
    assert_eq!(report.failed, 1);

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.retry_count, 1);
    assert!(stored.next_retry_at.is_none());

    // Dead-letter wins over recurrence: the next occurrence does not fire.
    clock.set(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 1).unwrap());
    let report = processor.process_batch(&cancel).await.unwrap();
    assert!(report.is_empty());
    assert_eq!(dispatcher.call_count(), 1);

    // Manual reschedule recovers it.
    let next = Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap();
    store.reschedule(id, next, clock.now()).await.unwrap();
    clock.set(next);
    let report = processor.process_batch(&cancel).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(dispatcher.call_count(), 2);
}

#[tokio::test]
async fn test_outbox_run_disabled_returns_without_dispatching() {
    let store = InMemoryOutboxStore::new();
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let clock = ManualClock::new(Utc::now());
    let config = EngineConfig::default()
        .with_processor_enabled(false)
        .with_processing_interval(Duration::from_millis(5));
    let processor = outbox_processor(&store, &dispatcher, &clock, config);

    let record = OutboxRecord::new("ShipOrder", ShipOrder::bytes("ord-1"), clock.now());
    let id = record.id;
    store.add(record).await.unwrap();

    // Returns immediately; no loop, no dispatch.
    processor.run(CancellationToken::new()).await;
    assert_eq!(dispatcher.call_count(), 0);
    assert!(!store.get(id).await.unwrap().unwrap().is_settled());
}

#[tokio::test]
async fn test_scheduler_run_disabled_returns_without_dispatching() {
    let store = InMemoryScheduledStore::new();
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let clock = ManualClock::new(Utc::now());
    let config = EngineConfig::default()
        .with_processor_enabled(false)
        .with_processing_interval(Duration::from_millis(5));
    let processor = scheduler_processor(&store, &dispatcher, &clock, config);

    let record = ScheduledRecord::one_shot(
        "ShipOrder",
        ShipOrder::bytes("ord-1"),
        clock.now() - chrono::Duration::seconds(1),
        clock.now(),
    );
    let id = record.id;
    store.add(record).await.unwrap();

    processor.run(CancellationToken::new()).await;
    assert_eq!(dispatcher.call_count(), 0);
    assert!(!store.get(id).await.unwrap().unwrap().is_settled());
}

#[tokio::test]
async fn test_outbox_run_drains_on_ticks_until_cancelled() {
    let store = InMemoryOutboxStore::new();
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let clock = ManualClock::new(Utc::now());
    let config = EngineConfig::default().with_processing_interval(Duration::from_millis(5));
    let processor = outbox_processor(&store, &dispatcher, &clock, config);

    let record = OutboxRecord::new("ShipOrder", ShipOrder::bytes("ord-1"), clock.now());
    let id = record.id;
    store.add(record).await.unwrap();

    let cancel = CancellationToken::new();
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { processor.run(cancel).await })
    };

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while dispatcher.call_count() == 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "record was never dispatched"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run did not stop after cancellation")
        .unwrap();
    assert!(store.get(id).await.unwrap().unwrap().is_settled());
}

#[tokio::test]
async fn test_scheduler_run_stops_on_cancellation_leaving_work_pending() {
    let store = InMemoryScheduledStore::new();
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let clock = ManualClock::new(Utc::now());
    let config = EngineConfig::default().with_processing_interval(Duration::from_millis(5));
    let processor = scheduler_processor(&store, &dispatcher, &clock, config);

    let record = ScheduledRecord::one_shot(
        "ShipOrder",
        ShipOrder::bytes("ord-1"),
        clock.now() - chrono::Duration::seconds(1),
        clock.now(),
    );
    let id = record.id;
    store.add(record).await.unwrap();

    // Cancelled before the loop starts: run must exit promptly and the due
    // record must stay untouched for the next instance.
    let cancel = CancellationToken::new();
    cancel.cancel();
    let handle = tokio::spawn(async move { processor.run(cancel).await });
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run did not stop after cancellation")
        .unwrap();

    assert_eq!(dispatcher.call_count(), 0);
    let stored = store.get(id).await.unwrap().unwrap();
    assert!(!stored.is_settled());
    assert_eq!(stored.retry_count, 0);
}

#[tokio::test]
async fn test_scheduler_failed_one_shot_retries_with_backoff() {
    let store = InMemoryScheduledStore::new();
    let dispatcher = Arc::new(RecordingDispatcher::failing(1));
    let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let clock = ManualClock::new(t0);
    let config = EngineConfig::default().with_base_retry_delay(Duration::from_secs(5));
    let processor = scheduler_processor(&store, &dispatcher, &clock, config);

    let record = ScheduledRecord::one_shot("ShipOrder", ShipOrder::bytes("ord-1"), t0, t0);
    let id = record.id;
    store.add(record).await.unwrap();

    let cancel = CancellationToken::new();
    let report = processor.process_batch(&cancel).await.unwrap();
    assert_eq!(report.failed, 1);
    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.next_retry_at, Some(t0 + chrono::Duration::seconds(5)));

    clock.advance(Duration::from_secs(6));
    let report = processor.process_batch(&cancel).await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert!(store.get(id).await.unwrap().unwrap().is_settled());
}
