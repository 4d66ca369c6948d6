use std::time::Duration;

use tokio::time::Instant;

use crate::{
    assert_elapsed,
    types::{context, recording_accumulator, Ledger, Outcome},
};

/// Given a max size of 3
/// When we hand in exactly 3 deliveries without pausing
/// Then they should be flushed together straight away, in order
#[tokio::test(start_paused = true)]
async fn flush_when_full() {
    let ledger = Ledger::default();
    let (accumulator, mut flushed) = recording_accumulator(
        "flush_when_full",
        3,
        Duration::from_millis(50),
        Duration::ZERO,
    );

    let start = Instant::now();
    for id in 1..=3 {
        accumulator
            .handle(context(id), ledger.delivery(id))
            .await
            .unwrap();
    }

    let batch = flushed.recv().await.unwrap();
    assert_eq!(batch.ids, vec![1, 2, 3]);
    assert_elapsed!(start, Duration::ZERO, Duration::from_millis(1));

    // The buffer starts empty again: the next delivery goes out alone once idle.
    accumulator
        .handle(context(4), ledger.delivery(4))
        .await
        .unwrap();

    let batch = flushed.recv().await.unwrap();
    assert_eq!(batch.ids, vec![4]);
    assert_elapsed!(start, Duration::from_millis(50), Duration::from_millis(2));

    for id in 1..=4 {
        assert_eq!(ledger.outcomes_for(id), vec![Outcome::Acked]);
    }
}

/// Given a max size of 5
/// When we hand in one delivery and nothing else
/// Then it should be flushed on its own after the idle interval
#[tokio::test(start_paused = true)]
async fn flush_when_idle() {
    let ledger = Ledger::default();
    let idle = Duration::from_millis(50);
    let (accumulator, mut flushed) =
        recording_accumulator("flush_when_idle", 5, idle, Duration::ZERO);

    let start = Instant::now();
    accumulator
        .handle(context(1), ledger.delivery(1))
        .await
        .unwrap();

    let batch = flushed.recv().await.unwrap();
    assert_eq!(batch.ids, vec![1]);
    assert_elapsed!(start, idle, Duration::from_millis(2));
}

/// Given the worker has never been given anything
/// When a long time passes
/// Then the adapter should never be called
#[tokio::test(start_paused = true)]
async fn no_flush_without_items() {
    let (_accumulator, mut flushed) = recording_accumulator(
        "no_flush_without_items",
        5,
        Duration::from_millis(10),
        Duration::ZERO,
    );

    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(flushed.try_recv().is_err());
}

/// Given a batch has already been flushed
/// When the worker sits idle for many intervals
/// Then it should not flush an empty batch
#[tokio::test(start_paused = true)]
async fn no_flush_when_empty_after_flush() {
    let ledger = Ledger::default();
    let idle = Duration::from_millis(10);
    let (accumulator, mut flushed) =
        recording_accumulator("no_flush_when_empty_after_flush", 5, idle, Duration::ZERO);

    accumulator
        .handle(context(1), ledger.delivery(1))
        .await
        .unwrap();
    assert_eq!(flushed.recv().await.unwrap().ids, vec![1]);

    tokio::time::sleep(idle * 20).await;

    assert!(flushed.try_recv().is_err());
}

/// Given an idle interval of 50ms
/// When deliveries keep arriving every 40ms
/// Then the batch should stay open until 50ms after the last one
#[tokio::test(start_paused = true)]
async fn idle_timer_restarts_on_each_delivery() {
    let ledger = Ledger::default();
    let (accumulator, mut flushed) = recording_accumulator(
        "idle_timer_restarts_on_each_delivery",
        10,
        Duration::from_millis(50),
        Duration::ZERO,
    );

    let start = Instant::now();
    for id in 1..=3 {
        if id > 1 {
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        accumulator
            .handle(context(id), ledger.delivery(id))
            .await
            .unwrap();
    }

    let batch = flushed.recv().await.unwrap();
    assert_eq!(batch.ids, vec![1, 2, 3]);
    assert_elapsed!(start, Duration::from_millis(130), Duration::from_millis(2));
}

/// Each delivery should reach the adapter with the context it was handed in with.
#[tokio::test(start_paused = true)]
async fn contexts_are_carried_through() {
    let ledger = Ledger::default();
    let (accumulator, mut flushed) = recording_accumulator(
        "contexts_are_carried_through",
        2,
        Duration::from_millis(50),
        Duration::ZERO,
    );

    accumulator
        .handle("first".to_string(), ledger.delivery(1))
        .await
        .unwrap();
    accumulator
        .handle("second".to_string(), ledger.delivery(2))
        .await
        .unwrap();

    let batch = flushed.recv().await.unwrap();
    assert_eq!(batch.contexts, vec!["first", "second"]);
    assert_eq!(batch.ids, vec![1, 2]);
}

/// Given an adapter that takes 100ms
/// When a delivery is handed in while a batch is being flushed
/// Then the producer should wait for the flush to finish
#[tokio::test(start_paused = true)]
async fn slow_adapter_applies_backpressure() {
    let ledger = Ledger::default();
    let processing = Duration::from_millis(100);
    let (accumulator, mut flushed) = recording_accumulator(
        "slow_adapter_applies_backpressure",
        1,
        Duration::from_secs(60),
        processing,
    );

    let start = Instant::now();

    // Accepted before the flush starts.
    accumulator
        .handle(context(1), ledger.delivery(1))
        .await
        .unwrap();
    assert_elapsed!(start, Duration::ZERO, Duration::from_millis(1));

    accumulator
        .handle(context(2), ledger.delivery(2))
        .await
        .unwrap();
    assert_elapsed!(start, processing, Duration::from_millis(2));

    assert_eq!(flushed.recv().await.unwrap().ids, vec![1]);
    assert_eq!(flushed.recv().await.unwrap().ids, vec![2]);
}
