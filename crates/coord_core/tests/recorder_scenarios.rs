use std::sync::Arc;
use std::time::Duration;

use coord_core::memory::InMemoryStore;
use coord_core::recorder::{EventRecorder, RecordOutcome};
use coord_core::store::StoreError;

const RESOURCE: &str = "URL#myblog.com/article1";

#[tokio::test]
async fn recording_the_same_event_twice_counts_once() {
    let recorder = EventRecorder::new(Arc::new(InMemoryStore::new()));

    let first = recorder
        .record_event(RESOURCE, "T#2022-03-28T13:17:23+00:00#CID#a", 1, None)
        .await
        .expect("first record");
    let second = recorder
        .record_event(RESOURCE, "T#2022-03-28T13:17:23+00:00#CID#a", 1, None)
        .await
        .expect("second record");

    assert_eq!(first, RecordOutcome::Recorded);
    assert_eq!(second, RecordOutcome::AlreadyProcessed);
    assert_eq!(recorder.counter(RESOURCE).await.expect("counter"), 1);
}

#[tokio::test]
async fn counter_matches_number_of_distinct_events() {
    let recorder = EventRecorder::new(Arc::new(InMemoryStore::new()));

    for index in 0..25 {
        recorder
            .record_event(RESOURCE, &format!("TX#{index}"), 1, None)
            .await
            .expect("record");
    }

    assert_eq!(recorder.counter(RESOURCE).await.expect("counter"), 25);
}

#[tokio::test]
async fn three_transactions_and_a_replay() {
    let recorder = EventRecorder::new(Arc::new(InMemoryStore::new()));

    for sort_key in ["TX#a", "TX#b", "TX#c"] {
        assert_eq!(
            recorder
                .record_event(RESOURCE, sort_key, 1, None)
                .await
                .expect("record"),
            RecordOutcome::Recorded
        );
    }
    assert_eq!(recorder.counter(RESOURCE).await.expect("counter"), 3);

    let replay = recorder
        .record_event(RESOURCE, "TX#a", 1, Some(Duration::from_secs(3_600)))
        .await
        .expect("replay");
    assert_eq!(replay, RecordOutcome::AlreadyProcessed);
    assert_eq!(recorder.counter(RESOURCE).await.expect("counter"), 3);
}

#[tokio::test]
async fn increments_larger_than_one_are_applied_once() {
    let recorder = EventRecorder::new(Arc::new(InMemoryStore::new()));

    recorder
        .record_event(RESOURCE, "TX#bulk", 5, None)
        .await
        .expect("record");
    recorder
        .record_event(RESOURCE, "TX#bulk", 5, None)
        .await
        .expect("replay");

    assert_eq!(recorder.counter(RESOURCE).await.expect("counter"), 5);
}

#[tokio::test]
async fn counters_are_kept_per_resource() {
    let recorder = EventRecorder::new(Arc::new(InMemoryStore::new()));

    recorder.record_event("URL#a", "TX#1", 1, None).await.expect("record");
    recorder.record_event("URL#b", "TX#1", 1, None).await.expect("record");
    recorder.record_event("URL#b", "TX#2", 1, None).await.expect("record");

    assert_eq!(recorder.counter("URL#a").await.expect("counter"), 1);
    assert_eq!(recorder.counter("URL#b").await.expect("counter"), 2);
    assert_eq!(recorder.counter("URL#c").await.expect("counter"), 0);
}

#[tokio::test]
async fn a_throttled_write_can_be_retried_without_double_counting() {
    let store = Arc::new(InMemoryStore::new());
    let recorder = EventRecorder::new(store.clone());

    store.fail_next(StoreError::throttled("rate exceeded"));
    let error = recorder
        .record_event(RESOURCE, "TX#a", 1, None)
        .await
        .expect_err("throttled");
    assert!(error.is_transient());

    assert_eq!(
        recorder
            .record_event(RESOURCE, "TX#a", 1, None)
            .await
            .expect("retry"),
        RecordOutcome::Recorded
    );
    assert_eq!(recorder.counter(RESOURCE).await.expect("counter"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_redelivery_counts_each_event_once() {
    let recorder = Arc::new(EventRecorder::new(Arc::new(InMemoryStore::new())));

    let mut tasks = Vec::new();
    for delivery in 0..40 {
        let recorder = Arc::clone(&recorder);
        tasks.push(tokio::spawn(async move {
            let event = format!("TX#{}", delivery % 10);
            recorder
                .record_event(RESOURCE, &event, 1, None)
                .await
                .expect("record")
        }));
    }

    let mut recorded = 0;
    for task in tasks {
        if task.await.expect("task should not panic") == RecordOutcome::Recorded {
            recorded += 1;
        }
    }

    assert_eq!(recorded, 10);
    assert_eq!(recorder.counter(RESOURCE).await.expect("counter"), 10);
}
