mod support;

use std::collections::HashSet;
use std::sync::Arc;

use coord_core::changelog::ChangeLogError;
use coord_core::tracker::ShardTracker;
use support::{shard, ScriptedLog, LOG_ID};

fn topology(page_size: usize) -> Arc<ScriptedLog> {
    let log = Arc::new(ScriptedLog::new(page_size));
    log.add_shard(shard("shard-000", None));
    log.add_shard(shard("shard-001", None));
    log.add_shard(shard("shard-002", None));
    log.split("shard-000", &["shard-003", "shard-004"]);
    log.split("shard-003", &["shard-005"]);
    log
}

#[tokio::test]
async fn open_shards_are_the_same_for_every_page_size() {
    for page_size in 1..=7 {
        let log = topology(page_size);
        let tracker = ShardTracker::new(log.clone());

        let open: Vec<String> = tracker
            .list_open_shards(LOG_ID)
            .await
            .expect("listing")
            .into_iter()
            .map(|shard| shard.shard_id)
            .collect();

        assert_eq!(
            open,
            vec!["shard-001", "shard-002", "shard-004", "shard-005"],
            "page size {page_size}"
        );
    }
}

#[tokio::test]
async fn full_listing_has_no_duplicates_and_spans_all_pages() {
    let log = topology(2);
    let tracker = ShardTracker::new(log.clone());

    let all = tracker.list_all_shards(LOG_ID).await.expect("listing");
    let unique: HashSet<&str> = all.iter().map(|shard| shard.shard_id.as_str()).collect();

    assert_eq!(all.len(), 6);
    assert_eq!(unique.len(), 6);
    assert_eq!(log.describe_calls(), 3);
}

#[tokio::test]
async fn closed_shards_keep_their_lineage() {
    let log = topology(10);
    let tracker = ShardTracker::new(log);

    let all = tracker.list_all_shards(LOG_ID).await.expect("listing");
    let child = all
        .iter()
        .find(|shard| shard.shard_id == "shard-005")
        .expect("child shard");
    let parent = all
        .iter()
        .find(|shard| shard.shard_id == "shard-003")
        .expect("parent shard");

    assert_eq!(child.parent_shard_id.as_deref(), Some("shard-003"));
    assert!(child.is_open());
    assert!(!parent.is_open());
}

#[tokio::test]
async fn listing_errors_are_returned_to_the_caller() {
    let log = topology(2);
    log.fail_next_describe(ChangeLogError::Throttled("limit".to_string()));
    let tracker = ShardTracker::new(log.clone());

    let error = tracker
        .list_open_shards(LOG_ID)
        .await
        .expect_err("throttled");
    assert!(error.is_transient());

    let open = tracker.list_open_shards(LOG_ID).await.expect("second attempt");
    assert_eq!(open.len(), 4);
}

#[tokio::test]
async fn an_empty_log_has_no_open_shards() {
    let tracker = ShardTracker::new(Arc::new(ScriptedLog::new(3)));
    assert!(tracker
        .list_open_shards(LOG_ID)
        .await
        .expect("listing")
        .is_empty());
}
