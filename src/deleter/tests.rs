use std::collections::HashMap;

use super::*;
use crate::test_utils::{
    MockScript, MockStorage, RemoverMode, init_dummy_tracing_subscriber, make_test_config,
};
use crate::location::resolve;
use crate::storage::StorageTrait;
use crate::types::error::{is_cancelled_error, is_insufficient_permission};

const BUCKET: &str = "test-bucket";

fn candidates(keys: &[&str]) -> Vec<DeleteCandidate> {
    keys.iter()
        .map(|key| DeleteCandidate::from_key(BUCKET, key, None))
        .collect()
}

async fn run_remover(
    mock: &MockStorage,
    options: RemoveOptions,
    candidates: Vec<DeleteCandidate>,
) -> Vec<DeleteOutcome> {
    let (feed, receiver) = async_channel::unbounded();
    let outcomes = mock.remove(BUCKET, options, receiver);

    for candidate in candidates {
        if feed.send(candidate).await.is_err() {
            break;
        }
    }
    feed.close();

    let mut collected = Vec::new();
    while let Ok(outcome) = outcomes.recv().await {
        collected.push(outcome);
    }
    collected
}

fn error_codes(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(key, code)| (key.to_string(), code.to_string()))
        .collect()
}

#[tokio::test]
async fn every_candidate_yields_one_outcome() {
    init_dummy_tracing_subscriber();

    let mock = MockStorage::default();
    let outcomes = run_remover(
        &mock,
        RemoveOptions::default(),
        candidates(&["a", "dir/b", "dir/c"]),
    )
    .await;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(DeleteOutcome::is_deleted));

    let calls = mock.calls();
    assert_eq!(calls.delete_objects_calls, 1);
    assert_eq!(calls.delete_object_calls, 0);
    assert_eq!(calls.deleted.len(), 3);
    assert!(calls.deleted.iter().any(|(key, _)| key == "dir/b"));
}

#[tokio::test]
async fn batches_are_flushed_at_batch_size() {
    init_dummy_tracing_subscriber();

    let config = Config {
        batch_size: 2,
        ..make_test_config()
    };
    let mock = MockStorage::default().with_config(config);
    let outcomes = run_remover(
        &mock,
        RemoveOptions::default(),
        candidates(&["a", "b", "c", "d", "e"]),
    )
    .await;

    assert_eq!(outcomes.len(), 5);
    assert_eq!(mock.calls().delete_objects_calls, 3);
}

#[tokio::test]
async fn batch_size_one_uses_single_deletes() {
    init_dummy_tracing_subscriber();

    let config = Config {
        batch_size: 1,
        ..make_test_config()
    };
    let mock = MockStorage::default().with_config(config);
    let outcomes = run_remover(&mock, RemoveOptions::default(), candidates(&["a", "b"])).await;

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(DeleteOutcome::is_deleted));

    let calls = mock.calls();
    assert_eq!(calls.delete_object_calls, 2);
    assert_eq!(calls.delete_objects_calls, 0);
}

#[tokio::test]
async fn access_denied_keys_are_classified_as_insufficient_permission() {
    init_dummy_tracing_subscriber();

    let mock = MockStorage::new(MockScript {
        delete_error_codes: error_codes(&[("locked", "AccessDenied")]),
        ..MockScript::default()
    });
    let outcomes = run_remover(
        &mock,
        RemoveOptions::default(),
        candidates(&["a", "locked", "b"]),
    )
    .await;

    assert_eq!(outcomes.len(), 3);
    let failed: Vec<_> = outcomes.iter().filter(|o| !o.is_deleted()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].key(), "locked");
    assert!(is_insufficient_permission(failed[0].error().unwrap()));
}

#[tokio::test]
async fn other_error_codes_are_removal_failures() {
    init_dummy_tracing_subscriber();

    let mock = MockStorage::new(MockScript {
        delete_error_codes: error_codes(&[("bad", "InvalidObjectState")]),
        ..MockScript::default()
    });
    let outcomes = run_remover(&mock, RemoveOptions::default(), candidates(&["bad"])).await;

    assert_eq!(outcomes.len(), 1);
    let error = outcomes[0].error().unwrap();
    assert!(!is_insufficient_permission(error));
    assert!(matches!(
        error.downcast_ref::<S3ObjectsError>(),
        Some(S3ObjectsError::Removal { code, .. }) if code == "InvalidObjectState"
    ));
}

#[tokio::test]
async fn retryable_batch_failures_fall_back_to_single_delete() {
    init_dummy_tracing_subscriber();

    let mock = MockStorage::new(MockScript {
        batch_only_error_codes: error_codes(&[("slow", "SlowDown")]),
        ..MockScript::default()
    });
    let outcomes = run_remover(&mock, RemoveOptions::default(), candidates(&["a", "slow"])).await;

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(DeleteOutcome::is_deleted));

    let calls = mock.calls();
    assert_eq!(calls.delete_objects_calls, 1);
    assert_eq!(calls.delete_object_calls, 1);
}

#[tokio::test]
async fn single_delete_fallback_is_retried_force_retry_count_times() {
    init_dummy_tracing_subscriber();

    let mut config = make_test_config();
    config.force_retry_config.force_retry_count = 2;
    let mock = MockStorage::new(MockScript {
        delete_error_codes: error_codes(&[("broken", "InternalError")]),
        ..MockScript::default()
    })
    .with_config(config);

    let outcomes = run_remover(&mock, RemoveOptions::default(), candidates(&["broken"])).await;

    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].is_deleted());
    assert_eq!(mock.calls().delete_object_calls, 3);
}

#[tokio::test]
async fn whole_request_failure_fails_buffered_keys_and_stops() {
    init_dummy_tracing_subscriber();

    let config = Config {
        batch_size: 2,
        ..make_test_config()
    };
    let mock = MockStorage::new(MockScript {
        batch_request_error: Some(S3ObjectsError::Removal {
            key: BUCKET.to_string(),
            code: "NoSuchBucket".to_string(),
            message: "The specified bucket does not exist".to_string(),
        }),
        ..MockScript::default()
    })
    .with_config(config);

    let (feed, receiver) = async_channel::unbounded();
    let outcomes = mock.remove(BUCKET, RemoveOptions::default(), receiver);
    for candidate in candidates(&["a", "b"]) {
        feed.send(candidate).await.unwrap();
    }

    let first = outcomes.recv().await.unwrap();
    let second = outcomes.recv().await.unwrap();
    assert!(!first.is_deleted());
    assert!(!second.is_deleted());
    assert!(!is_insufficient_permission(first.error().unwrap()));

    // The remover has stopped: the outcome stream ends and the feed is closed.
    assert!(outcomes.recv().await.is_err());
    assert!(feed.is_closed());
}

#[tokio::test]
async fn whole_request_permission_failure_does_not_stop_the_remover() {
    init_dummy_tracing_subscriber();

    let config = Config {
        batch_size: 2,
        ..make_test_config()
    };
    let mock = MockStorage::new(MockScript {
        batch_request_error: Some(S3ObjectsError::InsufficientPermission(
            BUCKET.to_string(),
        )),
        ..MockScript::default()
    })
    .with_config(config);

    let outcomes = run_remover(
        &mock,
        RemoveOptions::default(),
        candidates(&["a", "b", "c"]),
    )
    .await;

    assert_eq!(outcomes.len(), 3);
    assert!(
        outcomes
            .iter()
            .all(|o| is_insufficient_permission(o.error().unwrap()))
    );
    assert_eq!(mock.calls().delete_objects_calls, 2);
}

#[tokio::test]
async fn candidate_without_key_is_malformed() {
    init_dummy_tracing_subscriber();

    let mock = MockStorage::default();
    let outcomes = run_remover(
        &mock,
        RemoveOptions::default(),
        vec![DeleteCandidate::new(resolve(BUCKET), None)],
    )
    .await;

    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        outcomes[0].error().unwrap().downcast_ref::<S3ObjectsError>(),
        Some(S3ObjectsError::MalformedRequest(_))
    ));
    assert_eq!(mock.calls().delete_objects_calls, 0);
}

#[tokio::test]
async fn version_ids_are_forwarded() {
    init_dummy_tracing_subscriber();

    let mock = MockStorage::default();
    let outcomes = run_remover(
        &mock,
        RemoveOptions::default(),
        vec![DeleteCandidate::from_key(BUCKET, "a", Some("v1".to_string()))],
    )
    .await;

    assert_eq!(outcomes[0].version_id(), Some("v1"));
    assert_eq!(
        mock.calls().deleted,
        vec![("a".to_string(), Some("v1".to_string()))]
    );
}

#[tokio::test]
async fn bypass_governance_is_forwarded() {
    init_dummy_tracing_subscriber();

    let mock = MockStorage::default();
    let options = RemoveOptions {
        bypass_governance: true,
        ..RemoveOptions::default()
    };
    run_remover(&mock, options, candidates(&["a"])).await;

    assert_eq!(mock.calls().bypass_governance, vec![true]);
}

#[tokio::test]
async fn include_incomplete_aborts_uploads_before_deleting() {
    init_dummy_tracing_subscriber();

    let mock = MockStorage::default();
    let options = RemoveOptions {
        include_incomplete: true,
        ..RemoveOptions::default()
    };
    let outcomes = run_remover(&mock, options, candidates(&["a", "b"])).await;

    assert_eq!(outcomes.len(), 2);
    assert_eq!(mock.calls().aborted_uploads, vec!["a", "b"]);
}

#[tokio::test]
async fn remove_bucket_after_successful_drain() {
    init_dummy_tracing_subscriber();

    let mock = MockStorage::default();
    let options = RemoveOptions {
        remove_bucket: true,
        ..RemoveOptions::default()
    };
    let outcomes = run_remover(&mock, options, candidates(&["a"])).await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(mock.calls().deleted_buckets, vec![BUCKET]);
}

#[tokio::test]
async fn bucket_is_kept_when_objects_failed() {
    init_dummy_tracing_subscriber();

    let mock = MockStorage::new(MockScript {
        delete_error_codes: error_codes(&[("a", "InvalidObjectState")]),
        ..MockScript::default()
    });
    let options = RemoveOptions {
        remove_bucket: true,
        ..RemoveOptions::default()
    };
    run_remover(&mock, options, candidates(&["a"])).await;

    assert!(mock.calls().deleted_buckets.is_empty());
}

#[tokio::test]
async fn bucket_removal_failure_is_reported_as_outcome() {
    init_dummy_tracing_subscriber();

    let mock = MockStorage::new(MockScript {
        delete_bucket_error: Some(S3ObjectsError::Removal {
            key: BUCKET.to_string(),
            code: "BucketNotEmpty".to_string(),
            message: "The bucket you tried to delete is not empty".to_string(),
        }),
        ..MockScript::default()
    });
    let options = RemoveOptions {
        remove_bucket: true,
        ..RemoveOptions::default()
    };
    let outcomes = run_remover(&mock, options, vec![]).await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].key(), BUCKET);
    assert!(!outcomes[0].is_deleted());
}

#[tokio::test]
async fn cancellation_reports_buffered_candidates_as_cancelled() {
    init_dummy_tracing_subscriber();

    let mock = MockStorage::default();
    let (feed, receiver) = async_channel::unbounded();
    let outcomes = mock.remove(BUCKET, RemoveOptions::default(), receiver);

    feed.send(DeleteCandidate::from_key(BUCKET, "a", None))
        .await
        .unwrap();
    // Let the remover buffer the candidate before cancelling.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    mock.cancellation_token.cancel();

    let outcome = outcomes.recv().await.unwrap();
    assert!(is_cancelled_error(outcome.error().unwrap()));
    assert!(outcomes.recv().await.is_err());
    assert_eq!(mock.calls().delete_objects_calls, 0);
}

#[tokio::test]
async fn closed_feed_mode_stops_immediately() {
    init_dummy_tracing_subscriber();

    let mock = MockStorage::new(MockScript {
        remover: RemoverMode::CloseFeed,
        ..MockScript::default()
    });
    let (feed, receiver) = async_channel::bounded(1);
    let outcomes = mock.remove(BUCKET, RemoveOptions::default(), receiver);

    assert!(feed.is_closed());
    assert!(outcomes.recv().await.is_err());
}
