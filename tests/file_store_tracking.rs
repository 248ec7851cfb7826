//! Tracking against the on-disk job store
//!
//! Job records must survive a process restart: a reopened store sees the
//! parent and its retry attempts, and new ids continue after the old ones.

use std::sync::Arc;
use std::time::Duration;

use instance_ops::mock::{MockProvider, OperationScript};
use instance_ops::model::{JobStatus, NewParentJob, OperationKind};
use instance_ops::{
    CancelToken, FileJobStore, JobStore, OperationTracker, ProviderGateway, RecordingNotifier,
    TrackRequest, TrackerConfig,
};
use tempfile::TempDir;

const ZONE: &str = "us-central1-a";

fn tracker(provider: &MockProvider, store: Arc<FileJobStore>) -> OperationTracker {
    OperationTracker::new(
        Arc::new(provider.clone()),
        store,
        Arc::new(RecordingNotifier::new()),
        TrackerConfig {
            poll_interval: Duration::from_millis(1),
            overall_timeout: Some(Duration::from_secs(10)),
            ..TrackerConfig::default()
        },
    )
}

#[test]
fn test_retry_history_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let provider = MockProvider::new();
    provider.queue_issue(OperationScript::quick().observed_as(OperationKind::Start));

    let (job_id, child_ids) = {
        let store = Arc::new(FileJobStore::open(dir.path()).unwrap());
        let op = provider.stop_instance(ZONE, "web-1").unwrap();
        let parent = store
            .create_parent(NewParentJob::for_operation("web-1", ZONE, OperationKind::Stop, &op))
            .unwrap();

        let outcome = tracker(&provider, store.clone()).track(
            &TrackRequest {
                job_id: parent.id,
                zone: ZONE.to_string(),
                operation: op.name.clone(),
                recipient: "ops@example.com".to_string(),
            },
            &CancelToken::new(),
        );
        assert!(outcome.succeeded());
        (parent.id, outcome.children)
    };

    let reopened = FileJobStore::open(dir.path()).unwrap();
    let view = reopened.view(job_id, ZONE).unwrap().unwrap();

    assert_eq!(view.job.status, JobStatus::Done);
    assert!(view.job.is_successful);
    assert_eq!(view.children.len(), 1);
    assert_eq!(view.children[0].id, child_ids[0]);
    assert_eq!(view.children[0].parent_id, job_id);
    assert!(view.children[0].is_successful);
}

#[test]
fn test_ids_continue_after_reopen() {
    let dir = TempDir::new().unwrap();
    let provider = MockProvider::new();

    let first = {
        let store = FileJobStore::open(dir.path()).unwrap();
        let op = provider.start_instance(ZONE, "web-1").unwrap();
        store
            .create_parent(NewParentJob::for_operation("web-1", ZONE, OperationKind::Start, &op))
            .unwrap()
    };

    let store = FileJobStore::open(dir.path()).unwrap();
    let op = provider.start_instance(ZONE, "web-2").unwrap();
    let second = store
        .create_parent(NewParentJob::for_operation("web-2", ZONE, OperationKind::Start, &op))
        .unwrap();

    assert!(second.id > first.id);
    let names: Vec<_> = store
        .list_parents()
        .unwrap()
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(names, vec!["web-1", "web-2"]);
}

#[test]
fn test_rerun_from_disk_does_not_duplicate() {
    let dir = TempDir::new().unwrap();
    let provider = MockProvider::new();
    let store = Arc::new(FileJobStore::open(dir.path()).unwrap());
    let op = provider.start_instance(ZONE, "web-1").unwrap();
    let parent = store
        .create_parent(NewParentJob::for_operation("web-1", ZONE, OperationKind::Start, &op))
        .unwrap();
    let request = TrackRequest {
        job_id: parent.id,
        zone: ZONE.to_string(),
        operation: op.name.clone(),
        recipient: String::new(),
    };

    assert!(tracker(&provider, store.clone())
        .track(&request, &CancelToken::new())
        .succeeded());

    // Fresh process, same job
    let reopened = Arc::new(FileJobStore::open(dir.path()).unwrap());
    let outcome = tracker(&provider, reopened.clone()).track(&request, &CancelToken::new());

    assert!(outcome.succeeded());
    assert_eq!(outcome.notifications, 0);
    assert!(reopened.children_of(parent.id).unwrap().is_empty());
}
