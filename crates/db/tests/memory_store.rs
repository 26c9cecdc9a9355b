//! Capacity accounting and lifecycle rules of the in-memory store.
//!
//! The same contract is exercised against PostgreSQL in `pg_store.rs`.

use std::sync::Arc;

use assert_matches::assert_matches;
use stampede_core::job_spec::JobSpec;
use stampede_core::status::{JobStatus, NodeStatus};
use stampede_db::models::{CreateNode, JobListQuery, JobOutcome};
use stampede_db::{AssignOutcome, MemoryStore, ReleaseOutcome, Store, StoreError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn node(name: &str, max_concurrent: i32) -> CreateNode {
    CreateNode {
        name: name.to_string(),
        region: "eu-west-1".to_string(),
        max_concurrent,
        status: None,
    }
}

fn spec(concurrency: i32) -> JobSpec {
    JobSpec {
        target_url: "https://api.example.com/".to_string(),
        method: "GET".to_string(),
        concurrency,
        duration_secs: 60,
        ramp_up_secs: 0,
        script_source: "http.get(target.url);".to_string(),
    }
}

async fn load_of(store: &MemoryStore, node_id: i64) -> i32 {
    store
        .find_node(node_id)
        .await
        .unwrap()
        .expect("node exists")
        .current_load
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn assign_picks_least_loaded_node_and_starts_job() {
    let store = MemoryStore::new();
    let a = store.create_node(&node("a", 100)).await.unwrap();
    let b = store.create_node(&node("b", 100)).await.unwrap();

    let first = store.create_job(1, &spec(60)).await.unwrap();
    let second = store.create_job(1, &spec(10)).await.unwrap();

    assert_matches!(
        store.assign_job(first.id).await.unwrap(),
        AssignOutcome::Assigned { node, .. } if node.id == a.id
    );
    let outcome = store.assign_job(second.id).await.unwrap();
    let AssignOutcome::Assigned { job, node } = outcome else {
        panic!("expected assignment, got {outcome:?}");
    };
    assert_eq!(node.id, b.id);
    assert_eq!(node.current_load, 10);
    assert_eq!(job.status(), JobStatus::Running);
    assert_eq!(job.assigned_node_id, Some(b.id));
    assert!(job.started_at.is_some());
    assert!(job.holds_capacity());
}

#[tokio::test]
async fn assign_reports_no_capacity_without_side_effects() {
    let store = MemoryStore::new();
    let n = store.create_node(&node("only", 50)).await.unwrap();
    let job = store.create_job(1, &spec(80)).await.unwrap();

    assert_matches!(store.assign_job(job.id).await.unwrap(), AssignOutcome::NoCapacity);
    assert_eq!(load_of(&store, n.id).await, 0);
    let job = store.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status(), JobStatus::Pending);
}

#[tokio::test]
async fn inactive_and_maintenance_nodes_receive_nothing() {
    let store = MemoryStore::new();
    let n = store.create_node(&node("n", 100)).await.unwrap();
    store.set_node_status(n.id, NodeStatus::Maintenance).await.unwrap();

    let job = store.create_job(1, &spec(1)).await.unwrap();
    assert_matches!(store.assign_job(job.id).await.unwrap(), AssignOutcome::NoCapacity);

    store.set_node_status(n.id, NodeStatus::Active).await.unwrap();
    assert_matches!(store.assign_job(job.id).await.unwrap(), AssignOutcome::Assigned { .. });
}

#[tokio::test]
async fn assign_only_applies_to_pending_jobs() {
    let store = MemoryStore::new();
    store.create_node(&node("n", 100)).await.unwrap();
    let job = store.create_job(1, &spec(10)).await.unwrap();

    store.assign_job(job.id).await.unwrap();
    assert_matches!(
        store.assign_job(job.id).await.unwrap(),
        AssignOutcome::NotPending(Some(JobStatus::Running))
    );
    assert_matches!(store.assign_job(999).await.unwrap(), AssignOutcome::NotPending(None));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_assigns_never_overcommit_a_node() {
    let store = Arc::new(MemoryStore::new());
    let n = store.create_node(&node("n", 100)).await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..10 {
        ids.push(store.create_job(1, &spec(30)).await.unwrap().id);
    }

    let tasks = ids.into_iter().map(|id| {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.assign_job(id).await.unwrap() })
    });
    let outcomes = futures::future::join_all(tasks).await;

    let assigned = outcomes
        .into_iter()
        .map(|r| r.unwrap())
        .filter(|o| matches!(o, AssignOutcome::Assigned { .. }))
        .count();
    assert_eq!(assigned, 3);
    assert_eq!(load_of(&store, n.id).await, 90);
}

// ---------------------------------------------------------------------------
// Release
// ---------------------------------------------------------------------------

#[tokio::test]
async fn release_is_applied_exactly_once() {
    let store = MemoryStore::new();
    let n = store.create_node(&node("n", 100)).await.unwrap();
    let job = store.create_job(1, &spec(40)).await.unwrap();
    store.assign_job(job.id).await.unwrap();
    assert_eq!(load_of(&store, n.id).await, 40);

    assert_matches!(
        store.release_job(job.id).await.unwrap(),
        ReleaseOutcome::Released { node } if node.current_load == 0
    );
    assert_matches!(store.release_job(job.id).await.unwrap(), ReleaseOutcome::AlreadyReleased);
    assert_eq!(load_of(&store, n.id).await, 0);
}

#[tokio::test]
async fn release_of_unassigned_job_is_a_no_op() {
    let store = MemoryStore::new();
    let job = store.create_job(1, &spec(5)).await.unwrap();
    assert_matches!(store.release_job(job.id).await.unwrap(), ReleaseOutcome::NotAssigned);
    assert_matches!(store.release_job(12345).await.unwrap(), ReleaseOutcome::NotAssigned);
}

#[tokio::test]
async fn node_status_change_keeps_reserved_load() {
    let store = MemoryStore::new();
    let n = store.create_node(&node("n", 100)).await.unwrap();
    let job = store.create_job(1, &spec(25)).await.unwrap();
    store.assign_job(job.id).await.unwrap();

    let updated = store
        .set_node_status(n.id, NodeStatus::Inactive)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.current_load, 25);

    store.release_job(job.id).await.unwrap();
    assert_eq!(load_of(&store, n.id).await, 0);
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn terminal_jobs_are_never_rewritten() {
    let store = MemoryStore::new();
    store.create_node(&node("n", 100)).await.unwrap();
    let job = store.create_job(1, &spec(10)).await.unwrap();
    store.assign_job(job.id).await.unwrap();

    let done = store
        .transition_job(job.id, JobStatus::Completed, JobOutcome::default())
        .await
        .unwrap()
        .expect("RUNNING -> COMPLETED is allowed");
    assert!(done.ended_at.is_some());

    for to in JobStatus::ALL {
        let rewritten = store
            .transition_job(job.id, *to, JobOutcome::failure("X", "late"))
            .await
            .unwrap();
        assert!(rewritten.is_none(), "COMPLETED must not move to {to}");
    }
    let job = store.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(job.error_code, None);
}

#[tokio::test]
async fn failure_outcome_is_recorded() {
    let store = MemoryStore::new();
    let job = store.create_job(1, &spec(10)).await.unwrap();

    let failed = store
        .transition_job(
            job.id,
            JobStatus::Failed,
            JobOutcome::failure("NoCapacityError", "no node had room"),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.error_code.as_deref(), Some("NoCapacityError"));
    assert_eq!(failed.error_message.as_deref(), Some("no node had room"));
}

#[tokio::test]
async fn pause_requires_running() {
    let store = MemoryStore::new();
    let job = store.create_job(1, &spec(10)).await.unwrap();
    let paused = store
        .transition_job(job.id, JobStatus::Paused, JobOutcome::default())
        .await
        .unwrap();
    assert!(paused.is_none());
}

// ---------------------------------------------------------------------------
// Listing, quota counts, archive
// ---------------------------------------------------------------------------

#[tokio::test]
async fn active_count_excludes_terminal_jobs() {
    let store = MemoryStore::new();
    let a = store.create_job(7, &spec(1)).await.unwrap();
    store.create_job(7, &spec(1)).await.unwrap();
    store.create_job(8, &spec(1)).await.unwrap();

    store
        .transition_job(a.id, JobStatus::Cancelled, JobOutcome::default())
        .await
        .unwrap();

    assert_eq!(store.count_active_jobs(7).await.unwrap(), 1);
    assert_eq!(store.count_active_jobs(8).await.unwrap(), 1);
}

#[tokio::test]
async fn archived_jobs_leave_listings() {
    let store = MemoryStore::new();
    let a = store.create_job(1, &spec(1)).await.unwrap();
    let b = store.create_job(1, &spec(1)).await.unwrap();

    assert!(!store.archive_job(a.id).await.unwrap(), "PENDING cannot be archived");
    store
        .transition_job(a.id, JobStatus::Cancelled, JobOutcome::default())
        .await
        .unwrap();
    assert!(store.archive_job(a.id).await.unwrap());
    assert!(!store.archive_job(a.id).await.unwrap(), "second archive is a no-op");

    let listed = store.list_jobs(Some(1), &JobListQuery::default()).await.unwrap();
    assert_eq!(listed.iter().map(|j| j.id).collect::<Vec<_>>(), vec![b.id]);
}

#[tokio::test]
async fn listing_filters_by_owner_and_status_newest_first() {
    let store = MemoryStore::new();
    let a = store.create_job(1, &spec(1)).await.unwrap();
    let b = store.create_job(1, &spec(1)).await.unwrap();
    store.create_job(2, &spec(1)).await.unwrap();

    let mine = store.list_jobs(Some(1), &JobListQuery::default()).await.unwrap();
    assert_eq!(mine.iter().map(|j| j.id).collect::<Vec<_>>(), vec![b.id, a.id]);

    let everyone = store.list_jobs(None, &JobListQuery::default()).await.unwrap();
    assert_eq!(everyone.len(), 3);

    let running = JobListQuery {
        status: Some(JobStatus::Running),
        ..Default::default()
    };
    assert!(store.list_jobs(None, &running).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Availability
// ---------------------------------------------------------------------------

#[tokio::test]
async fn offline_store_rejects_every_call() {
    let store = MemoryStore::new();
    store.set_available(false);

    assert_matches!(store.ping().await, Err(StoreError::Unavailable(_)));
    assert_matches!(store.count_active_jobs(1).await, Err(StoreError::Unavailable(_)));
    assert_matches!(store.assign_job(1).await, Err(StoreError::Unavailable(_)));

    store.set_available(true);
    assert!(store.ping().await.is_ok());
}

#[tokio::test]
async fn duplicate_node_names_conflict() {
    let store = MemoryStore::new();
    store.create_node(&node("dup", 10)).await.unwrap();
    assert_matches!(
        store.create_node(&node("dup", 10)).await,
        Err(StoreError::Conflict(_))
    );
}
