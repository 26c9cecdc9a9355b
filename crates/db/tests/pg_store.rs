//! PostgreSQL store contract tests.
//!
//! Need a reachable `DATABASE_URL`; run with `cargo test -- --ignored`.

use assert_matches::assert_matches;
use sqlx::PgPool;
use stampede_core::job_spec::JobSpec;
use stampede_core::status::JobStatus;
use stampede_db::models::{CreateNode, JobOutcome};
use stampede_db::{AssignOutcome, PgStore, ReleaseOutcome, Store, StoreError};

fn node(name: &str, max_concurrent: i32) -> CreateNode {
    CreateNode {
        name: name.to_string(),
        region: "us-east-1".to_string(),
        max_concurrent,
        status: None,
    }
}

fn spec(concurrency: i32) -> JobSpec {
    JobSpec {
        target_url: "https://api.example.com/".to_string(),
        method: "GET".to_string(),
        concurrency,
        duration_secs: 30,
        ramp_up_secs: 0,
        script_source: "http.get(target.url);".to_string(),
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn bootstrap_seeds_lookup_tables(pool: PgPool) {
    stampede_db::health_check(&pool).await.unwrap();

    for table in ["node_statuses", "job_statuses"] {
        let count: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&pool)
            .await
            .unwrap_or_else(|e| panic!("{table} query failed: {e}"));
        assert!(count.0 > 0, "{table} should have seed data, got 0 rows");
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn assign_and_release_round_trip(pool: PgPool) {
    let store = PgStore::new(pool);
    let n = store.create_node(&node("pg-a", 100)).await.unwrap();
    let job = store.create_job(1, &spec(40)).await.unwrap();

    let AssignOutcome::Assigned { job, node } = store.assign_job(job.id).await.unwrap() else {
        panic!("expected assignment");
    };
    assert_eq!(node.id, n.id);
    assert_eq!(node.current_load, 40);
    assert_eq!(job.status(), JobStatus::Running);

    assert_matches!(
        store.release_job(job.id).await.unwrap(),
        ReleaseOutcome::Released { node } if node.current_load == 0
    );
    assert_matches!(store.release_job(job.id).await.unwrap(), ReleaseOutcome::AlreadyReleased);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn no_capacity_leaves_job_pending(pool: PgPool) {
    let store = PgStore::new(pool);
    store.create_node(&node("pg-small", 10)).await.unwrap();
    let job = store.create_job(1, &spec(11)).await.unwrap();

    assert_matches!(store.assign_job(job.id).await.unwrap(), AssignOutcome::NoCapacity);
    let job = store.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status(), JobStatus::Pending);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn terminal_transition_is_final(pool: PgPool) {
    let store = PgStore::new(pool);
    let job = store.create_job(1, &spec(1)).await.unwrap();

    store
        .transition_job(job.id, JobStatus::Cancelled, JobOutcome::default())
        .await
        .unwrap()
        .expect("PENDING -> CANCELLED");
    let again = store
        .transition_job(job.id, JobStatus::Failed, JobOutcome::failure("X", "late"))
        .await
        .unwrap();
    assert!(again.is_none());
    assert!(store.archive_job(job.id).await.unwrap());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn duplicate_node_name_is_a_conflict(pool: PgPool) {
    let store = PgStore::new(pool);
    store.create_node(&node("pg-dup", 5)).await.unwrap();
    assert_matches!(
        store.create_node(&node("pg-dup", 5)).await,
        Err(StoreError::Conflict(_))
    );
}
