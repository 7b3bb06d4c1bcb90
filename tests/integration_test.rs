//! Integration tests for the Postgres store and the Redis hand-off queue.
//!
//! Note: These require a running PostgreSQL instance configured via
//! DATABASE_URL, and Redis via REDIS_URL. Run with:
//! cargo test --test integration_test -- --ignored

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use rider_seal::{
    db::{self, JobStore, PgStore, RiderStore},
    models::{actor::Actor, job::JobStatus, rider::{NewRider, SealState}},
    services::{
        enqueue::{self, EnqueueRequest},
        integrity,
        queue::{JobQueue, QueuedJob},
        redirect,
        seal::{self, SealChange},
        tracker::{self, JobOutcome},
    },
};
use uuid::Uuid;

async fn store() -> PgStore {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::init_pool(&url).await.expect("Failed to connect to database");
    db::run_migrations(&pool).await.expect("Failed to run migrations");
    PgStore::new(pool)
}

/// Content unique to this run so dedup keys never collide with earlier runs.
fn unique_content() -> Vec<u8> {
    format!("integration rider {}", Uuid::new_v4()).into_bytes()
}

async fn insert(store: &PgStore, owner_id: i64) -> rider_seal::models::rider::Rider {
    let content = unique_content();
    let new = NewRider::new(
        owner_id,
        Some(integrity::compute_hash(&content)),
        content.len() as i64,
        Utc::now(),
    );
    store.insert_rider(new).await.expect("insert rider")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_concurrent_enqueue_on_postgres() {
    let store = Arc::new(store().await);
    let rider = insert(&store, 1).await;
    let request = EnqueueRequest::for_rider(&rider);

    let calls = (0..16).map(|_| {
        let store = Arc::clone(&store);
        let request = request.clone();
        tokio::spawn(async move { enqueue::enqueue(store.as_ref(), &request).await })
    });
    let outcomes: Vec<_> = join_all(calls)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let created = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(outcome) if outcome.created))
        .count();
    assert_eq!(created, 1, "outcomes: {outcomes:?}");

    let key = request.dedup_key().expect("key").as_key();
    let active = store.active_job_for_key(&key).await.expect("lookup").expect("active job");
    assert_eq!(active.status, JobStatus::Queued);
    assert_eq!(active.job_uid.len(), 64);
}

#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_lifecycle_on_postgres() {
    let store = store().await;
    let rider = insert(&store, 2).await;

    let job = enqueue::enqueue(&store, &EnqueueRequest::for_rider(&rider))
        .await
        .expect("enqueue")
        .job;
    tracker::claim(&store, &job.job_uid).await.expect("claim");
    let outcome = JobOutcome {
        score: 91,
        summary: Some("integration".to_string()),
        result: Some(serde_json::json!({"checks": 4})),
    };
    let completion = tracker::complete(&store, &job.job_uid, &outcome)
        .await
        .expect("complete");
    assert_eq!(completion.job.status, JobStatus::Success);
    assert_eq!(completion.job.result, outcome.result);

    let promoted = store.rider_by_id(rider.id).await.expect("load").expect("rider");
    assert_eq!(promoted.seal_state, SealState::Validated);
    let trail = store.audit_trail(rider.id).await.expect("audit");
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].actor_id, None);

    // Expire pointing at a fresh validated rider of the same owner.
    let replacement = insert(&store, 2).await;
    let admin = Actor::admin(1);
    seal::transition(&store, &admin, replacement.id, &SealChange::to(SealState::Validated))
        .await
        .expect("validate replacement");
    let change = SealChange::to(SealState::Expired).with_replacement(replacement.id);
    let expired = seal::transition(&store, &admin, rider.id, &change)
        .await
        .expect("expire");

    let resolution = redirect::resolve(&store, &expired).await.expect("resolve");
    assert_eq!(resolution.target, Some(replacement.token));

    let denied = seal::transition(&store, &admin, rider.id, &SealChange::to(SealState::Validated)).await;
    assert!(denied.expect_err("expired is terminal").is_precondition());
}

#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_parked_handoffs_are_requeued() {
    dotenvy::dotenv().ok();
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
    let namespace = format!("rider_seal_test_{}", Uuid::new_v4().simple());
    let queue = JobQueue::namespaced(&url, &namespace).expect("queue");

    let handoff = QueuedJob {
        job_uid: "c".repeat(64),
    };
    queue.push(&handoff).await.expect("push");

    // A worker pops the hand-off and dies before acknowledging it.
    assert_eq!(queue.pop().await.expect("pop"), Some(handoff.clone()));
    assert_eq!(queue.depth().await.expect("depth"), 0);

    assert_eq!(queue.requeue_processing().await.expect("requeue"), 1);
    assert_eq!(queue.depth().await.expect("depth"), 1);
    assert_eq!(queue.pop().await.expect("pop"), Some(handoff.clone()));

    queue.ack(&handoff).await.expect("ack");
    assert_eq!(queue.requeue_processing().await.expect("requeue"), 0);
    assert_eq!(queue.pop().await.expect("pop"), None);
}
