#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;

use chrono::{Duration, Utc};
use sentinel_core::{Job, JobId, JobStatus, score_of};
use sentinel_db::{JobFilter, JobRepository, MemoryStore, QueueDepths, Store, StoreError, keys};

type TestResult = Result<(), Box<dyn Error>>;

async fn check_repository<S: Store>(repo: JobRepository<S>) -> TestResult {
    // save / find
    let email = Job::new("email", common::payload_with_message("hi"));
    repo.save(&email).await?;
    let loaded = repo.find(email.id).await?.ok_or("email job missing")?;
    assert_eq!(loaded, email);
    assert!(repo.find(JobId::new()).await?.is_none());

    // the stored record uses "type" for the job type
    let raw = repo
        .store()
        .hash_get(keys::JOBS, &email.id.to_string())
        .await?
        .ok_or("raw record missing")?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    assert_eq!(value["type"], "email");
    assert_eq!(value["status"], "queued");

    // list with filters
    let later = Utc::now() + Duration::seconds(60);
    let report = Job::new("report", common::payload_with_message("q3")).scheduled_for(later);
    repo.save(&report).await?;
    let mut done = Job::new("email", common::payload_with_message("bye"));
    done.cancel(Utc::now());
    repo.save(&done).await?;

    let all = repo.list(&JobFilter::default()).await?;
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].created_at <= w[1].created_at));

    let emails = repo
        .list(&JobFilter {
            job_type: Some("email".to_string()),
            ..Default::default()
        })
        .await?;
    assert_eq!(emails.len(), 2);

    let scheduled = repo
        .list(&JobFilter {
            status: Some(JobStatus::Scheduled),
            ..Default::default()
        })
        .await?;
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].id, report.id);

    let limited = repo
        .list(&JobFilter {
            limit: Some(1),
            ..Default::default()
        })
        .await?;
    assert_eq!(limited.len(), 1);

    let counts = repo.count_by_status().await?;
    assert_eq!(counts.get(&JobStatus::Queued), Some(&1));
    assert_eq!(counts.get(&JobStatus::Scheduled), Some(&1));
    assert_eq!(counts.get(&JobStatus::Cancelled), Some(&1));

    // ready queue, scheduled set and leases
    repo.push_ready(email.id).await?;
    repo.schedule(report.id, later).await?;
    repo.track_lease(done.id, later).await?;
    assert_eq!(
        repo.depths().await?,
        QueueDepths {
            ready: 1,
            scheduled: 1,
            leased: 1
        }
    );

    assert_eq!(repo.pop_ready().await?, Some(email.id.to_string()));
    assert_eq!(repo.pop_ready().await?, None);

    let popped = repo.pop_scheduled(10).await?;
    assert_eq!(popped, vec![(report.id.to_string(), score_of(later))]);

    assert!(repo.release_lease(done.id).await?);
    assert!(!repo.release_lease(done.id).await?);
    assert_eq!(repo.depths().await?, QueueDepths::default());

    // idempotency keys
    let first = JobId::new();
    let second = JobId::new();
    assert_eq!(repo.reserve_idempotency("order-1", first).await?, None);
    assert_eq!(repo.reserve_idempotency("order-1", second).await?, Some(first));
    assert_eq!(repo.reserve_idempotency("order-2", second).await?, None);
    assert!(repo.release_idempotency("order-1").await?);
    assert_eq!(repo.reserve_idempotency("order-1", second).await?, None);

    Ok(())
}

#[tokio::test]
async fn memory_repository() -> TestResult {
    check_repository(JobRepository::new(MemoryStore::new())).await
}

#[tokio::test]
async fn surreal_repository() -> TestResult {
    check_repository(JobRepository::new(common::surreal_store().await?)).await
}

#[tokio::test]
async fn corrupt_records_surface_as_serialization_errors() -> TestResult {
    let store = MemoryStore::new();
    let repo = JobRepository::new(store.clone());
    let id = JobId::new();
    store.hash_set(keys::JOBS, &id.to_string(), "{not json").await?;

    let result = repo.find(id).await;
    assert!(matches!(result, Err(StoreError::Serialization(_))));

    // listing skips the unreadable record
    assert!(repo.list(&JobFilter::default()).await?.is_empty());
    Ok(())
}
