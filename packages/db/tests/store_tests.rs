#![allow(clippy::disallowed_methods)]

mod common;

use std::collections::HashSet;
use std::error::Error;

use sentinel_db::{MemoryStore, Store};

type TestResult = Result<(), Box<dyn Error>>;

async fn check_hashes<S: Store>(store: &S) -> TestResult {
    assert_eq!(store.hash_get("jobs", "a").await?, None);

    store.hash_set("jobs", "a", "one").await?;
    store.hash_set("jobs", "b", "two").await?;
    store.hash_set("jobs", "a", "uno").await?;
    assert_eq!(store.hash_get("jobs", "a").await?.as_deref(), Some("uno"));

    let mut all = store.hash_get_all("jobs").await?;
    all.sort();
    assert_eq!(
        all,
        vec![
            ("a".to_string(), "uno".to_string()),
            ("b".to_string(), "two".to_string())
        ]
    );

    // Set-if-absent keeps the first writer.
    assert_eq!(store.hash_set_if_absent("idempotency_keys", "k", "first").await?, None);
    assert_eq!(
        store
            .hash_set_if_absent("idempotency_keys", "k", "second")
            .await?
            .as_deref(),
        Some("first")
    );
    assert_eq!(
        store.hash_get("idempotency_keys", "k").await?.as_deref(),
        Some("first")
    );

    // Removing frees the key for the next writer.
    assert!(store.hash_remove("idempotency_keys", "k").await?);
    assert!(!store.hash_remove("idempotency_keys", "k").await?);
    assert_eq!(store.hash_set_if_absent("idempotency_keys", "k", "third").await?, None);
    Ok(())
}

async fn check_lists<S: Store>(store: &S) -> TestResult {
    assert_eq!(store.list_pop_front("ready_queue").await?, None);
    assert_eq!(store.list_len("ready_queue").await?, 0);

    for item in ["a", "b", "c"] {
        store.list_push("ready_queue", item).await?;
    }
    assert_eq!(store.list_len("ready_queue").await?, 3);

    assert_eq!(store.list_pop_front("ready_queue").await?.as_deref(), Some("a"));
    store.list_push("ready_queue", "d").await?;
    assert_eq!(store.list_pop_front("ready_queue").await?.as_deref(), Some("b"));
    assert_eq!(store.list_pop_front("ready_queue").await?.as_deref(), Some("c"));
    assert_eq!(store.list_pop_front("ready_queue").await?.as_deref(), Some("d"));
    assert_eq!(store.list_pop_front("ready_queue").await?, None);
    assert_eq!(store.list_len("ready_queue").await?, 0);
    Ok(())
}

async fn check_sorted_sets<S: Store>(store: &S) -> TestResult {
    assert!(store.zset_pop_min("scheduled_zset", 10).await?.is_empty());

    store.zset_add("scheduled_zset", "late", 30.0).await?;
    store.zset_add("scheduled_zset", "b-tie", 10.0).await?;
    store.zset_add("scheduled_zset", "a-tie", 10.0).await?;
    store.zset_add("scheduled_zset", "early", 5.5).await?;
    // Re-adding updates the score instead of duplicating the member.
    store.zset_add("scheduled_zset", "late", 20.0).await?;
    assert_eq!(store.zset_len("scheduled_zset").await?, 4);

    let popped = store.zset_pop_min("scheduled_zset", 3).await?;
    assert_eq!(
        popped,
        vec![
            ("early".to_string(), 5.5),
            ("a-tie".to_string(), 10.0),
            ("b-tie".to_string(), 10.0)
        ]
    );
    assert_eq!(store.zset_len("scheduled_zset").await?, 1);

    assert!(store.zset_remove("scheduled_zset", "late").await?);
    assert!(!store.zset_remove("scheduled_zset", "late").await?);
    assert_eq!(store.zset_len("scheduled_zset").await?, 0);
    assert!(store.zset_pop_min("scheduled_zset", 0).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn memory_store_hashes() -> TestResult {
    check_hashes(&MemoryStore::new()).await
}

#[tokio::test]
async fn memory_store_lists() -> TestResult {
    check_lists(&MemoryStore::new()).await
}

#[tokio::test]
async fn memory_store_sorted_sets() -> TestResult {
    check_sorted_sets(&MemoryStore::new()).await
}

#[tokio::test]
async fn surreal_store_hashes() -> TestResult {
    check_hashes(&common::surreal_store().await?).await
}

#[tokio::test]
async fn surreal_store_lists() -> TestResult {
    check_lists(&common::surreal_store().await?).await
}

#[tokio::test]
async fn surreal_store_sorted_sets() -> TestResult {
    check_sorted_sets(&common::surreal_store().await?).await
}

#[tokio::test]
async fn memory_store_clones_share_state() -> TestResult {
    let store = MemoryStore::new();
    let other = store.clone();
    store.list_push("ready_queue", "x").await?;
    assert_eq!(other.list_pop_front("ready_queue").await?.as_deref(), Some("x"));
    Ok(())
}

async fn check_concurrent_pops<S: Store>(store: S) -> TestResult {
    for i in 0..200 {
        store.list_push("ready_queue", &i.to_string()).await?;
        store.zset_add("scheduled_zset", &i.to_string(), f64::from(i)).await?;
    }

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(item) = store.list_pop_front("ready_queue").await? {
                seen.push(item);
            }
            loop {
                let batch = store.zset_pop_min("scheduled_zset", 7).await?;
                if batch.is_empty() {
                    break;
                }
                seen.extend(batch.into_iter().map(|(member, _)| format!("z{member}")));
            }
            Ok::<_, sentinel_db::StoreError>(seen)
        }));
    }

    let mut all = Vec::new();
    for task in futures_util::future::join_all(tasks).await {
        all.extend(task??);
    }

    let unique: HashSet<&String> = all.iter().collect();
    assert_eq!(all.len(), 400);
    assert_eq!(unique.len(), 400);
    assert_eq!(store.list_len("ready_queue").await?, 0);
    assert_eq!(store.zset_len("scheduled_zset").await?, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_store_concurrent_pops_hand_out_each_item_once() -> TestResult {
    check_concurrent_pops(MemoryStore::new()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn surreal_store_concurrent_pops_hand_out_each_item_once() -> TestResult {
    check_concurrent_pops(common::surreal_store().await?).await
}

#[tokio::test]
async fn surreal_store_keeps_fifo_order_across_many_pushes() -> TestResult {
    let store = common::surreal_store().await?;
    for i in 0..50 {
        store.list_push("ready_queue", &format!("item-{i}")).await?;
    }
    for i in 0..50 {
        assert_eq!(
            store.list_pop_front("ready_queue").await?,
            Some(format!("item-{i}"))
        );
    }
    Ok(())
}
