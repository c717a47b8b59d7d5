//! Lock protocol tests
//!
//! End-to-end behaviour of creators and handles against the in-process store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dislock_core::{LockConfig, LockCreator, LockError, LockStore, MemoryStore, create_lock_creator};
use tokio::sync::watch;
use tokio::time::Instant;

fn fast_polling() -> LockConfig {
    LockConfig::default().with_poll_interval(Duration::from_millis(20))
}

/// Waiters only make progress when woken
fn wake_only() -> LockConfig {
    LockConfig::default().with_poll_interval(Duration::from_secs(60))
}

async fn creator(store: &Arc<MemoryStore>, name: &str, config: LockConfig) -> LockCreator {
    LockCreator::with_config(name, store.clone() as Arc<dyn LockStore>, config)
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion() {
    let store = Arc::new(MemoryStore::new());
    let creator = creator(&store, "stock", fast_polling()).await;
    let inside = Arc::new(AtomicUsize::new(0));
    let entered = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let creator = creator.clone();
        let inside = inside.clone();
        let entered = entered.clone();
        tasks.push(tokio::spawn(async move {
            let handle = creator
                .acquire(Duration::from_secs(5), Duration::from_secs(10))
                .await?;
            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
            tokio::time::sleep(Duration::from_millis(10)).await;
            inside.fetch_sub(1, Ordering::SeqCst);
            entered.fetch_add(1, Ordering::SeqCst);
            handle.try_release().await
        }));
    }

    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(entered.load(Ordering::SeqCst), 8);
    assert_eq!(store.get("DistributedLock_stock"), None);
}

#[tokio::test]
async fn test_expired_lease_frees_lock() {
    let store = Arc::new(MemoryStore::new());
    let crashed = creator(&store, "jobs", fast_polling()).await;
    let waiter = creator(&store, "jobs", fast_polling()).await;

    // never released, never renewed
    let _abandoned = crashed
        .acquire(Duration::from_millis(100), Duration::from_secs(1))
        .await
        .unwrap();

    let started = Instant::now();
    let handle = waiter
        .acquire(Duration::from_secs(5), Duration::from_secs(2))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(store.get("DistributedLock_jobs"), Some(handle.token().to_string()));
}

#[tokio::test]
async fn test_renewal_keeps_lock_past_ttl() {
    let store = Arc::new(MemoryStore::new());
    let owner = creator(&store, "report", fast_polling()).await;
    let other = creator(&store, "report", fast_polling()).await;

    let handle = owner
        .acquire(Duration::from_millis(90), Duration::from_secs(1))
        .await
        .unwrap();
    let keeper = handle.clone();
    let renewal = tokio::spawn(async move { keeper.start_auto_refresh().await });

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(store.get("DistributedLock_report"), Some(handle.token().to_string()));
    let err = other
        .acquire(Duration::from_secs(1), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert_eq!(err, LockError::Timeout);

    handle.release().await;
    renewal.await.unwrap();
    other
        .acquire(Duration::from_secs(1), Duration::from_millis(500))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_timeout_leaves_holder_untouched() {
    let store = Arc::new(MemoryStore::new());
    let creator = creator(&store, "busy", fast_polling()).await;

    let holder = creator
        .acquire(Duration::from_secs(30), Duration::from_secs(1))
        .await
        .unwrap();

    let started = Instant::now();
    let err = creator
        .acquire(Duration::from_secs(30), Duration::from_millis(150))
        .await
        .unwrap_err();
    let waited = started.elapsed();

    assert!(err.is_timeout());
    assert!(waited >= Duration::from_millis(150));
    assert!(waited < Duration::from_secs(1));
    assert_eq!(store.get("DistributedLock_busy"), Some(holder.token().to_string()));
    assert!(store.list("DistributedLockQueue_busy").is_empty());
}

#[tokio::test]
async fn test_stale_handle_cannot_release_new_holder() {
    let store = Arc::new(MemoryStore::new());
    let creator = creator(&store, "shared", fast_polling()).await;

    let first = creator
        .acquire(Duration::from_secs(5), Duration::from_secs(1))
        .await
        .unwrap();
    first.try_release().await.unwrap();

    let second = creator
        .acquire(Duration::from_secs(5), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(first.try_release().await, Err(LockError::TokenMismatch));
    assert_eq!(first.refresh().await, Err(LockError::TokenMismatch));
    assert_eq!(store.get("DistributedLock_shared"), Some(second.token().to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_release_wakes_at_most_three_waiters() {
    let store = Arc::new(MemoryStore::new());
    let holder_creator = creator(&store, "fanout", fast_polling()).await;
    let waiter_creator = creator(&store, "fanout", wake_only()).await;

    let holder = holder_creator
        .acquire(Duration::from_secs(30), Duration::from_secs(1))
        .await
        .unwrap();

    let (go, _) = watch::channel(false);
    let mut waiters = Vec::new();
    for _ in 0..10 {
        let creator = waiter_creator.clone();
        let mut go = go.subscribe();
        waiters.push(tokio::spawn(async move {
            let handle = creator
                .acquire(Duration::from_secs(30), Duration::from_secs(10))
                .await?;
            let _ = go.wait_for(|go| *go).await;
            handle.try_release().await
        }));
    }

    while store.list("DistributedLockQueue_fanout").len() < 10 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    holder.release().await;

    loop {
        match store.get("DistributedLock_fanout") {
            Some(token) if token != holder.token().as_str() => break,
            _ => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.published_count(), 3);
    // one woken waiter won, the other two went back to the front of the queue
    assert_eq!(store.list("DistributedLockQueue_fanout").len(), 9);

    go.send_replace(true);
    for waiter in waiters {
        waiter.await.unwrap().unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_late_waiter_woken_after_earlier_timeout() {
    let store = Arc::new(MemoryStore::new());
    let a = create_lock_creator("scenario", store.clone()).await.unwrap();
    let b = creator(&store, "scenario", wake_only()).await;
    let c = creator(&store, "scenario", wake_only()).await;

    let held = a
        .acquire(Duration::from_secs(30), Duration::from_secs(3))
        .await
        .unwrap();
    let keeper = held.clone();
    let renewal = tokio::spawn(async move { keeper.start_auto_refresh().await });

    let started = Instant::now();
    let err = b
        .acquire(Duration::from_secs(30), Duration::from_secs(3))
        .await
        .unwrap_err();
    assert_eq!(err, LockError::Timeout);
    assert!(started.elapsed() >= Duration::from_secs(3));

    let waiting = tokio::spawn(async move {
        c.acquire(Duration::from_secs(30), Duration::from_secs(3))
            .await
    });
    while store.list("DistributedLockQueue_scenario").is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let released = Instant::now();
    held.release().await;
    renewal.await.unwrap();

    let handle = waiting.await.unwrap().unwrap();
    assert!(released.elapsed() < Duration::from_secs(1));
    assert_eq!(
        store.get("DistributedLock_scenario"),
        Some(handle.token().to_string())
    );
}

#[tokio::test]
async fn test_minimum_ttl() {
    let store = Arc::new(MemoryStore::new());
    let creator = create_lock_creator("tiny", store.clone()).await.unwrap();

    let handle = creator
        .acquire(Duration::from_millis(3), Duration::from_secs(1))
        .await
        .unwrap();
    handle.release().await;

    store.set_offline(true);
    let err = creator
        .acquire(Duration::from_millis(2), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert_eq!(err, LockError::InvalidTtl(Duration::from_millis(2)));
}

#[tokio::test]
async fn test_store_outage_during_acquire() {
    let store = Arc::new(MemoryStore::new());
    let creator = create_lock_creator("outage", store.clone()).await.unwrap();
    store.set_offline(true);

    let err = creator
        .acquire(Duration::from_secs(1), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::AcquireFailed(_)));
}
