use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fibr_core::config::ExclusiveConfig;
use fibr_core::exclusive::{Exclusive, LocalLock, LockBackend};
use fibr_core::version::mutex_key;
use fibr_core::{PipelineError, Result};
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

fn config() -> ExclusiveConfig {
    ExclusiveConfig {
        ttl_ms: 10_000,
        retry_interval_ms: 10,
    }
}

fn local() -> (Arc<LocalLock>, Exclusive) {
    let lock = Arc::new(LocalLock::new());
    let exclusive = Exclusive::new(Some(Arc::clone(&lock) as Arc<dyn LockBackend>), &config());
    (lock, exclusive)
}

#[tokio::test(start_paused = true)]
async fn same_key_executions_never_overlap() {
    let (_lock, exclusive) = local();
    let inside = Arc::new(AtomicBool::new(false));
    let runs = Arc::new(AtomicUsize::new(0));
    let cancel = CancellationToken::new();

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let exclusive = exclusive.clone();
        let inside = Arc::clone(&inside);
        let runs = Arc::clone(&runs);
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            exclusive
                .execute(&cancel, "item", None, || async {
                    assert!(!inside.swap(true, Ordering::SeqCst), "overlapping execution");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    inside.store(false, Ordering::SeqCst);
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
        }));
    }

    for task in tasks {
        task.await.expect("task").expect("execute");
    }
    assert_eq!(runs.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn distinct_keys_run_concurrently() {
    let (_lock, exclusive) = local();
    let barrier = Arc::new(Barrier::new(2));
    let cancel = CancellationToken::new();

    let run = |key: &'static str| {
        let exclusive = exclusive.clone();
        let barrier = Arc::clone(&barrier);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            exclusive
                .execute(&cancel, key, None, || async {
                    barrier.wait().await;
                    Ok(())
                })
                .await
        })
    };

    let (first, second) = (run("left"), run("right"));
    let joined = tokio::time::timeout(Duration::from_secs(5), async {
        first.await.expect("task").expect("left");
        second.await.expect("task").expect("right");
    })
    .await;
    assert!(joined.is_ok(), "distinct keys were serialized");
}

#[tokio::test]
async fn try_execute_skips_when_held_elsewhere() {
    let (lock, exclusive) = local();
    lock.try_acquire(&mutex_key("purge"), "someone-else", Duration::from_secs(60))
        .await
        .expect("acquire");

    let ran = AtomicBool::new(false);
    let outcome = exclusive
        .try_execute("purge", None, || async {
            ran.store(true, Ordering::SeqCst);
            Ok(42)
        })
        .await
        .expect("try_execute");

    assert_eq!(outcome, None);
    assert!(!ran.load(Ordering::SeqCst));

    lock.release(&mutex_key("purge"), "someone-else").await.expect("release");
    let outcome = exclusive
        .try_execute("purge", None, || async { Ok(42) })
        .await
        .expect("try_execute");
    assert_eq!(outcome, Some(42));
    assert!(!lock.is_held(&mutex_key("purge")));
}

#[tokio::test(start_paused = true)]
async fn waiting_stops_on_cancellation() {
    let (lock, exclusive) = local();
    lock.try_acquire(&mutex_key("busy"), "holder", Duration::from_secs(600))
        .await
        .expect("acquire");

    let cancel = CancellationToken::new();
    let waiter = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            exclusive
                .execute(&cancel, "busy", None, || async { Ok(()) })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let err = waiter.await.expect("task").expect_err("cancelled");
    assert!(matches!(err, PipelineError::Cancelled(_)));
}

#[tokio::test(start_paused = true)]
async fn expired_lease_is_taken_over_and_kept_from_its_former_owner() {
    let lock = LocalLock::new();
    assert!(lock.try_acquire("key", "first", Duration::from_millis(10)).await.expect("acquire"));
    assert!(!lock.try_acquire("key", "second", Duration::from_secs(1)).await.expect("contended"));

    tokio::time::advance(Duration::from_millis(20)).await;
    assert!(lock.try_acquire("key", "second", Duration::from_secs(1)).await.expect("expired"));

    lock.release("key", "first").await.expect("stale release");
    assert!(lock.is_held("key"));
}

#[derive(Debug)]
struct BrokenBackend;

#[async_trait]
impl LockBackend for BrokenBackend {
    async fn try_acquire(&self, _key: &str, _owner: &str, _ttl: Duration) -> Result<bool> {
        Err(PipelineError::Lock("backend unreachable".into()))
    }

    async fn release(&self, _key: &str, _owner: &str) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn backend_failures_are_errors_not_contention() {
    let exclusive = Exclusive::new(Some(Arc::new(BrokenBackend)), &config());
    let ran = AtomicBool::new(false);

    let err = exclusive
        .execute(&CancellationToken::new(), "key", None, || async {
            ran.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await
        .expect_err("backend failure");

    assert!(matches!(err, PipelineError::Lock(_)));
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn without_backend_actions_run_directly() {
    let exclusive = Exclusive::disabled();
    assert!(!exclusive.is_enabled());

    let value = exclusive
        .execute(&CancellationToken::new(), "key", None, || async { Ok("done") })
        .await
        .expect("execute");
    assert_eq!(value, "done");
}
