#[path = "support/mod.rs"]
mod support;

use std::sync::Arc;

use fibr_core::queue::{JobQueue, spawn_reply_listener};
use serde_json::json;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use support::MemoryQueue;

#[tokio::test]
async fn replies_are_handled_in_order() {
    let queue = Arc::new(MemoryQueue::default());
    let cancel = CancellationToken::new();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    let listener = spawn_reply_listener(
        Arc::clone(&queue) as Arc<dyn JobQueue>,
        "replies".to_string(),
        cancel.clone(),
        move |reply: serde_json::Value| {
            let seen = seen_tx.clone();
            async move {
                let _ = seen.send(reply);
                Ok(())
            }
        },
    )
    .await
    .expect("listener");

    queue.reply("replies", json!({"n": 1})).await;
    queue.reply("replies", json!("not an object")).await;
    queue.reply("replies", json!({"n": 2})).await;

    assert_eq!(seen_rx.recv().await, Some(json!({"n": 1})));
    assert_eq!(seen_rx.recv().await, Some(json!("not an object")));
    assert_eq!(seen_rx.recv().await, Some(json!({"n": 2})));

    cancel.cancel();
    listener.await.expect("listener task");
    assert!(queue.requeued().is_empty());
}

#[tokio::test]
async fn unhandled_replies_go_back_on_shutdown() {
    let queue = Arc::new(MemoryQueue::default());
    let cancel = CancellationToken::new();
    let gate = Arc::new(Notify::new());
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    let handler_gate = Arc::clone(&gate);
    let listener = spawn_reply_listener(
        Arc::clone(&queue) as Arc<dyn JobQueue>,
        "replies".to_string(),
        cancel.clone(),
        move |reply: serde_json::Value| {
            let seen = seen_tx.clone();
            let gate = Arc::clone(&handler_gate);
            async move {
                let _ = seen.send(reply);
                gate.notified().await;
                Ok(())
            }
        },
    )
    .await
    .expect("listener");

    queue.reply("replies", json!({"n": 1})).await;
    assert_eq!(seen_rx.recv().await, Some(json!({"n": 1})));

    // Buffered while the first reply is still being handled.
    queue.reply("replies", json!({"n": 2})).await;
    queue.reply("replies", json!({"n": 3})).await;

    cancel.cancel();
    gate.notify_one();
    listener.await.expect("listener task");

    assert!(seen_rx.try_recv().is_err(), "no reply handled after cancellation");
    assert_eq!(
        queue.requeued(),
        vec![
            ("replies".to_string(), json!({"n": 2})),
            ("replies".to_string(), json!({"n": 3})),
        ]
    );
}
