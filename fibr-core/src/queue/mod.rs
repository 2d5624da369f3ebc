//! Asynchronous job transport to the external renderer and EXIF extractor.
//!
//! Jobs are published as JSON documents on `<exchange>:<routing_key>`; replies
//! come back the same way and are consumed by the reply listeners.

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use self::redis::RedisJobQueue;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::Result;

#[async_trait]
pub trait JobQueue: Send + Sync + fmt::Debug {
    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<()>;

    /// Stream of payloads received on `routing_key`. The feed stops taking
    /// payloads off the queue once the receiver is closed or dropped.
    async fn subscribe(&self, routing_key: &str) -> Result<mpsc::Receiver<Vec<u8>>>;

    /// Puts `payload` back at the head of `routing_key`.
    async fn requeue(&self, routing_key: &str, payload: Vec<u8>) -> Result<()>;
}

pub async fn publish_json<T: Serialize + Sync>(
    queue: &dyn JobQueue,
    routing_key: &str,
    value: &T,
) -> Result<()> {
    let payload = serde_json::to_vec(value)?;
    debug!(routing_key = %routing_key, "publishing job");
    queue.publish(routing_key, payload).await
}

/// Decodes every reply received on `routing_key` and hands it to `handler`
/// until `cancel` fires. Undecodable payloads and handler failures are logged
/// and skipped.
///
/// On cancellation the feed is closed and replies already received but not
/// handled go back to the head of the queue, in arrival order.
pub async fn spawn_reply_listener<T, F, Fut>(
    queue: Arc<dyn JobQueue>,
    routing_key: String,
    cancel: CancellationToken,
    handler: F,
) -> Result<JoinHandle<()>>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut replies = queue.subscribe(&routing_key).await?;
    info!(routing_key = %routing_key, "listening for replies");

    Ok(tokio::spawn(async move {
        loop {
            let payload = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                payload = replies.recv() => match payload {
                    Some(payload) => payload,
                    None => break,
                },
            };

            let reply: T = match serde_json::from_slice(&payload) {
                Ok(reply) => reply,
                Err(err) => {
                    error!(routing_key = %routing_key, error = %err, "undecodable reply");
                    continue;
                }
            };

            if let Err(err) = handler(reply).await {
                error!(routing_key = %routing_key, error = %err, "reply handling failed");
            }
        }

        replies.close();
        let mut pending = Vec::new();
        while let Ok(payload) = replies.try_recv() {
            pending.push(payload);
        }
        if !pending.is_empty() {
            info!(routing_key = %routing_key, count = pending.len(), "requeueing unhandled replies");
        }
        for payload in pending.into_iter().rev() {
            if let Err(err) = queue.requeue(&routing_key, payload).await {
                error!(routing_key = %routing_key, error = %err, "failed to requeue reply");
            }
        }
        debug!(routing_key = %routing_key, "reply listener stopped");
    }))
}
