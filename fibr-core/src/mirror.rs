//! Cross-instance replication of collection mutations.
//!
//! Every change to the share or webhook collection is published on a channel
//! so that other instances apply it to their in-memory copy without
//! reloading the persisted document.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

pub const SHARE_CHANNEL: &str = "fibr:share";
pub const WEBHOOK_CHANNEL: &str = "fibr:webhook";

#[async_trait]
pub trait Mirror: Send + Sync + fmt::Debug {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()>;

    /// Messages published on `channel` by any instance, this one included.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<Vec<u8>>>;
}

/// Single instance deployments: nothing to replicate.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMirror;

#[async_trait]
impl Mirror for NoopMirror {
    async fn publish(&self, _channel: &str, _payload: Vec<u8>) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&self, _channel: &str) -> Result<mpsc::Receiver<Vec<u8>>> {
        // Sender dropped right away: the stream ends immediately.
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}

#[cfg(feature = "redis")]
pub use self::redis_mirror::RedisMirror;

#[cfg(feature = "redis")]
mod redis_mirror {
    use std::fmt;

    use async_trait::async_trait;
    use futures::StreamExt;
    use redis::{AsyncCommands, aio::ConnectionManager};
    use tokio::sync::mpsc;
    use tracing::{error, trace};

    use super::Mirror;
    use crate::error::{PipelineError, Result};

    const CHANNEL_CAPACITY: usize = 128;

    /// [`Mirror`] over Redis `PUBLISH`/`SUBSCRIBE`.
    #[derive(Clone)]
    pub struct RedisMirror {
        client: redis::Client,
        conn: ConnectionManager,
    }

    impl fmt::Debug for RedisMirror {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("RedisMirror")
                .field("connection", &"ConnectionManager")
                .finish()
        }
    }

    impl RedisMirror {
        pub fn new(client: redis::Client, conn: ConnectionManager) -> Self {
            Self { client, conn }
        }
    }

    #[async_trait]
    impl Mirror for RedisMirror {
        async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
            let mut conn = self.conn.clone();
            conn.publish::<_, _, ()>(channel, payload)
                .await
                .map_err(|e| PipelineError::Queue(format!("Redis PUBLISH failed: {e}")))
        }

        async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<Vec<u8>>> {
            let mut pubsub = self
                .client
                .get_async_pubsub()
                .await
                .map_err(|e| PipelineError::Queue(format!("Redis pubsub connection failed: {e}")))?;
            pubsub
                .subscribe(channel)
                .await
                .map_err(|e| PipelineError::Queue(format!("Redis SUBSCRIBE failed: {e}")))?;

            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            let channel = channel.to_owned();

            tokio::spawn(async move {
                let mut messages = pubsub.into_on_message();
                while let Some(message) = messages.next().await {
                    let payload = message.get_payload_bytes().to_vec();
                    if tx.send(payload).await.is_err() {
                        trace!(channel = %channel, "mirror stream dropped");
                        return;
                    }
                }
                error!(channel = %channel, "mirror subscription ended");
            });

            Ok(rx)
        }
    }
}
