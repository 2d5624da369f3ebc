use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use tokio::sync::mpsc::{self, error::SendError};
use tokio::time::sleep;
use tracing::{error, trace};

use super::JobQueue;
use crate::error::{PipelineError, Result};

const CHANNEL_CAPACITY: usize = 64;

/// [`JobQueue`] over Redis lists named `fibr:<exchange>:<routing_key>`.
///
/// Producers `RPUSH`, consumers poll with `LPOP` so a listener never holds
/// the shared multiplexed connection in a blocking command.
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
    exchange: String,
    poll_interval: Duration,
}

impl fmt::Debug for RedisJobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisJobQueue")
            .field("exchange", &self.exchange)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl RedisJobQueue {
    pub fn new(conn: ConnectionManager, exchange: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            conn,
            exchange: exchange.into(),
            poll_interval,
        }
    }

    fn list_key(&self, routing_key: &str) -> String {
        format!("fibr:{}:{routing_key}", self.exchange)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(self.list_key(routing_key), payload)
            .await
            .map_err(|e| PipelineError::Queue(format!("Redis RPUSH failed: {e}")))
    }

    async fn subscribe(&self, routing_key: &str) -> Result<mpsc::Receiver<Vec<u8>>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut conn = self.conn.clone();
        let key = self.list_key(routing_key);
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            loop {
                if tx.is_closed() {
                    trace!(queue = %key, "reply stream closed; stopping poll loop");
                    break;
                }

                match conn.lpop::<_, Option<Vec<u8>>>(&key, None).await {
                    Ok(Some(payload)) => {
                        // Popped after the stream closed: hand it back.
                        if let Err(SendError(payload)) = tx.send(payload).await {
                            if let Err(err) = conn.lpush::<_, _, ()>(&key, payload).await {
                                error!(queue = %key, error = %err, "failed to requeue reply");
                            }
                            break;
                        }
                    }
                    Ok(None) => {
                        tokio::select! {
                            _ = tx.closed() => {}
                            _ = sleep(poll_interval) => {}
                        }
                    }
                    Err(err) => {
                        error!(queue = %key, error = %err, "queue polling failed");
                        tokio::select! {
                            _ = tx.closed() => {}
                            _ = sleep(poll_interval) => {}
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn requeue(&self, routing_key: &str, payload: Vec<u8>) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(self.list_key(routing_key), payload)
            .await
            .map_err(|e| PipelineError::Queue(format!("Redis LPUSH failed: {e}")))
    }
}
