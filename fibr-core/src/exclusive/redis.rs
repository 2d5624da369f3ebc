use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::LockBackend;
use crate::error::{PipelineError, Result};

/// Redis scripts for atomic operations
mod scripts {
    use redis::Script;

    /// Deletes the lock only when it still belongs to the caller.
    pub fn compare_and_delete() -> Script {
        Script::new(
            r#"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('DEL', KEYS[1])
            end
            return 0
            "#,
        )
    }
}

/// [`LockBackend`] shared by every instance through Redis `SET NX PX`.
#[derive(Clone)]
pub struct RedisLock {
    conn: ConnectionManager,
    release: std::sync::Arc<redis::Script>,
}

impl fmt::Debug for RedisLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisLock")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisLock {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            release: std::sync::Arc::new(scripts::compare_and_delete()),
        }
    }
}

#[async_trait]
impl LockBackend for RedisLock {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| PipelineError::Lock(format!("Redis SET NX failed: {e}")))?;

        debug!(lock = %key, acquired = reply.is_some(), "lock attempt");
        Ok(reply.is_some())
    }

    async fn release(&self, key: &str, owner: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        self.release
            .key(key)
            .arg(owner)
            .invoke_async::<i64>(&mut conn)
            .await
            .map_err(|e| PipelineError::Lock(format!("Redis lock release failed: {e}")))?;
        Ok(())
    }
}
