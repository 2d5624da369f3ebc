use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::debug;

use super::CacheStore;
use crate::error::{PipelineError, Result};

/// [`CacheStore`] shared by every fibr instance through Redis.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        debug!("Cache GET: {}", key);
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| PipelineError::Cache(format!("Redis GET failed: {e}")))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        debug!("Cache SET: {} (TTL: {:?})", key, ttl);
        let mut conn = self.conn.clone();

        match ttl {
            Some(ttl) if ttl.as_secs() > 0 => conn
                .set_ex::<_, _, ()>(key, value, ttl.as_secs())
                .await
                .map_err(|e| PipelineError::Cache(format!("Redis SETEX failed: {e}"))),
            _ => conn
                .set::<_, _, ()>(key, value)
                .await
                .map_err(|e| PipelineError::Cache(format!("Redis SET failed: {e}"))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        debug!("Cache DELETE: {}", key);
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| PipelineError::Cache(format!("Redis DEL failed: {e}")))
    }
}
