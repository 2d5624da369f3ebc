//! Read-through caching of derived values.

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisCache;

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::error::Result;
use crate::version::cache_key;

/// Raw key/value store holding JSON documents.
#[async_trait]
pub trait CacheStore: Send + Sync + fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Typed read-through view over a [`CacheStore`] for one kind of value.
///
/// Without a store every read goes to the loader and evictions are no-ops.
pub struct ReadThroughCache<T> {
    store: Option<Arc<dyn CacheStore>>,
    kind: &'static str,
    ttl: Duration,
    _value: PhantomData<fn() -> T>,
}

impl<T> Clone for ReadThroughCache<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            kind: self.kind,
            ttl: self.ttl,
            _value: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ReadThroughCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadThroughCache")
            .field("kind", &self.kind)
            .field("ttl", &self.ttl)
            .field("enabled", &self.store.is_some())
            .finish()
    }
}

impl<T> ReadThroughCache<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(store: Option<Arc<dyn CacheStore>>, kind: &'static str, ttl: Duration) -> Self {
        Self {
            store,
            kind,
            ttl,
            _value: PhantomData,
        }
    }

    pub fn key(&self, id: &str) -> String {
        cache_key(self.kind, id)
    }

    /// Returns the cached value or loads, caches and returns it.
    ///
    /// Cache failures degrade to the loader. Loader errors are returned as is
    /// and nothing is cached.
    pub async fn get<F, Fut>(&self, id: &str, load: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        let Some(store) = &self.store else {
            return load().await;
        };

        let key = self.key(id);
        match store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => return Ok(value),
                Err(err) => warn!(key = %key, error = %err, "discarding undecodable cache entry"),
            },
            Ok(None) => debug!(key = %key, "cache miss"),
            Err(err) => warn!(key = %key, error = %err, "cache read failed"),
        }

        let value = load().await?;
        match serde_json::to_string(&value) {
            Ok(raw) => {
                if let Err(err) = store.set(&key, &raw, Some(self.ttl)).await {
                    warn!(key = %key, error = %err, "cache write failed");
                }
            }
            Err(err) => warn!(key = %key, error = %err, "unable to encode cache entry"),
        }

        Ok(value)
    }

    pub async fn evict(&self, id: &str) -> Result<()> {
        match &self.store {
            Some(store) => store.delete(&self.key(id)).await,
            None => Ok(()),
        }
    }

    /// Evicts only when the write that precedes it succeeded, so a failed
    /// write keeps serving the last persisted value.
    pub async fn evict_on_success(&self, id: &str, write: Result<()>) -> Result<()> {
        write?;
        self.evict(id).await
    }
}
