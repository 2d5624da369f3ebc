//! Named mutual exclusion across every fibr instance sharing a lock backend.

mod local;
#[cfg(feature = "redis")]
mod redis;

pub use local::LocalLock;
#[cfg(feature = "redis")]
pub use self::redis::RedisLock;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

use crate::config::ExclusiveConfig;
use crate::error::{PipelineError, Result};
use crate::version::mutex_key;

/// TTL lock primitive. Owners are opaque tokens; a lock is only released by
/// the owner that acquired it.
#[async_trait]
pub trait LockBackend: Send + Sync + fmt::Debug {
    /// Returns `true` when `key` was free (or expired) and is now held by `owner`.
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool>;

    /// Releases `key` if and only if `owner` still holds it.
    async fn release(&self, key: &str, owner: &str) -> Result<()>;
}

/// Runs actions while holding a named lock.
///
/// Without a backend actions run directly, which is correct for a single
/// instance deployment.
#[derive(Clone)]
pub struct Exclusive {
    backend: Option<Arc<dyn LockBackend>>,
    ttl: Duration,
    retry_interval: Duration,
}

impl fmt::Debug for Exclusive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exclusive")
            .field("backend", &self.backend)
            .field("ttl", &self.ttl)
            .field("retry_interval", &self.retry_interval)
            .finish()
    }
}

impl Exclusive {
    pub fn new(backend: Option<Arc<dyn LockBackend>>, config: &ExclusiveConfig) -> Self {
        Self {
            backend,
            ttl: config.ttl(),
            retry_interval: config.retry_interval(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, &ExclusiveConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Waits for the lock `name`, runs `action`, releases the lock.
    ///
    /// Contention is retried every `retry_interval` until acquired or
    /// `cancel` fires. Backend failures are returned, never mistaken for
    /// contention.
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        name: &str,
        ttl: Option<Duration>,
        action: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let Some(backend) = &self.backend else {
            return action().await;
        };

        let key = mutex_key(name);
        let owner = Uuid::now_v7().to_string();
        let ttl = ttl.unwrap_or(self.ttl);

        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled(format!("waiting for lock {name}")));
            }
            if backend.try_acquire(&key, &owner, ttl).await? {
                break;
            }
            debug!(lock = %name, "lock is held elsewhere, retrying");
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(PipelineError::Cancelled(format!("waiting for lock {name}")));
                }
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }

        Self::run_and_release(backend.as_ref(), &key, &owner, action).await
    }

    /// Single acquisition attempt. `Ok(None)` means the lock was held
    /// elsewhere and `action` did not run.
    pub async fn try_execute<T, F, Fut>(
        &self,
        name: &str,
        ttl: Option<Duration>,
        action: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let Some(backend) = &self.backend else {
            return action().await.map(Some);
        };

        let key = mutex_key(name);
        let owner = Uuid::now_v7().to_string();
        if !backend
            .try_acquire(&key, &owner, ttl.unwrap_or(self.ttl))
            .await?
        {
            debug!(lock = %name, "lock is held elsewhere, skipping");
            return Ok(None);
        }

        Self::run_and_release(backend.as_ref(), &key, &owner, action)
            .await
            .map(Some)
    }

    async fn run_and_release<T, F, Fut>(
        backend: &dyn LockBackend,
        key: &str,
        owner: &str,
        action: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let result = action().await;

        match backend.release(key, owner).await {
            Ok(()) => result,
            Err(release_err) => {
                error!(lock = %key, error = %release_err, "unable to release lock");
                match result {
                    Ok(_) => Err(release_err),
                    Err(err) => Err(err),
                }
            }
        }
    }
}
