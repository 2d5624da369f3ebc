use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::time::Instant;

use super::LockBackend;
use crate::error::Result;

#[derive(Debug, Clone)]
struct Lease {
    owner: String,
    expires_at: Instant,
}

/// Process-local [`LockBackend`].
#[derive(Debug, Default)]
pub struct LocalLock {
    leases: DashMap<String, Lease>,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.leases
            .get(key)
            .is_some_and(|lease| lease.expires_at > Instant::now())
    }
}

#[async_trait]
impl LockBackend for LocalLock {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let lease = Lease {
            owner: owner.to_string(),
            expires_at: now + ttl,
        };

        match self.leases.entry(key.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().expires_at <= now {
                    held.insert(lease);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(lease);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str, owner: &str) -> Result<()> {
        self.leases.remove_if(key, |_, lease| lease.owner == owner);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expired_leases_can_be_taken_over() {
        let lock = LocalLock::new();
        assert!(lock.try_acquire("k", "a", Duration::from_secs(10)).await.unwrap());
        assert!(!lock.try_acquire("k", "b", Duration::from_secs(10)).await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(lock.try_acquire("k", "b", Duration::from_secs(10)).await.unwrap());

        // a's lease expired, releasing must not drop b's lease
        lock.release("k", "a").await.unwrap();
        assert!(lock.is_held("k"));
        lock.release("k", "b").await.unwrap();
        assert!(!lock.is_held("k"));
    }
}
