//! Public share links.

mod events;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fibr_model::{Share, has_path_prefix, normalize_pathname};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::collection::Collection;
use crate::config::ShareConfig;
use crate::error::{PipelineError, Result};
use crate::exclusive::Exclusive;
use crate::mirror::{Mirror, SHARE_CHANNEL};
use crate::storage::{METADATA_DIRECTORY, Storage};

pub const CONSUMER_NAME: &str = "share";

const SHARE_ID_LEN: usize = 8;
const MAX_ID_ATTEMPTS: usize = 16;

/// Input of [`ShareService::create`].
#[derive(Debug, Clone, Default)]
pub struct NewShare {
    pub path: String,
    pub edit: bool,
    /// Stored as given, hashing is the caller's concern.
    pub password: String,
    pub file: bool,
    pub duration: Duration,
}

pub struct ShareService {
    shares: Arc<Collection<Share>>,
    config: ShareConfig,
}

impl fmt::Debug for ShareService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareService")
            .field("shares", &self.shares)
            .field("config", &self.config)
            .finish()
    }
}

impl ShareService {
    pub fn new(
        storage: Arc<dyn Storage>,
        mirror: Arc<dyn Mirror>,
        exclusive: Exclusive,
        config: ShareConfig,
    ) -> Self {
        Self {
            shares: Arc::new(Collection::new(
                "share",
                format!("{METADATA_DIRECTORY}/shares.json"),
                SHARE_CHANNEL,
                storage,
                mirror,
                exclusive,
            )),
            config,
        }
    }

    /// Loads the persisted shares, then follows the mirror and purges
    /// expired shares periodically until `cancel` fires.
    pub async fn start(&self, cancel: CancellationToken) -> Result<Vec<JoinHandle<()>>> {
        self.shares.load().await?;

        let mirror = self.shares.spawn_mirror_listener(cancel.clone()).await?;
        let purge = self.spawn_purge(cancel);
        Ok(vec![mirror, purge])
    }

    fn spawn_purge(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let shares = Arc::clone(&self.shares);
        let period = Duration::from_secs(self.config.purge_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match purge_expired(&shares, &cancel, Utc::now()).await {
                            Ok(0) => {}
                            Ok(purged) => info!(purged, "expired shares purged"),
                            Err(err) => error!(error = %err, "unable to purge expired shares"),
                        }
                    }
                }
            }
        })
    }

    pub async fn create(&self, cancel: &CancellationToken, request: NewShare) -> Result<String> {
        let path = normalize_pathname(&request.path);
        let root_name = fibr_model::paths::base_name(&path).to_string();

        self.shares
            .mutate(cancel, move |records| {
                let id = (0..MAX_ID_ATTEMPTS)
                    .map(|_| generate_id(&path))
                    .find(|id| !records.contains_key(id))
                    .ok_or_else(|| PipelineError::Internal("unable to generate a share id".into()))?;

                let share = Share {
                    id: id.clone(),
                    path,
                    root_name,
                    edit: request.edit,
                    password: request.password,
                    file: request.file,
                    creation: Utc::now(),
                    duration: request.duration,
                };
                records.insert(id.clone(), share.clone());
                Ok((id, vec![share]))
            })
            .await
    }

    pub async fn delete(&self, cancel: &CancellationToken, id: &str) -> Result<()> {
        let id = id.to_string();
        self.shares
            .mutate(cancel, move |records| match records.remove(&id) {
                Some(_) => Ok(((), vec![Share::tombstone(id)])),
                None => Err(PipelineError::NotFound(format!("share {id}"))),
            })
            .await
    }

    pub async fn get(&self, id: &str) -> Option<Share> {
        self.shares.get(id).await
    }

    pub async fn list(&self) -> Vec<Share> {
        self.shares.snapshot().await
    }

    /// Share granting access to `request_path`: the live share with the
    /// longest path containing it.
    pub async fn find_for_path(&self, request_path: &str) -> Option<Share> {
        let request_path = normalize_pathname(request_path);
        let now = Utc::now();
        self.shares
            .snapshot()
            .await
            .into_iter()
            .filter(|share| !share.is_expired(now) && has_path_prefix(&request_path, &share.path))
            .max_by_key(|share| share.path.len())
    }

    pub async fn purge_expired(&self, cancel: &CancellationToken, now: DateTime<Utc>) -> Result<usize> {
        purge_expired(&self.shares, cancel, now).await
    }

    pub(crate) fn collection(&self) -> &Collection<Share> {
        &self.shares
    }
}

async fn purge_expired(
    shares: &Collection<Share>,
    cancel: &CancellationToken,
    now: DateTime<Utc>,
) -> Result<usize> {
    if !shares.any(|share| share.is_expired(now)).await {
        return Ok(0);
    }

    shares
        .mutate(cancel, move |records| {
            let expired: Vec<String> = records
                .values()
                .filter(|share| share.is_expired(now))
                .map(|share| share.id.clone())
                .collect();
            for id in &expired {
                debug!(share = %id, "share expired");
                records.remove(id);
            }
            let tombstones = expired.iter().map(|id| Share::tombstone(id.as_str())).collect();
            Ok((expired.len(), tombstones))
        })
        .await
}

fn generate_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(path.as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(SHARE_ID_LEN);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_short_hex() {
        let id = generate_id("/site");
        assert_eq!(id.len(), SHARE_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_id("/site"));
    }
}
