//! Keyed record collections persisted as one JSON document and replicated
//! across instances through the [`Mirror`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use fibr_model::{Share, Webhook};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::exclusive::Exclusive;
use crate::mirror::Mirror;
use crate::storage::{Storage, load_json, save_json};

/// Element of a [`Collection`].
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> &str;
    /// Mirror message meaning "`id` was removed".
    fn tombstone(id: &str) -> Self;
    fn is_tombstone(&self) -> bool;
}

impl Record for Share {
    fn id(&self) -> &str {
        &self.id
    }

    fn tombstone(id: &str) -> Self {
        Share::tombstone(id)
    }

    fn is_tombstone(&self) -> bool {
        Share::is_tombstone(self)
    }
}

impl Record for Webhook {
    fn id(&self) -> &str {
        &self.id
    }

    fn tombstone(id: &str) -> Self {
        Webhook::tombstone(id)
    }

    fn is_tombstone(&self) -> bool {
        Webhook::is_tombstone(self)
    }
}

pub type Records<T> = BTreeMap<String, T>;

pub struct Collection<T: Record> {
    name: &'static str,
    path: String,
    channel: &'static str,
    storage: Arc<dyn Storage>,
    mirror: Arc<dyn Mirror>,
    exclusive: Exclusive,
    records: RwLock<Records<T>>,
}

impl<T: Record> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self
            .records
            .try_read()
            .map(|guard| guard.len())
            .unwrap_or_default();
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("channel", &self.channel)
            .field("count", &count)
            .finish()
    }
}

impl<T: Record> Collection<T> {
    pub fn new(
        name: &'static str,
        path: impl Into<String>,
        channel: &'static str,
        storage: Arc<dyn Storage>,
        mirror: Arc<dyn Mirror>,
        exclusive: Exclusive,
    ) -> Self {
        Self {
            name,
            path: path.into(),
            channel,
            storage,
            mirror,
            exclusive,
            records: RwLock::new(BTreeMap::new()),
        }
    }

    async fn read_persisted(&self) -> Result<Option<Records<T>>> {
        match load_json::<Records<T>>(self.storage.as_ref(), &self.path).await {
            Ok(records) => Ok(Some(records)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Replaces the in-memory records by the persisted document.
    pub async fn load(&self) -> Result<()> {
        let loaded = self.read_persisted().await?.unwrap_or_default();
        info!(collection = self.name, count = loaded.len(), "collection loaded");
        *self.records.write().await = loaded;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<T> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<T> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn any(&self, predicate: impl Fn(&T) -> bool) -> bool {
        self.records.read().await.values().any(predicate)
    }

    /// Applies `change` to the freshest records, persists them, then mirrors
    /// every changed record.
    ///
    /// Runs under the collection's exclusive lock and write lock. `change`
    /// returns its output and the changed records (tombstones for removals);
    /// nothing is written when it changed nothing. A failed write leaves the
    /// in-memory records untouched.
    pub async fn mutate<R, F>(&self, cancel: &CancellationToken, change: F) -> Result<R>
    where
        R: Send,
        F: FnOnce(&mut Records<T>) -> Result<(R, Vec<T>)> + Send,
    {
        self.exclusive
            .execute(cancel, self.name, None, || async {
                let mut records = self.records.write().await;
                let mut next = match self.read_persisted().await? {
                    Some(persisted) => persisted,
                    None => records.clone(),
                };

                let (output, changed) = change(&mut next)?;
                if changed.is_empty() {
                    *records = next;
                    return Ok(output);
                }

                save_json(self.storage.as_ref(), &self.path, &next).await?;
                *records = next;
                drop(records);

                for record in &changed {
                    self.publish(record).await;
                }

                Ok(output)
            })
            .await
    }

    async fn publish(&self, record: &T) {
        let payload = match serde_json::to_vec(record) {
            Ok(payload) => payload,
            Err(err) => {
                error!(collection = self.name, error = %err, "unable to encode mirror message");
                return;
            }
        };
        if let Err(err) = self.mirror.publish(self.channel, payload).await {
            error!(collection = self.name, id = record.id(), error = %err, "unable to mirror change");
        }
    }

    /// Applies a change published by any instance.
    pub async fn apply_mirror(&self, record: T) {
        let mut records = self.records.write().await;
        if record.is_tombstone() {
            debug!(collection = self.name, id = record.id(), "mirrored removal");
            records.remove(record.id());
        } else {
            debug!(collection = self.name, id = record.id(), "mirrored upsert");
            records.insert(record.id().to_string(), record);
        }
    }

    /// Follows the mirror channel until `cancel` fires.
    pub async fn spawn_mirror_listener(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let mut messages = self.mirror.subscribe(self.channel).await?;
        let collection = Arc::clone(self);

        Ok(tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    _ = cancel.cancelled() => break,
                    payload = messages.recv() => match payload {
                        Some(payload) => payload,
                        None => break,
                    },
                };

                match serde_json::from_slice::<T>(&payload) {
                    Ok(record) => collection.apply_mirror(record).await,
                    Err(err) => warn!(collection = collection.name, error = %err, "undecodable mirror message"),
                }
            }
            debug!(collection = collection.name, "mirror listener stopped");
        }))
    }
}
