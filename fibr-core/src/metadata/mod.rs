//! EXIF metadata of files and aggregates of directories.
//!
//! Metadata lives at `/.fibr<dir>/<id>.json`, aggregates at
//! `/.fibr<dir>/aggregate.json`. Both are served through a read-through
//! cache that is evicted only after a successful write.

mod aggregate;
mod events;
mod extractor;
pub mod location;
mod reply;

pub use extractor::{ExasClient, ExifExtractor};
pub use location::LocationTally;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use fibr_model::{Aggregate, Item, Metadata, MetadataAction};
use futures::{StreamExt, TryStreamExt, stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::cache::{CacheStore, ReadThroughCache};
use crate::config::{MetadataConfig, QueueConfig};
use crate::error::{PipelineError, Result};
use crate::exclusive::Exclusive;
use crate::queue::JobQueue;
use crate::storage::{Storage, load_json, metadata_pathname, save_json};

/// Name used by `force=<name>` hints.
pub const CONSUMER_NAME: &str = "metadata";

const AGGREGATE_FILENAME: &str = "aggregate.json";
const LIST_CONCURRENCY: usize = 8;

/// Pathname of the metadata document of a file.
pub fn metadata_path(item: &Item) -> String {
    metadata_pathname(item.dir(), &format!("{}.json", item.id))
}

/// Pathname of the aggregate document of a directory.
pub fn aggregate_path(item: &Item) -> String {
    metadata_pathname(&item.pathname, AGGREGATE_FILENAME)
}

/// Async extraction through the job queue.
#[derive(Clone)]
pub(crate) struct ExifJobs {
    queue: Arc<dyn JobQueue>,
    routing_key: String,
}

#[derive(Clone)]
pub struct MetadataService {
    storage: Arc<dyn Storage>,
    exclusive: Exclusive,
    exif_cache: ReadThroughCache<Metadata>,
    aggregate_cache: ReadThroughCache<Aggregate>,
    extractor: Option<Arc<dyn ExifExtractor>>,
    jobs: Option<ExifJobs>,
    config: MetadataConfig,
}

impl fmt::Debug for MetadataService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataService")
            .field("storage", &self.storage)
            .field("extractor", &self.extractor)
            .field("async_jobs", &self.jobs.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl MetadataService {
    pub fn new(
        storage: Arc<dyn Storage>,
        cache: Option<Arc<dyn CacheStore>>,
        exclusive: Exclusive,
        config: MetadataConfig,
    ) -> Self {
        Self {
            exif_cache: ReadThroughCache::new(cache.clone(), "exif", config.cache_ttl()),
            aggregate_cache: ReadThroughCache::new(cache, "aggregate", config.cache_ttl()),
            storage,
            exclusive,
            extractor: None,
            jobs: None,
            config,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ExifExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Publishes extraction requests instead of calling the extractor.
    pub fn with_job_queue(mut self, queue: Arc<dyn JobQueue>, config: &QueueConfig) -> Self {
        self.jobs = Some(ExifJobs {
            queue,
            routing_key: config.exif_routing_key.clone(),
        });
        self
    }

    pub fn enabled(&self) -> bool {
        self.extractor.is_some() || self.jobs.is_some()
    }

    /// Files the extractor accepts: media types within the size limit, any
    /// size when the extractor reads the storage directly.
    pub fn can_have_exif(&self, item: &Item) -> bool {
        if item.is_dir || !(item.is_image() || item.is_video() || item.is_pdf()) {
            return false;
        }
        self.config.direct_access || self.config.max_size == 0 || item.size <= self.config.max_size
    }

    pub async fn get_metadata_for(&self, item: &Item) -> Result<Metadata> {
        if item.is_dir {
            return Err(PipelineError::InvalidItemType(item.pathname.clone()));
        }

        let path = metadata_path(item);
        let storage = Arc::clone(&self.storage);
        self.exif_cache
            .get(&item.id, || async move { load_json::<Metadata>(storage.as_ref(), &path).await })
            .await
    }

    /// Metadata of every file in `items`, keyed by item id. Absent metadata
    /// and directories are skipped.
    pub async fn get_all_metadata_for(&self, items: &[Item]) -> Result<HashMap<String, Metadata>> {
        let found: Vec<Option<(String, Metadata)>> = stream::iter(items.iter().filter(|item| !item.is_dir))
            .map(|item| async move {
                match self.get_metadata_for(item).await {
                    Ok(metadata) => Ok(Some((item.id.clone(), metadata))),
                    Err(err) if err.is_expected_absence() => Ok(None),
                    Err(err) => Err(err),
                }
            })
            .buffered(LIST_CONCURRENCY)
            .try_collect()
            .await?;

        Ok(found.into_iter().flatten().collect())
    }

    /// Applies `actions` to the current metadata of `item` and persists the
    /// result, serialized per item across instances.
    pub async fn update(
        &self,
        cancel: &CancellationToken,
        item: &Item,
        actions: Vec<MetadataAction>,
    ) -> Result<Metadata> {
        self.exclusive
            .execute(cancel, &item.id, None, || async {
                let current = match self.get_metadata_for(item).await {
                    Ok(metadata) => metadata,
                    Err(err) if err.is_not_found() => Metadata::default(),
                    Err(err) => {
                        error!(item = %item.pathname, error = %err, "unable to load metadata, starting from scratch");
                        Metadata::default()
                    }
                };

                let updated = MetadataAction::apply_all(actions, current);
                let written = save_json(self.storage.as_ref(), &metadata_path(item), &updated).await;
                self.exif_cache.evict_on_success(&item.id, written).await?;

                Ok(updated)
            })
            .await
    }

    pub async fn has_metadata(&self, item: &Item) -> bool {
        let path = if item.is_dir {
            aggregate_path(item)
        } else {
            metadata_path(item)
        };
        match self.storage.stat(&path).await {
            Ok(found) => found.is_some(),
            Err(err) => {
                debug!(item = %item.pathname, error = %err, "unable to stat metadata");
                false
            }
        }
    }

    pub async fn get_aggregate_for(&self, item: &Item) -> Result<Aggregate> {
        if !item.is_dir {
            return Err(PipelineError::InvalidItemType(item.pathname.clone()));
        }

        let path = aggregate_path(item);
        let storage = Arc::clone(&self.storage);
        self.aggregate_cache
            .get(&item.id, || async move { load_json::<Aggregate>(storage.as_ref(), &path).await })
            .await
    }

    /// Aggregates of every directory in `items`, keyed by item id.
    pub async fn get_all_aggregate_for(&self, items: &[Item]) -> Result<HashMap<String, Aggregate>> {
        let found: Vec<Option<(String, Aggregate)>> = stream::iter(items.iter().filter(|item| item.is_dir))
            .map(|item| async move {
                match self.get_aggregate_for(item).await {
                    Ok(aggregate) => Ok(Some((item.id.clone(), aggregate))),
                    Err(err) if err.is_expected_absence() => Ok(None),
                    Err(err) => Err(err),
                }
            })
            .buffered(LIST_CONCURRENCY)
            .try_collect()
            .await?;

        Ok(found.into_iter().flatten().collect())
    }

    pub async fn save_aggregate_for(&self, item: &Item, aggregate: &Aggregate) -> Result<()> {
        if !item.is_dir {
            return Err(PipelineError::InvalidItemType(item.pathname.clone()));
        }
        let written = save_json(self.storage.as_ref(), &aggregate_path(item), aggregate).await;
        self.aggregate_cache.evict_on_success(&item.id, written).await
    }

    pub(crate) fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }
}
