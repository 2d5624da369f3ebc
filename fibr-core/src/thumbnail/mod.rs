//! Thumbnails and adaptive streams of media files.

mod events;
mod renderer;
mod reply;
mod stream;

pub use renderer::{BITRATE_HEADER, Renderer, VithClient};

use std::fmt;
use std::sync::Arc;

use fibr_model::{Item, JobRequest, JobType};
use tracing::debug;

use crate::cache::{CacheStore, ReadThroughCache};
use crate::config::{QueueConfig, ThumbnailConfig};
use crate::error::{PipelineError, Result};
use crate::queue::{JobQueue, publish_json};
use crate::storage::{Storage, metadata_pathname};

/// Name used by `force=<name>` hints.
pub const CONSUMER_NAME: &str = "thumbnail";

#[derive(Clone)]
pub(crate) struct RenderJobs {
    queue: Arc<dyn JobQueue>,
    thumbnail_key: String,
    stream_key: String,
}

#[derive(Clone)]
pub struct ThumbnailService {
    storage: Arc<dyn Storage>,
    renderer: Option<Arc<dyn Renderer>>,
    jobs: Option<RenderJobs>,
    presence: ReadThroughCache<bool>,
    config: ThumbnailConfig,
}

impl fmt::Debug for ThumbnailService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbnailService")
            .field("storage", &self.storage)
            .field("renderer", &self.renderer)
            .field("async_jobs", &self.jobs.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl ThumbnailService {
    pub fn new(
        storage: Arc<dyn Storage>,
        cache: Option<Arc<dyn CacheStore>>,
        config: ThumbnailConfig,
    ) -> Self {
        Self {
            presence: ReadThroughCache::new(cache, "thumbnail", config.cache_ttl()),
            storage,
            renderer: None,
            jobs: None,
            config,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Publishes rendering jobs instead of calling the renderer.
    pub fn with_job_queue(mut self, queue: Arc<dyn JobQueue>, config: &QueueConfig) -> Self {
        self.jobs = Some(RenderJobs {
            queue,
            thumbnail_key: config.thumbnail_routing_key.clone(),
            stream_key: config.stream_routing_key.clone(),
        });
        self
    }

    pub fn enabled(&self) -> bool {
        self.renderer.is_some() || self.jobs.is_some()
    }

    pub fn can_have_thumbnail(&self, item: &Item) -> bool {
        if JobType::for_item(item).is_none() {
            return false;
        }
        self.config.direct_access || self.config.max_size == 0 || item.size <= self.config.max_size
    }

    /// `/.fibr<dir>/<id>.webp`, `<id>_large.webp` for the large scale.
    pub fn path_for_scale(&self, item: &Item, scale: u64) -> String {
        let name = if scale == self.config.large_size && scale != self.config.small_size {
            format!("{}_large.webp", item.id)
        } else {
            format!("{}.webp", item.id)
        };
        metadata_pathname(item.dir(), &name)
    }

    /// `/.fibr<dir>/<id>.m3u8`
    pub fn stream_path(&self, item: &Item) -> String {
        metadata_pathname(item.dir(), &format!("{}.m3u8", item.id))
    }

    pub async fn has_thumbnail(&self, item: &Item, scale: u64) -> bool {
        self.exists(&self.path_for_scale(item, scale)).await
    }

    pub async fn has_stream(&self, item: &Item) -> bool {
        self.exists(&self.stream_path(item)).await
    }

    async fn exists(&self, pathname: &str) -> bool {
        let storage = Arc::clone(&self.storage);
        let owned = pathname.to_string();
        match self
            .presence
            .get(pathname, || async move { Ok(storage.stat(&owned).await?.is_some()) })
            .await
        {
            Ok(found) => found,
            Err(err) => {
                debug!(path = %pathname, error = %err, "unable to check artifact");
                false
            }
        }
    }

    /// Produces the thumbnail of `item` at `scale`, through the queue when
    /// configured.
    pub(crate) async fn generate(&self, item: &Item, scale: u64) -> Result<()> {
        let output = self.path_for_scale(item, scale);
        let kind = JobType::for_item(item)
            .ok_or_else(|| PipelineError::InvalidItemType(item.pathname.clone()))?;

        if let Some(jobs) = &self.jobs {
            let request = JobRequest {
                input: item.pathname.clone(),
                output,
                scale: Some(scale),
                kind,
            };
            return publish_json(jobs.queue.as_ref(), &jobs.thumbnail_key, &request).await;
        }

        let Some(renderer) = &self.renderer else {
            return Ok(());
        };

        let content = if renderer.direct_access() {
            None
        } else {
            Some(self.storage.read(&item.pathname).await?)
        };
        let image = renderer.thumbnail(item, scale, content).await?;
        self.storage.write(&output, &image).await
    }
}
