//! Composition of the adapters, services and background tasks.

use std::fmt;
use std::sync::Arc;

use fibr_model::{ExifReply, JobRequest};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{Consumer, EventBus, EventPublisher};
use crate::cache::CacheStore;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::exclusive::{Exclusive, LockBackend};
use crate::metadata::{ExasClient, ExifExtractor, MetadataService};
use crate::mirror::{Mirror, NoopMirror};
use crate::queue::{JobQueue, spawn_reply_listener};
use crate::sanitizer::Sanitizer;
use crate::share::ShareService;
use crate::storage::Storage;
use crate::thumbnail::{Renderer, ThumbnailService, VithClient};
use crate::webhook::WebhookService;
use crate::{metadata, share, thumbnail, webhook};

/// External collaborators of the pipeline. Only storage is mandatory.
#[derive(Clone)]
pub struct Adapters {
    pub storage: Arc<dyn Storage>,
    pub cache: Option<Arc<dyn CacheStore>>,
    pub lock: Option<Arc<dyn LockBackend>>,
    pub mirror: Arc<dyn Mirror>,
    pub queue: Option<Arc<dyn JobQueue>>,
    /// Defaults to an HTTP client of `metadata.exas_url` when configured.
    pub extractor: Option<Arc<dyn ExifExtractor>>,
    /// Defaults to an HTTP client of `thumbnail.vith_url` when configured.
    pub renderer: Option<Arc<dyn Renderer>>,
}

impl Adapters {
    /// Single instance setup: no cache, no lock, no replication.
    pub fn local(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            cache: None,
            lock: None,
            mirror: Arc::new(NoopMirror),
            queue: None,
            extractor: None,
            renderer: None,
        }
    }
}

impl fmt::Debug for Adapters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapters")
            .field("storage", &self.storage)
            .field("cache", &self.cache)
            .field("lock", &self.lock)
            .field("mirror", &self.mirror)
            .field("queue", &self.queue)
            .field("extractor", &self.extractor)
            .field("renderer", &self.renderer)
            .finish()
    }
}

#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    bus: Arc<EventBus>,
    metadata: Arc<MetadataService>,
    thumbnail: Arc<ThumbnailService>,
    shares: Arc<ShareService>,
    webhooks: Arc<WebhookService>,
    sanitizer: Sanitizer,
    queue: Option<Arc<dyn JobQueue>>,
}

/// Background tasks of a started [`Pipeline`].
#[derive(Debug)]
pub struct RunningPipeline {
    bus: JoinHandle<()>,
    /// Stopped once the bus drained, so that late events still reach them.
    services_cancel: CancellationToken,
    services: Vec<JoinHandle<()>>,
    listeners: Vec<JoinHandle<()>>,
}

impl RunningPipeline {
    /// Waits for the bus to drain, then stops the services.
    pub async fn join(self) {
        if let Err(err) = self.bus.await {
            error!(error = %err, "event bus task failed");
        }

        self.services_cancel.cancel();
        for handle in self.services.into_iter().chain(self.listeners) {
            if let Err(err) = handle.await {
                error!(error = %err, "pipeline task failed");
            }
        }
        info!("pipeline stopped");
    }
}

impl Pipeline {
    pub fn build(config: PipelineConfig, adapters: Adapters) -> Result<Self> {
        config.validate()?;

        let Adapters {
            storage,
            cache,
            lock,
            mirror,
            queue,
            extractor,
            renderer,
        } = adapters;

        let exclusive = Exclusive::new(lock, &config.exclusive);
        let queue = if config.queue.enabled {
            if queue.is_none() {
                return Err(PipelineError::Config(
                    "queue.enabled requires a job queue".into(),
                ));
            }
            queue
        } else {
            None
        };

        let extractor = match (extractor, config.metadata.exas_url.as_deref()) {
            (Some(extractor), _) => Some(extractor),
            (None, Some(url)) => {
                Some(Arc::new(ExasClient::new(url, &config.metadata)?) as Arc<dyn ExifExtractor>)
            }
            (None, None) => None,
        };
        let renderer = match (renderer, config.thumbnail.vith_url.as_deref()) {
            (Some(renderer), _) => Some(renderer),
            (None, Some(url)) => {
                Some(Arc::new(VithClient::new(url, &config.thumbnail)?) as Arc<dyn Renderer>)
            }
            (None, None) => None,
        };

        let mut metadata = MetadataService::new(
            Arc::clone(&storage),
            cache.clone(),
            exclusive.clone(),
            config.metadata.clone(),
        );
        if let Some(extractor) = extractor {
            metadata = metadata.with_extractor(extractor);
        }

        let mut thumbnail = ThumbnailService::new(Arc::clone(&storage), cache, config.thumbnail.clone());
        if let Some(renderer) = renderer {
            thumbnail = thumbnail.with_renderer(renderer);
        }

        if let Some(queue) = &queue {
            metadata = metadata.with_job_queue(Arc::clone(queue), &config.queue);
            thumbnail = thumbnail.with_job_queue(Arc::clone(queue), &config.queue);
        }

        let shares = ShareService::new(
            Arc::clone(&storage),
            Arc::clone(&mirror),
            exclusive.clone(),
            config.share,
        );
        let webhooks = WebhookService::new(
            Arc::clone(&storage),
            mirror,
            exclusive.clone(),
            config.webhook.clone(),
        )?;

        let bus = Arc::new(EventBus::new(config.bus));
        let sanitizer = Sanitizer::new(
            storage,
            exclusive,
            Arc::clone(&bus) as Arc<dyn EventPublisher>,
            config.sanitizer,
        );

        Ok(Self {
            config,
            bus,
            metadata: Arc::new(metadata),
            thumbnail: Arc::new(thumbnail),
            shares: Arc::new(shares),
            webhooks: Arc::new(webhooks),
            sanitizer,
            queue,
        })
    }

    /// Entry point for storage mutations.
    pub fn publisher(&self) -> Arc<dyn EventPublisher> {
        Arc::clone(&self.bus) as Arc<dyn EventPublisher>
    }

    pub fn metadata(&self) -> &Arc<MetadataService> {
        &self.metadata
    }

    pub fn thumbnail(&self) -> &Arc<ThumbnailService> {
        &self.thumbnail
    }

    pub fn shares(&self) -> &Arc<ShareService> {
        &self.shares
    }

    pub fn webhooks(&self) -> &Arc<WebhookService> {
        &self.webhooks
    }

    /// Consumers in configured order.
    fn consumers(&self) -> Result<Vec<Arc<dyn Consumer>>> {
        self.config
            .consumers
            .iter()
            .map(|name| -> Result<Arc<dyn Consumer>> {
                match name.as_str() {
                    share::CONSUMER_NAME => Ok(Arc::clone(&self.shares) as Arc<dyn Consumer>),
                    thumbnail::CONSUMER_NAME => Ok(Arc::clone(&self.thumbnail) as Arc<dyn Consumer>),
                    metadata::CONSUMER_NAME => Ok(Arc::clone(&self.metadata) as Arc<dyn Consumer>),
                    webhook::CONSUMER_NAME => Ok(Arc::clone(&self.webhooks) as Arc<dyn Consumer>),
                    other => Err(PipelineError::Config(format!("unknown consumer `{other}`"))),
                }
            })
            .collect()
    }

    /// Loads the collections and starts every background task.
    ///
    /// The bus and reply listeners stop on `cancel`; the collection
    /// services keep running until the bus drained.
    pub async fn start(&self, cancel: CancellationToken) -> Result<RunningPipeline> {
        let services_cancel = CancellationToken::new();

        let mut services = self.shares.start(services_cancel.clone()).await?;
        services.extend(self.webhooks.start(services_cancel.clone()).await?);

        let listeners = self.spawn_reply_listeners(&cancel).await?;
        let bus = self.bus.start(cancel, self.consumers()?)?;

        Ok(RunningPipeline {
            bus,
            services_cancel,
            services,
            listeners,
        })
    }

    async fn spawn_reply_listeners(&self, cancel: &CancellationToken) -> Result<Vec<JoinHandle<()>>> {
        let Some(queue) = &self.queue else {
            debug!("job queue disabled, no reply listener");
            return Ok(Vec::new());
        };

        let metadata = Arc::clone(&self.metadata);
        let reply_cancel = cancel.clone();
        let exif = spawn_reply_listener(
            Arc::clone(queue),
            self.config.queue.exif_reply_routing_key.clone(),
            cancel.clone(),
            move |reply: ExifReply| {
                let metadata = Arc::clone(&metadata);
                let cancel = reply_cancel.clone();
                async move { metadata.handle_exif_reply(&cancel, reply).await }
            },
        )
        .await?;

        let thumbnail = Arc::clone(&self.thumbnail);
        let thumbnails = spawn_reply_listener(
            Arc::clone(queue),
            self.config.queue.thumbnail_reply_routing_key.clone(),
            cancel.clone(),
            move |reply: JobRequest| {
                let thumbnail = Arc::clone(&thumbnail);
                async move { thumbnail.handle_thumbnail_reply(reply).await }
            },
        )
        .await?;

        Ok(vec![exif, thumbnails])
    }

    /// Starts the pipeline, runs the startup scan, then serves until `cancel`
    /// fires and everything drained.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let running = self.start(cancel.clone()).await?;

        match self.sanitizer.run(&cancel).await {
            Ok(Some(report)) => debug!(?report, "startup scan complete"),
            Ok(None) => {}
            Err(err) if cancel.is_cancelled() => warn!(error = %err, "startup scan interrupted"),
            Err(err) => error!(error = %err, "startup scan failed"),
        }

        cancel.cancelled().await;
        info!("shutting down pipeline");
        running.join().await;
        Ok(())
    }
}
