//! Outbound notifications of storage events.
//!
//! Registrations live in a mirrored [`Collection`]. Matching events are
//! batched per webhook by a [`GroupDebouncer`] and posted once the webhook
//! has been quiet for the configured window.

mod dispatch;
mod events;
mod payload;

pub use dispatch::{Dispatcher, SIGNATURE_HEADER, sign};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use fibr_model::{Event, EventType, Webhook, WebhookKind, normalize_pathname};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::collection::Collection;
use crate::config::WebhookConfig;
use crate::debounce::GroupDebouncer;
use crate::error::{PipelineError, Result};
use crate::exclusive::Exclusive;
use crate::mirror::{Mirror, WEBHOOK_CHANNEL};
use crate::storage::{METADATA_DIRECTORY, Storage};

pub const CONSUMER_NAME: &str = "webhook";

/// Input of [`WebhookService::create`].
#[derive(Debug, Clone, Default)]
pub struct NewWebhook {
    pub pathname: String,
    pub recursive: bool,
    pub kind: WebhookKind,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub types: Vec<EventType>,
}

/// One matched event, with the registration as it was when matched.
#[derive(Debug, Clone)]
struct Delivery {
    webhook: Webhook,
    event: Event,
}

pub struct WebhookService {
    hooks: Arc<Collection<Webhook>>,
    dispatcher: Arc<Dispatcher>,
    debouncer: OnceLock<GroupDebouncer<Delivery>>,
    config: WebhookConfig,
}

impl fmt::Debug for WebhookService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookService")
            .field("hooks", &self.hooks)
            .field("debouncer", &self.debouncer.get())
            .field("window", &self.config.debounce())
            .finish()
    }
}

impl WebhookService {
    pub fn new(
        storage: Arc<dyn Storage>,
        mirror: Arc<dyn Mirror>,
        exclusive: Exclusive,
        config: WebhookConfig,
    ) -> Result<Self> {
        Ok(Self {
            hooks: Arc::new(Collection::new(
                "webhook",
                format!("{METADATA_DIRECTORY}/webhooks.json"),
                WEBHOOK_CHANNEL,
                storage,
                mirror,
                exclusive,
            )),
            dispatcher: Arc::new(Dispatcher::new(&config)?),
            debouncer: OnceLock::new(),
            config,
        })
    }

    /// Loads the registrations, follows the mirror and starts batching.
    ///
    /// Until started, matched events are delivered one by one.
    pub async fn start(&self, cancel: CancellationToken) -> Result<Vec<JoinHandle<()>>> {
        self.hooks.load().await?;
        let mirror = self.hooks.spawn_mirror_listener(cancel.clone()).await?;

        let dispatcher = Arc::clone(&self.dispatcher);
        let (debouncer, flusher) =
            GroupDebouncer::start(cancel, self.config.debounce(), move |id, deliveries| {
                let dispatcher = Arc::clone(&dispatcher);
                async move { flush(&dispatcher, id, deliveries).await }
            });

        if self.debouncer.set(debouncer).is_err() {
            return Err(PipelineError::Internal("webhook service started twice".into()));
        }

        Ok(vec![mirror, flusher])
    }

    pub async fn create(&self, cancel: &CancellationToken, request: NewWebhook) -> Result<String> {
        if request.url.is_empty() {
            return Err(PipelineError::Config("webhook url is required".into()));
        }
        if request.types.is_empty() {
            return Err(PipelineError::Config("webhook needs at least one event type".into()));
        }

        let candidate = Webhook {
            id: Uuid::new_v4().simple().to_string(),
            pathname: normalize_pathname(&request.pathname),
            recursive: request.recursive,
            kind: request.kind,
            url: request.url,
            headers: request.headers,
            types: request.types,
            created: Utc::now(),
        };

        self.hooks
            .mutate(cancel, move |records| {
                if let Some(existing) = records.values().find(|hook| hook.similar(&candidate)) {
                    debug!(webhook = %existing.id, "similar webhook already registered");
                    return Ok((existing.id.clone(), Vec::new()));
                }
                let id = candidate.id.clone();
                records.insert(id.clone(), candidate.clone());
                info!(webhook = %id, pathname = %candidate.pathname, kind = %candidate.kind, "webhook registered");
                Ok((id, vec![candidate]))
            })
            .await
    }

    pub async fn delete(&self, cancel: &CancellationToken, id: &str) -> Result<()> {
        let id = id.to_string();
        self.hooks
            .mutate(cancel, move |records| match records.remove(&id) {
                Some(_) => Ok(((), vec![Webhook::tombstone(id)])),
                None => Err(PipelineError::NotFound(format!("webhook {id}"))),
            })
            .await
    }

    pub async fn get(&self, id: &str) -> Option<Webhook> {
        self.hooks.get(id).await
    }

    pub async fn list(&self) -> Vec<Webhook> {
        self.hooks.snapshot().await
    }

    /// Queues `event` for every matching registration.
    pub async fn notify(&self, event: &Event) -> Result<usize> {
        let matched: Vec<Webhook> = self
            .hooks
            .snapshot()
            .await
            .into_iter()
            .filter(|hook| hook.matches(event))
            .collect();

        for webhook in &matched {
            let delivery = Delivery {
                webhook: webhook.clone(),
                event: event.clone(),
            };
            match self.debouncer.get() {
                Some(debouncer) => debouncer.send(webhook.id.clone(), delivery).await?,
                None => flush(&self.dispatcher, webhook.id.clone(), vec![delivery]).await,
            }
        }

        Ok(matched.len())
    }

    pub(crate) fn collection(&self) -> &Collection<Webhook> {
        &self.hooks
    }
}

async fn flush(dispatcher: &Dispatcher, id: String, deliveries: Vec<Delivery>) {
    let Some(webhook) = deliveries.last().map(|delivery| delivery.webhook.clone()) else {
        return;
    };
    let events: Vec<Event> = deliveries.into_iter().map(|delivery| delivery.event).collect();

    if let Err(err) = dispatcher.deliver(&webhook, &events).await {
        error!(webhook = %id, url = %webhook.url, events = events.len(), error = %err, "webhook delivery failed");
    }
}
