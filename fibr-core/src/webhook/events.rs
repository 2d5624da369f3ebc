use async_trait::async_trait;
use fibr_model::{Event, EventType, Webhook, has_path_prefix, replace_path_prefix};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{CONSUMER_NAME, WebhookService};
use crate::bus::Consumer;
use crate::error::Result;

#[async_trait]
impl Consumer for WebhookService {
    fn name(&self) -> &'static str {
        CONSUMER_NAME
    }

    async fn handle(&self, cancel: &CancellationToken, event: &Event) -> Result<()> {
        let matched = self.notify(event).await?;
        if matched > 0 {
            debug!(item = %event.item.pathname, matched, "event queued for webhooks");
        }

        match (event.kind, event.new_item.as_ref()) {
            (EventType::Rename, Some(new)) => self.rename_path(cancel, &event.item.pathname, &new.pathname).await,
            (EventType::Delete, _) => self.delete_path(cancel, &event.item.pathname).await,
            _ => Ok(()),
        }
    }
}

impl WebhookService {
    async fn rename_path(&self, cancel: &CancellationToken, from: &str, to: &str) -> Result<()> {
        if !self.collection().any(|hook| has_path_prefix(&hook.pathname, from)).await {
            return Ok(());
        }

        let (from, to) = (from.to_string(), to.to_string());
        self.collection()
            .mutate(cancel, move |records| {
                let mut changed: Vec<Webhook> = Vec::new();
                for hook in records.values_mut() {
                    if let Some(pathname) = replace_path_prefix(&hook.pathname, &from, &to) {
                        hook.pathname = pathname;
                        changed.push(hook.clone());
                    }
                }
                Ok(((), changed))
            })
            .await
    }

    async fn delete_path(&self, cancel: &CancellationToken, prefix: &str) -> Result<()> {
        if !self.collection().any(|hook| has_path_prefix(&hook.pathname, prefix)).await {
            return Ok(());
        }

        let prefix = prefix.to_string();
        self.collection()
            .mutate(cancel, move |records| {
                let ids: Vec<String> = records
                    .values()
                    .filter(|hook| has_path_prefix(&hook.pathname, &prefix))
                    .map(|hook| hook.id.clone())
                    .collect();
                for id in &ids {
                    records.remove(id);
                }
                Ok(((), ids.iter().map(|id| Webhook::tombstone(id.as_str())).collect()))
            })
            .await
    }
}
