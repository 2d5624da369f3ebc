use async_trait::async_trait;
use fibr_model::{Event, EventType, Item};
use tokio_util::sync::CancellationToken;
use tracing::error;

use super::{CONSUMER_NAME, ThumbnailService};
use crate::bus::Consumer;
use crate::error::{PipelineError, Result};
use crate::storage::metadata_directory;

#[async_trait]
impl Consumer for ThumbnailService {
    fn name(&self) -> &'static str {
        CONSUMER_NAME
    }

    async fn handle(&self, _cancel: &CancellationToken, event: &Event) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }

        match event.kind {
            EventType::Start | EventType::Upload => {
                self.generate_item(event).await;
                Ok(())
            }
            EventType::Rename => {
                let new = event.new_item.as_ref().ok_or_else(|| {
                    PipelineError::Internal(format!("rename of {} without target", event.item.pathname))
                })?;
                self.rename(&event.item, new).await
            }
            EventType::Delete => self.delete(&event.item).await,
            EventType::CreateDir | EventType::Access => Ok(()),
        }
    }
}

impl ThumbnailService {
    async fn generate_item(&self, event: &Event) {
        let item = &event.item;
        if !self.can_have_thumbnail(item) {
            return;
        }

        let forced = event.is_forced_for(CONSUMER_NAME);

        for scale in self.config.scales() {
            let path = self.path_for_scale(item, scale);

            if event.is_cache_forced() {
                if let Err(err) = self.presence.evict(&path).await {
                    error!(item = %item.pathname, scale, error = %err, "unable to flush thumbnail cache");
                }
                if !forced {
                    continue;
                }
            }

            if !forced && self.has_thumbnail(item, scale).await {
                continue;
            }

            let generated = self.generate(item, scale).await;
            if let Err(err) = self.presence.evict_on_success(&path, generated).await {
                error!(item = %item.pathname, scale, error = %err, "unable to generate thumbnail");
            }
        }

        if item.is_video() {
            if event.is_cache_forced() {
                if let Err(err) = self.presence.evict(&self.stream_path(item)).await {
                    error!(item = %item.pathname, error = %err, "unable to flush stream cache");
                }
            }
            if forced || !self.has_stream(item).await {
                self.generate_stream_if_needed(item).await;
            }
        }
    }

    async fn rename(&self, old: &Item, new: &Item) -> Result<()> {
        // Directory contents move with the metadata directory itself.
        if old.is_dir {
            return Ok(());
        }

        for scale in self.config.scales() {
            let from = self.path_for_scale(old, scale);
            let to = self.path_for_scale(new, scale);

            match self.storage.rename(&from, &to).await {
                Err(err) if !err.is_not_found() => return Err(err),
                _ => {}
            }
            if let Err(err) = self.presence.evict(&from).await {
                error!(path = %from, error = %err, "unable to evict thumbnail cache");
            }
            if let Err(err) = self.presence.evict(&to).await {
                error!(path = %to, error = %err, "unable to evict thumbnail cache");
            }
        }

        if old.is_video() && self.has_stream(old).await {
            self.rename_stream(old, new).await?;
        }

        Ok(())
    }

    async fn delete(&self, item: &Item) -> Result<()> {
        if item.is_dir {
            return self
                .storage
                .remove_all(&metadata_directory(&item.pathname))
                .await;
        }

        for scale in self.config.scales() {
            let path = self.path_for_scale(item, scale);
            self.storage.remove_all(&path).await?;
            if let Err(err) = self.presence.evict(&path).await {
                error!(path = %path, error = %err, "unable to evict thumbnail cache");
            }
        }

        if item.is_video() && self.has_stream(item).await {
            self.delete_stream(item).await?;
        }

        Ok(())
    }
}
