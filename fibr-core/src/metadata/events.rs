use async_trait::async_trait;
use fibr_model::{Event, EventType, Item, MetadataAction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{CONSUMER_NAME, MetadataService, metadata_path};
use crate::bus::Consumer;
use crate::error::{PipelineError, Result};
use crate::queue::publish_json;
use crate::storage::metadata_directory;

#[async_trait]
impl Consumer for MetadataService {
    fn name(&self) -> &'static str {
        CONSUMER_NAME
    }

    async fn handle(&self, cancel: &CancellationToken, event: &Event) -> Result<()> {
        match event.kind {
            EventType::Start => self.handle_start(cancel, event).await,
            EventType::Upload => self.handle_upload(cancel, &event.item, true).await,
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

impl MetadataService {
    async fn handle_start(&self, cancel: &CancellationToken, event: &Event) -> Result<()> {
        let item = &event.item;
        let forced = event.is_forced_for(CONSUMER_NAME);

        if event.is_cache_forced() {
            let evicted = if item.is_dir {
                self.aggregate_cache.evict(&item.id).await
            } else {
                self.exif_cache.evict(&item.id).await
            };
            if let Err(err) = evicted {
                error!(item = %item.pathname, error = %err, "unable to flush metadata cache");
            }
            if !forced {
                return Ok(());
            }
        }

        if item.is_dir {
            if item.is_root() {
                return Ok(());
            }
            return self.aggregate(item).await;
        }

        if !forced && self.has_metadata(item).await {
            debug!(item = %item.pathname, "metadata already present");
            return Ok(());
        }

        self.handle_upload(cancel, item, false).await
    }

    pub(crate) async fn handle_upload(
        &self,
        cancel: &CancellationToken,
        item: &Item,
        aggregate: bool,
    ) -> Result<()> {
        if !self.can_have_exif(item) {
            debug!(item = %item.pathname, "no exif for this item");
            return Ok(());
        }

        if let Some(jobs) = &self.jobs {
            return publish_json(jobs.queue.as_ref(), &jobs.routing_key, item).await;
        }

        let Some(extractor) = &self.extractor else {
            return Ok(());
        };

        let content = if extractor.direct_access() {
            None
        } else {
            Some(self.storage().read(&item.pathname).await?)
        };
        let exif = extractor.extract(item, content).await?;
        let metadata = self
            .update(cancel, item, vec![MetadataAction::ReplaceExif(exif)])
            .await?;

        if metadata.exif.is_zero() {
            return Ok(());
        }

        self.process_metadata(item, &metadata.exif, aggregate).await
    }

    /// Aligns the file date on its EXIF date, then refreshes the parent
    /// aggregate when asked to.
    pub(crate) async fn process_metadata(
        &self,
        item: &Item,
        exif: &fibr_model::Exif,
        aggregate: bool,
    ) -> Result<()> {
        if let Some(date) = exif.date {
            if date != item.modified_at {
                debug!(item = %item.pathname, date = %date, "updating file date from exif");
                self.storage().update_date(&item.pathname, date).await?;
            }
        }

        if aggregate {
            self.aggregate(item).await?;
        }

        Ok(())
    }

    async fn rename(&self, old: &Item, new: &Item) -> Result<()> {
        if old.is_dir {
            let from = metadata_directory(&old.pathname);
            let to = metadata_directory(&new.pathname);
            match self.storage().rename(&from, &to).await {
                Err(err) if !err.is_not_found() => return Err(err),
                _ => {}
            }
            // Children documents keep the ids of their old pathnames and stay
            // unreachable until the startup scan extracts them again.
            return self.aggregate_cache.evict(&old.id).await;
        }

        match self
            .storage()
            .rename(&metadata_path(old), &metadata_path(new))
            .await
        {
            Err(err) if !err.is_not_found() => return Err(err),
            _ => {}
        }
        self.exif_cache.evict(&old.id).await?;

        self.aggregate_on_rename(old, new).await
    }

    async fn delete(&self, item: &Item) -> Result<()> {
        if item.is_dir {
            self.storage()
                .remove_all(&metadata_directory(&item.pathname))
                .await?;
            return self.aggregate_cache.evict(&item.id).await;
        }

        self.storage().remove_all(&metadata_path(item)).await?;
        self.exif_cache.evict(&item.id).await?;

        match self.aggregate(item).await {
            // The parent may be gone too when a whole tree was removed.
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }
}
