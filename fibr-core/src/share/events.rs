use async_trait::async_trait;
use fibr_model::{Event, EventType, Item, Share, has_path_prefix, replace_path_prefix};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{CONSUMER_NAME, ShareService};
use crate::bus::Consumer;
use crate::error::{PipelineError, Result};

#[async_trait]
impl Consumer for ShareService {
    fn name(&self) -> &'static str {
        CONSUMER_NAME
    }

    async fn handle(&self, cancel: &CancellationToken, event: &Event) -> Result<()> {
        match event.kind {
            EventType::Rename => {
                let new = event.new_item.as_ref().ok_or_else(|| {
                    PipelineError::Internal(format!("rename of {} without target", event.item.pathname))
                })?;
                self.rename_path(cancel, &event.item, new).await
            }
            EventType::Delete => self.delete_path(cancel, &event.item).await,
            _ => Ok(()),
        }
    }
}

impl ShareService {
    async fn rename_path(&self, cancel: &CancellationToken, old: &Item, new: &Item) -> Result<()> {
        let from = old.pathname.clone();
        if !self.collection().any(|share| has_path_prefix(&share.path, &from)).await {
            return Ok(());
        }

        let to = new.pathname.clone();
        let moved = self
            .collection()
            .mutate(cancel, move |records| {
                let mut changed: Vec<Share> = Vec::new();
                for share in records.values_mut() {
                    if let Some(path) = replace_path_prefix(&share.path, &from, &to) {
                        share.path = path;
                        changed.push(share.clone());
                    }
                }
                Ok((changed.len(), changed))
            })
            .await?;

        debug!(item = %old.pathname, moved, "shares renamed");
        Ok(())
    }

    async fn delete_path(&self, cancel: &CancellationToken, item: &Item) -> Result<()> {
        let prefix = item.pathname.clone();
        if !self.collection().any(|share| has_path_prefix(&share.path, &prefix)).await {
            return Ok(());
        }

        let removed = self
            .collection()
            .mutate(cancel, move |records| {
                let ids: Vec<String> = records
                    .values()
                    .filter(|share| has_path_prefix(&share.path, &prefix))
                    .map(|share| share.id.clone())
                    .collect();
                for id in &ids {
                    records.remove(id);
                }
                let tombstones: Vec<Share> = ids.iter().map(|id| Share::tombstone(id.as_str())).collect();
                Ok((tombstones.len(), tombstones))
            })
            .await?;

        debug!(item = %item.pathname, removed, "shares deleted");
        Ok(())
    }
}
