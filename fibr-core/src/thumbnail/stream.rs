use fibr_model::{Item, JobRequest, JobType};
use tracing::{debug, error, warn};

use super::ThumbnailService;
use crate::error::Result;
use crate::queue::publish_json;

impl ThumbnailService {
    /// Streams are only worth it above the configured bitrate, which can only
    /// be probed when the renderer reads the storage itself.
    pub(crate) async fn should_generate_stream(&self, item: &Item) -> Result<bool> {
        if !self.config.direct_access {
            return Ok(false);
        }
        let Some(renderer) = &self.renderer else {
            return Ok(false);
        };

        match renderer.bitrate(item).await? {
            Some(bitrate) => {
                debug!(item = %item.pathname, bitrate, "probed bitrate");
                Ok(bitrate >= self.config.min_bitrate)
            }
            None => Ok(false),
        }
    }

    pub(crate) async fn generate_stream(&self, item: &Item) -> Result<()> {
        let output = self.stream_path(item);

        if let Some(jobs) = &self.jobs {
            let request = JobRequest {
                input: item.pathname.clone(),
                output,
                scale: None,
                kind: JobType::Video,
            };
            return publish_json(jobs.queue.as_ref(), &jobs.stream_key, &request).await;
        }

        match &self.renderer {
            Some(renderer) => renderer.generate_stream(item, &output).await,
            None => Ok(()),
        }
    }

    pub(crate) async fn generate_stream_if_needed(&self, item: &Item) {
        match self.should_generate_stream(item).await {
            Ok(false) => {}
            Ok(true) => {
                let generated = self.generate_stream(item).await;
                if let Err(err) = self
                    .presence
                    .evict_on_success(&self.stream_path(item), generated)
                    .await
                {
                    error!(item = %item.pathname, error = %err, "unable to generate stream");
                }
            }
            Err(err) => {
                error!(item = %item.pathname, error = %err, "unable to determine if stream is needed")
            }
        }
    }

    pub(crate) async fn rename_stream(&self, old: &Item, new: &Item) -> Result<()> {
        let Some(renderer) = &self.renderer else {
            warn!(item = %old.pathname, "no renderer to move the stream");
            return Ok(());
        };

        let from = self.stream_path(old);
        let to = self.stream_path(new);
        renderer.rename_stream(&from, &to).await?;
        self.presence.evict(&from).await?;
        self.presence.evict(&to).await
    }

    pub(crate) async fn delete_stream(&self, item: &Item) -> Result<()> {
        let Some(renderer) = &self.renderer else {
            warn!(item = %item.pathname, "no renderer to delete the stream");
            return Ok(());
        };

        let stream = self.stream_path(item);
        renderer.delete_stream(&stream).await?;
        self.presence.evict(&stream).await
    }
}
