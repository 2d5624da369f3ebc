use fibr_model::JobRequest;
use tracing::debug;

use super::ThumbnailService;
use crate::error::Result;

impl ThumbnailService {
    /// The renderer wrote `reply.output`: drop the cached absence so the
    /// next check sees it.
    pub async fn handle_thumbnail_reply(&self, reply: JobRequest) -> Result<()> {
        debug!(output = %reply.output, "thumbnail reply received");
        self.presence.evict(&reply.output).await
    }
}
