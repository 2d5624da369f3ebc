use fibr_model::{ExifReply, MetadataAction};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::MetadataService;
use crate::error::Result;

impl MetadataService {
    /// Entry point of asynchronous extraction results. Replays the same
    /// update as a synchronous extraction, so duplicated replies are harmless.
    pub async fn handle_exif_reply(&self, cancel: &CancellationToken, reply: ExifReply) -> Result<()> {
        let ExifReply { item, exif } = reply;
        debug!(item = %item.pathname, "exif reply received");

        // Fresh snapshot: the file may have moved or changed since the request.
        let Some(item) = self.storage().stat(&item.pathname).await? else {
            debug!(item = %item.pathname, "exif reply for a vanished item");
            return Ok(());
        };

        let metadata = self
            .update(cancel, &item, vec![MetadataAction::ReplaceExif(exif)])
            .await?;

        if metadata.exif.is_zero() {
            return Ok(());
        }

        self.process_metadata(&item, &metadata.exif, true).await
    }
}
