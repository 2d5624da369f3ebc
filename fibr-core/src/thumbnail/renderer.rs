use std::fmt;

use async_trait::async_trait;
use fibr_model::{Item, JobType};
use tracing::debug;
use url::Url;

use crate::config::ThumbnailConfig;
use crate::error::{PipelineError, Result};
use crate::http::{build_client, endpoint, parse_base};

/// Header carrying the bitrate of a probed video.
pub const BITRATE_HEADER: &str = "X-Bitrate";

/// Synchronous thumbnail and stream rendering service.
#[async_trait]
pub trait Renderer: Send + Sync + fmt::Debug {
    /// Renders a thumbnail of `item` at `scale` and returns the image bytes.
    /// `content` carries the source when the service cannot read the storage.
    async fn thumbnail(&self, item: &Item, scale: u64, content: Option<Vec<u8>>) -> Result<Vec<u8>>;

    /// Bitrate of a video, `None` when the service could not tell.
    async fn bitrate(&self, item: &Item) -> Result<Option<u64>>;

    /// Converts `item` into an adaptive stream whose playlist is `output`.
    async fn generate_stream(&self, item: &Item, output: &str) -> Result<()>;

    async fn rename_stream(&self, old: &str, new: &str) -> Result<()>;

    async fn delete_stream(&self, stream: &str) -> Result<()>;

    /// Whether the service reads sources from a shared volume.
    fn direct_access(&self) -> bool;
}

/// HTTP client of the `vith` renderer.
#[derive(Clone)]
pub struct VithClient {
    client: reqwest::Client,
    base: Url,
    direct_access: bool,
}

impl fmt::Debug for VithClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VithClient")
            .field("base", &self.base.as_str())
            .field("direct_access", &self.direct_access)
            .finish()
    }
}

impl VithClient {
    pub fn new(base_url: &str, config: &ThumbnailConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(std::time::Duration::from_secs(config.timeout_secs))?,
            base: parse_base(base_url)?,
            direct_access: config.direct_access,
        })
    }
}

fn job_type(item: &Item) -> Result<&'static str> {
    match JobType::for_item(item) {
        Some(JobType::Image) => Ok("image"),
        Some(JobType::Video) => Ok("video"),
        Some(JobType::Pdf) => Ok("pdf"),
        None => Err(PipelineError::InvalidItemType(item.pathname.clone())),
    }
}

#[async_trait]
impl Renderer for VithClient {
    async fn thumbnail(&self, item: &Item, scale: u64, content: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let kind = job_type(item)?;
        let scale = scale.to_string();
        let query = [("type", kind), ("scale", scale.as_str())];

        let request = if self.direct_access {
            self.client.get(endpoint(&self.base, &item.pathname)?)
        } else {
            let content = content.ok_or_else(|| {
                PipelineError::Internal(format!("no content to upload for {}", item.pathname))
            })?;
            self.client.post(self.base.clone()).body(content)
        };

        debug!(item = %item.pathname, scale = %scale, "requesting thumbnail");
        let response = request.query(&query).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn bitrate(&self, item: &Item) -> Result<Option<u64>> {
        let response = self
            .client
            .head(endpoint(&self.base, &item.pathname)?)
            .query(&[("type", job_type(item)?)])
            .send()
            .await?
            .error_for_status()?;

        let Some(raw) = response.headers().get(BITRATE_HEADER) else {
            return Ok(None);
        };
        let raw = raw
            .to_str()
            .map_err(|err| PipelineError::Internal(format!("invalid bitrate header: {err}")))?;
        raw.trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|err| PipelineError::Internal(format!("invalid bitrate `{raw}`: {err}")))
    }

    async fn generate_stream(&self, item: &Item, output: &str) -> Result<()> {
        self.client
            .put(endpoint(&self.base, &item.pathname)?)
            .query(&[("output", output)])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn rename_stream(&self, old: &str, new: &str) -> Result<()> {
        self.client
            .patch(endpoint(&self.base, old)?)
            .query(&[("to", new), ("type", "video")])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete_stream(&self, stream: &str) -> Result<()> {
        self.client
            .delete(endpoint(&self.base, stream)?)
            .query(&[("type", "video")])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn direct_access(&self) -> bool {
        self.direct_access
    }
}
