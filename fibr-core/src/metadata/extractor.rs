use std::fmt;

use async_trait::async_trait;
use fibr_model::{Exif, Item};
use tracing::debug;
use url::Url;

use crate::config::MetadataConfig;
use crate::error::{PipelineError, Result};
use crate::http::{build_client, endpoint, parse_base};

/// Synchronous EXIF extraction service.
#[async_trait]
pub trait ExifExtractor: Send + Sync + fmt::Debug {
    /// Extracts EXIF data of `item`. `content` carries the file bytes when the
    /// service cannot read the storage itself.
    async fn extract(&self, item: &Item, content: Option<Vec<u8>>) -> Result<Exif>;

    /// Whether the service reads sources from a shared volume.
    fn direct_access(&self) -> bool;
}

/// HTTP client of the `exas` extractor.
#[derive(Clone)]
pub struct ExasClient {
    client: reqwest::Client,
    base: Url,
    direct_access: bool,
}

impl fmt::Debug for ExasClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExasClient")
            .field("base", &self.base.as_str())
            .field("direct_access", &self.direct_access)
            .finish()
    }
}

impl ExasClient {
    pub fn new(base_url: &str, config: &MetadataConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(std::time::Duration::from_secs(config.timeout_secs))?,
            base: parse_base(base_url)?,
            direct_access: config.direct_access,
        })
    }
}

#[async_trait]
impl ExifExtractor for ExasClient {
    async fn extract(&self, item: &Item, content: Option<Vec<u8>>) -> Result<Exif> {
        let request = if self.direct_access {
            self.client.get(endpoint(&self.base, &item.pathname)?)
        } else {
            let content = content.ok_or_else(|| {
                PipelineError::Internal(format!("no content to upload for {}", item.pathname))
            })?;
            self.client.post(self.base.clone()).body(content)
        };

        debug!(item = %item.pathname, "requesting exif extraction");
        let response = request.send().await?.error_for_status()?;
        Ok(response.json::<Exif>().await?)
    }

    fn direct_access(&self) -> bool {
        self.direct_access
    }
}
