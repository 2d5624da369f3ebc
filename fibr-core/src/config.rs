use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Names accepted in [`PipelineConfig::consumers`].
pub const KNOWN_CONSUMERS: [&str; 4] = ["share", "thumbnail", "metadata", "webhook"];

const MIB: u64 = 1024 * 1024;

/// Knobs of the consistency pipeline.
///
/// Every field carries a default so a deployment can start from an empty TOML
/// document and override only what it needs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Event bus sizing.
    pub bus: BusConfig,
    /// Distributed mutex timings.
    pub exclusive: ExclusiveConfig,
    /// EXIF metadata and directory aggregates.
    pub metadata: MetadataConfig,
    /// Thumbnails and adaptive streams.
    pub thumbnail: ThumbnailConfig,
    /// Share collection housekeeping.
    pub share: ShareConfig,
    /// Webhook batching and delivery.
    pub webhook: WebhookConfig,
    /// Boot-time consistency scan.
    pub sanitizer: SanitizerConfig,
    /// Asynchronous job transport naming.
    pub queue: QueueConfig,
    /// Consumers invoked for every event, in this order.
    pub consumers: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            exclusive: ExclusiveConfig::default(),
            metadata: MetadataConfig::default(),
            thumbnail: ThumbnailConfig::default(),
            share: ShareConfig::default(),
            webhook: WebhookConfig::default(),
            sanitizer: SanitizerConfig::default(),
            queue: QueueConfig::default(),
            consumers: KNOWN_CONSUMERS.iter().map(|name| name.to_string()).collect(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bus.max_concurrency == 0 {
            return Err(PipelineError::Config(
                "bus.max_concurrency must be greater than zero".into(),
            ));
        }
        for name in &self.consumers {
            if !KNOWN_CONSUMERS.contains(&name.as_str()) {
                return Err(PipelineError::Config(format!(
                    "unknown consumer `{name}`, expected one of {KNOWN_CONSUMERS:?}"
                )));
            }
        }
        if self.thumbnail.small_size == 0 {
            return Err(PipelineError::Config(
                "thumbnail.small_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Queue capacity and number of events dispatched concurrently.
    pub max_concurrency: usize,
    /// Grace period for draining buffered events on shutdown (ms). Once it
    /// elapses consumers are cancelled.
    pub drain_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 2,
            drain_timeout_ms: 30_000,
        }
    }
}

impl BusConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusiveConfig {
    /// Default lock lifetime (ms).
    pub ttl_ms: u64,
    /// Sleep between two acquisition attempts (ms).
    pub retry_interval_ms: u64,
}

impl Default for ExclusiveConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 10_000,
            retry_interval_ms: 1_000,
        }
    }
}

impl ExclusiveConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Base URL of the EXIF extractor, synchronous extraction when set.
    pub exas_url: Option<String>,
    /// Files above this size are skipped unless direct access is enabled (bytes).
    pub max_size: u64,
    /// The extractor reads sources from a shared volume instead of receiving bytes.
    pub direct_access: bool,
    /// Lifetime of cached metadata and aggregates (seconds).
    pub cache_ttl_secs: u64,
    /// HTTP timeout of extractor calls (seconds).
    pub timeout_secs: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            exas_url: None,
            max_size: 200 * MIB,
            direct_access: false,
            cache_ttl_secs: 4 * 3600,
            timeout_secs: 120,
        }
    }
}

impl MetadataConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Base URL of the renderer, synchronous rendering when set.
    pub vith_url: Option<String>,
    /// Width of the small thumbnail (px).
    pub small_size: u64,
    /// Width of the large thumbnail (px), zero disables it.
    pub large_size: u64,
    /// Files above this size are skipped unless direct access is enabled (bytes).
    pub max_size: u64,
    /// Minimal bitrate for a video to get an adaptive stream (bit/s).
    pub min_bitrate: u64,
    /// The renderer reads sources from a shared volume instead of receiving bytes.
    pub direct_access: bool,
    /// Lifetime of cached "has thumbnail" checks (seconds).
    pub cache_ttl_secs: u64,
    /// HTTP timeout of renderer calls (seconds).
    pub timeout_secs: u64,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            vith_url: None,
            small_size: 150,
            large_size: 800,
            max_size: 200 * MIB,
            min_bitrate: 80_000_000,
            direct_access: false,
            cache_ttl_secs: 3600,
            timeout_secs: 120,
        }
    }
}

impl ThumbnailConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Configured scales, small first.
    pub fn scales(&self) -> Vec<u64> {
        let mut scales = vec![self.small_size];
        if self.large_size > 0 {
            scales.push(self.large_size);
        }
        scales
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// Cadence of the expired-share purge (seconds).
    pub purge_interval_secs: u64,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            purge_interval_secs: 3600,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Quiescence window before a batch is delivered (ms).
    pub debounce_ms: u64,
    /// HMAC-SHA256 key signing every delivery when set.
    pub secret: Option<String>,
    /// Headers added to every delivery.
    pub extra_headers: BTreeMap<String, String>,
    /// HTTP timeout of deliveries (seconds).
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1_000,
            secret: None,
            extra_headers: BTreeMap::new(),
            timeout_secs: 30,
        }
    }
}

impl WebhookConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizerConfig {
    /// Run the scan at boot.
    pub enabled: bool,
    /// Rename entries whose name is not normalized.
    pub rename: bool,
    /// Recreate missing parent directories of orphan files.
    pub mkdir: bool,
    /// Lifetime of the boot lock (seconds).
    pub lock_ttl_secs: u64,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rename: false,
            mkdir: false,
            lock_ttl_secs: 3600,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Publish jobs instead of calling services synchronously.
    pub enabled: bool,
    pub exchange: String,
    pub exif_routing_key: String,
    pub exif_reply_routing_key: String,
    pub thumbnail_routing_key: String,
    pub thumbnail_reply_routing_key: String,
    pub stream_routing_key: String,
    /// Sleep of reply listeners when their queue is empty (ms).
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            exchange: "fibr".into(),
            exif_routing_key: "exif_input".into(),
            exif_reply_routing_key: "exif_output".into(),
            thumbnail_routing_key: "thumbnail".into(),
            thumbnail_reply_routing_key: "thumbnail_output".into(),
            stream_routing_key: "stream".into(),
            poll_interval_ms: 500,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
