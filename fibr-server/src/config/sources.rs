use std::path::PathBuf;

use fibr_core::PipelineConfig;
use serde::{Deserialize, Serialize};

/// Raw configuration as defined in a TOML file.
///
/// Pipeline sections (`[bus]`, `[thumbnail]`, `[webhook]`, ...) sit at the
/// top level next to the server ones.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub storage: FileStorageConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<FileRedisConfig>,
    #[serde(flatten)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileStorageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRedisConfig {
    pub url: String,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub root: Option<PathBuf>,
    pub redis_url: Option<String>,
    pub exas_url: Option<String>,
    pub vith_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub queue_enabled: Option<bool>,
    pub sanitize_on_start: Option<bool>,
    pub sanitize_rename: Option<bool>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            config_path: non_empty_var("FIBR_CONFIG").map(PathBuf::from),
            root: non_empty_var("FIBR_ROOT").map(PathBuf::from),
            redis_url: non_empty_var("FIBR_REDIS_URL"),
            exas_url: non_empty_var("FIBR_EXAS_URL"),
            vith_url: non_empty_var("FIBR_VITH_URL"),
            webhook_secret: non_empty_var("FIBR_WEBHOOK_SECRET"),
            queue_enabled: parse_bool_var("FIBR_QUEUE_ENABLED"),
            sanitize_on_start: parse_bool_var("FIBR_SANITIZE_ON_START"),
            sanitize_rename: parse_bool_var("FIBR_SANITIZE_RENAME"),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool_var(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|raw| parse_bool(&raw))
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_sections_live_at_the_top_level() {
        let raw = r#"
            consumers = ["thumbnail", "share"]

            [storage]
            root = "/srv/files"

            [redis]
            url = "redis://cache:6379"

            [thumbnail]
            vith_url = "http://vith:1080"
            large_size = 0

            [webhook]
            debounce_ms = 250
        "#;

        let file: FileConfig = toml::from_str(raw).expect("parse");
        assert_eq!(file.storage.root, Some(PathBuf::from("/srv/files")));
        assert_eq!(file.redis.map(|redis| redis.url).as_deref(), Some("redis://cache:6379"));
        assert_eq!(file.pipeline.consumers, vec!["thumbnail", "share"]);
        assert_eq!(file.pipeline.thumbnail.vith_url.as_deref(), Some("http://vith:1080"));
        assert_eq!(file.pipeline.thumbnail.large_size, 0);
        assert_eq!(file.pipeline.thumbnail.small_size, 150);
        assert_eq!(file.pipeline.webhook.debounce_ms, 250);
    }

    #[test]
    fn bool_spellings() {
        assert_eq!(parse_bool(" Yes "), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
