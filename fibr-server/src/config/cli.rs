use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use redis::{AsyncCommands, aio::ConnectionManager};
use uuid::Uuid;

use super::ServerConfig;
use super::loader::{CliOverrides, ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use super::sources::{FileConfig, FileRedisConfig, FileStorageConfig};

#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    pub config_path: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
    pub overrides: CliOverrides,
}

pub async fn run_config_check(opts: &CheckOptions) -> Result<()> {
    let loader = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: opts.config_path.clone(),
        env_file: opts.env_path.clone(),
        overrides: opts.overrides.clone(),
    });

    let ConfigLoad {
        config,
        warnings,
        config_path,
        ..
    } = loader.load()?;

    match &config_path {
        Some(path) => println!("Configuration: {}", path.display()),
        None => println!("Configuration: defaults and environment"),
    }

    if !warnings.items.is_empty() {
        println!("Warnings:");
        for warning in &warnings.items {
            match &warning.hint {
                Some(hint) => println!("  - {} (hint: {})", warning.message, hint),
                None => println!("  - {}", warning.message),
            }
        }
    }

    let mut failures = Vec::new();
    let mut successes = Vec::new();

    match check_root(&config).await {
        Ok(message) => successes.push(message),
        Err(err) => failures.push(format!("storage root invalid: {err}")),
    }

    match &config.redis_url {
        Some(url) => match check_redis(url).await {
            Ok(()) => successes.push("redis connectivity".to_string()),
            Err(err) => failures.push(format!("redis connectivity failed: {err}")),
        },
        None => successes.push("redis not configured (single instance mode)".to_string()),
    }

    successes.push(format!(
        "consumers in order: {}",
        config.pipeline.consumers.join(", ")
    ));

    for success in successes {
        println!("[ok] {success}");
    }

    if failures.is_empty() {
        println!("All checks passed.");
        Ok(())
    } else {
        println!("Configuration check encountered errors:");
        for failure in &failures {
            println!("  - {failure}");
        }
        bail!("configuration check failed")
    }
}

/// Prints the effective configuration as TOML.
pub fn run_config_print(opts: &CheckOptions) -> Result<()> {
    let loader = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: opts.config_path.clone(),
        env_file: opts.env_path.clone(),
        overrides: opts.overrides.clone(),
    });
    let ConfigLoad { config, .. } = loader.load()?;

    print!("{}", render(&config)?);
    Ok(())
}

fn render(config: &ServerConfig) -> Result<String> {
    let file = FileConfig {
        storage: FileStorageConfig {
            root: Some(config.root.clone()),
        },
        redis: config
            .redis_url
            .clone()
            .map(|url| FileRedisConfig { url }),
        pipeline: config.pipeline.clone(),
    };
    toml::to_string_pretty(&file).context("failed to render configuration")
}

async fn check_root(config: &ServerConfig) -> Result<String> {
    let metadata = tokio::fs::metadata(&config.root)
        .await
        .with_context(|| format!("{} is not readable", config.root.display()))?;
    if !metadata.is_dir() {
        bail!("{} is not a directory", config.root.display());
    }
    Ok(format!("storage root {}", config.root.display()))
}

async fn check_redis(url: &str) -> Result<()> {
    let client =
        redis::Client::open(url).with_context(|| format!("failed to parse redis url {url}"))?;
    let mut connection = ConnectionManager::new(client)
        .await
        .map_err(|err| anyhow!("failed to connect to redis: {err}"))?;

    let check_key = format!("fibr:config-check:{}", Uuid::new_v4());
    if let Err(err) = connection
        .set_ex::<String, &str, ()>(check_key, "ok", 30)
        .await
    {
        return Err(anyhow!("failed to write probe key to redis: {err}"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use fibr_core::PipelineConfig;

    use super::*;
    use crate::config::loader::compose;

    #[test]
    fn rendered_config_loads_back() {
        let mut pipeline = PipelineConfig::default();
        pipeline.webhook.debounce_ms = 42;
        pipeline.consumers = vec!["share".into(), "webhook".into()];
        let config = ServerConfig {
            root: PathBuf::from("/srv/files"),
            redis_url: Some("redis://cache:6379".into()),
            pipeline,
        };

        let rendered = render(&config).expect("render");
        let file: FileConfig = toml::from_str(&rendered).expect("parse rendered");
        let load = compose(Some(file), Default::default(), Default::default()).expect("compose");

        assert_eq!(load.config.root, config.root);
        assert_eq!(load.config.redis_url, config.redis_url);
        assert_eq!(load.config.pipeline.webhook.debounce_ms, 42);
        assert_eq!(load.config.pipeline.consumers, vec!["share", "webhook"]);
    }
}
