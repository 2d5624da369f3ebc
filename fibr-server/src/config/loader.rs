use std::fs;
use std::path::PathBuf;

use fibr_core::PipelineError;
use once_cell::sync::Lazy;
use thiserror::Error;

use super::ServerConfig;
use super::sources::{EnvConfig, FileConfig};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> =
    Lazy::new(|| vec![PathBuf::from("fibr.toml"), PathBuf::from("config/fibr.toml")]);

const DEFAULT_ROOT: &str = "./data";

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub overrides: CliOverrides,
}

/// Command line values, applied over the environment and the file.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub root: Option<PathBuf>,
    pub redis_url: Option<String>,
    pub no_scan: bool,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    /// `.env` first, then the TOML file, `FIBR_*` variables and command line
    /// overrides on top.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        let env = EnvConfig::gather();
        let (file, config_path) = self.load_file_config(&env)?;

        let mut load = compose(file, env, self.options.overrides.clone())?;
        load.config_path = config_path;
        load.env_file_loaded = env_file_loaded;
        if load.config_path.is_none() {
            load.warnings.push_with_hint(
                "No fibr.toml detected; using defaults and FIBR_* variables",
                "Run `fibr-server config print > fibr.toml` to scaffold a configuration file",
            );
        }
        Ok(load)
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let (path, required) = match (&self.options.config_path, &env.config_path) {
            (Some(explicit), _) => (explicit.clone(), true),
            (None, Some(from_env)) => (from_env.clone(), true),
            (None, None) => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(found) => (found.clone(), false),
                None => return Ok((None, None)),
            },
        };

        if !path.exists() {
            if required {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&contents).map_err(|source| {
            ConfigLoadError::Parse {
                path: path.clone(),
                source,
            }
        })?;

        Ok((Some(file), Some(path)))
    }
}

/// Merges file values, environment and command line overrides, then
/// validates the result.
pub fn compose(
    file: Option<FileConfig>,
    env: EnvConfig,
    cli: CliOverrides,
) -> Result<ConfigLoad, ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();
    let FileConfig {
        storage,
        redis,
        mut pipeline,
    } = file.unwrap_or_default();

    let root = match cli.root.or(env.root).or(storage.root) {
        Some(root) => root,
        None => {
            warnings.push_with_hint(
                format!("No storage root configured, serving {DEFAULT_ROOT}"),
                "Set FIBR_ROOT or [storage] root",
            );
            PathBuf::from(DEFAULT_ROOT)
        }
    };
    let redis_url = cli
        .redis_url
        .or(env.redis_url)
        .or(redis.map(|redis| redis.url));

    if let Some(url) = env.exas_url {
        pipeline.metadata.exas_url = Some(url);
    }
    if let Some(url) = env.vith_url {
        pipeline.thumbnail.vith_url = Some(url);
    }
    if let Some(secret) = env.webhook_secret {
        pipeline.webhook.secret = Some(secret);
    }
    if let Some(enabled) = env.queue_enabled {
        pipeline.queue.enabled = enabled;
    }
    if let Some(enabled) = env.sanitize_on_start {
        pipeline.sanitizer.enabled = enabled;
    }
    if let Some(rename) = env.sanitize_rename {
        pipeline.sanitizer.rename = rename;
    }
    if cli.no_scan {
        pipeline.sanitizer.enabled = false;
    }

    if pipeline.queue.enabled && redis_url.is_none() {
        return Err(ConfigLoadError::QueueWithoutRedis);
    }
    if redis_url.is_none() {
        warnings.push_with_hint(
            "No Redis configured; cache, locks and replication stay in-process",
            "Set FIBR_REDIS_URL when running more than one instance",
        );
    }
    pipeline.validate()?;

    Ok(ConfigLoad {
        config: ServerConfig {
            root,
            redis_url,
            pipeline,
        },
        warnings,
        config_path: None,
        env_file_loaded: false,
    })
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("queue.enabled requires a Redis url")]
    QueueWithoutRedis,
    #[error(transparent)]
    Invalid(#[from] PipelineError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push_with_hint(&mut self, message: impl Into<String>, hint: impl Into<String>) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: ServerConfig,
    pub warnings: ConfigWarnings,
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
