//! Server configuration: `.env`, TOML file and `FIBR_*` environment.

pub mod cli;
pub mod loader;
pub mod sources;

use std::path::PathBuf;

use fibr_core::PipelineConfig;

pub use loader::{
    CliOverrides, ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions, ConfigWarnings,
};

/// Effective configuration of one server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory served as `/`.
    pub root: PathBuf,
    /// Shared cache, locks, replication and job queue. In-process adapters
    /// are used without it.
    pub redis_url: Option<String>,
    pub pipeline: PipelineConfig,
}
