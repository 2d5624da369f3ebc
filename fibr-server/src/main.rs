//! # fibr-server
//!
//! Keeps thumbnails, EXIF metadata, directory aggregates, shares and
//! webhooks consistent with the served file tree.
//!
//! ## Architecture
//!
//! - Local directory as the authoritative storage
//! - Redis for the shared cache, distributed locks, collection replication
//!   and the asynchronous job queue (all optional for a single instance)
//! - An EXIF extractor and a thumbnail renderer reached over HTTP, or through
//!   the job queue

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use fibr_core::Pipeline;
use fibr_server::config::cli::{CheckOptions, run_config_check, run_config_print};
use fibr_server::config::{CliOverrides, ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use fibr_server::startup::{connect_adapters, init_tracing, log_warnings, spawn_shutdown_listener};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "fibr-server")]
#[command(about = "Consistency pipeline of the fibr file browser")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a .env file loaded before reading the environment
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Directory served as `/` (overrides config)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Redis url (overrides config)
    #[arg(long)]
    redis_url: Option<String>,

    /// Skip the startup consistency scan
    #[arg(long, default_value_t = false)]
    no_scan: bool,
}

impl ServeArgs {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            root: self.root.clone(),
            redis_url: self.redis_url.clone(),
            no_scan: self.no_scan,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Validate the configuration and probe its dependencies
    Check,
    /// Print the effective configuration as TOML
    Print,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Config(command)) = cli.command {
        let opts = CheckOptions {
            config_path: cli.serve.config.clone(),
            env_path: cli.serve.env_file.clone(),
            overrides: cli.serve.overrides(),
        };
        return match command {
            ConfigCommand::Check => run_config_check(&opts).await,
            ConfigCommand::Print => run_config_print(&opts),
        };
    }

    run_server(cli.serve).await
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let ConfigLoad {
        config,
        warnings,
        config_path,
        env_file_loaded,
    } = ConfigLoader::with_options(ConfigLoaderOptions {
        overrides: args.overrides(),
        config_path: args.config,
        env_file: args.env_file,
    })
    .load()
    .context("failed to load configuration")?;

    init_tracing();

    if env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config_path {
        info!(path = %path.display(), "configuration file loaded");
    }
    log_warnings(&warnings);

    info!(
        root = %config.root.display(),
        consumers = ?config.pipeline.consumers,
        bus.max_concurrency = config.pipeline.bus.max_concurrency,
        sanitizer.enabled = config.pipeline.sanitizer.enabled,
        queue.enabled = config.pipeline.queue.enabled,
        "pipeline configuration in effect"
    );

    let adapters = connect_adapters(&config).await?;
    let pipeline =
        Pipeline::build(config.pipeline, adapters).context("failed to build the pipeline")?;

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    pipeline
        .run(cancel)
        .await
        .context("pipeline stopped with an error")?;

    info!("fibr-server stopped");
    Ok(())
}
