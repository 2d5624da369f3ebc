//! Process wiring: tracing, adapters and shutdown signals.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use fibr_core::Adapters;
use fibr_core::cache::{CacheStore, RedisCache};
use fibr_core::exclusive::{LockBackend, RedisLock};
use fibr_core::mirror::{Mirror, RedisMirror};
use fibr_core::queue::{JobQueue, RedisJobQueue};
use fibr_core::storage::{LocalStorage, Storage};
use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ConfigWarnings, ServerConfig};

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fibr_core=info,fibr_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub fn log_warnings(warnings: &ConfigWarnings) {
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => warn!(message = %warning.message, hint = %hint, "configuration warning"),
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }
}

/// Builds the adapters: local storage under the configured root, Redis
/// backed cache, locks, mirror and job queue when a Redis url is set.
pub async fn connect_adapters(config: &ServerConfig) -> Result<Adapters> {
    let metadata = tokio::fs::metadata(&config.root)
        .await
        .with_context(|| format!("storage root {} is not readable", config.root.display()))?;
    if !metadata.is_dir() {
        return Err(anyhow!("storage root {} is not a directory", config.root.display()));
    }

    let storage = Arc::new(LocalStorage::new(&config.root)) as Arc<dyn Storage>;
    let mut adapters = Adapters::local(storage);

    let Some(url) = &config.redis_url else {
        info!(root = %config.root.display(), "running with in-process adapters");
        return Ok(adapters);
    };

    let client =
        redis::Client::open(url.as_str()).with_context(|| format!("failed to parse redis url {url}"))?;
    let conn = ConnectionManager::new(client.clone())
        .await
        .map_err(|err| anyhow!("failed to connect to redis: {err}"))?;

    adapters.cache = Some(Arc::new(RedisCache::new(conn.clone())) as Arc<dyn CacheStore>);
    adapters.lock = Some(Arc::new(RedisLock::new(conn.clone())) as Arc<dyn LockBackend>);
    adapters.mirror = Arc::new(RedisMirror::new(client, conn.clone())) as Arc<dyn Mirror>;

    let queue = &config.pipeline.queue;
    if queue.enabled {
        adapters.queue = Some(Arc::new(RedisJobQueue::new(
            conn,
            queue.exchange.clone(),
            queue.poll_interval(),
        )) as Arc<dyn JobQueue>);
    }

    info!(
        root = %config.root.display(),
        queue = queue.enabled,
        "connected to redis"
    );
    Ok(adapters)
}

/// Cancels `cancel` on Ctrl-C or SIGTERM.
pub fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("received shutdown signal, draining pipeline");
        cancel.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "unable to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
