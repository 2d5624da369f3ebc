//! Boot-time consistency scan.
//!
//! Walks the whole tree once, fixes entry names and replays a `Start` event
//! for every entry so that each consumer rebuilds whatever derived state is
//! missing or stale.

mod names;

pub use names::sanitize_name;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fibr_model::paths::join_pathname;
use fibr_model::{Event, Item};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::EventPublisher;
use crate::config::SanitizerConfig;
use crate::error::{PipelineError, Result};
use crate::exclusive::Exclusive;
use crate::storage::{Storage, WalkControl, WalkVisitor, is_metadata_pathname};

const LOCK_NAME: &str = "start";

/// Counters of a completed scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub files: usize,
    pub directories: usize,
    pub renamed: usize,
    pub orphans: usize,
}

pub struct Sanitizer {
    storage: Arc<dyn Storage>,
    exclusive: Exclusive,
    publisher: Arc<dyn EventPublisher>,
    config: SanitizerConfig,
}

impl fmt::Debug for Sanitizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sanitizer")
            .field("storage", &self.storage)
            .field("config", &self.config)
            .finish()
    }
}

impl Sanitizer {
    pub fn new(
        storage: Arc<dyn Storage>,
        exclusive: Exclusive,
        publisher: Arc<dyn EventPublisher>,
        config: SanitizerConfig,
    ) -> Self {
        Self {
            storage,
            exclusive,
            publisher,
            config,
        }
    }

    /// Runs the scan once across every instance sharing the lock backend.
    ///
    /// Returns `Ok(None)` when disabled.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<Option<ScanReport>> {
        if !self.config.enabled {
            debug!("startup scan disabled");
            return Ok(None);
        }

        let ttl = Duration::from_secs(self.config.lock_ttl_secs);
        let report = self
            .exclusive
            .execute(cancel, LOCK_NAME, Some(ttl), || self.scan(cancel))
            .await?;
        Ok(Some(report))
    }

    async fn scan(&self, cancel: &CancellationToken) -> Result<ScanReport> {
        info!("startup scan started");

        let mut visitor = ScanVisitor {
            sanitizer: self,
            cancel,
            seen: HashSet::from(["/".to_string()]),
            directories: Vec::new(),
            report: ScanReport::default(),
        };
        self.storage.walk("/", &mut visitor).await?;

        let ScanVisitor {
            directories,
            mut report,
            ..
        } = visitor;

        for directory in directories {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled("startup scan".into()));
            }
            self.publisher.publish(Event::start(directory)).await?;
            report.directories += 1;
        }

        info!(
            files = report.files,
            directories = report.directories,
            renamed = report.renamed,
            orphans = report.orphans,
            "startup scan done"
        );
        Ok(report)
    }

    /// Renames `item` to its sanitized name when allowed, returning the item
    /// to continue with.
    async fn sanitize(&self, item: Item) -> Result<(Item, bool)> {
        let name = sanitize_name(item.name());
        if name == item.name() {
            return Ok((item, false));
        }

        let target = join_pathname(item.dir(), &name);
        if !self.config.rename {
            info!(item = %item.pathname, name = %target, "entry should be renamed");
            return Ok((item, false));
        }
        if name.is_empty() || name == "." || name == "_" {
            warn!(item = %item.pathname, "no usable sanitized name, keeping entry");
            return Ok((item, false));
        }
        if self.storage.stat(&target).await?.is_some() {
            warn!(item = %item.pathname, name = %target, "sanitized name already taken, keeping entry");
            return Ok((item, false));
        }

        info!(item = %item.pathname, name = %target, "renaming entry");
        if let Err(err) = self.storage.rename(&item.pathname, &target).await {
            error!(item = %item.pathname, error = %err, "unable to rename entry");
            return Ok((item, false));
        }

        let renamed = self.storage.info(&target).await?;
        self.publisher
            .publish(Event::rename(item, renamed.clone()))
            .await?;
        Ok((renamed, true))
    }
}

struct ScanVisitor<'a> {
    sanitizer: &'a Sanitizer,
    cancel: &'a CancellationToken,
    seen: HashSet<String>,
    directories: Vec<Item>,
    report: ScanReport,
}

impl<'a> ScanVisitor<'a> {
    async fn ensure_parent(&mut self, item: &Item) -> Result<()> {
        let parent = item.dir().to_string();
        if self.seen.contains(&parent) {
            return Ok(());
        }

        self.report.orphans += 1;
        if !self.sanitizer.config.mkdir {
            warn!(item = %item.pathname, parent = %parent, "orphan entry");
            return Ok(());
        }

        info!(item = %item.pathname, parent = %parent, "creating missing parent");
        self.sanitizer.storage.mkdir(&parent).await?;
        self.seen.insert(parent);
        Ok(())
    }
}

#[async_trait]
impl<'a> WalkVisitor for ScanVisitor<'a> {
    async fn visit(&mut self, item: Item) -> Result<WalkControl> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled("startup scan".into()));
        }
        if is_metadata_pathname(&item.pathname) {
            return Ok(WalkControl::SkipDir);
        }

        let (item, renamed) = self.sanitizer.sanitize(item).await?;
        if renamed {
            self.report.renamed += 1;
        }
        self.ensure_parent(&item).await?;

        if item.is_dir {
            let pathname = item.pathname.clone();
            self.seen.insert(pathname.clone());
            self.directories.push(item);
            return Ok(WalkControl::Continue(Some(pathname)));
        }

        self.sanitizer.publisher.publish(Event::start(item)).await?;
        self.report.files += 1;
        Ok(WalkControl::Continue(None))
    }
}
