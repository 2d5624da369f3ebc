use chrono::{DateTime, Utc};
use fibr_model::{Aggregate, Item};
use fibr_model::paths::parent_pathname;
use tracing::debug;

use super::MetadataService;
use super::location::LocationTally;
use crate::error::Result;

impl MetadataService {
    /// Recomputes the aggregate of the directory holding `item`, or of `item`
    /// itself when it is a directory. The root never gets an aggregate.
    pub async fn aggregate(&self, item: &Item) -> Result<()> {
        let dir = if item.is_dir {
            item.clone()
        } else {
            let parent = parent_pathname(&item.pathname);
            if parent == "/" {
                return Ok(());
            }
            self.storage().info(parent).await?
        };

        if dir.is_root() {
            return Ok(());
        }

        self.compute_and_save_aggregate(&dir).await
    }

    /// Reaggregates both parents when a file moved across directories.
    pub async fn aggregate_on_rename(&self, old: &Item, new: &Item) -> Result<()> {
        if old.dir() == new.dir() {
            return Ok(());
        }

        if let Some(old_dir) = self.storage().stat(old.dir()).await? {
            self.aggregate(&old_dir).await?;
        }
        self.aggregate(new).await
    }

    async fn compute_and_save_aggregate(&self, dir: &Item) -> Result<()> {
        let previous = match self.get_aggregate_for(dir).await {
            Ok(previous) => previous,
            Err(err) => {
                debug!(item = %dir.pathname, error = %err, "no previous aggregate");
                Aggregate::default()
            }
        };

        let mut tally = LocationTally::new();
        let mut start: Option<DateTime<Utc>> = None;
        let mut end: Option<DateTime<Utc>> = None;

        for child in self.storage().list(&dir.pathname).await? {
            if child.is_dir {
                continue;
            }

            let metadata = match self.get_metadata_for(&child).await {
                Ok(metadata) => metadata,
                Err(err) if err.is_expected_absence() => continue,
                Err(err) => return Err(err),
            };

            if let Some(date) = metadata.exif.date {
                start = Some(start.map_or(date, |current| current.min(date)));
                end = Some(end.map_or(date, |current| current.max(date)));
            }

            if metadata.exif.geocode.has_address() {
                tally.ingest(&metadata.exif.geocode.address);
            }
        }

        let aggregate = Aggregate {
            start,
            end,
            location: tally.value(),
            cover: previous.cover,
        };

        debug!(item = %dir.pathname, location = %aggregate.location, "saving aggregate");
        self.save_aggregate_for(dir, &aggregate).await
    }
}
