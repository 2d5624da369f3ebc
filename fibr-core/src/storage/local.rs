use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fibr_model::{Item, normalize_pathname};
use fibr_model::paths::join_pathname;
use tokio::fs;
use uuid::Uuid;

use super::{Storage, not_found};
use crate::error::{PipelineError, Result};

/// [`Storage`] over a local directory.
#[derive(Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl fmt::Debug for LocalStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStorage")
            .field("root", &self.root)
            .finish()
    }
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn to_fs(&self, pathname: &str) -> PathBuf {
        let clean = normalize_pathname(pathname);
        self.root.join(clean.trim_start_matches('/'))
    }

    fn to_item(pathname: &str, metadata: &std::fs::Metadata) -> Item {
        let modified_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        if metadata.is_dir() {
            Item::directory(pathname, modified_at)
        } else {
            Item::file(pathname, metadata.len(), modified_at)
        }
    }
}

fn map_io(pathname: &str, err: std::io::Error) -> PipelineError {
    if err.kind() == std::io::ErrorKind::NotFound {
        not_found(pathname)
    } else {
        PipelineError::Io(err)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn info(&self, pathname: &str) -> Result<Item> {
        let metadata = fs::metadata(self.to_fs(pathname))
            .await
            .map_err(|err| map_io(pathname, err))?;
        Ok(Self::to_item(pathname, &metadata))
    }

    async fn list(&self, pathname: &str) -> Result<Vec<Item>> {
        let dir = normalize_pathname(pathname);
        let mut entries = fs::read_dir(self.to_fs(&dir))
            .await
            .map_err(|err| map_io(&dir, err))?;

        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                // Entry vanished between readdir and stat.
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            items.push(Self::to_item(&join_pathname(&dir, &name), &metadata));
        }

        items.sort_by(|a, b| a.pathname.cmp(&b.pathname));
        Ok(items)
    }

    async fn mkdir(&self, pathname: &str) -> Result<()> {
        fs::create_dir_all(self.to_fs(pathname)).await?;
        Ok(())
    }

    async fn rename(&self, old: &str, new: &str) -> Result<()> {
        let target = self.to_fs(new);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(self.to_fs(old), target)
            .await
            .map_err(|err| map_io(old, err))
    }

    async fn remove_all(&self, pathname: &str) -> Result<()> {
        let path = self.to_fs(pathname);
        if path == self.root {
            return Err(PipelineError::Internal(
                "refusing to remove the storage root".into(),
            ));
        }

        let result = match fs::symlink_metadata(&path).await {
            Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(&path).await,
            Ok(_) => fs::remove_file(&path).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn read(&self, pathname: &str) -> Result<Vec<u8>> {
        fs::read(self.to_fs(pathname))
            .await
            .map_err(|err| map_io(pathname, err))
    }

    async fn write(&self, pathname: &str, content: &[u8]) -> Result<()> {
        let path = self.to_fs(pathname);
        let Some(parent) = path.parent() else {
            return Err(PipelineError::Internal(format!("cannot write the root {pathname}")));
        };
        fs::create_dir_all(parent).await?;

        // Readers only ever see the previous or the complete new content.
        let staging = parent.join(format!(".{}.tmp", Uuid::new_v4().simple()));
        if let Err(err) = fs::write(&staging, content).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&staging, &path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(map_io(pathname, err));
        }
        Ok(())
    }

    async fn update_date(&self, pathname: &str, date: DateTime<Utc>) -> Result<()> {
        let path = self.to_fs(pathname);
        let modified: SystemTime = date.into();
        let owned = pathname.to_string();

        tokio::task::spawn_blocking(move || {
            let file = std::fs::File::options().write(true).open(&path)?;
            file.set_modified(modified)
        })
        .await
        .map_err(|err| PipelineError::Internal(format!("update_date task failed: {err}")))?
        .map_err(|err| map_io(&owned, err))
    }
}
