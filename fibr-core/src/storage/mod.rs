//! Authoritative file tree access.

mod local;

pub use local::LocalStorage;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fibr_model::Item;
use fibr_model::paths::join_pathname;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{PipelineError, Result};

/// Directory holding every derived artifact, hidden from listings.
pub const METADATA_DIRECTORY: &str = "/.fibr";

/// Pathname of a derived artifact stored next to the mirrored tree, e.g.
/// `/.fibr/photos/<id>.json` for `/photos/a.jpg`.
pub fn metadata_pathname(dir: &str, file_name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    join_pathname(&format!("{METADATA_DIRECTORY}{dir}"), file_name)
}

/// Directory mirroring `pathname` under [`METADATA_DIRECTORY`].
pub fn metadata_directory(pathname: &str) -> String {
    fibr_model::normalize_pathname(&format!("{METADATA_DIRECTORY}{pathname}"))
}

pub fn is_metadata_pathname(pathname: &str) -> bool {
    fibr_model::has_path_prefix(pathname, METADATA_DIRECTORY)
}

/// Decision returned by a [`WalkVisitor`] for each visited item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkControl {
    /// Keep going; for a directory, descend into the given pathname (which
    /// may differ from the visited one when the visitor renamed it).
    Continue(Option<String>),
    /// Do not descend into the visited directory.
    SkipDir,
}

#[async_trait]
pub trait WalkVisitor: Send {
    async fn visit(&mut self, item: Item) -> Result<WalkControl>;
}

/// Storage operations required by the pipeline.
///
/// Pathnames are normalized, slash-separated and rooted at `/`.
#[async_trait]
pub trait Storage: Send + Sync + fmt::Debug {
    /// Snapshot of `pathname`, [`PipelineError::NotFound`] when absent.
    async fn info(&self, pathname: &str) -> Result<Item>;

    /// Snapshot of `pathname`, `None` when absent.
    async fn stat(&self, pathname: &str) -> Result<Option<Item>> {
        match self.info(pathname).await {
            Ok(item) => Ok(Some(item)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Direct children of a directory, sorted by name.
    async fn list(&self, pathname: &str) -> Result<Vec<Item>>;

    /// Creates a directory and its missing parents.
    async fn mkdir(&self, pathname: &str) -> Result<()>;

    /// Moves an entry, creating the parents of the destination.
    async fn rename(&self, old: &str, new: &str) -> Result<()>;

    /// Removes an entry recursively, absent entries are not an error.
    async fn remove_all(&self, pathname: &str) -> Result<()>;

    async fn read(&self, pathname: &str) -> Result<Vec<u8>>;

    /// Writes a file, creating its parents.
    async fn write(&self, pathname: &str, content: &[u8]) -> Result<()>;

    /// Sets the modification date of a file.
    async fn update_date(&self, pathname: &str, date: DateTime<Utc>) -> Result<()>;

    /// Depth-first, pre-order traversal of `root`, children in name order.
    ///
    /// The root itself is not visited. Directory children are listed only
    /// after the visitor returned, under the pathname it answered with.
    async fn walk(&self, root: &str, visitor: &mut dyn WalkVisitor) -> Result<()> {
        let mut pending: Vec<Item> = self.list(root).await?;
        pending.reverse();

        while let Some(item) = pending.pop() {
            let is_dir = item.is_dir;
            let pathname = item.pathname.clone();
            match visitor.visit(item).await? {
                WalkControl::SkipDir => {}
                WalkControl::Continue(next) if is_dir => {
                    let dir = next.unwrap_or(pathname);
                    let mut children = self.list(&dir).await?;
                    children.reverse();
                    pending.extend(children);
                }
                WalkControl::Continue(_) => {}
            }
        }

        Ok(())
    }
}

/// Reads and decodes a JSON document.
pub async fn load_json<T: DeserializeOwned>(
    storage: &dyn Storage,
    pathname: &str,
) -> Result<T> {
    let raw = storage.read(pathname).await?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Encodes and writes a JSON document, replacing any previous content.
pub async fn save_json<T: Serialize + Sync>(
    storage: &dyn Storage,
    pathname: &str,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_vec(value)?;
    storage.write(pathname, &raw).await
}

pub(crate) fn not_found(pathname: &str) -> PipelineError {
    PipelineError::NotFound(pathname.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_paths_mirror_the_tree() {
        assert_eq!(metadata_pathname("/photos", "abc.json"), "/.fibr/photos/abc.json");
        assert_eq!(metadata_pathname("/", "abc.json"), "/.fibr/abc.json");
        assert_eq!(metadata_directory("/photos"), "/.fibr/photos");
        assert!(is_metadata_pathname("/.fibr/shares.json"));
        assert!(!is_metadata_pathname("/.fibrous"));
    }
}
