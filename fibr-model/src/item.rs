use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::paths::{base_name, normalize_pathname, parent_pathname};

/// Length of the hex fingerprint used as [`Item::id`].
pub const ITEM_ID_LEN: usize = 40;

const IMAGE_EXTENSIONS: &[&str] = &[
    ".bmp", ".gif", ".heic", ".jpeg", ".jpg", ".png", ".svg", ".tif",
    ".tiff", ".webp",
];
const VIDEO_EXTENSIONS: &[&str] = &[
    ".avi", ".m4v", ".mkv", ".mov", ".mp4", ".mpeg", ".mpg", ".ogg", ".webm",
    ".wmv",
];
const PDF_EXTENSIONS: &[&str] = &[".pdf"];

/// Immutable snapshot of one storage entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub pathname: String,
    pub id: String,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default)]
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub extension: String,
}

impl Item {
    pub fn file(
        pathname: impl AsRef<str>,
        size: u64,
        modified_at: DateTime<Utc>,
    ) -> Self {
        let pathname = normalize_pathname(pathname.as_ref());
        let extension = extension_of(base_name(&pathname));
        Self {
            id: Self::id_for(&pathname),
            pathname,
            is_dir: false,
            size,
            modified_at,
            extension,
        }
    }

    pub fn directory(
        pathname: impl AsRef<str>,
        modified_at: DateTime<Utc>,
    ) -> Self {
        let pathname = normalize_pathname(pathname.as_ref());
        Self {
            id: Self::id_for(&pathname),
            pathname,
            is_dir: true,
            size: 0,
            modified_at,
            extension: String::new(),
        }
    }

    /// Stable fingerprint of a pathname, truncated hex SHA-256.
    pub fn id_for(pathname: &str) -> String {
        let digest = Sha256::digest(pathname.as_bytes());
        let mut id = hex::encode(digest);
        id.truncate(ITEM_ID_LEN);
        id
    }

    pub fn name(&self) -> &str {
        base_name(&self.pathname)
    }

    /// Parent directory pathname.
    pub fn dir(&self) -> &str {
        parent_pathname(&self.pathname)
    }

    pub fn is_root(&self) -> bool {
        self.pathname == "/"
    }

    pub fn is_image(&self) -> bool {
        !self.is_dir && IMAGE_EXTENSIONS.contains(&self.extension.as_str())
    }

    pub fn is_video(&self) -> bool {
        !self.is_dir && VIDEO_EXTENSIONS.contains(&self.extension.as_str())
    }

    pub fn is_pdf(&self) -> bool {
        !self.is_dir && PDF_EXTENSIONS.contains(&self.extension.as_str())
    }

    /// Same entry with a different modification date.
    pub fn with_modified_at(&self, modified_at: DateTime<Utc>) -> Self {
        Self {
            modified_at,
            ..self.clone()
        }
    }
}

fn extension_of(name: &str) -> String {
    match name.rfind('.') {
        Some(0) | None => String::new(),
        Some(idx) => name[idx..].to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_stable_and_truncated() {
        let a = Item::file("/photos/a.jpg", 1, Utc::now());
        let b = Item::file("photos//a.jpg", 99, Utc::now());
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), ITEM_ID_LEN);
        assert_ne!(a.id, Item::id_for("/photos/b.jpg"));
    }

    #[test]
    fn extension_is_lowercased_with_dot() {
        let item = Item::file("/a/Holiday.JPG", 0, Utc::now());
        assert_eq!(item.extension, ".jpg");
        assert!(item.is_image());
        assert!(!item.is_video());

        let hidden = Item::file("/a/.bashrc", 0, Utc::now());
        assert_eq!(hidden.extension, "");

        let dir = Item::directory("/a.d", Utc::now());
        assert_eq!(dir.extension, "");
        assert!(!dir.is_image());
    }

    #[test]
    fn dir_and_name() {
        let item = Item::file("/a/b/c.mp4", 0, Utc::now());
        assert_eq!(item.dir(), "/a/b");
        assert_eq!(item.name(), "c.mp4");
        assert!(item.is_video());
        assert!(Item::directory("/", Utc::now()).is_root());
    }
}
