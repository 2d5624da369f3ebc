//! Cache key namespacing.
//!
//! Every cache key carries a short hash of a format string so that bumping
//! the format orphans all previously cached values at once.

use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

/// Bump when the serialized shape of a cached value changes.
pub const CACHE_FORMAT: &str = "vibioh/fibr/3";

static CACHE_VERSION: Lazy<String> = Lazy::new(|| {
    let mut version = hex::encode(Sha256::digest(CACHE_FORMAT.as_bytes()));
    version.truncate(8);
    version
});

pub fn cache_version() -> &'static str {
    CACHE_VERSION.as_str()
}

/// `fibr:<version>:<kind>:<id>`
pub fn cache_key(kind: &str, id: &str) -> String {
    format!("fibr:{}:{kind}:{id}", cache_version())
}

/// Key of the distributed mutex guarding `name`.
pub fn mutex_key(name: &str) -> String {
    format!("fibr:mutex:{name}")
}
