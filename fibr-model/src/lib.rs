//! Core data model definitions shared across fibr crates.
//!
//! Every type in this crate is an immutable value: storage snapshots
//! ([`Item`]), mutation notifications ([`Event`]), derived records
//! ([`Metadata`], [`Aggregate`]) and the two persisted collections
//! ([`Share`], [`Webhook`]).
#![allow(missing_docs)]

pub mod error;
pub mod event;
pub mod item;
pub mod jobs;
pub mod metadata;
pub mod paths;
pub mod share;
pub mod webhook;

// Intentionally curated re-exports for downstream consumers.
pub use error::{ModelError, Result as ModelResult};
pub use event::{Event, EventType, TraceContext};
pub use item::Item;
pub use jobs::{ExifReply, JobRequest, JobType};
pub use metadata::{Aggregate, Exif, Geocode, Metadata, MetadataAction};
pub use paths::{has_path_prefix, normalize_pathname, replace_path_prefix};
pub use share::Share;
pub use webhook::{Webhook, WebhookKind};
