use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;
use crate::item::Item;

/// Metadata key carrying force hints.
pub const FORCE_KEY: &str = "force";
/// Force value that only invalidates caches.
pub const FORCE_CACHE: &str = "cache";
/// Force value that applies to every consumer.
pub const FORCE_ALL: &str = "all";

/// Kind of storage mutation an [`Event`] describes.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Start,
    Upload,
    CreateDir,
    Rename,
    Delete,
    Access,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::Start,
        EventType::Upload,
        EventType::CreateDir,
        EventType::Rename,
        EventType::Delete,
        EventType::Access,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Start => "start",
            EventType::Upload => "upload",
            EventType::CreateDir => "create_dir",
            EventType::Rename => "rename",
            EventType::Delete => "delete",
            EventType::Access => "access",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(raw.trim()))
            .ok_or_else(|| ModelError::UnknownEventType(raw.to_string()))
    }
}

/// Correlation data carried alongside an event through the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub correlation_id: Uuid,
}

impl Default for TraceContext {
    fn default() -> Self {
        Self {
            correlation_id: Uuid::now_v7(),
        }
    }
}

/// Notification that an item was observed or mutated.
///
/// Events are values: builders consume and return `self`, nothing mutates an
/// event once it has been published.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub item: Item,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_item: Option<Item>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub trace_context: TraceContext,
}

impl Event {
    fn new(kind: EventType, item: Item) -> Self {
        Self {
            kind,
            item,
            new_item: None,
            metadata: HashMap::new(),
            trace_context: TraceContext::default(),
        }
    }

    pub fn start(item: Item) -> Self {
        Self::new(EventType::Start, item)
    }

    pub fn upload(item: Item) -> Self {
        Self::new(EventType::Upload, item)
    }

    pub fn create_dir(item: Item) -> Self {
        Self::new(EventType::CreateDir, item)
    }

    pub fn rename(old: Item, new: Item) -> Self {
        Self {
            new_item: Some(new),
            ..Self::new(EventType::Rename, old)
        }
    }

    pub fn delete(item: Item) -> Self {
        Self::new(EventType::Delete, item)
    }

    pub fn access(item: Item) -> Self {
        Self::new(EventType::Access, item)
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_trace_context(mut self, trace_context: TraceContext) -> Self {
        self.trace_context = trace_context;
        self
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// `force=cache` hint: drop cached derived state.
    pub fn is_cache_forced(&self) -> bool {
        self.metadata_value(FORCE_KEY) == Some(FORCE_CACHE)
    }

    /// `force=all` or `force=<name>` hint: regenerate the named artifact.
    pub fn is_forced_for(&self, name: &str) -> bool {
        matches!(self.metadata_value(FORCE_KEY), Some(value) if value == FORCE_ALL || value == name)
    }

    /// Item the event leaves in place: the new item of a rename, else the item.
    pub fn target(&self) -> &Item {
        self.new_item.as_ref().unwrap_or(&self.item)
    }
}
