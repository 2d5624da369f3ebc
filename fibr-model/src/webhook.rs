use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::event::{Event, EventType};
use crate::paths::has_path_prefix;

/// Shape of the body posted to a webhook.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookKind {
    /// JSON array of the events.
    #[default]
    Raw,
    /// Discord message with one embed per event.
    Discord,
    /// Slack message with one section per event.
    Slack,
}

impl WebhookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookKind::Raw => "raw",
            WebhookKind::Discord => "discord",
            WebhookKind::Slack => "slack",
        }
    }
}

impl fmt::Display for WebhookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookKind {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        [WebhookKind::Raw, WebhookKind::Discord, WebhookKind::Slack]
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(raw.trim()))
            .ok_or_else(|| ModelError::UnknownWebhookKind(raw.to_string()))
    }
}

/// Outbound notification registration for a path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: String,
    pub pathname: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub kind: WebhookKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub types: Vec<EventType>,
    pub created: DateTime<Utc>,
}

impl Webhook {
    /// Mirror message announcing the removal of `id`.
    pub fn tombstone(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            pathname: String::new(),
            recursive: false,
            kind: WebhookKind::Raw,
            url: String::new(),
            headers: BTreeMap::new(),
            types: Vec::new(),
            created: DateTime::UNIX_EPOCH,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.url.is_empty()
    }

    /// Whether `event` should be delivered to this webhook.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.types.contains(&event.kind) {
            return false;
        }

        if self.recursive {
            has_path_prefix(&event.item.pathname, &self.pathname)
        } else {
            event.item.dir() == self.pathname.trim_end_matches('/')
                || (self.pathname == "/" && event.item.dir() == "/")
        }
    }

    /// Two registrations delivering the same events to the same endpoint.
    pub fn similar(&self, other: &Webhook) -> bool {
        let mut mine = self.types.clone();
        let mut theirs = other.types.clone();
        mine.sort_by_key(|kind| kind.as_str());
        mine.dedup();
        theirs.sort_by_key(|kind| kind.as_str());
        theirs.dedup();

        self.pathname == other.pathname
            && self.recursive == other.recursive
            && self.kind == other.kind
            && self.url == other.url
            && mine == theirs
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::item::Item;

    fn hook(recursive: bool) -> Webhook {
        Webhook {
            id: "hook".into(),
            pathname: "/photos".into(),
            recursive,
            kind: WebhookKind::Raw,
            url: "http://example.invalid/hook".into(),
            headers: BTreeMap::new(),
            types: vec![EventType::Upload],
            created: Utc::now(),
        }
    }

    #[test]
    fn recursive_matches_nested_items() {
        let event = Event::upload(Item::file("/photos/2024/img.jpg", 1, Utc::now()));
        assert!(hook(true).matches(&event));
        assert!(!hook(false).matches(&event));
    }

    #[test]
    fn non_recursive_matches_direct_children() {
        let event = Event::upload(Item::file("/photos/img.jpg", 1, Utc::now()));
        assert!(hook(true).matches(&event));
        assert!(hook(false).matches(&event));
    }

    #[test]
    fn type_filter_applies() {
        let event = Event::delete(Item::file("/photos/img.jpg", 1, Utc::now()));
        assert!(!hook(true).matches(&event));
    }

    #[test]
    fn sibling_prefix_is_not_matched() {
        let event = Event::upload(Item::file("/photos2/img.jpg", 1, Utc::now()));
        assert!(!hook(true).matches(&event));
    }

    #[test]
    fn similar_ignores_type_order() {
        let mut a = hook(true);
        a.types = vec![EventType::Upload, EventType::Delete];
        let mut b = hook(true);
        b.id = "other".into();
        b.types = vec![EventType::Delete, EventType::Upload];
        assert!(a.similar(&b));
        b.recursive = false;
        assert!(!a.similar(&b));
    }

    #[test]
    fn kind_defaults_to_raw_and_splits_similarity() {
        let stored = r#"{"id":"h","pathname":"/","url":"http://x","types":["upload"],"created":"2024-01-01T00:00:00Z"}"#;
        let parsed: Webhook = serde_json::from_str(stored).expect("parse");
        assert_eq!(parsed.kind, WebhookKind::Raw);

        let mut discord = parsed.clone();
        discord.kind = "Discord".parse().expect("kind");
        assert_eq!(discord.kind, WebhookKind::Discord);
        assert!(!parsed.similar(&discord));
        assert!("teams".parse::<WebhookKind>().is_err());
    }
}
