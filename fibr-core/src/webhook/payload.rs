//! Request bodies of the chat webhook kinds.

use fibr_model::event::FORCE_KEY;
use fibr_model::{Event, EventType, Webhook};
use serde::Serialize;

/// Discord rejects messages with more embeds.
const DISCORD_MAX_EMBEDS: usize = 10;
/// Slack rejects messages with more blocks.
const SLACK_MAX_BLOCKS: usize = 50;

#[derive(Debug, Serialize)]
pub(crate) struct DiscordPayload {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<DiscordEmbed>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DiscordEmbed {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<DiscordField>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DiscordField {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub inline: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct SlackPayload {
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<SlackSection>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SlackSection {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: SlackText,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<SlackText>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SlackText {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

impl SlackText {
    fn markdown(text: impl Into<String>) -> Self {
        Self {
            kind: "mrkdwn",
            text: text.into(),
        }
    }
}

pub(crate) fn discord(webhook: &Webhook, events: &[Event]) -> DiscordPayload {
    DiscordPayload {
        content: summary(webhook, events),
        embeds: events
            .iter()
            .take(DISCORD_MAX_EMBEDS)
            .map(|event| DiscordEmbed {
                title: event.item.name().to_string(),
                description: describe(event),
                fields: details(event)
                    .into_iter()
                    .map(|(name, value)| DiscordField {
                        name,
                        value,
                        inline: true,
                    })
                    .collect(),
            })
            .collect(),
    }
}

pub(crate) fn slack(webhook: &Webhook, events: &[Event]) -> SlackPayload {
    SlackPayload {
        text: summary(webhook, events),
        blocks: events
            .iter()
            .take(SLACK_MAX_BLOCKS)
            .map(|event| SlackSection {
                kind: "section",
                text: SlackText::markdown(describe(event)),
                fields: details(event)
                    .into_iter()
                    .map(|(name, value)| SlackText::markdown(format!("*{name}*\n{value}")))
                    .collect(),
            })
            .collect(),
    }
}

fn summary(webhook: &Webhook, events: &[Event]) -> String {
    match events.len() {
        1 => format!("1 new event in `{}`", webhook.pathname),
        count => format!("{count} new events in `{}`", webhook.pathname),
    }
}

fn describe(event: &Event) -> String {
    let pathname = &event.item.pathname;
    match event.kind {
        EventType::Start => format!("`{pathname}` checked"),
        EventType::Upload => format!("`{pathname}` uploaded"),
        EventType::CreateDir => format!("`{pathname}` directory created"),
        EventType::Rename => match &event.new_item {
            Some(new_item) => format!("`{pathname}` renamed to `{}`", new_item.pathname),
            None => format!("`{pathname}` renamed"),
        },
        EventType::Delete => format!("`{pathname}` deleted"),
        EventType::Access => format!("`{pathname}` accessed"),
    }
}

/// Event metadata as sorted name/value pairs, force hints left out.
fn details(event: &Event) -> Vec<(String, String)> {
    let mut details: Vec<_> = event
        .metadata
        .iter()
        .filter(|(name, value)| name.as_str() != FORCE_KEY && !value.is_empty())
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    details.sort();
    details
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use fibr_model::Item;

    use super::*;

    fn hook() -> Webhook {
        Webhook {
            id: "h".into(),
            pathname: "/photos".into(),
            recursive: true,
            kind: fibr_model::WebhookKind::Discord,
            url: "http://example.invalid".into(),
            headers: Default::default(),
            types: vec![EventType::Upload, EventType::Rename],
            created: Utc::now(),
        }
    }

    #[test]
    fn discord_caps_embeds() {
        let events: Vec<_> = (0..12)
            .map(|n| Event::upload(Item::file(format!("/photos/{n}.jpg"), 1, Utc::now())))
            .collect();
        let payload = discord(&hook(), &events);
        assert_eq!(payload.content, "12 new events in `/photos`");
        assert_eq!(payload.embeds.len(), DISCORD_MAX_EMBEDS);
        assert_eq!(payload.embeds[0].title, "0.jpg");
    }

    #[test]
    fn rename_mentions_both_paths() {
        let old = Item::file("/photos/a.jpg", 1, Utc::now());
        let new = Item::file("/photos/b.jpg", 1, Utc::now());
        let payload = slack(&hook(), &[Event::rename(old, new)]);
        assert_eq!(payload.text, "1 new event in `/photos`");
        assert_eq!(
            payload.blocks[0].text.text,
            "`/photos/a.jpg` renamed to `/photos/b.jpg`"
        );
    }
}
