use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reverse-geocoding result attached to EXIF data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Geocode {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub address: HashMap<String, String>,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

impl Geocode {
    pub fn has_address(&self) -> bool {
        !self.address.is_empty()
    }

    pub fn has_coordinates(&self) -> bool {
        self.latitude != 0.0 || self.longitude != 0.0
    }
}

/// EXIF extraction result for a single file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Exif {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub geocode: Geocode,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, serde_json::Value>,
}

impl Exif {
    pub fn is_zero(&self) -> bool {
        self.date.is_none()
            && !self.geocode.has_address()
            && !self.geocode.has_coordinates()
            && self.data.is_empty()
    }
}

/// User and extracted metadata of a file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub exif: Exif,
}

impl Metadata {
    pub fn has_data(&self) -> bool {
        !self.description.is_empty() || !self.tags.is_empty() || !self.exif.is_zero()
    }
}

/// Pure transform applied by a metadata update.
#[derive(Clone, Debug, PartialEq)]
pub enum MetadataAction {
    ReplaceExif(Exif),
    ReplaceDescription(String),
    AddTag(String),
    RemoveTag(String),
}

impl MetadataAction {
    pub fn apply(self, mut metadata: Metadata) -> Metadata {
        match self {
            MetadataAction::ReplaceExif(exif) => metadata.exif = exif,
            MetadataAction::ReplaceDescription(description) => {
                metadata.description = description
            }
            MetadataAction::AddTag(tag) => {
                if !metadata.tags.contains(&tag) {
                    metadata.tags.push(tag);
                }
            }
            MetadataAction::RemoveTag(tag) => {
                metadata.tags.retain(|existing| existing != &tag)
            }
        }
        metadata
    }

    /// Folds a sequence of actions over an initial value.
    pub fn apply_all(
        actions: impl IntoIterator<Item = MetadataAction>,
        metadata: Metadata,
    ) -> Metadata {
        actions
            .into_iter()
            .fold(metadata, |acc, action| action.apply(acc))
    }
}

/// Summary derived from the direct children of a directory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cover: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_fold_in_order() {
        let metadata = MetadataAction::apply_all(
            [
                MetadataAction::AddTag("sea".into()),
                MetadataAction::AddTag("sun".into()),
                MetadataAction::AddTag("sea".into()),
                MetadataAction::RemoveTag("sun".into()),
                MetadataAction::ReplaceDescription("beach".into()),
            ],
            Metadata::default(),
        );
        assert_eq!(metadata.tags, vec!["sea".to_string()]);
        assert_eq!(metadata.description, "beach");
        assert!(metadata.has_data());
    }

    #[test]
    fn exif_is_flattened() {
        let metadata = Metadata {
            description: "d".into(),
            exif: Exif {
                geocode: Geocode {
                    latitude: 1.5,
                    ..Geocode::default()
                },
                ..Exif::default()
            },
            ..Metadata::default()
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["geocode"]["latitude"], 1.5);
        assert!(Metadata::default().exif.is_zero());
    }
}
