//! Wire types exchanged with the external renderer and EXIF extractor.

use serde::{Deserialize, Serialize};

use crate::item::Item;
use crate::metadata::Exif;

/// Kind of source a rendering job reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Image,
    Video,
    Pdf,
}

impl JobType {
    pub fn for_item(item: &Item) -> Option<Self> {
        if item.is_image() {
            Some(JobType::Image)
        } else if item.is_video() {
            Some(JobType::Video)
        } else if item.is_pdf() {
            Some(JobType::Pdf)
        } else {
            None
        }
    }
}

/// Asynchronous job request, also echoed back as the thumbnail reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub input: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u64>,
    #[serde(rename = "type")]
    pub kind: JobType,
}

/// Reply of the EXIF extractor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExifReply {
    pub item: Item,
    #[serde(default)]
    pub exif: Exif,
}
