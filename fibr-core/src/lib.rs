//! Event-driven consistency pipeline of the fibr file browser.
//!
//! Storage mutations are published as [`Event`](fibr_model::Event)s on the
//! [`bus::EventBus`], which fans every event out to an ordered list of
//! consumers. Each consumer keeps one family of derived state in line with
//! the authoritative tree: thumbnails and streams, EXIF metadata and
//! directory aggregates, share paths, webhook deliveries.
#![allow(missing_docs)]

pub mod bus;
pub mod cache;
pub mod collection;
pub mod config;
pub mod debounce;
pub mod error;
pub mod exclusive;
mod http;
pub mod metadata;
pub mod mirror;
pub mod pipeline;
pub mod queue;
pub mod sanitizer;
pub mod share;
pub mod storage;
pub mod thumbnail;
pub mod version;
pub mod webhook;

pub use bus::{Consumer, EventBus, EventPublisher};
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{Adapters, Pipeline, RunningPipeline};

pub use fibr_model as model;
