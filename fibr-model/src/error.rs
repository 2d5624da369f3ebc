use std::fmt::{self, Display};

/// Errors produced by model constructors and parsers.
#[derive(Debug)]
pub enum ModelError {
    UnknownEventType(String),
    UnknownWebhookKind(String),
    InvalidPath(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::UnknownEventType(raw) => {
                write!(f, "unknown event type: {raw}")
            }
            ModelError::UnknownWebhookKind(raw) => {
                write!(f, "unknown webhook kind: {raw}")
            }
            ModelError::InvalidPath(msg) => write!(f, "invalid path: {msg}"),
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
