use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid item type: {0}")]
    InvalidItemType(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Pipeline closed")]
    Closed,

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn is_not_found(&self) -> bool {
        match self {
            PipelineError::NotFound(_) => true,
            PipelineError::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Absences that callers log at debug level and replace by a default.
    pub fn is_expected_absence(&self) -> bool {
        self.is_not_found() || matches!(self, PipelineError::InvalidItemType(_))
    }
}

impl From<fibr_model::ModelError> for PipelineError {
    fn from(err: fibr_model::ModelError) -> Self {
        PipelineError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_is_expected_absence() {
        let err = PipelineError::from(std::io::Error::from(
            std::io::ErrorKind::NotFound,
        ));
        assert!(err.is_not_found());
        assert!(err.is_expected_absence());

        let denied = PipelineError::from(std::io::Error::from(
            std::io::ErrorKind::PermissionDenied,
        ));
        assert!(!denied.is_expected_absence());
        assert!(
            PipelineError::InvalidItemType("dir".into()).is_expected_absence()
        );
        assert!(!PipelineError::Closed.is_not_found());
    }
}
