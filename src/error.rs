use thiserror::Error;

#[derive(Error, Debug)]
pub enum DuesError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Reasoning provider failure: {0}")]
    ProviderFailure(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[cfg(any(feature = "gemini", feature = "openai"))]
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl DuesError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// True for failures an operator resolves by changing the request, not by retrying.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Conflict(_) | Self::Validation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DuesError>;
