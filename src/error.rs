use thiserror::Error;

/// Errors surfaced by the recipe engine.
///
/// Every variant maps to a stable machine-readable [`EngineError::kind`] so
/// transports can report failures without parsing messages.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A required credential or model name is missing. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The indexes have not finished building yet. Callers may retry.
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// The remote text, embedding or vision service failed or returned
    /// unusable output. Never retried internally.
    #[error("generation failed: {0:#}")]
    GenerationFailure(#[source] anyhow::Error),

    /// Malformed input, rejected before any retrieval work starts.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Local infrastructure failure (index I/O, task join).
    #[error("internal error: {0:#}")]
    Internal(#[source] anyhow::Error),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::RetrievalUnavailable(_) => "retrieval_unavailable",
            Self::GenerationFailure(_) => "generation_failure",
            Self::Validation(_) => "validation_error",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetrievalUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
