//! Error types for the evidence orchestrator
//!
//! Stage failures are values, not aborts: every collaborator returns
//! [`Result`], and the orchestrator records the error before moving on.

use thiserror::Error;

/// Main error type for retrieval stages and collaborators
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// A source adapter or assistive collaborator reported a failure
    #[error("Source '{source_name}' failed: {message}")]
    SourceFailed {
        source_name: String,
        message: String,
    },

    /// Stage exceeded its time budget
    #[error("Stage '{stage}' timed out after {duration_ms}ms")]
    Timeout { stage: String, duration_ms: u64 },

    /// The enclosing request was cancelled
    #[error("Retrieval cancelled")]
    Cancelled,

    /// A collaborator panicked while running inside a stage
    #[error("Stage '{stage}' panicked: {message}")]
    StagePanicked { stage: String, message: String },

    /// The collaborator was asked for something it cannot serve
    #[error("Unsupported request: {0}")]
    Unsupported(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// TOML parse errors
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic errors with context
    #[error("Retrieval error: {0}")]
    Generic(String),
}

impl RetrievalError {
    /// Convenience constructor for adapter failures
    pub fn source(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        RetrievalError::SourceFailed {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Whether this error says something about the health of the source.
    ///
    /// Only transient errors feed the cooldown tracker; a misconfigured or
    /// cancelled call must not open a breaker for everyone else.
    pub fn is_transient(&self) -> bool {
        match self {
            RetrievalError::SourceFailed { .. } => true,
            RetrievalError::Timeout { .. } => true,
            RetrievalError::StagePanicked { .. } => true,
            RetrievalError::IoError(_) => true,
            RetrievalError::Generic(_) => true,

            RetrievalError::Cancelled => false,
            RetrievalError::Unsupported(_) => false,
            RetrievalError::ConfigError(_) => false,
            RetrievalError::SerializationError(_) => false,
            RetrievalError::TomlError(_) => false,
        }
    }
}

/// Result type alias for retrieval operations
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Convert anyhow errors to RetrievalError
impl From<anyhow::Error> for RetrievalError {
    fn from(err: anyhow::Error) -> Self {
        RetrievalError::Generic(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RetrievalError::Timeout {
            stage: "web".to_string(),
            duration_ms: 4000,
        };
        assert!(err.to_string().contains("web"));
        assert!(err.to_string().contains("4000"));
    }

    #[test]
    fn test_source_failed_display() {
        let err = RetrievalError::source("vector", "index unavailable");
        assert!(err.to_string().contains("vector"));
        assert!(err.to_string().contains("index unavailable"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(RetrievalError::source("web", "503").is_transient());
        assert!(RetrievalError::Timeout {
            stage: "kg".to_string(),
            duration_ms: 10
        }
        .is_transient());
        assert!(!RetrievalError::Cancelled.is_transient());
        assert!(!RetrievalError::ConfigError("bad".to_string()).is_transient());
    }

    #[test]
    fn test_from_anyhow() {
        let err: RetrievalError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, RetrievalError::Generic(_)));
    }
}
