//! Error taxonomy for the pipeline engine.

/// Errors a stage collaborator may report from `generate`, `validate`,
/// `repair`, or a terminal check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    /// Worth retrying against the stage's budget (rate limit, dropped connection).
    #[error("transient: {0}")]
    Transient(String),

    /// Not retryable; aborts the current run.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl StageError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result type returned by stage collaborators.
pub type StageResult<T> = std::result::Result<T, StageError>;

/// Engine-level errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("fatal error in stage {stage}: {message}")]
    Fatal { stage: String, message: String },

    #[error("stage {stage} exhausted its retry budget on transient errors before producing an artifact: {message}")]
    TransientExhausted { stage: String, message: String },

    #[error("stage {stage} {operation} timed out after {timeout_ms}ms")]
    Timeout {
        stage: String,
        operation: String,
        timeout_ms: u64,
    },

    #[error("invalid run state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),

    #[error("artifact content cannot be canonicalized: {0}")]
    NonCanonicalContent(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Wrap a collaborator error raised inside `stage`. Transient errors that
    /// reach this point were not retried and are treated as fatal.
    pub fn from_stage(stage: &str, err: StageError) -> Self {
        let message = match err {
            StageError::Transient(m) | StageError::Fatal(m) => m,
        };
        Self::Fatal {
            stage: stage.to_string(),
            message,
        }
    }

    /// Stage the error originated in, when it has one.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Fatal { stage, .. }
            | Self::TransientExhausted { stage, .. }
            | Self::Timeout { stage, .. } => Some(stage),
            _ => None,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_display() {
        assert_eq!(StageError::transient("429").to_string(), "transient: 429");
        assert_eq!(StageError::fatal("boom").to_string(), "fatal: boom");
        assert!(StageError::transient("x").is_transient());
        assert!(!StageError::fatal("x").is_transient());
    }

    #[test]
    fn test_from_stage_keeps_stage_name() {
        let err = PipelineError::from_stage("rules", StageError::fatal("schema mismatch"));
        assert_eq!(err.stage(), Some("rules"));
        let msg = err.to_string();
        assert!(msg.contains("rules"));
        assert!(msg.contains("schema mismatch"));
    }

    #[test]
    fn test_timeout_error_display() {
        let err = PipelineError::Timeout {
            stage: "concept".to_string(),
            operation: "generate".to_string(),
            timeout_ms: 500,
        };
        assert_eq!(
            err.to_string(),
            "stage concept generate timed out after 500ms"
        );
    }

    #[test]
    fn test_digest_mismatch_error() {
        let err = PipelineError::DigestMismatch {
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc123"));
        assert!(msg.contains("def456"));
        assert_eq!(err.stage(), None);
    }
}
