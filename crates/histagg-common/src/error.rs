//! Error types for histagg

use thiserror::Error;

/// Result type alias for histagg operations
pub type Result<T> = std::result::Result<T, AggError>;

/// Main error type for histagg
///
/// The aggregation-specific variants map one-to-one onto the failure modes
/// of the pipeline: `NotFound` ends the current topic's run, `FetchFailed`
/// is isolated to a single staged object, `CommitFailed` and
/// `VerificationFailed` abort a run before any retirement, and
/// `RetirementFailed` is isolated to a single key.
#[derive(Error, Debug)]
pub enum AggError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Fetch failed for '{key}': {reason}")]
    FetchFailed { key: String, reason: String },

    #[error("Commit failed during {stage}: {reason}")]
    CommitFailed { stage: &'static str, reason: String },

    #[error("Verification failed: object '{key}' absent from bucket '{bucket}' after copy")]
    VerificationFailed { bucket: String, key: String },

    #[error("Retirement failed for '{key}': {reason}")]
    RetirementFailed { key: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AggError {
    /// Whether this error aborts the whole run (as opposed to a single
    /// object or key).
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            AggError::NotFound(_)
                | AggError::CommitFailed { .. }
                | AggError::VerificationFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_fatal_classification() {
        assert!(AggError::NotFound("bucket".into()).is_run_fatal());
        assert!(AggError::CommitFailed {
            stage: "upload",
            reason: "timeout".into()
        }
        .is_run_fatal());
        assert!(AggError::VerificationFailed {
            bucket: "b".into(),
            key: "k".into()
        }
        .is_run_fatal());

        assert!(!AggError::FetchFailed {
            key: "k".into(),
            reason: "read".into()
        }
        .is_run_fatal());
        assert!(!AggError::RetirementFailed {
            key: "k".into(),
            reason: "delete".into()
        }
        .is_run_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = AggError::VerificationFailed {
            bucket: "topic-history-stg".into(),
            key: "2024/01/15/archive.tar.gz".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("topic-history-stg"));
        assert!(msg.contains("2024/01/15/archive.tar.gz"));
    }
}
