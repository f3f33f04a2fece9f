//! Error taxonomy for the rubric engine.
//!
//! Only load and preparation failures are represented here. Everything that
//! goes wrong while a check runs is folded into a failing
//! [`CheckResult`](crate::report::CheckResult) instead.

use std::path::PathBuf;

/// Errors produced by the rubric engine.
#[derive(Debug, thiserror::Error)]
pub enum GradeError {
    #[error("rubric file not found: {}", path.display())]
    RubricNotFound { path: PathBuf },

    #[error("invalid JSON in rubric file {}: {source}", path.display())]
    RubricParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read rubric file {}: {source}", path.display())]
    RubricRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("environment preparation failed: {0}")]
    Preparation(String),

    #[error("environment teardown failed: {0}")]
    Teardown(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for rubric engine operations.
pub type Result<T> = std::result::Result<T, GradeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rubric_not_found_display() {
        let err = GradeError::RubricNotFound {
            path: PathBuf::from("rubrics/demo.json"),
        };
        let msg = err.to_string();
        assert!(msg.contains("rubric file not found"));
        assert!(msg.contains("rubrics/demo.json"));
    }

    #[test]
    fn test_preparation_error_display() {
        let err = GradeError::Preparation("docker build exited with 1".to_string());
        assert!(err.to_string().contains("environment preparation failed"));
        assert!(err.to_string().contains("exited with 1"));
    }

    #[test]
    fn test_parse_error_keeps_source() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = GradeError::RubricParse {
            path: PathBuf::from("r.json"),
            source,
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("invalid JSON in rubric file r.json"));
    }
}
