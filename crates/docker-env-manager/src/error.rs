//! Error types for docker-env-manager

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building or releasing a Docker environment
#[derive(Error, Debug)]
pub enum DockerError {
    /// Build recipe could not be read
    #[error("could not read recipe {}: {source}", path.display())]
    RecipeRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Temporary rewritten recipe could not be written
    #[error("could not write temporary recipe: {0}")]
    TempRecipe(#[source] std::io::Error),

    /// Docker CLI could not be started
    #[error("could not run `{bin}`: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    /// `docker build` exited non-zero
    #[error("docker build failed (exit code {code:?})\nSTDOUT: {stdout}\nSTDERR: {stderr}")]
    BuildFailed {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// `docker build` exceeded the configured limit
    #[error("docker build timed out after {secs}s")]
    BuildTimeout { secs: u64 },

    /// `docker rmi` failed
    #[error("could not remove image {image}: {reason}")]
    RemoveFailed { image: String, reason: String },
}

/// Result type for docker-env-manager operations
pub type Result<T> = std::result::Result<T, DockerError>;

impl From<DockerError> for envgrade_core::GradeError {
    fn from(err: DockerError) -> Self {
        match err {
            DockerError::RemoveFailed { .. } => envgrade_core::GradeError::Teardown(err.to_string()),
            other => envgrade_core::GradeError::Preparation(other.to_string()),
        }
    }
}
