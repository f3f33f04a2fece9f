//! Environment boundary: the traits the engine uses to reach a prepared
//! environment, plus the shared command output shape.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Output of one shell command run inside the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the command exited with status zero.
    pub success: bool,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr (or the transport / timeout error).
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Failure reported when a command exceeds its timeout.
    pub fn timed_out(timeout: Duration) -> Self {
        Self::failure(format!("Command timed out ({}s)", timeout.as_secs()))
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Runs shell commands inside a prepared environment.
///
/// Contract:
/// - every call runs in a fresh instance; no call observes mutations made by
///   an earlier one, so checks can be reordered or run concurrently
/// - transport failures and timeouts come back as `success = false` with the
///   reason in `stderr`, never as a panic
#[async_trait]
pub trait EnvironmentRunner: Send + Sync {
    async fn run(&self, command: &str, timeout: Option<Duration>) -> CommandOutput;
}

/// Prepares and releases the environment a rubric runs against.
#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    /// Build the environment and hand back a runner for it.
    ///
    /// Returns [`GradeError::Preparation`](crate::GradeError::Preparation)
    /// with diagnostic text when the environment cannot be produced.
    async fn prepare(&self) -> Result<Arc<dyn EnvironmentRunner>>;

    /// Release everything `prepare` created. Best-effort.
    async fn teardown(&self) -> Result<()>;
}
