//! Runs check commands in throwaway containers.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use envgrade_core::{CommandOutput, EnvironmentRunner};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::DockerConfig;

/// [`EnvironmentRunner`] backed by `docker run --rm`.
///
/// Every call starts a fresh container from the same image under a unique
/// name, so calls are isolated from each other and may run concurrently.
#[derive(Debug, Clone)]
pub struct DockerRunner {
    docker_bin: String,
    shell: String,
    image: String,
    container_prefix: String,
}

impl DockerRunner {
    pub fn new(
        config: &DockerConfig,
        image: impl Into<String>,
        container_prefix: impl Into<String>,
    ) -> Self {
        Self {
            docker_bin: config.docker_bin.clone(),
            shell: config.shell.clone(),
            image: image.into(),
            container_prefix: container_prefix.into(),
        }
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    fn container_name(&self) -> String {
        format!("{}_{}", self.container_prefix, Uuid::new_v4().simple())
    }

    /// Remove a container left behind by a timed-out call.
    async fn force_remove(&self, container: &str) {
        let result = Command::new(&self.docker_bin)
            .args(["rm", "-f", container])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        if let Err(e) = result {
            warn!(container, error = %e, "could not remove timed-out container");
        }
    }
}

#[async_trait]
impl EnvironmentRunner for DockerRunner {
    async fn run(&self, command: &str, timeout: Option<Duration>) -> CommandOutput {
        let container = self.container_name();
        debug!(%container, image = %self.image, command, "docker run");

        let child = Command::new(&self.docker_bin)
            .args([
                "run",
                "--rm",
                "--name",
                container.as_str(),
                self.image.as_str(),
                self.shell.as_str(),
                "-c",
                command,
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                return CommandOutput::failure(format!("could not run `{}`: {e}", self.docker_bin))
            }
        };

        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output,
                Err(_elapsed) => {
                    self.force_remove(&container).await;
                    return CommandOutput::timed_out(limit);
                }
            },
            None => child.wait_with_output().await,
        };

        match output {
            Ok(output) => CommandOutput {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            },
            Err(e) => CommandOutput::failure(e.to_string()),
        }
    }
}
