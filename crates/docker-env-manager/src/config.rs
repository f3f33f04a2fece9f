//! Docker environment configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default limit for `docker build`.
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 600;

/// Docker environment configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Docker CLI executable
    pub docker_bin: String,
    /// Directory holding per-target source trees (`<data_dir>/<target>`)
    pub data_dir: PathBuf,
    /// Build context passed to `docker build`
    pub build_context: PathBuf,
    /// Limit for `docker build`, in seconds
    pub build_timeout_secs: u64,
    /// Shell used to run check commands inside the container
    pub shell: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        DockerConfig {
            docker_bin: std::env::var("ENVGRADE_DOCKER_BIN").unwrap_or_else(|_| "docker".to_string()),
            data_dir: std::env::var("ENVGRADE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            build_context: PathBuf::from("."),
            build_timeout_secs: std::env::var("ENVGRADE_BUILD_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_BUILD_TIMEOUT_SECS),
            shell: "sh".to_string(),
        }
    }
}

impl DockerConfig {
    /// Create a config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Use a different Docker CLI executable
    pub fn with_docker_bin(mut self, docker_bin: impl Into<String>) -> Self {
        self.docker_bin = docker_bin.into();
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_build_context(mut self, build_context: impl Into<PathBuf>) -> Self {
        self.build_context = build_context.into();
        self
    }

    pub fn with_build_timeout_secs(mut self, secs: u64) -> Self {
        self.build_timeout_secs = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_override_defaults() {
        let config = DockerConfig::from_env()
            .with_docker_bin("podman")
            .with_data_dir("/srv/sources")
            .with_build_context("/srv")
            .with_build_timeout_secs(60);

        assert_eq!(config.docker_bin, "podman");
        assert_eq!(config.data_dir, PathBuf::from("/srv/sources"));
        assert_eq!(config.build_context, PathBuf::from("/srv"));
        assert_eq!(config.build_timeout_secs, 60);
        assert_eq!(config.shell, "sh");
    }
}
