//! Docker-Env-Manager: Docker-backed environments for envgrade
//!
//! Builds a recipe (Dockerfile) into an image, runs every check command in a
//! fresh `docker run --rm` container, and removes the image afterwards.
//!
//! When `<data_dir>/<target>` exists, generic `COPY . .` / `ADD . .`
//! directives are pointed at that source tree before building.

pub mod config;
pub mod error;
pub mod provider;
pub mod runner;

pub use config::{DockerConfig, DEFAULT_BUILD_TIMEOUT_SECS};
pub use error::{DockerError, Result};
pub use provider::{context_relative, rewrite_source_copies, DockerfileProvider};
pub use runner::DockerRunner;
