//! Builds an image from a recipe and hands out runners for it.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use envgrade_core::{EnvironmentProvider, EnvironmentRunner};
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::DockerConfig;
use crate::error::{DockerError, Result};
use crate::runner::DockerRunner;

/// Generic whole-context copy directives that get pointed at the target's
/// source tree.
const GENERIC_COPIES: [(&str, &str); 2] = [("COPY . .", "COPY"), ("ADD . .", "ADD")];

/// [`EnvironmentProvider`] that builds a Dockerfile into a tagged image.
#[derive(Debug, Clone)]
pub struct DockerfileProvider {
    config: DockerConfig,
    target: String,
    recipe: PathBuf,
    image: String,
    container_prefix: String,
}

impl DockerfileProvider {
    pub fn new(target: impl Into<String>, recipe: impl Into<PathBuf>, config: DockerConfig) -> Self {
        let target = target.into();
        let slug = docker_slug(&target);
        let started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            config,
            image: format!("eval_{slug}:latest"),
            container_prefix: format!("eval_{slug}_{started}"),
            target,
            recipe: recipe.into(),
        }
    }

    /// Tag the built image carries.
    pub fn image(&self) -> &str {
        &self.image
    }

    /// `<data_dir>/<target>`, where the target's sources are expected.
    pub fn source_dir(&self) -> PathBuf {
        self.config.data_dir.join(&self.target)
    }

    /// Build the image, rewriting generic copy directives when a source tree
    /// for the target exists.
    pub async fn build_image(&self) -> Result<()> {
        info!(image = %self.image, recipe = %self.recipe.display(), "building image");

        let content = tokio::fs::read_to_string(&self.recipe)
            .await
            .map_err(|source| DockerError::RecipeRead {
                path: self.recipe.clone(),
                source,
            })?;

        let source_dir = self.source_dir();
        let rewritten = if source_dir.is_dir() {
            info!(source_dir = %source_dir.display(), "found source directory");
            match self.context_relative_source().await {
                Some(relative) => rewrite_source_copies(&content, &relative.to_string_lossy()),
                None => {
                    warn!(
                        source_dir = %source_dir.display(),
                        build_context = %self.config.build_context.display(),
                        "source directory is not inside the build context, copy directives left as is"
                    );
                    None
                }
            }
        } else {
            warn!(source_dir = %source_dir.display(), "no source directory found");
            None
        };

        // Keeps the rewritten recipe on disk until the build is done.
        let temp_recipe = match rewritten {
            Some(modified) => Some(write_temp_recipe(&modified)?),
            None => None,
        };
        let recipe_path = temp_recipe
            .as_ref()
            .map(|file| file.path().to_path_buf())
            .unwrap_or_else(|| self.recipe.clone());

        self.docker_build(&recipe_path).await
    }

    /// Source directory as a path inside the build context, which is how
    /// `COPY`/`ADD` sources are resolved.
    async fn context_relative_source(&self) -> Option<PathBuf> {
        let source_dir = tokio::fs::canonicalize(self.source_dir()).await.ok()?;
        let context = tokio::fs::canonicalize(&self.config.build_context)
            .await
            .ok()?;
        context_relative(&source_dir, &context)
    }

    async fn docker_build(&self, recipe: &Path) -> Result<()> {
        let child = Command::new(&self.config.docker_bin)
            .arg("build")
            .arg("-t")
            .arg(&self.image)
            .arg("-f")
            .arg(recipe)
            .arg(&self.config.build_context)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DockerError::Spawn {
                bin: self.config.docker_bin.clone(),
                source,
            })?;

        let limit = Duration::from_secs(self.config.build_timeout_secs);
        let output = tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| DockerError::BuildTimeout {
                secs: self.config.build_timeout_secs,
            })?
            .map_err(|source| DockerError::Spawn {
                bin: self.config.docker_bin.clone(),
                source,
            })?;

        if output.status.success() {
            info!(image = %self.image, "image built");
            Ok(())
        } else {
            Err(DockerError::BuildFailed {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        }
    }

    /// Remove the built image.
    pub async fn remove_image(&self) -> Result<()> {
        let output = Command::new(&self.config.docker_bin)
            .args(["rmi", self.image.as_str()])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| DockerError::Spawn {
                bin: self.config.docker_bin.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(DockerError::RemoveFailed {
                image: self.image.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl EnvironmentProvider for DockerfileProvider {
    async fn prepare(&self) -> envgrade_core::Result<Arc<dyn EnvironmentRunner>> {
        self.build_image().await?;
        Ok(Arc::new(DockerRunner::new(
            &self.config,
            self.image.clone(),
            self.container_prefix.clone(),
        )))
    }

    async fn teardown(&self) -> envgrade_core::Result<()> {
        self.remove_image()
            .await
            .map_err(|e| envgrade_core::GradeError::Teardown(e.to_string()))?;
        info!(image = %self.image, "removed image");
        Ok(())
    }
}

/// Point `COPY . .` / `ADD . .` at `source_dir`.
///
/// Returns `None` when nothing changed, including when the recipe already
/// references `source_dir`.
pub fn rewrite_source_copies(recipe: &str, source_dir: &str) -> Option<String> {
    let source_dir = source_dir.trim_end_matches('/');
    if recipe.contains(source_dir) {
        return None;
    }

    let mut modified = recipe.to_string();
    for (directive, verb) in GENERIC_COPIES {
        if modified.contains(directive) {
            modified = modified.replace(directive, &format!("{verb} {source_dir}/ ."));
            info!(directive, source_dir, "rewrote copy directive");
        }
    }

    (modified != recipe).then_some(modified)
}

/// `source_dir` relative to `context`, or `None` when it lies outside it or
/// is the context itself. Both paths must already be canonical.
pub fn context_relative(source_dir: &Path, context: &Path) -> Option<PathBuf> {
    let relative = source_dir.strip_prefix(context).ok()?;
    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative.to_path_buf())
    }
}

fn write_temp_recipe(content: &str) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("envgrade_")
        .suffix(".dockerfile")
        .tempfile()
        .map_err(DockerError::TempRecipe)?;
    file.write_all(content.as_bytes())
        .map_err(DockerError::TempRecipe)?;
    file.flush().map_err(DockerError::TempRecipe)?;
    Ok(file)
}

/// Lowercase the target and replace anything Docker rejects in image and
/// container names.
fn docker_slug(target: &str) -> String {
    let slug: String = target
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if slug.is_empty() {
        "target".to_string()
    } else {
        slug
    }
}
