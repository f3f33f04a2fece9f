//! envgrade - grade a container build against a rubric
//!
//! Builds the recipe into an image, runs every rubric check inside it,
//! prints a scored summary and optionally writes the JSON report.
//!
//! Exit status: 0 when every check passed, 1 otherwise (including rubric
//! load errors and environment failures), 130 when interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use docker_env_manager::{DockerConfig, DockerfileProvider};
use envgrade_core::{Orchestrator, Report, Rubric, SchedulerConfig, DEFAULT_COMMAND_TIMEOUT_SECS};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn, Level};

const INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "envgrade")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Grade a container build environment against a rubric", long_about = None)]
struct Cli {
    /// Build recipe (Dockerfile) for the environment
    #[arg(short, long, visible_alias = "recipe")]
    dockerfile: PathBuf,

    /// Target repository name
    #[arg(short, long)]
    repo: String,

    /// Rubric file (default: rubrics/<repo>.json)
    #[arg(long)]
    rubric: Option<PathBuf>,

    /// Write the JSON report to this path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print one line per check and enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Checks evaluated at the same time (1 = sequential)
    #[arg(long, env = "ENVGRADE_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Timeout in seconds for command checks that declare none
    #[arg(long, default_value_t = DEFAULT_COMMAND_TIMEOUT_SECS)]
    command_timeout: u64,

    /// Directory holding per-repository source trees
    #[arg(long, env = "ENVGRADE_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

impl Cli {
    fn rubric_path(&self) -> PathBuf {
        self.rubric
            .clone()
            .unwrap_or_else(|| default_rubric_path(&self.repo))
    }

    fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            default_command_timeout_secs: self.command_timeout,
            ..SchedulerConfig::default()
        }
        .with_max_concurrency(self.concurrency)
    }

    fn docker_config(&self) -> DockerConfig {
        let config = DockerConfig::from_env();
        match &self.data_dir {
            Some(dir) => config.with_data_dir(dir),
            None => config,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    envgrade_core::init_tracing(cli.json, level);

    let rubric_path = cli.rubric_path();
    let rubric = Rubric::load(&rubric_path)
        .with_context(|| format!("Failed to load rubric {}", rubric_path.display()))?
        .with_target(&cli.repo);
    info!(repo = %cli.repo, rubric = %rubric_path.display(), checks = rubric.len(), "loaded rubric");

    let provider = DockerfileProvider::new(&cli.repo, &cli.dockerfile, cli.docker_config());
    let orchestrator = Orchestrator::new(Arc::new(provider)).with_config(cli.scheduler_config());

    let report = tokio::select! {
        report = orchestrator.evaluate(&rubric) => report,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, releasing environment");
            orchestrator.teardown().await;
            return Ok(ExitCode::from(INTERRUPTED));
        }
    };
    let report = report
        .with_recipe(cli.dockerfile.display().to_string())
        .with_rubric_path(rubric_path.display().to_string());

    if let Some(err) = &report.environment_error {
        eprintln!("Environment error: {err}");
    }
    print!("{}", render_summary(&report, cli.verbose));

    if let Some(output) = &cli.output {
        write_report(&report, output)?;
        println!("Report written to {}", output.display());
    }

    Ok(if report.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn default_rubric_path(repo: &str) -> PathBuf {
    Path::new("rubrics").join(format!("{repo}.json"))
}

fn render_summary(report: &Report, verbose: bool) -> String {
    let summary = &report.summary;
    let mut out = String::new();

    out.push_str(&format!("Repository:    {}\n", report.repo));
    out.push_str(&format!("Total Tests:   {}\n", summary.total_tests));
    out.push_str(&format!("Passed:        {}\n", summary.passed_tests));
    out.push_str(&format!("Failed:        {}\n", summary.failed_tests));
    out.push_str(&format!(
        "Score:         {}/{}\n",
        summary.total_score, summary.max_score
    ));
    out.push_str(&format!(
        "Success Rate:  {:.1}%\n",
        summary.success_rate * 100.0
    ));
    out.push_str(&format!(
        "Total Time:    {:.2}s\n",
        summary.total_execution_time
    ));

    if verbose && !report.test_results.is_empty() {
        out.push('\n');
        for result in &report.test_results {
            let mark = if result.passed { '✓' } else { '✗' };
            out.push_str(&format!(
                "{mark} [{}] {} ({:.2}s)\n",
                result.check_type, result.message, result.duration_secs
            ));
        }
    }

    out
}

fn write_report(report: &Report, path: &Path) -> Result<()> {
    let json = report
        .to_json_pretty()
        .context("Failed to serialize report")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
