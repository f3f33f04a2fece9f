//! One rubric run against one prepared environment.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::check::Rubric;
use crate::error::Result;
use crate::report::Report;
use crate::runner::EnvironmentProvider;
use crate::scheduler::{run_checks, SchedulerConfig};

/// Wires rubric, environment, scheduler and report together.
///
/// An orchestrator owns no per-run state; every call to [`evaluate`]
/// builds its own result collection, so independent runs never share
/// mutable state.
///
/// [`evaluate`]: Orchestrator::evaluate
pub struct Orchestrator {
    provider: Arc<dyn EnvironmentProvider>,
    config: SchedulerConfig,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn EnvironmentProvider>) -> Self {
        Self {
            provider,
            config: SchedulerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Load the rubric at `path` and evaluate it.
    ///
    /// Load failures are returned before any environment work starts.
    pub async fn evaluate_path(&self, path: &Path) -> Result<Report> {
        let rubric = Rubric::load(path)?;
        info!(target_name = %rubric.target, checks = rubric.len(), "loaded rubric");

        let report = self.evaluate(&rubric).await;
        Ok(report.with_rubric_path(path.display().to_string()))
    }

    /// Evaluate an already-loaded rubric.
    ///
    /// - empty rubric: empty report, the environment is never prepared
    /// - preparation failure: empty report carrying the diagnostic
    /// - otherwise: every check scheduled and scored
    ///
    /// Teardown runs whenever preparation was attempted.
    #[instrument(skip_all, fields(target_name = %rubric.target, checks = rubric.len()))]
    pub async fn evaluate(&self, rubric: &Rubric) -> Report {
        if rubric.is_empty() {
            info!("no checks found in rubric");
            return Report::empty(&rubric.target, &rubric.checks);
        }

        let runner = match self.provider.prepare().await {
            Ok(runner) => runner,
            Err(err) => {
                warn!(error = %err, "cannot run checks");
                self.teardown().await;
                return Report::empty(&rubric.target, &rubric.checks)
                    .with_environment_error(err.to_string());
            }
        };

        info!("running {} checks", rubric.len());
        let outcome = run_checks(&rubric.checks, runner.as_ref(), &self.config).await;
        let report = Report::build(&rubric.target, &rubric.checks, outcome.results);

        self.teardown().await;

        info!(
            passed = report.summary.passed_tests,
            failed = report.summary.failed_tests,
            score = report.summary.total_score,
            max_score = report.summary.max_score,
            passes = outcome.passes,
            "evaluation finished"
        );
        report
    }

    /// Release the environment. Failures are logged, never returned.
    pub async fn teardown(&self) {
        match self.provider.teardown().await {
            Ok(()) => info!("environment released"),
            Err(err) => warn!(error = %err, "could not release environment"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{Check, CheckKind};
    use crate::fakes::{ScriptedRunner, StaticProvider};
    use crate::runner::CommandOutput;

    fn rubric() -> Rubric {
        Rubric::new(
            "demo",
            vec![Check::new(
                "a",
                CheckKind::RunCommand {
                    command: "true".to_string(),
                },
            )
            .with_score(3)],
        )
    }

    #[tokio::test]
    async fn test_evaluate_runs_and_tears_down() {
        let runner = Arc::new(ScriptedRunner::new().on("true", CommandOutput::success("")));
        let provider = Arc::new(StaticProvider::ready(runner.clone()));
        let orchestrator = Orchestrator::new(provider.clone());

        let report = orchestrator.evaluate(&rubric()).await;
        assert_eq!(report.summary.total_tests, 1);
        assert_eq!(report.summary.total_score, 3);
        assert!(report.all_passed());
        assert_eq!(provider.prepare_calls(), 1);
        assert_eq!(provider.teardown_calls(), 1);
    }

    #[tokio::test]
    async fn test_preparation_failure_yields_empty_report() {
        let provider = Arc::new(StaticProvider::failing("docker build exited with 1"));
        let orchestrator = Orchestrator::new(provider.clone());

        let report = orchestrator.evaluate(&rubric()).await;
        assert_eq!(report.summary.total_tests, 0);
        assert_eq!(report.summary.max_score, 3);
        assert_eq!(report.summary.success_rate, 0.0);
        assert!(report
            .environment_error
            .as_deref()
            .unwrap()
            .contains("docker build exited with 1"));
        assert_eq!(provider.teardown_calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_rubric_skips_environment() {
        let provider = Arc::new(StaticProvider::failing("unused"));
        let orchestrator = Orchestrator::new(provider.clone());

        let report = orchestrator.evaluate(&Rubric::new("demo", vec![])).await;
        assert_eq!(report.summary.total_tests, 0);
        assert!(report.environment_error.is_none());
        assert_eq!(provider.prepare_calls(), 0);
        assert_eq!(provider.teardown_calls(), 0);
    }

    #[tokio::test]
    async fn test_teardown_error_is_not_escalated() {
        let runner = Arc::new(ScriptedRunner::new().on("true", CommandOutput::success("")));
        let provider =
            Arc::new(StaticProvider::ready(runner).with_teardown_error("image in use"));
        let orchestrator = Orchestrator::new(provider.clone());

        let report = orchestrator.evaluate(&rubric()).await;
        assert!(report.all_passed());
        assert_eq!(provider.teardown_calls(), 1);
    }
}
