//! Dependency-aware check scheduling.
//!
//! Checks move from *pending* to *completed* in passes. A pending check is
//! runnable once every id in its `requires` list has completed **and**
//! passed. A pass that retires nothing means the remaining checks can never
//! run (dangling ids, cycles, failed prerequisites); they are recorded as
//! failed and the run ends. Passes are capped at twice the number of checks.

use std::collections::HashMap;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{info, instrument, warn};

use crate::check::{Check, DEFAULT_COMMAND_TIMEOUT_SECS};
use crate::evaluate::evaluate_check;
use crate::report::CheckResult;
use crate::runner::EnvironmentRunner;

/// Scheduling knobs for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Checks evaluated at the same time within a pass (1 = sequential).
    pub max_concurrency: usize,

    /// Timeout for command-running checks that do not declare one.
    pub default_command_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            default_command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn default_command_timeout(&self) -> Duration {
        Duration::from_secs(self.default_command_timeout_secs)
    }
}

/// Results of a scheduled run.
#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    /// One result per check, in completion order. Checks that never ran
    /// come last.
    pub results: Vec<CheckResult>,

    /// Number of scheduling passes performed.
    pub passes: usize,
}

/// Whether `check` may run given the completed `id → passed` map.
pub fn is_runnable(check: &Check, completed: &HashMap<String, bool>) -> bool {
    check
        .requires
        .iter()
        .all(|id| completed.get(id).copied().unwrap_or(false))
}

/// Run every check, honouring `requires` gating.
///
/// Always yields exactly one result per check.
#[instrument(skip_all, fields(checks = checks.len(), max_concurrency = config.max_concurrency))]
pub async fn run_checks(
    checks: &[Check],
    runner: &dyn EnvironmentRunner,
    config: &SchedulerConfig,
) -> ScheduleOutcome {
    let mut state = RunState {
        pending: checks.iter().collect(),
        completed: HashMap::new(),
        results: Vec::with_capacity(checks.len()),
    };
    let max_passes = checks.len() * 2;
    let mut passes = 0;

    while !state.pending.is_empty() && passes < max_passes {
        passes += 1;

        let retired = if config.max_concurrency <= 1 {
            state.sequential_pass(runner, config).await
        } else {
            state.concurrent_pass(runner, config).await
        };

        if retired == 0 {
            break;
        }
    }

    if !state.pending.is_empty() {
        warn!(
            stuck = state.pending.len(),
            passes, "some checks have unresolvable dependencies"
        );
        state.fail_unresolvable();
    }

    ScheduleOutcome {
        results: state.results,
        passes,
    }
}

struct RunState<'a> {
    pending: Vec<&'a Check>,
    completed: HashMap<String, bool>,
    results: Vec<CheckResult>,
}

impl<'a> RunState<'a> {
    /// Walk pending checks in declaration order, re-checking runnability as
    /// results land, so a prerequisite that passes early in the pass unlocks
    /// its dependents in the same pass.
    async fn sequential_pass(
        &mut self,
        runner: &dyn EnvironmentRunner,
        config: &SchedulerConfig,
    ) -> usize {
        let mut blocked = Vec::new();
        let mut retired = 0;

        for check in std::mem::take(&mut self.pending) {
            if is_runnable(check, &self.completed) {
                let result = run_one(check, runner, config).await;
                self.record(result);
                retired += 1;
            } else {
                blocked.push(check);
            }
        }

        self.pending = blocked;
        retired
    }

    /// Fix the runnable set at the start of the pass and evaluate it with
    /// bounded concurrency, recording results as they complete. Checks
    /// unlocked by this pass wait for the next one.
    async fn concurrent_pass(
        &mut self,
        runner: &dyn EnvironmentRunner,
        config: &SchedulerConfig,
    ) -> usize {
        let completed = &self.completed;
        let (runnable, blocked): (Vec<&Check>, Vec<&Check>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|check| is_runnable(check, completed));
        self.pending = blocked;

        let batch: Vec<CheckResult> = stream::iter(runnable.iter().copied())
            .map(|check| run_one(check, runner, config))
            .buffer_unordered(config.max_concurrency)
            .collect()
            .await;

        let retired = batch.len();
        for result in batch {
            self.record(result);
        }
        retired
    }

    fn record(&mut self, result: CheckResult) {
        self.completed.insert(result.check_id.clone(), result.passed);
        self.results.push(result);
    }

    fn fail_unresolvable(&mut self) {
        for check in std::mem::take(&mut self.pending) {
            let message = unresolvable_message(check, &self.completed);
            warn!(check_id = %check.id, %message, "check skipped");
            self.results.push(CheckResult::failed(check, message, 0.0));
        }
    }
}

async fn run_one(
    check: &Check,
    runner: &dyn EnvironmentRunner,
    config: &SchedulerConfig,
) -> CheckResult {
    info!(check_id = %check.id, check_type = check.type_name(), "running check");

    let result = evaluate_check(check, runner, config.default_command_timeout()).await;

    info!(
        check_id = %result.check_id,
        passed = result.passed,
        score = result.score,
        duration_secs = result.duration_secs,
        message = %result.message,
        "check finished"
    );
    result
}

/// `Unresolvable dependencies: ['a', 'z'] (failed: a; never ran: z)`
fn unresolvable_message(check: &Check, completed: &HashMap<String, bool>) -> String {
    let listed = check
        .requires
        .iter()
        .map(|id| format!("'{id}'"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut message = format!("Unresolvable dependencies: [{listed}]");

    let failed: Vec<&str> = check
        .requires
        .iter()
        .filter(|id| completed.get(id.as_str()) == Some(&false))
        .map(String::as_str)
        .collect();
    let never_ran: Vec<&str> = check
        .requires
        .iter()
        .filter(|id| !completed.contains_key(id.as_str()))
        .map(String::as_str)
        .collect();

    let mut details = Vec::new();
    if !failed.is_empty() {
        details.push(format!("failed: {}", failed.join(", ")));
    }
    if !never_ran.is_empty() {
        details.push(format!("never ran: {}", never_ran.join(", ")));
    }
    if !details.is_empty() {
        message.push_str(&format!(" ({})", details.join("; ")));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::CheckKind;
    use crate::fakes::ScriptedRunner;
    use crate::runner::CommandOutput;

    fn run(id: &str, command: &str) -> Check {
        Check::new(
            id,
            CheckKind::RunCommand {
                command: command.to_string(),
            },
        )
    }

    fn ids(outcome: &ScheduleOutcome) -> Vec<&str> {
        outcome.results.iter().map(|r| r.check_id.as_str()).collect()
    }

    #[test]
    fn test_is_runnable() {
        let mut completed = HashMap::new();
        let free = run("a", "true");
        let gated = run("b", "true").with_requires(["a"]);

        assert!(is_runnable(&free, &completed));
        assert!(!is_runnable(&gated, &completed));

        completed.insert("a".to_string(), false);
        assert!(!is_runnable(&gated, &completed));

        completed.insert("a".to_string(), true);
        assert!(is_runnable(&gated, &completed));
    }

    #[test]
    fn test_unresolvable_message_breakdown() {
        let mut completed = HashMap::new();
        completed.insert("a".to_string(), false);
        let check = run("c", "true").with_requires(["a", "z"]);

        assert_eq!(
            unresolvable_message(&check, &completed),
            "Unresolvable dependencies: ['a', 'z'] (failed: a; never ran: z)"
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.default_command_timeout(), Duration::from_secs(30));
        assert_eq!(SchedulerConfig::default().with_max_concurrency(0).max_concurrency, 1);
    }

    #[tokio::test]
    async fn test_independent_checks_all_run_in_order() {
        let runner = ScriptedRunner::new().on("ok", CommandOutput::success(""));
        let checks = vec![run("a", "ok"), run("b", "bad"), run("c", "ok")];

        let outcome = run_checks(&checks, &runner, &SchedulerConfig::default()).await;
        assert_eq!(ids(&outcome), vec!["a", "b", "c"]);
        assert_eq!(outcome.passes, 1);
        assert_eq!(outcome.results.iter().filter(|r| r.passed).count(), 2);
    }

    #[tokio::test]
    async fn test_dependency_declared_after_dependent() {
        let runner = ScriptedRunner::new().on("ok", CommandOutput::success(""));
        let checks = vec![run("b", "ok").with_requires(["a"]), run("a", "ok")];

        let outcome = run_checks(&checks, &runner, &SchedulerConfig::default()).await;
        assert_eq!(ids(&outcome), vec!["a", "b"]);
        assert_eq!(outcome.passes, 2);
        assert!(outcome.results.iter().all(|r| r.passed));
    }

    #[tokio::test]
    async fn test_sequential_pass_unlocks_later_dependents() {
        let runner = ScriptedRunner::new().on("ok", CommandOutput::success(""));
        let checks = vec![
            run("a", "ok"),
            run("b", "ok").with_requires(["a"]),
            run("c", "ok").with_requires(["b"]),
        ];

        let outcome = run_checks(&checks, &runner, &SchedulerConfig::default()).await;
        assert_eq!(ids(&outcome), vec!["a", "b", "c"]);
        assert_eq!(outcome.passes, 1);
    }

    #[tokio::test]
    async fn test_cycle_terminates_as_unresolvable() {
        let runner = ScriptedRunner::new().on("ok", CommandOutput::success(""));
        let checks = vec![
            run("x", "ok").with_requires(["y"]),
            run("y", "ok").with_requires(["x"]),
            run("free", "ok"),
        ];

        let outcome = run_checks(&checks, &runner, &SchedulerConfig::default()).await;
        assert!(outcome.passes <= checks.len() * 2);
        assert_eq!(ids(&outcome), vec!["free", "x", "y"]);

        for id in ["x", "y"] {
            let result = outcome.results.iter().find(|r| r.check_id == id).unwrap();
            assert!(!result.passed);
            assert_eq!(result.score, 0);
            assert!(result.message.starts_with("Unresolvable dependencies"));
        }
        assert_eq!(runner.commands(), vec!["ok".to_string()]);
    }

    #[tokio::test]
    async fn test_dangling_requirement() {
        let runner = ScriptedRunner::new().on("ok", CommandOutput::success(""));
        let checks = vec![run("y", "ok").with_requires(["z"])];

        let outcome = run_checks(&checks, &runner, &SchedulerConfig::default()).await;
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(
            outcome.results[0].message,
            "Unresolvable dependencies: ['z'] (never ran: z)"
        );
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_failed_prerequisite_blocks_transitively() {
        let runner = ScriptedRunner::new().on("ok", CommandOutput::success(""));
        let checks = vec![
            run("a", "broken"),
            run("b", "ok").with_requires(["a"]),
            run("c", "ok").with_requires(["b"]),
        ];

        let outcome = run_checks(&checks, &runner, &SchedulerConfig::default()).await;
        assert_eq!(ids(&outcome), vec!["a", "b", "c"]);
        assert!(outcome.results.iter().all(|r| !r.passed));
        assert!(outcome.results[1].message.contains("failed: a"));
        assert!(outcome.results[2].message.contains("never ran: b"));
        assert_eq!(runner.commands(), vec!["broken".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_rubric() {
        let runner = ScriptedRunner::new();
        let outcome = run_checks(&[], &runner, &SchedulerConfig::default()).await;
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.passes, 0);
    }

    #[tokio::test]
    async fn test_concurrent_pass_bounded() {
        let runner = ScriptedRunner::new()
            .on("ok", CommandOutput::success(""))
            .with_delay(Duration::from_millis(20));
        let checks = vec![
            run("a", "ok"),
            run("b", "ok"),
            run("c", "ok"),
            run("d", "ok"),
            run("e", "ok").with_requires(["a", "d"]),
        ];
        let config = SchedulerConfig::default().with_max_concurrency(2);

        let outcome = run_checks(&checks, &runner, &config).await;
        let order = ids(&outcome);
        let mut first_pass = order[..4].to_vec();
        first_pass.sort_unstable();
        assert_eq!(first_pass, vec!["a", "b", "c", "d"]);
        assert_eq!(order[4], "e");
        assert_eq!(outcome.passes, 2);
        assert!(runner.max_in_flight() <= 2);
        assert!(outcome.results.iter().all(|r| r.passed));
    }

    #[tokio::test]
    async fn test_concurrent_and_sequential_agree_on_outcomes() {
        let runner = ScriptedRunner::new().on("ok", CommandOutput::success(""));
        let checks = vec![
            run("a", "ok"),
            run("b", "broken").with_requires(["a"]),
            run("c", "ok").with_requires(["b"]),
            run("d", "ok").with_requires(["a"]),
        ];

        let seq = run_checks(&checks, &runner, &SchedulerConfig::default()).await;
        let par = run_checks(
            &checks,
            &runner,
            &SchedulerConfig::default().with_max_concurrency(4),
        )
        .await;

        for check in &checks {
            let s = seq.results.iter().find(|r| r.check_id == check.id).unwrap();
            let p = par.results.iter().find(|r| r.check_id == check.id).unwrap();
            assert_eq!((s.passed, s.score), (p.passed, p.score), "check {}", check.id);
        }
    }
}
