//! Per-check results, score aggregation and the report document.
//!
//! The JSON field names (`test_id`, `passed_tests`, `execution_time`, ...)
//! are the report format consumed by downstream graders and stay stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::check::Check;

// ── per-check result ──────────────────────────────────────────────────────

/// Outcome of evaluating one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    #[serde(rename = "test_id")]
    pub check_id: String,

    #[serde(rename = "test_type")]
    pub check_type: String,

    pub passed: bool,

    /// Declared score when passed, 0 otherwise.
    pub score: u64,

    pub message: String,

    /// Wall-clock seconds spent evaluating the check.
    #[serde(rename = "execution_time")]
    pub duration_secs: f64,
}

impl CheckResult {
    /// Build a result for `check`, applying the all-or-nothing scoring rule.
    pub fn from_outcome(
        check: &Check,
        passed: bool,
        message: impl Into<String>,
        duration_secs: f64,
    ) -> Self {
        Self {
            check_id: check.id.clone(),
            check_type: check.type_name().to_string(),
            passed,
            score: if passed { check.score } else { 0 },
            message: message.into(),
            duration_secs,
        }
    }

    pub fn failed(check: &Check, message: impl Into<String>, duration_secs: f64) -> Self {
        Self::from_outcome(check, false, message, duration_secs)
    }
}

// ── report document ───────────────────────────────────────────────────────

/// Aggregate counts and totals for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub total_score: u64,
    pub max_score: u64,
    pub success_rate: f64,
    pub total_execution_time: f64,
}

impl Summary {
    /// Aggregate `results` against the declared `checks`.
    ///
    /// `max_score` counts every declared check, including ones that never
    /// produced a result.
    pub fn aggregate(checks: &[Check], results: &[CheckResult]) -> Self {
        let total_tests = results.len();
        let passed_tests = results.iter().filter(|r| r.passed).count();
        let success_rate = if total_tests == 0 {
            0.0
        } else {
            passed_tests as f64 / total_tests as f64
        };

        Self {
            total_tests,
            passed_tests,
            failed_tests: total_tests - passed_tests,
            total_score: results.iter().map(|r| r.score).sum(),
            max_score: checks.iter().map(|c| c.score).sum(),
            success_rate,
            total_execution_time: results.iter().map(|r| r.duration_secs).sum(),
        }
    }
}

/// Scored report for one rubric run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Target the rubric graded.
    pub repo: String,

    /// Build recipe the environment was produced from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe: Option<String>,

    /// Rubric file the checks were loaded from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric: Option<String>,

    /// Set when the environment could not be prepared and no check ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_error: Option<String>,

    pub generated_at: DateTime<Utc>,

    pub summary: Summary,

    /// Results in completion order.
    pub test_results: Vec<CheckResult>,
}

impl Report {
    /// Build the report for a finished run.
    pub fn build(target: impl Into<String>, checks: &[Check], results: Vec<CheckResult>) -> Self {
        Self {
            repo: target.into(),
            recipe: None,
            rubric: None,
            environment_error: None,
            generated_at: Utc::now(),
            summary: Summary::aggregate(checks, &results),
            test_results: results,
        }
    }

    /// Report for a run in which no check executed.
    pub fn empty(target: impl Into<String>, checks: &[Check]) -> Self {
        Self::build(target, checks, Vec::new())
    }

    pub fn with_recipe(mut self, recipe: impl Into<String>) -> Self {
        self.recipe = Some(recipe.into());
        self
    }

    pub fn with_rubric_path(mut self, rubric: impl Into<String>) -> Self {
        self.rubric = Some(rubric.into());
        self
    }

    pub fn with_environment_error(mut self, error: impl Into<String>) -> Self {
        self.environment_error = Some(error.into());
        self
    }

    /// True when the environment was prepared and no check failed.
    pub fn all_passed(&self) -> bool {
        self.environment_error.is_none() && self.summary.failed_tests == 0
    }

    /// Look up a result by check id.
    pub fn result(&self, check_id: &str) -> Option<&CheckResult> {
        self.test_results.iter().find(|r| r.check_id == check_id)
    }

    pub fn to_json_pretty(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
