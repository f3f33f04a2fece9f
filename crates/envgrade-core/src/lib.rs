//! envgrade core - rubric execution engine
//!
//! Grades a prepared build environment against a declarative rubric:
//! - [`check`]: check and rubric model, loaded from JSON
//! - [`evaluate`]: one evaluator per check type
//! - [`scheduler`]: `requires`-gated, pass-based execution
//! - [`report`]: per-check results and the scored report
//! - [`orchestrator`]: prepare → schedule → report → teardown
//!
//! The engine reaches the environment only through the
//! [`EnvironmentRunner`] and [`EnvironmentProvider`] traits.

pub mod check;
pub mod error;
pub mod evaluate;
pub mod fakes;
pub mod orchestrator;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod telemetry;

pub use check::{Check, CheckKind, Rubric, DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_SCORE};
pub use error::{GradeError, Result};
pub use evaluate::{evaluate_check, shell_quote};
pub use orchestrator::Orchestrator;
pub use report::{CheckResult, Report, Summary};
pub use runner::{CommandOutput, EnvironmentProvider, EnvironmentRunner};
pub use scheduler::{is_runnable, run_checks, ScheduleOutcome, SchedulerConfig};
pub use telemetry::init_tracing;
