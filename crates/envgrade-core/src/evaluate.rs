//! Check evaluators: one arm per [`CheckKind`], each turning runner output
//! into a pass/fail outcome with a human-readable message.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::check::{Check, CheckKind};
use crate::report::CheckResult;
use crate::runner::{CommandOutput, EnvironmentRunner};

/// Maximum number of stderr characters quoted in a `run_command` failure.
pub const STDERR_EXCERPT_CHARS: usize = 100;

struct Outcome {
    passed: bool,
    message: String,
}

impl Outcome {
    fn new(passed: bool, message: String) -> Self {
        Self { passed, message }
    }

    fn fail(message: String) -> Self {
        Self::new(false, message)
    }
}

/// Evaluate one check against the environment.
///
/// Never fails: runner errors, timeouts, bad params and unknown types all
/// come back as a failing [`CheckResult`].
pub async fn evaluate_check(
    check: &Check,
    runner: &dyn EnvironmentRunner,
    default_command_timeout: Duration,
) -> CheckResult {
    let start = Instant::now();
    let timeout = check.effective_timeout(default_command_timeout);
    let exec = Exec { runner, timeout };

    let outcome = match &check.kind {
        CheckKind::CommandExists { name } => command_exists(&exec, name).await,
        CheckKind::OutputContains { command, contains } => {
            output_contains(&exec, command, contains).await
        }
        CheckKind::FilesExist { paths } => paths_exist(&exec, paths, PathKind::File).await,
        CheckKind::DirsExist { paths } => paths_exist(&exec, paths, PathKind::Dir).await,
        CheckKind::EnvvarSet { name } => envvar_set(&exec, name).await,
        CheckKind::FileContains { path, contains } => file_contains(&exec, path, contains).await,
        CheckKind::RunCommand { command } => run_command(&exec, command).await,
        CheckKind::Invalid { check_type, reason } => {
            Outcome::fail(format!("Invalid params for {check_type}: {reason}"))
        }
        CheckKind::Unknown { check_type } => {
            Outcome::fail(format!("Unknown check type: {check_type}"))
        }
    };

    CheckResult::from_outcome(
        check,
        outcome.passed,
        outcome.message,
        start.elapsed().as_secs_f64(),
    )
}

struct Exec<'a> {
    runner: &'a dyn EnvironmentRunner,
    timeout: Option<Duration>,
}

impl Exec<'_> {
    async fn run(&self, command: &str) -> CommandOutput {
        debug!(command, timeout_secs = ?self.timeout.map(|t| t.as_secs()), "running command");
        self.runner.run(command, self.timeout).await
    }
}

async fn command_exists(exec: &Exec<'_>, name: &str) -> Outcome {
    let out = exec.run(&format!("command -v {}", shell_quote(name))).await;
    let passed = out.success && !out.stdout.trim().is_empty();
    let status = if passed { "found" } else { "not found" };
    Outcome::new(passed, format!("Command '{name}' {status}"))
}

async fn output_contains(exec: &Exec<'_>, command: &str, contains: &[String]) -> Outcome {
    let out = exec.run(command).await;
    if !out.success {
        return Outcome::fail(format!("Command failed: {}", out.stderr.trim_end()));
    }

    let found = matching_literals(&out.combined(), contains);
    if found.is_empty() {
        Outcome::fail(format!(
            "Output does not contain any of: {}",
            contains.join(", ")
        ))
    } else {
        Outcome::new(true, format!("Output contains: {}", found.join(", ")))
    }
}

#[derive(Clone, Copy)]
enum PathKind {
    File,
    Dir,
}

impl PathKind {
    fn test_flag(self) -> &'static str {
        match self {
            PathKind::File => "-f",
            PathKind::Dir => "-d",
        }
    }

    fn label(self) -> &'static str {
        match self {
            PathKind::File => "Files",
            PathKind::Dir => "Directories",
        }
    }
}

async fn paths_exist(exec: &Exec<'_>, paths: &[String], kind: PathKind) -> Outcome {
    let listed = paths.join(", ");

    for path in paths {
        let out = exec
            .run(&format!("test {} {}", kind.test_flag(), shell_quote(path)))
            .await;
        if !out.success {
            return Outcome::fail(format!(
                "{} '{listed}' do not exist (missing '{path}')",
                kind.label()
            ));
        }
    }

    Outcome::new(true, format!("{} '{listed}' exist", kind.label()))
}

async fn envvar_set(exec: &Exec<'_>, name: &str) -> Outcome {
    // `name` is a validated identifier, so it is safe to expand unquoted.
    let out = exec.run(&format!("test -n \"${{{name}}}\"")).await;
    let status = if out.success { "is set" } else { "is not set" };
    Outcome::new(
        out.success,
        format!("Environment variable '{name}' {status}"),
    )
}

async fn file_contains(exec: &Exec<'_>, path: &str, contains: &[String]) -> Outcome {
    let quoted = shell_quote(path);

    let exists = exec.run(&format!("test -f {quoted}")).await;
    if !exists.success {
        return Outcome::fail(format!("File '{path}' does not exist"));
    }

    let read = exec.run(&format!("cat {quoted}")).await;
    if !read.success {
        return Outcome::fail(format!(
            "Could not read file '{path}': {}",
            read.stderr.trim_end()
        ));
    }

    let found = matching_literals(&read.stdout, contains);
    if found.is_empty() {
        Outcome::fail(format!(
            "File does not contain any of: {}",
            contains.join(", ")
        ))
    } else {
        Outcome::new(true, format!("File contains: {}", found.join(", ")))
    }
}

async fn run_command(exec: &Exec<'_>, command: &str) -> Outcome {
    let out = exec.run(command).await;
    if out.success {
        Outcome::new(true, "Command executed successfully".to_string())
    } else {
        Outcome::fail(format!(
            "Command failed: {}...",
            excerpt(&out.stderr, STDERR_EXCERPT_CHARS)
        ))
    }
}

fn matching_literals<'a>(haystack: &str, literals: &'a [String]) -> Vec<&'a str> {
    literals
        .iter()
        .filter(|lit| haystack.contains(lit.as_str()))
        .map(String::as_str)
        .collect()
}

/// First `max_chars` characters of `text` (char-boundary safe).
fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Quote `value` as a single POSIX shell word.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
