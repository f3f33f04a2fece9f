//! In-memory fakes for the environment traits (testing only)
//!
//! `ScriptedRunner` answers commands from a fixed table and records every
//! call; `StaticProvider` hands out a runner (or a preparation failure) and
//! counts teardowns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{GradeError, Result};
use crate::runner::{CommandOutput, EnvironmentProvider, EnvironmentRunner};

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

/// Runner that replies from a `command → output` table.
///
/// Unscripted commands fail with a shell-style "not found" error, which makes
/// an absent tool or file the default state of the fake environment.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: HashMap<String, CommandOutput>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, Option<Duration>)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the output for an exact command string.
    pub fn on(mut self, command: impl Into<String>, output: CommandOutput) -> Self {
        self.responses.insert(command.into(), output);
        self
    }

    /// Sleep for `delay` inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Commands received, in call order.
    pub fn commands(&self) -> Vec<String> {
        let calls = self.calls.lock().unwrap();
        calls.iter().map(|(cmd, _)| cmd.clone()).collect()
    }

    /// Timeouts received, in call order.
    pub fn timeouts(&self) -> Vec<Option<Duration>> {
        let calls = self.calls.lock().unwrap();
        calls.iter().map(|(_, timeout)| *timeout).collect()
    }

    /// Highest number of calls that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnvironmentRunner for ScriptedRunner {
    async fn run(&self, command: &str, timeout: Option<Duration>) -> CommandOutput {
        {
            let mut calls = self.calls.lock().unwrap();
            calls.push((command.to_string(), timeout));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.responses
            .get(command)
            .cloned()
            .unwrap_or_else(|| CommandOutput::failure(format!("sh: {command}: not found")))
    }
}

// ---------------------------------------------------------------------------
// StaticProvider
// ---------------------------------------------------------------------------

/// Provider that returns a pre-built runner, or fails preparation.
pub struct StaticProvider {
    runner: Option<Arc<dyn EnvironmentRunner>>,
    failure: String,
    teardown_error: Option<String>,
    prepare_calls: AtomicUsize,
    teardown_calls: AtomicUsize,
}

impl StaticProvider {
    /// Provider whose `prepare` succeeds with `runner`.
    pub fn ready(runner: Arc<dyn EnvironmentRunner>) -> Self {
        Self {
            runner: Some(runner),
            failure: String::new(),
            teardown_error: None,
            prepare_calls: AtomicUsize::new(0),
            teardown_calls: AtomicUsize::new(0),
        }
    }

    /// Provider whose `prepare` fails with `diagnostic`.
    pub fn failing(diagnostic: impl Into<String>) -> Self {
        Self {
            runner: None,
            failure: diagnostic.into(),
            teardown_error: None,
            prepare_calls: AtomicUsize::new(0),
            teardown_calls: AtomicUsize::new(0),
        }
    }

    /// Make `teardown` report an error.
    pub fn with_teardown_error(mut self, error: impl Into<String>) -> Self {
        self.teardown_error = Some(error.into());
        self
    }

    pub fn prepare_calls(&self) -> usize {
        self.prepare_calls.load(Ordering::SeqCst)
    }

    pub fn teardown_calls(&self) -> usize {
        self.teardown_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnvironmentProvider for StaticProvider {
    async fn prepare(&self) -> Result<Arc<dyn EnvironmentRunner>> {
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);
        self.runner
            .clone()
            .ok_or_else(|| GradeError::Preparation(self.failure.clone()))
    }

    async fn teardown(&self) -> Result<()> {
        self.teardown_calls.fetch_add(1, Ordering::SeqCst);
        match &self.teardown_error {
            Some(err) => Err(GradeError::Teardown(err.clone())),
            None => Ok(()),
        }
    }
}
