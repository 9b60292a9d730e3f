//! Scripted collaborators for engine and runner tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::backend::ExecutionBackend;
use crate::cancellation::CancellationToken;
use crate::errors::{BackendError, TumblerError, UnitExecutionError, UnitFailure};
use crate::model::{Command, Step};
use crate::unit::{UnitOfWork, UnitRunner};

#[derive(Debug, Clone, Default)]
struct Script {
    delay: Duration,
    failure: Option<String>,
    outputs: Option<Vec<String>>,
}

/// A [`UnitRunner`] whose behavior is scripted per stage name.
///
/// Unscripted units succeed immediately. By default each step outputs its
/// value (`echo 'x'` outputs `x`). Every wait observes cancellation, and the
/// runner records which units started, completed, failed or were cancelled.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: Mutex<HashMap<String, Script>>,
    started: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
    failed: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl ScriptedRunner {
    /// Creates a runner where every unit succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script(self, name: &str, update: impl FnOnce(&mut Script)) -> Self {
        update(self.scripts.lock().entry(name.to_string()).or_default());
        self
    }

    /// Delays the unit before it completes.
    #[must_use]
    pub fn with_delay(self, name: &str, delay: Duration) -> Self {
        self.script(name, |s| s.delay = delay)
    }

    /// Makes the unit fail (after its delay, if any).
    #[must_use]
    pub fn failing(self, name: &str, message: &str) -> Self {
        self.script(name, |s| s.failure = Some(message.to_string()))
    }

    /// Overrides the unit's outputs.
    #[must_use]
    pub fn with_outputs(self, name: &str, outputs: &[&str]) -> Self {
        self.script(name, |s| {
            s.outputs = Some(outputs.iter().map(ToString::to_string).collect());
        })
    }

    /// Units that started, in start order.
    #[must_use]
    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    /// Units that completed successfully.
    #[must_use]
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().clone()
    }

    /// Units that failed as scripted.
    #[must_use]
    pub fn failed(&self) -> Vec<String> {
        self.failed.lock().clone()
    }

    /// Units that observed cancellation.
    #[must_use]
    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }

    /// Units currently running.
    #[must_use]
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// The highest number of units that were running at once.
    #[must_use]
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

fn default_output(step: &Step) -> String {
    match step {
        Step::SingleArg { value, .. } => value.clone(),
        Step::MultiArg { .. } => step.to_string(),
    }
}

fn cancellation(unit: &UnitOfWork, token: &CancellationToken) -> TumblerError {
    TumblerError::cancelled(unit.name.clone(), token.reason().unwrap_or_default())
}

#[async_trait]
impl UnitRunner for ScriptedRunner {
    async fn run_unit(
        &self,
        unit: &UnitOfWork,
        token: &CancellationToken,
    ) -> Result<Vec<String>, TumblerError> {
        if token.is_cancelled() {
            self.cancelled.lock().push(unit.name.clone());
            return Err(cancellation(unit, token));
        }
        let script = self.scripts.lock().get(&unit.name).cloned().unwrap_or_default();

        self.started.lock().push(unit.name.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let result = tokio::select! {
            biased;
            () = token.cancelled() => {
                self.cancelled.lock().push(unit.name.clone());
                Err(cancellation(unit, token))
            }
            () = tokio::time::sleep(script.delay) => match script.failure {
                Some(message) => {
                    self.failed.lock().push(unit.name.clone());
                    Err(UnitExecutionError::new(unit.name.clone(), 1, UnitFailure::Failed(message)).into())
                }
                None => {
                    self.completed.lock().push(unit.name.clone());
                    Ok(script
                        .outputs
                        .unwrap_or_else(|| unit.steps.iter().map(default_output).collect()))
                }
            },
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// An [`ExecutionBackend`] that records every attempt.
///
/// Outputs are the rendered shell text of each step (the step name for
/// keyword steps).
#[derive(Debug, Default)]
pub struct RecordingBackend {
    failing_first: usize,
    error: Option<BackendError>,
    delay: Option<Duration>,
    attempts: AtomicUsize,
    dropped: AtomicUsize,
    calls: Mutex<Vec<UnitOfWork>>,
}

/// Counts attempts dropped before they finished.
struct DropCounter<'a> {
    counter: &'a AtomicUsize,
    armed: bool,
}

impl Drop for DropCounter<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl RecordingBackend {
    /// Creates a backend where every attempt succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the first `n` attempts with a retryable error.
    #[must_use]
    pub fn failing_first(mut self, n: usize) -> Self {
        self.failing_first = n;
        self
    }

    /// Fails every attempt with `error`.
    #[must_use]
    pub fn with_error(mut self, error: BackendError) -> Self {
        self.error = Some(error);
        self
    }

    /// Sleeps for `delay` in every attempt.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of attempts started.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of attempts dropped before finishing (timeout or cancellation).
    #[must_use]
    pub fn dropped_attempts(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Every unit received, one entry per attempt.
    #[must_use]
    pub fn calls(&self) -> Vec<UnitOfWork> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ExecutionBackend for RecordingBackend {
    async fn execute(&self, unit: &UnitOfWork) -> Result<Vec<String>, BackendError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.lock().push(unit.clone());

        let mut guard = DropCounter {
            counter: &self.dropped,
            armed: true,
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        guard.armed = false;

        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        if attempt <= self.failing_first {
            return Err(BackendError::CommandFailed {
                command: unit.name.clone(),
                exit_code: 1,
                stderr: format!("attempt {attempt} failed"),
            });
        }
        Ok(unit
            .commands()
            .into_iter()
            .map(|command| match command {
                Command::Shell { text } => text,
                Command::Invoke { name, .. } => name,
            })
            .collect())
    }
}
