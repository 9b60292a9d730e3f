//! Fan-out/fan-in task group with fail-fast cancellation.

use super::CancellationToken;
use crate::errors::TumblerError;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::future::Future;
use tokio::task::{AbortHandle, JoinError};
use tracing::{debug, warn};

type CancelHook = Box<dyn FnOnce(&str) + Send>;

type Completion<T> = (usize, String, Result<(T, Result<(), TumblerError>), JoinError>);

/// How one task of a group ended.
#[derive(Debug)]
pub struct TaskReport<T> {
    /// Spawn order of the task.
    pub index: usize,
    /// Task name.
    pub name: String,
    /// The value the task produced. `None` if the task panicked.
    pub value: Option<T>,
    /// The task's outcome.
    pub outcome: Result<(), TumblerError>,
}

/// The result of draining a task group.
#[derive(Debug)]
pub struct GroupOutcome<T> {
    /// One report per task, in completion order.
    pub reports: Vec<TaskReport<T>>,
    /// The first recorded error.
    ///
    /// A failure always takes precedence over a cancellation, so this is only a
    /// cancellation error when every failing task was cancelled.
    pub error: Option<TumblerError>,
    /// The task whose failure cancelled the group, if any.
    pub cancelled_by: Option<String>,
}

impl<T> GroupOutcome<T> {
    /// Returns the reports sorted by spawn order.
    #[must_use]
    pub fn into_ordered_reports(mut self) -> Vec<TaskReport<T>> {
        self.reports.sort_by_key(|r| r.index);
        self.reports
    }
}

/// A group of concurrently running tasks sharing one cancellation scope.
///
/// Every task runs as its own tokio task. [`TaskGroup::join`] waits on them
/// with a first-completed multiplexer and always drains the whole group. With
/// `fail_fast` set, the first failure cancels the group's scope.
///
/// Dropping a group before it is joined cancels its scope and aborts the
/// outstanding tasks.
pub struct TaskGroup<T> {
    /// The scope shared by all tasks, derived from the parent's.
    token: CancellationToken,
    fail_fast: bool,
    tasks: FuturesUnordered<BoxFuture<'static, Completion<T>>>,
    aborts: Vec<AbortHandle>,
    /// Called with the failing task's name when fail-fast cancels the group.
    on_cancel: Option<CancelHook>,
}

impl<T: Send + 'static> TaskGroup<T> {
    /// Creates a group whose scope is a child of `parent`.
    #[must_use]
    pub fn new(parent: &CancellationToken, fail_fast: bool) -> Self {
        Self {
            token: parent.child(),
            fail_fast,
            tasks: FuturesUnordered::new(),
            aborts: Vec::new(),
            on_cancel: None,
        }
    }

    /// Sets a hook called once, at the moment fail-fast cancels the group.
    #[must_use]
    pub fn with_cancel_hook(mut self, hook: impl FnOnce(&str) + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(hook));
        self
    }

    /// Returns the group's cancellation scope.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns the number of tasks still to be joined.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if no task is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Spawns a task in the group.
    ///
    /// The task receives the group's scope and returns its value together with
    /// its outcome, so failed tasks can still hand back partial work.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = (T, Result<(), TumblerError>)> + Send + 'static,
    {
        let name = name.into();
        let index = self.aborts.len();
        let handle = tokio::spawn(task(self.token.clone()));
        self.aborts.push(handle.abort_handle());
        self.tasks
            .push(handle.map(move |joined| (index, name, joined)).boxed());
    }

    /// Waits for every task to complete.
    pub async fn join(mut self) -> GroupOutcome<T> {
        let mut reports = Vec::with_capacity(self.tasks.len());
        let mut error: Option<TumblerError> = None;
        let mut cancelled_by = None;

        while let Some((index, name, joined)) = self.tasks.next().await {
            let (value, outcome) = match joined {
                Ok((value, outcome)) => (Some(value), outcome),
                Err(join_error) => (
                    None,
                    Err(TumblerError::Internal(format!(
                        "Task '{name}' did not complete: {join_error}"
                    ))),
                ),
            };

            if let Err(err) = &outcome {
                debug!(task = %name, error = %err, "Task finished with error");
                let replace = match &error {
                    None => true,
                    Some(first) => first.is_cancellation() && !err.is_cancellation(),
                };
                if replace {
                    error = Some(err.clone());
                }
                if self.fail_fast && !err.is_cancellation() && !self.token.is_cancelled() {
                    warn!(task = %name, "Cancelling task group after failure");
                    self.token.cancel(format!("'{name}' failed"));
                    if let Some(hook) = self.on_cancel.take() {
                        hook(&name);
                    }
                    cancelled_by = Some(name.clone());
                }
            }

            reports.push(TaskReport {
                index,
                name,
                value,
                outcome,
            });
        }

        GroupOutcome {
            reports,
            error,
            cancelled_by,
        }
    }
}

impl<T> Drop for TaskGroup<T> {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            self.token.cancel("task group dropped");
            for abort in &self.aborts {
                abort.abort();
            }
        }
    }
}

impl<T> std::fmt::Debug for TaskGroup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("task_count", &self.tasks.len())
            .field("fail_fast", &self.fail_fast)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}
