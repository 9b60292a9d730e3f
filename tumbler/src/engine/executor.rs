//! Stage-tree executor.
//!
//! Walks a pipeline: top-level stages and the steps of a stage run in order,
//! the branches of a parallel group run concurrently as independent tasks.

use super::aggregate::{merge_branches, merge_stage};
use crate::backend::ProcessBackend;
use crate::cancellation::{CancellationToken, TaskGroup};
use crate::config::TumblerConfig;
use crate::core::{Ledger, Results, StageRecord, StageStatus};
use crate::errors::TumblerError;
use crate::events::{
    EventSink, NoOpEventSink, PARALLEL_CANCELLING, PIPELINE_COMPLETED, PIPELINE_FAILED,
    PIPELINE_STARTED, STAGE_CANCELLED, STAGE_COMPLETED, STAGE_FAILED, STAGE_STARTED,
};
use crate::model::{ParallelGroup, Pipeline, Stage};
use crate::unit::{RetryingUnitRunner, UnitOfWork, UnitRunner};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Variables shared read-only by every stage of a run.
pub type Variables = Arc<HashMap<String, String>>;

/// Execution-scoped state threaded through the tree walk.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Identifies the run in events.
    pub run_id: Uuid,
    /// Variables exported to every unit of work.
    pub variables: Variables,
    /// Root cancellation scope of the run.
    pub token: CancellationToken,
    /// Terminal records of every stage.
    pub ledger: Arc<Ledger>,
}

impl RunContext {
    /// Creates a context for a new run.
    #[must_use]
    pub fn new(variables: HashMap<String, String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            variables: Arc::new(variables),
            token: CancellationToken::new(),
            ledger: Arc::new(Ledger::new()),
        }
    }

    /// Uses an existing cancellation scope as the root of the run.
    #[must_use]
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

/// Everything a run produced: partial results are kept on error.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Identifies the run in events.
    pub run_id: Uuid,
    /// The nested result map.
    pub results: Results,
    /// Terminal records of every stage that ran, in finishing order.
    pub records: Vec<StageRecord>,
    /// The error that ended the run, if any.
    pub error: Option<TumblerError>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
}

impl RunOutcome {
    /// An outcome for a run that failed before any stage started.
    #[must_use]
    pub fn rejected(error: TumblerError) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            results: Results::new(),
            records: Vec::new(),
            error: Some(error),
            duration_ms: 0.0,
        }
    }

    /// Returns true if the run completed without error.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Returns the record of the stage at `path`.
    #[must_use]
    pub fn record(&self, path: &[&str]) -> Option<&StageRecord> {
        self.records.iter().find(|r| r.path.iter().eq(path.iter()))
    }

    /// Returns the paths of stages that ended with `status`.
    #[must_use]
    pub fn paths_with_status(&self, status: StageStatus) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.status == status)
            .map(StageRecord::display_path)
            .collect()
    }

    /// Converts the outcome into the results or the error.
    ///
    /// # Errors
    ///
    /// Returns the run's error, dropping partial results.
    pub fn into_result(self) -> Result<Results, TumblerError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.results),
        }
    }
}

/// Executes stage trees through a [`UnitRunner`].
#[derive(Clone)]
pub struct Engine {
    runner: Arc<dyn UnitRunner>,
    event_sink: Arc<dyn EventSink>,
}

impl Engine {
    /// Creates an engine with a no-op event sink.
    #[must_use]
    pub fn new(runner: Arc<dyn UnitRunner>) -> Self {
        Self {
            runner,
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Builds the in-process engine: a [`RetryingUnitRunner`] over a
    /// [`ProcessBackend`], both reporting to `event_sink`.
    #[must_use]
    pub fn from_config(config: &TumblerConfig, event_sink: Arc<dyn EventSink>) -> Self {
        let backend = Arc::new(ProcessBackend::new(&config.backend));
        let runner = RetryingUnitRunner::new(backend)
            .with_config(config.retry.clone())
            .with_event_sink(event_sink.clone());
        Self::new(Arc::new(runner)).with_event_sink(event_sink)
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Validates and runs a pipeline with fresh run state.
    pub async fn run_pipeline(
        &self,
        pipeline: &Pipeline,
        variables: HashMap<String, String>,
    ) -> RunOutcome {
        self.run_in(pipeline, RunContext::new(variables)).await
    }

    /// Validates and runs a pipeline within an existing run context.
    pub async fn run_in(&self, pipeline: &Pipeline, ctx: RunContext) -> RunOutcome {
        if let Err(err) = pipeline.validate() {
            return RunOutcome::rejected(err.into());
        }
        let started = Instant::now();
        let mut results = Results::new();
        let error = self.execute(pipeline, &ctx, &mut results).await.err();
        RunOutcome {
            run_id: ctx.run_id,
            results,
            records: ctx.ledger.take(),
            error,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }

    /// Runs the top-level stages in declaration order into `results`.
    ///
    /// The first failing stage stops its later siblings. Whatever completed
    /// stays in `results`.
    ///
    /// # Errors
    ///
    /// Returns the first stage error.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        ctx: &RunContext,
        results: &mut Results,
    ) -> Result<(), TumblerError> {
        let started = Instant::now();
        info!(run_id = %ctx.run_id, stages = pipeline.stages.len(), "Pipeline started");
        self.event_sink
            .emit(
                PIPELINE_STARTED,
                Some(serde_json::json!({
                    "run_id": ctx.run_id.to_string(),
                    "stage_count": pipeline.stage_count(),
                })),
            )
            .await;

        for stage in &pipeline.stages {
            if let Err(err) = self
                .execute_stage(stage, &[], ctx, results, &ctx.token)
                .await
            {
                warn!(run_id = %ctx.run_id, stage = %stage.name, error = %err, "Pipeline failed");
                self.event_sink
                    .emit(
                        PIPELINE_FAILED,
                        Some(serde_json::json!({
                            "run_id": ctx.run_id.to_string(),
                            "stage": stage.name,
                            "error": err.to_string(),
                            "duration_ms": started.elapsed().as_secs_f64() * 1000.0,
                        })),
                    )
                    .await;
                return Err(err);
            }
        }

        info!(run_id = %ctx.run_id, "Pipeline completed");
        self.event_sink
            .emit(
                PIPELINE_COMPLETED,
                Some(serde_json::json!({
                    "run_id": ctx.run_id.to_string(),
                    "duration_ms": started.elapsed().as_secs_f64() * 1000.0,
                })),
            )
            .await;
        Ok(())
    }

    /// Runs one stage and stores what it produced under `results[stage.name]`.
    ///
    /// A parallel group runs first; if it fails, the stage's own steps do not
    /// run. Every stage that starts leaves one record in the ledger.
    pub fn execute_stage<'a>(
        &'a self,
        stage: &'a Stage,
        parent: &'a [String],
        ctx: &'a RunContext,
        results: &'a mut Results,
        token: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), TumblerError>> {
        async move {
            let mut path = parent.to_vec();
            path.push(stage.name.clone());
            let started_at = Utc::now();

            debug!(stage = %stage.name, path = ?path, "Stage started");
            self.event_sink
                .emit(
                    STAGE_STARTED,
                    Some(serde_json::json!({
                        "run_id": ctx.run_id.to_string(),
                        "stage": stage.name,
                        "path": path,
                    })),
                )
                .await;

            let outcome = self.run_stage(stage, &path, ctx, results, token).await;

            let record = StageRecord::finish(path, started_at, &outcome);
            let (event, level_error) = match record.status {
                StageStatus::Cancel => (STAGE_CANCELLED, false),
                StageStatus::Fail => (STAGE_FAILED, true),
                _ => (STAGE_COMPLETED, false),
            };
            if level_error {
                warn!(stage = %stage.name, error = ?record.error, "Stage failed");
            } else {
                debug!(stage = %stage.name, status = %record.status, "Stage finished");
            }
            self.event_sink
                .emit(
                    event,
                    Some(serde_json::json!({
                        "run_id": ctx.run_id.to_string(),
                        "stage": stage.name,
                        "path": record.path,
                        "duration_ms": record.duration_ms,
                        "error": record.error,
                    })),
                )
                .await;
            ctx.ledger.record(record);

            outcome
        }
        .boxed()
    }

    async fn run_stage(
        &self,
        stage: &Stage,
        path: &[String],
        ctx: &RunContext,
        results: &mut Results,
        token: &CancellationToken,
    ) -> Result<(), TumblerError> {
        if token.is_cancelled() {
            return Err(TumblerError::cancelled(
                stage.name.clone(),
                token.reason().unwrap_or_default(),
            ));
        }

        let group = match &stage.parallel {
            Some(group) => {
                let (nested, outcome) = self.run_parallel(stage, group, path, ctx, token).await;
                if let Err(err) = outcome {
                    merge_stage(results, &stage.name, Some(nested), None);
                    return Err(err);
                }
                Some(nested)
            }
            None => None,
        };

        let outputs = if stage.has_steps() {
            let unit = UnitOfWork::from_stage(stage, &ctx.variables);
            match self.runner.run_unit(&unit, token).await {
                Ok(outputs) => Some(outputs),
                Err(err) => {
                    merge_stage(results, &stage.name, group, None);
                    return Err(err);
                }
            }
        } else {
            None
        };

        merge_stage(results, &stage.name, group, outputs);
        Ok(())
    }

    /// Runs every branch of a group concurrently and drains all of them.
    ///
    /// Returns the merged branch results with the group's first error.
    /// Branches that observed cancellation contribute nothing; failed
    /// branches keep what they completed.
    async fn run_parallel(
        &self,
        stage: &Stage,
        group: &ParallelGroup,
        path: &[String],
        ctx: &RunContext,
        token: &CancellationToken,
    ) -> (Results, Result<(), TumblerError>) {
        let fail_fast = stage.fail_fast();
        info!(
            stage = %stage.name,
            branches = group.stages.len(),
            fail_fast,
            "Starting parallel group"
        );

        let sink = self.event_sink.clone();
        let run_id = ctx.run_id.to_string();
        let group_name = stage.name.clone();
        let mut tasks = TaskGroup::new(token, fail_fast).with_cancel_hook(move |failed| {
            warn!(stage = %group_name, failed_branch = %failed, "Cancelling parallel branches");
            sink.try_emit(
                PARALLEL_CANCELLING,
                Some(serde_json::json!({
                    "run_id": run_id,
                    "stage": group_name,
                    "failed_branch": failed,
                })),
            );
        });

        for branch in &group.stages {
            let engine = self.clone();
            let branch = branch.clone();
            let path = path.to_vec();
            let ctx = ctx.clone();
            tasks.spawn(branch.name.clone(), move |token| async move {
                let mut branch_results = Results::new();
                let outcome = engine
                    .execute_stage(&branch, &path, &ctx, &mut branch_results, &token)
                    .await;
                (branch_results, outcome)
            });
        }

        let outcome = tasks.join().await;
        let error = outcome.error.clone();
        let contributions = outcome
            .into_ordered_reports()
            .into_iter()
            .filter(|report| !matches!(&report.outcome, Err(err) if err.is_cancellation()))
            .filter_map(|report| report.value);

        (merge_branches(contributions), error.map_or(Ok(()), Err))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}
