//! End-to-end engine behavior over a scripted unit runner.

use super::*;
use crate::core::{Results, StageStatus, StageValue};
use crate::dsl::parse_pipeline;
use crate::errors::TumblerError;
use crate::events::{
    CollectingEventSink, PARALLEL_CANCELLING, PIPELINE_COMPLETED, PIPELINE_FAILED,
    PIPELINE_STARTED, STAGE_CANCELLED, STAGE_FAILED, STAGE_STARTED,
};
use crate::model::{Stage, Step};
use crate::testing::{
    echo_stage, fan_out, pipeline_of, reference_pipeline, ScriptedRunner, REFERENCE_PIPELINE,
};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn engine(runner: &Arc<ScriptedRunner>) -> Engine {
    Engine::new(runner.clone())
}

fn outputs(values: &[&str]) -> StageValue {
    StageValue::Outputs(values.iter().map(ToString::to_string).collect())
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

#[tokio::test(start_paused = true)]
async fn test_fail_fast_cancels_slow_siblings() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .with_delay("slow 1", Duration::from_secs(60))
            .with_delay("slow 2", Duration::from_secs(60))
            .with_delay("bad", Duration::from_millis(10))
            .failing("bad", "exit 1"),
    );
    let pipeline = pipeline_of(vec![fan_out(
        "fan",
        vec![
            echo_stage("slow 1", "a"),
            echo_stage("bad", "b"),
            echo_stage("slow 2", "c"),
        ],
    )]);

    let started = Instant::now();
    let outcome = engine(&runner).run_pipeline(&pipeline, HashMap::new()).await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(matches!(outcome.error, Some(TumblerError::UnitExecution(_))));
    assert_eq!(
        sorted(runner.cancelled()),
        vec!["slow 1".to_string(), "slow 2".to_string()]
    );
    assert!(runner.completed().is_empty());
    assert_eq!(outcome.record(&["fan", "bad"]).map(|r| r.status), Some(StageStatus::Fail));
    assert_eq!(
        outcome.record(&["fan", "slow 1"]).map(|r| r.status),
        Some(StageStatus::Cancel)
    );
    assert_eq!(outcome.record(&["fan"]).map(|r| r.status), Some(StageStatus::Fail));
}

#[tokio::test(start_paused = true)]
async fn test_every_started_branch_terminates() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .with_delay("a", Duration::from_secs(5))
            .with_delay("b", Duration::from_secs(5))
            .with_delay("c", Duration::from_millis(1))
            .failing("c", "boom"),
    );
    let pipeline = pipeline_of(vec![fan_out(
        "fan",
        vec![echo_stage("a", "a"), echo_stage("b", "b"), echo_stage("c", "c")],
    )]);

    let outcome = engine(&runner).run_pipeline(&pipeline, HashMap::new()).await;

    assert!(outcome.error.is_some());
    assert_eq!(runner.running(), 0);
    let settled = runner.completed().len() + runner.failed().len() + runner.cancelled().len();
    assert_eq!(settled, runner.started().len());
    // One record per branch plus the group itself.
    assert_eq!(outcome.records.len(), 4);
}

#[tokio::test]
async fn test_sequential_stages_stop_at_first_failure() {
    let runner = Arc::new(ScriptedRunner::new().failing("second", "exit 2"));
    let pipeline = pipeline_of(vec![
        echo_stage("first", "1"),
        echo_stage("second", "2"),
        echo_stage("third", "3"),
    ]);

    let outcome = engine(&runner).run_pipeline(&pipeline, HashMap::new()).await;

    assert!(outcome.error.is_some());
    assert_eq!(runner.started(), vec!["first".to_string(), "second".to_string()]);
    assert_eq!(outcome.results.names(), vec!["first"]);
    assert!(outcome.record(&["third"]).is_none());
}

#[tokio::test]
async fn test_reference_pipeline_result_shape() {
    let runner = Arc::new(ScriptedRunner::new());
    let pipeline = parse_pipeline(REFERENCE_PIPELINE).unwrap();
    assert_eq!(pipeline, reference_pipeline());

    let results = engine(&runner)
        .run_pipeline(&pipeline, HashMap::new())
        .await
        .into_result()
        .unwrap();

    assert_eq!(
        results.names(),
        vec!["Example Build", "Example Test", "Parallel Stage"]
    );
    assert_eq!(
        results.get("Example Build"),
        Some(&outputs(&["Hello, Maven", "mvn --version"]))
    );
    assert_eq!(
        results.get("Example Test"),
        Some(&outputs(&["Hello, JDK", "java -version"]))
    );
    let nested = results
        .get("Parallel Stage")
        .and_then(StageValue::as_nested)
        .unwrap();
    assert_eq!(nested.names(), vec!["Branch A", "Branch B", "Branch C"]);
    assert_eq!(nested.get("Branch B"), Some(&outputs(&["On Branch B"])));
    assert_eq!(
        results.to_json(),
        serde_json::json!({
            "Example Build": ["Hello, Maven", "mvn --version"],
            "Example Test": ["Hello, JDK", "java -version"],
            "Parallel Stage": {
                "Branch A": ["On Branch A"],
                "Branch B": ["On Branch B"],
                "Branch C": ["On Branch C"],
            },
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_branches_run_concurrently() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .with_delay("a", Duration::from_secs(1))
            .with_delay("b", Duration::from_secs(1))
            .with_delay("c", Duration::from_secs(1)),
    );
    let pipeline = pipeline_of(vec![fan_out(
        "fan",
        vec![echo_stage("a", "a"), echo_stage("b", "b"), echo_stage("c", "c")],
    )]);

    let started = Instant::now();
    let outcome = engine(&runner).run_pipeline(&pipeline, HashMap::new()).await;

    assert!(outcome.is_success());
    assert_eq!(runner.max_running(), 3);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_without_fail_fast_every_branch_runs() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .with_delay("slow", Duration::from_secs(1))
            .failing("bad", "exit 1"),
    );
    let pipeline = pipeline_of(vec![fan_out(
        "fan",
        vec![echo_stage("bad", "x"), echo_stage("slow", "y")],
    )
    .with_fail_fast(false)]);

    let outcome = engine(&runner).run_pipeline(&pipeline, HashMap::new()).await;

    assert!(matches!(outcome.error, Some(TumblerError::UnitExecution(_))));
    assert_eq!(runner.completed(), vec!["slow".to_string()]);
    assert!(runner.cancelled().is_empty());
    assert_eq!(
        outcome.results.get_path(&["fan", "slow"]),
        Some(&outputs(&["y"]))
    );
}

#[tokio::test(start_paused = true)]
async fn test_partial_results_keep_finished_branches() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .with_delay("bad", Duration::from_millis(50))
            .failing("bad", "exit 1")
            .with_delay("slow", Duration::from_secs(60)),
    );
    let pipeline = pipeline_of(vec![
        echo_stage("setup", "ready"),
        fan_out(
            "fan",
            vec![
                echo_stage("quick", "done"),
                echo_stage("bad", "x"),
                echo_stage("slow", "y"),
            ],
        ),
    ]);

    let outcome = engine(&runner).run_pipeline(&pipeline, HashMap::new()).await;

    assert!(outcome.error.is_some());
    assert_eq!(outcome.results.get("setup"), Some(&outputs(&["ready"])));
    assert_eq!(
        outcome.results.get_path(&["fan", "quick"]),
        Some(&outputs(&["done"]))
    );
    assert!(outcome.results.get_path(&["fan", "slow"]).is_none());
    assert!(outcome.results.get_path(&["fan", "bad"]).is_none());
}

#[tokio::test]
async fn test_steps_and_parallel_in_one_stage() {
    let runner = Arc::new(ScriptedRunner::new());
    let pipeline = pipeline_of(vec![fan_out(
        "fan",
        vec![echo_stage("a", "from a"), echo_stage("b", "from b")],
    )
    .with_step(Step::single("echo", "after"))]);

    let outcome = engine(&runner).run_pipeline(&pipeline, HashMap::new()).await;

    assert!(outcome.is_success());
    let nested = outcome.results.get("fan").and_then(StageValue::as_nested).unwrap();
    assert_eq!(nested.names(), vec!["a", "b", "fan"]);
    assert_eq!(nested.get("fan"), Some(&outputs(&["after"])));
    // The stage's own steps run after its branches.
    assert_eq!(runner.started().last().map(String::as_str), Some("fan"));
}

#[tokio::test]
async fn test_failed_group_skips_own_steps() {
    let runner = Arc::new(ScriptedRunner::new().failing("a", "exit 1"));
    let pipeline = pipeline_of(vec![fan_out("fan", vec![echo_stage("a", "x")])
        .with_step(Step::single("echo", "after"))]);

    let outcome = engine(&runner).run_pipeline(&pipeline, HashMap::new()).await;

    assert!(outcome.error.is_some());
    assert!(!runner.started().contains(&"fan".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_nested_parallel_cancellation() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .with_delay("deep", Duration::from_secs(60))
            .with_delay("bad", Duration::from_millis(10))
            .failing("bad", "exit 1"),
    );
    let pipeline = pipeline_of(vec![fan_out(
        "outer",
        vec![
            fan_out("inner", vec![echo_stage("deep", "x")]),
            echo_stage("bad", "y"),
        ],
    )]);

    let outcome = engine(&runner).run_pipeline(&pipeline, HashMap::new()).await;

    assert!(matches!(outcome.error, Some(TumblerError::UnitExecution(_))));
    assert_eq!(runner.cancelled(), vec!["deep".to_string()]);
    assert_eq!(
        outcome.record(&["outer", "inner", "deep"]).map(|r| r.status),
        Some(StageStatus::Cancel)
    );
    assert_eq!(
        outcome.record(&["outer", "inner"]).map(|r| r.status),
        Some(StageStatus::Cancel)
    );
}

#[tokio::test]
async fn test_nested_results() {
    let runner = Arc::new(ScriptedRunner::new());
    let pipeline = pipeline_of(vec![fan_out(
        "outer",
        vec![
            fan_out("inner", vec![echo_stage("x", "1"), echo_stage("y", "2")]),
            echo_stage("z", "3"),
        ],
    )]);

    let outcome = engine(&runner).run_pipeline(&pipeline, HashMap::new()).await;

    assert!(outcome.is_success());
    assert_eq!(
        outcome.results.get_path(&["outer", "inner", "y"]),
        Some(&outputs(&["2"]))
    );
    assert_eq!(outcome.results.get_path(&["outer", "z"]), Some(&outputs(&["3"])));
}

#[tokio::test(start_paused = true)]
async fn test_external_cancellation() {
    let runner = Arc::new(ScriptedRunner::new().with_delay("long", Duration::from_secs(60)));
    let pipeline = pipeline_of(vec![echo_stage("long", "x"), echo_stage("never", "y")]);
    let ctx = RunContext::default();
    let token = ctx.token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        token.cancel("interrupted");
    });

    let outcome = engine(&runner).run_in(&pipeline, ctx).await;

    assert!(matches!(
        outcome.error,
        Some(TumblerError::Cancelled { ref reason, .. }) if reason == "interrupted"
    ));
    assert_eq!(runner.started(), vec!["long".to_string()]);
    assert_eq!(outcome.paths_with_status(StageStatus::Cancel), vec!["long".to_string()]);
}

#[tokio::test]
async fn test_variables_reach_units() {
    let backend = Arc::new(crate::testing::RecordingBackend::new());
    let runner = Arc::new(crate::unit::RetryingUnitRunner::new(backend.clone()));
    let pipeline = pipeline_of(vec![echo_stage("build", "x")]);
    let variables = HashMap::from([("BUILD_ID".to_string(), "42".to_string())]);

    let outcome = Engine::new(runner).run_pipeline(&pipeline, variables).await;

    assert!(outcome.is_success());
    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].env.get("BUILD_ID").map(String::as_str), Some("42"));
}

#[tokio::test(start_paused = true)]
async fn test_events_emitted() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .with_delay("slow", Duration::from_secs(60))
            .failing("bad", "exit 1"),
    );
    let sink = Arc::new(CollectingEventSink::new());
    let pipeline = pipeline_of(vec![
        echo_stage("setup", "x"),
        fan_out("fan", vec![echo_stage("bad", "x"), echo_stage("slow", "y")]),
    ]);

    let outcome = engine(&runner)
        .with_event_sink(sink.clone())
        .run_pipeline(&pipeline, HashMap::new())
        .await;

    assert!(outcome.error.is_some());
    assert_eq!(sink.events_of_type(PIPELINE_STARTED).len(), 1);
    assert_eq!(sink.events_of_type(PIPELINE_FAILED).len(), 1);
    assert!(sink.events_of_type(PIPELINE_COMPLETED).is_empty());
    assert_eq!(
        sorted(sink.stages_for(STAGE_STARTED)),
        vec!["bad", "fan", "setup", "slow"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()
    );
    assert_eq!(sink.stages_for(STAGE_FAILED), vec!["bad".to_string(), "fan".to_string()]);
    assert_eq!(sink.stages_for(STAGE_CANCELLED), vec!["slow".to_string()]);
    assert_eq!(sink.stages_for(PARALLEL_CANCELLING), vec!["fan".to_string()]);
}

#[tokio::test]
async fn test_invalid_pipeline_rejected_before_running() {
    let runner = Arc::new(ScriptedRunner::new());
    let pipeline = pipeline_of(vec![echo_stage("a", "x"), Stage::new("empty")]);

    let outcome = engine(&runner).run_pipeline(&pipeline, HashMap::new()).await;

    assert!(matches!(outcome.error, Some(TumblerError::Validation(_))));
    assert!(runner.started().is_empty());
    assert!(outcome.records.is_empty());
}

#[tokio::test]
async fn test_execute_tolerates_empty_stage() {
    let runner = Arc::new(ScriptedRunner::new());
    let pipeline = pipeline_of(vec![Stage::new("empty"), echo_stage("a", "x")]);
    let ctx = RunContext::default();
    let mut results = Results::new();

    engine(&runner).execute(&pipeline, &ctx, &mut results).await.unwrap();

    assert_eq!(results.names(), vec!["a"]);
    assert_eq!(ctx.ledger.len(), 2);
}

#[tokio::test]
async fn test_failure_logged_once() {
    let (logs, _guard) = crate::testing::log_capture::LogCapture::install();
    let runner = Arc::new(ScriptedRunner::new().failing("build", "exit 1"));
    let pipeline = pipeline_of(vec![echo_stage("build", "x")]);

    let outcome = engine(&runner)
        .with_event_sink(Arc::new(crate::events::LoggingEventSink::info()))
        .run_pipeline(&pipeline, HashMap::new())
        .await;

    assert!(outcome.error.is_some());
    assert_eq!(logs.count("WARN", "Stage failed"), 1);
    assert_eq!(logs.count("WARN", "Pipeline failed"), 1);
    assert_eq!(logs.count("WARN", "stage.failed"), 0);
    assert_eq!(logs.count("WARN", "pipeline.failed"), 0);
}

#[test]
fn test_run_context_clones_share_variables() {
    let ctx = RunContext::new(HashMap::from([("A".to_string(), "1".to_string())]));
    let branch = ctx.clone();

    assert!(Arc::ptr_eq(&ctx.variables, &branch.variables));
    assert_eq!(branch.variables.get("A").map(String::as_str), Some("1"));
}
