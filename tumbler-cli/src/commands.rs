//! CLI commands and their handlers.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use tumbler::engine::{Engine, RunContext, RunOutcome};
use tumbler::events::LoggingEventSink;
use tumbler::model::{Pipeline, Stage};
use tumbler::{parse_pipeline, TumblerConfig};

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run a pipeline file
    Run {
        /// Pipeline file
        file: PathBuf,
        /// JSON configuration file
        #[arg(long, short, env = "TUMBLER_CONFIG")]
        config: Option<PathBuf>,
        /// Variable exported to every step, as KEY=VALUE
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
        /// Write the results to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Parse and validate a pipeline file without running it
    Check {
        /// Pipeline file
        file: PathBuf,
    },
    /// Print the parsed stage tree as JSON
    Parse {
        /// Pipeline file
        file: PathBuf,
    },
}

/// Handles a command and returns the process exit code.
pub async fn handle_command(command: Commands) -> Result<i32> {
    match command {
        Commands::Run {
            file,
            config,
            vars,
            output,
        } => run(&file, config.as_deref(), vars.into_iter().collect(), output.as_deref()).await,
        Commands::Check { file } => {
            let pipeline = load_pipeline(&file)?;
            pipeline
                .validate()
                .with_context(|| format!("{} is not a valid pipeline", file.display()))?;
            println!(
                "{}: {} stages ({} total)",
                file.display(),
                pipeline.stages.len(),
                pipeline.stage_count()
            );
            print!("{}", summarize(&pipeline));
            Ok(0)
        }
        Commands::Parse { file } => {
            let pipeline = load_pipeline(&file)?;
            println!("{}", serde_json::to_string_pretty(&pipeline)?);
            Ok(0)
        }
    }
}

async fn run(
    file: &Path,
    config: Option<&Path>,
    variables: HashMap<String, String>,
    output: Option<&Path>,
) -> Result<i32> {
    let config = match config {
        Some(path) => TumblerConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => TumblerConfig::default(),
    };
    config.validate()?;
    let pipeline = load_pipeline(file)?;

    let engine = Engine::from_config(&config, Arc::new(LoggingEventSink::info()));
    let ctx = RunContext::new(variables);
    let token = ctx.token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            token.cancel("interrupted");
        }
    });

    info!(run_id = %ctx.run_id, file = %file.display(), "Running pipeline");
    let outcome = engine.run_in(&pipeline, ctx).await;
    report(&outcome, output)
}

fn report(outcome: &RunOutcome, output: Option<&Path>) -> Result<i32> {
    let rendered = serde_json::to_string_pretty(&outcome.results)?;
    match output {
        Some(path) => std::fs::write(path, &rendered)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{rendered}"),
    }

    match &outcome.error {
        None => {
            info!(duration_ms = outcome.duration_ms, "Pipeline succeeded");
            Ok(0)
        }
        Some(err) => {
            eprintln!("pipeline failed ({}): {err}", err.kind());
            Ok(1)
        }
    }
}

fn load_pipeline(file: &Path) -> Result<Pipeline> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    parse_pipeline(&source).with_context(|| format!("failed to parse {}", file.display()))
}

/// Renders the stage tree, one indented line per stage.
fn summarize(pipeline: &Pipeline) -> String {
    let mut out = format!("pipeline [agent: {}]\n", pipeline.agent);
    for stage in &pipeline.stages {
        summarize_stage(stage, 1, &mut out);
    }
    out
}

fn summarize_stage(stage: &Stage, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let agent = stage.effective_agent();
    match &stage.parallel {
        Some(group) => {
            out.push_str(&format!(
                "{indent}{} [agent: {agent}, steps: {}, failFast: {}]\n",
                stage.name,
                stage.steps.len(),
                stage.fail_fast()
            ));
            for branch in &group.stages {
                summarize_stage(branch, depth + 1, out);
            }
        }
        None => out.push_str(&format!(
            "{indent}{} [agent: {agent}, steps: {}]\n",
            stage.name,
            stage.steps.len()
        )),
    }
}

fn parse_var(raw: &str) -> Result<(String, String)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("expected KEY=VALUE, got '{raw}'");
    };
    if key.is_empty() {
        bail!("variable name must not be empty");
    }
    Ok((key.to_string(), value.to_string()))
}
