//! Tumbler CLI
//!
//! Parses and runs pipeline files from the command line.

mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{handle_command, Commands};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tumbler")]
#[command(about = "Run declarative CI pipelines", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, env = "TUMBLER_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tumbler=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let code = handle_command(cli.command).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
