//! holiday-request: run the holiday-request process end to end.
//!
//! Usage:
//!   cargo run -p flowlite-cli -- [--employee Reto] [--holidays 3] [--reject]
//!   cargo run -p flowlite-cli -- --interactive
//!
//! Progress markers and results go to stdout; logs go to stderr
//! (`RUST_LOG=flowlite_core=debug` shows token moves).

mod console;
mod delegates;
mod walkthrough;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use console::Console;
use walkthrough::Request;

/// Deploy the holiday-request process, approve (or reject) one request and
/// print how long each step took.
#[derive(Parser, Debug)]
#[command(name = "holiday-request")]
#[command(about = "Walk a holiday request through the flowlite engine")]
struct Args {
    /// Directory holding holiday-request.bpmn20.xml
    #[arg(long, env = "FLOWLITE_RESOURCE_ROOT", default_value = concat!(env!("CARGO_MANIFEST_DIR"), "/resources"))]
    resources: PathBuf,

    /// Who is asking for time off
    #[arg(long, default_value = "Reto")]
    employee: String,

    /// Number of days requested
    #[arg(long, default_value_t = 3)]
    holidays: i64,

    /// Reason for the request
    #[arg(long, default_value = "Ferien")]
    description: String,

    /// Which manager task to complete (1-based)
    #[arg(long, default_value_t = 1)]
    task_index: usize,

    /// Reject the request instead of approving it
    #[arg(long)]
    reject: bool,

    /// Read the answers from stdin (blank line keeps the default)
    #[arg(long, short = 'i')]
    interactive: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let request = Request {
        resources: args.resources,
        employee: args.employee,
        holidays: args.holidays,
        description: args.description,
        task_index: args.task_index,
        approved: !args.reject,
    };

    let console = Console::new(std::io::stdout());
    let engine = walkthrough::build_engine(
        walkthrough::engine_config(request.resources.clone()),
        &console,
    )
    .await?;

    let input = args
        .interactive
        .then(|| BufReader::new(tokio::io::stdin()));
    walkthrough::run(&engine, &request, input, &mut console.clone())
        .await
        .context("Holiday request walkthrough failed")?;

    engine.close().await?;
    Ok(())
}
