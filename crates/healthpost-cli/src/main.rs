//! Healthpost CLI - offline record keeping for a health post
//!
//! Every change is applied to the device database and queued; `sync`
//! submits the queue to the server when a connection is available.

mod cli;
mod commands;
mod error;

use clap::Parser;

use cli::{Cli, Commands};
use commands::common::resolve_db_path;
use commands::completions::run_completions;
use commands::inventory::run_inventory;
use commands::patient::run_patient;
use commands::queue::run_queue;
use commands::sync::run_sync;
use error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "healthpost=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Inventory(command) => run_inventory(command, &db_path).await?,
        Commands::Patient(command) => run_patient(command, &db_path).await?,
        Commands::Queue(command) => run_queue(command, &db_path).await?,
        Commands::Sync { json } => run_sync(json, &db_path).await?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
