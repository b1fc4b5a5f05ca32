use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Command, SsvDkg};

mod cli;
mod commands;
mod config;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let parsed = SsvDkg::parse();
    let result = match parsed.command {
        Command::Init(args) => commands::run_init(args).await,
        Command::Reshare(args) => commands::run_reshare(args).await,
        Command::Resign(args) => commands::run_resign(args).await,
        Command::Ping(args) => commands::run_ping(args).await,
        Command::StartOperator(args) => commands::run_start_operator(args).await,
        Command::GenerateOperatorKeys(args) => commands::run_generate_keys(args),
    };
    if let Err(error) = result {
        tracing::error!(%error, "command failed");
        std::process::exit(1);
    }
}
