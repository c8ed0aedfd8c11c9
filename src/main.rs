//! CLI entry point for the harvester tool.

use anyhow::Result;
use clap::Parser;
use tracing::debug;

mod app;
mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    match &args.command {
        Command::Crawl { config } => app::run_crawl(config).await,
        Command::Resume { config } => app::run_resume(config).await,
        Command::Merge { dir } => app::run_merge(dir).await,
    }
}
