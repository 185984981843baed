//! Reelcast - submit a video generation job and follow it from the terminal

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use reelcast_core::{HttpVideoService, ServiceConfig, WorkflowCoordinator};

#[derive(Parser)]
#[command(name = "reelcast")]
#[command(about = "Create narrated videos from a script and follow their progress")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Video service base URL (overrides config and REELCAST_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List available music tracks and voices
    Options,

    /// Create a video and stream its progress
    Create(commands::create::CreateArgs),
}

/// Logs go to stderr so stdout stays the progress display
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "reelcast=debug,reelcast_core=debug"
    } else {
        "reelcast=info,reelcast_core=info"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = ServiceConfig::load().context("Failed to load configuration")?;
    if let Some(url) = &cli.base_url {
        config = config.with_base_url(url)?;
    }
    let service = HttpVideoService::new(&config).context("Failed to set up HTTP client")?;
    let coordinator = WorkflowCoordinator::new(service);

    match cli.command {
        Commands::Options => {
            commands::options::run(&coordinator).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Create(args) => {
            let completed = commands::create::run(&coordinator, args).await?;
            Ok(if completed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
