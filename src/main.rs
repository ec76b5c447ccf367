use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spendsync::app::{config_output, App, HealthOutput, RefreshOutput, ScanOutput};
use spendsync::config::{default_config_path, ResolvedConfig};
use spendsync::models::Id;
use spendsync::storage::{JsonFileStorage, Storage};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "spendsync")]
#[command(about = "Spending statistics from provider webhooks, with a reconciliation backstop")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show current configuration
    Config,
    /// Recompute statistics for one user, with retries
    Refresh {
        /// User id
        user_id: String,
    },
    /// Run one reconciliation scan
    Scan,
    /// Show reconciliation health without processing anything
    Health,
    /// Show the stored statistics snapshot for a user
    Stats {
        /// User id
        user_id: String,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,spendsync=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .init();
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_user_id(value: String) -> Result<Id> {
    Id::from_string_checked(value).context("Invalid user id")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = ResolvedConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load spendsync config: {}", cli.config.display()))?;

    match cli.command {
        Command::Config => print_json(&config_output(&cli.config, &config))?,
        Command::Refresh { user_id } => {
            let user_id = parse_user_id(user_id)?;
            let app = App::open(config)?;
            let outcome = app.refresh(&user_id).await;
            let success = outcome.is_success();
            print_json(&RefreshOutput::new(user_id.as_str(), outcome))?;
            if !success {
                std::process::exit(1);
            }
        }
        Command::Scan => {
            let app = App::open(config)?;
            let report = app.scanner().scan().await?;
            print_json(&ScanOutput {
                report,
                scanned_at: chrono::Utc::now(),
            })?;
        }
        Command::Health => {
            let app = App::open(config)?;
            let health = app.scanner().health().await?;
            print_json(&HealthOutput::new(health, chrono::Utc::now()))?;
        }
        Command::Stats { user_id } => {
            let user_id = parse_user_id(user_id)?;
            let storage = JsonFileStorage::new(&config.data_dir);
            match storage.get_statistics(&user_id).await? {
                Some(stats) => print_json(&stats)?,
                None => anyhow::bail!("No statistics stored for user {user_id}"),
            }
        }
    }

    Ok(())
}
