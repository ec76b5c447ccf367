use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use spendsync::app::App;
use spendsync::config::{default_config_path, ResolvedConfig};
use spendsync::duration::parse_duration;
use spendsync_server::{build_router, run_reconciliation_loop};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn parse_duration_arg(value: &str) -> std::result::Result<Duration, String> {
    parse_duration(value).map_err(|e| e.to_string())
}

#[derive(Parser, Debug)]
#[command(name = "spendsync-server")]
#[command(about = "Receives provider webhooks and reconciles missing spending statistics")]
struct Cli {
    /// Path to spendsync config file.
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Override the reconciliation scan interval (e.g. "5m").
    #[arg(long, value_name = "DURATION", value_parser = parse_duration_arg)]
    scan_interval: Option<Duration>,

    /// Override the scan interval jitter.
    #[arg(long, value_name = "DURATION", value_parser = parse_duration_arg)]
    jitter: Option<Duration>,

    /// Skip the immediate startup scan.
    #[arg(long)]
    no_scan_on_start: bool,

    /// Emit human-readable logs instead of JSON lines.
    #[arg(long)]
    pretty_logs: bool,
}

fn init_tracing(pretty: bool) {
    let registry = tracing_subscriber::registry().with(
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
    );
    if pretty {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_level(true)
                    .json(),
            )
            .init();
    }
}

async fn shutdown_signal(tx: watch::Sender<bool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown requested");
    let _ = tx.send(true);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.pretty_logs);

    let config = ResolvedConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load spendsync config: {}", cli.config.display()))?;
    let interval = cli.scan_interval.unwrap_or(config.reconciliation.scan_interval);
    let jitter = cli.jitter.unwrap_or(config.reconciliation.jitter);

    let app = Arc::new(App::open(config)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(shutdown_signal(shutdown_tx));
    let mut loop_rx = shutdown_rx.clone();
    let reconciler = tokio::spawn(run_reconciliation_loop(
        app.clone(),
        interval,
        jitter,
        !cli.no_scan_on_start,
        async move {
            let _ = loop_rx.wait_for(|stop| *stop).await;
        },
    ));

    let listener = TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    tracing::info!(addr = %cli.bind, "Listening for webhooks");

    let mut server_rx = shutdown_rx;
    axum::serve(listener, build_router(app))
        .with_graceful_shutdown(async move {
            let _ = server_rx.wait_for(|stop| *stop).await;
        })
        .await
        .context("Webhook server failed")?;

    reconciler.await.context("Reconciliation loop panicked")?;
    Ok(())
}
