//! LiteMID server - lightweight ServiceNow MID server proxy
//!
//! Accepts generic JSON payloads over HTTP and forwards them into a
//! ServiceNow instance's ECC queue table. Startup validates configuration
//! and connectivity before binding a listener; shutdown is cooperative on
//! SIGINT/SIGTERM.

mod auth;
mod config;
mod dashboard;
mod http;
mod setup;
mod snow;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "litemid-server",
    version,
    about = "Lightweight ServiceNow MID server proxy"
)]
struct Cli {
    /// Path to a config.yaml (default search: ., ./config, ~/.litemid)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the proxy server
    Serve,
    /// Run the proxy server behind an interactive status dashboard
    Dashboard,
    /// Interactive configuration setup
    Setup,
    /// Test the connection to the configured ServiceNow instance
    Test,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve => serve(cli.config.as_deref()).await,
        Command::Dashboard => dashboard::run(load_validated(cli.config.as_deref())?).await,
        Command::Setup => setup::run(),
        Command::Test => test_connection(cli.config.as_deref()).await,
    }
}

/// Configuration problems are fatal before anything binds.
fn load_validated(path: Option<&Path>) -> Result<Arc<config::Config>> {
    let config = config::load(path)?;
    config.validate()?;
    Ok(Arc::new(config))
}

async fn serve(path: Option<&Path>) -> Result<()> {
    let config = load_validated(path)?;
    let snow = snow::SnowClient::new(&config.servicenow)
        .context("failed to build ServiceNow client")?;

    // Startup gate: refuse to serve against an unreachable instance.
    snow.test_connection()
        .await
        .context("ServiceNow connection test failed")?;
    info!("ServiceNow connection established to {}", snow.instance_url());

    http::run(config, snow, shutdown_signal()).await
}

async fn test_connection(path: Option<&Path>) -> Result<()> {
    let config = load_validated(path)?;
    let snow = snow::SnowClient::new(&config.servicenow)
        .context("failed to build ServiceNow client")?;

    snow.test_connection()
        .await
        .context("ServiceNow connection test failed")?;
    println!("Connection to {} OK", snow.instance_url());
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
