//! LiteMID agent - lightweight host monitoring agent
//!
//! Collects system metrics (CPU, memory, disk, network, OS) and posts them to
//! a LiteMID server for ServiceNow integration. Runs one-shot or as a
//! periodic daemon.

mod collector;
mod sender;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "litemid-agent",
    version,
    about = "Lightweight monitoring agent for the LiteMID proxy"
)]
struct Cli {
    /// LiteMID server URL
    #[arg(short, long, global = true, default_value = "http://localhost:8080")]
    server: String,

    /// Collection interval in seconds (daemon mode)
    #[arg(short, long, global = true, default_value_t = 60)]
    interval: u64,

    /// Print the JSON payload before sending
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect and print system metrics
    Collect,
    /// Collect metrics and send them to the server once
    Send,
    /// Run as daemon, sending metrics periodically
    Daemon {
        /// Send metrics once and exit
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();
    match cli.command {
        Command::Collect => {
            let metrics = collector::collect().await?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
            Ok(())
        }
        Command::Send => sender::send_metrics(&cli.server, cli.debug).await,
        Command::Daemon { once } => {
            if once {
                sender::send_metrics(&cli.server, cli.debug).await
            } else {
                sender::run_daemon(&cli.server, cli.interval, cli.debug).await
            }
        }
    }
}
