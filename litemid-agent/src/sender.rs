//! Metrics delivery to the LiteMID server
//!
//! One POST per snapshot to {server}/proxy/ecc_queue, wrapped in the ECC
//! queue payload shape. Daemon mode sends immediately, then once per
//! interval, until a termination signal arrives; a failed cycle is logged
//! and the ticker keeps going.

use crate::collector::{self, SystemMetrics};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info};

/// Same wire shape the server's proxy route accepts.
#[derive(Debug, Serialize)]
pub struct QueuePayload {
    pub agent: String,
    pub topic: String,
    pub name: String,
    pub source: String,
    pub payload: serde_json::Value,
}

pub fn build_payload(metrics: SystemMetrics) -> QueuePayload {
    let hostname = if metrics.hostname.is_empty() {
        "unknown".to_string()
    } else {
        metrics.hostname.clone()
    };

    QueuePayload {
        agent: "litemid-agent".to_string(),
        topic: "endpointData".to_string(),
        name: hostname.clone(),
        source: hostname,
        payload: json!({
            "endpoint_metrics": {
                "hostname": metrics.hostname,
                "collection_time": Utc::now().to_rfc3339(),
                "agent_version": env!("CARGO_PKG_VERSION"),
                "operating_system": metrics.os,
                "cpu_metrics": metrics.cpu,
                "memory_metrics": metrics.memory,
                "disk_metrics": metrics.disk,
                "network_metrics": metrics.network,
                "runtime_metrics": metrics.runtime,
                "raw_timestamp": metrics.timestamp,
            }
        }),
    }
}

/// Collect one snapshot and post it to the server.
pub async fn send_metrics(server_url: &str, debug: bool) -> Result<()> {
    let metrics = collector::collect()
        .await
        .context("failed to collect metrics")?;
    let payload = build_payload(metrics);
    let url = format!("{}/proxy/ecc_queue", server_url.trim_end_matches('/'));

    if debug {
        println!("{}", serde_json::to_string_pretty(&payload)?);
        println!("sending to {url}");
    }

    let client = reqwest::Client::new();
    let response = client
        .post(&url)
        .json(&payload)
        .send()
        .await
        .context("failed to send metrics")?;

    if response.status() != reqwest::StatusCode::OK {
        bail!("server returned status {}", response.status());
    }

    info!("metrics sent to {server_url}");
    Ok(())
}

/// Periodic collection-and-send loop. The first tick completes immediately,
/// so the initial send happens before the first full interval elapses.
pub async fn run_daemon(server_url: &str, interval_secs: u64, debug: bool) -> Result<()> {
    info!("starting litemid agent daemon, sending to {server_url} every {interval_secs}s");

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // A failed cycle only skips this tick; the daemon keeps running.
                if let Err(err) = send_metrics(server_url, debug).await {
                    error!("metrics cycle failed: {err:#}");
                }
            }
            _ = &mut shutdown => {
                info!("shutting down agent daemon");
                return Ok(());
            }
        }
    }
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
}
