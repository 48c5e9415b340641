//! Interactive server status dashboard
//!
//! The status model is an explicit state machine: a pure transition function
//! consumes events and yields the next status plus an optional side effect
//! for the driving loop to execute. Rendering is plain line-oriented stdout
//! and carries no state of its own. The server runs as a spawned task that
//! reports back over the same event channel the keyboard commands use; no
//! lock is shared between the background task and the loop.

use crate::config::Config;
use crate::http;
use crate::snow::SnowClient;
use anyhow::Result;
use std::io::BufRead;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

#[derive(Debug)]
pub enum Event {
    StartRequested,
    StopRequested,
    ServerUp,
    ServerFailed(String),
    Tick,
    Quit,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Effect {
    SpawnServer,
    ShutdownServer,
}

/// Pure transition function: (status, event) -> (status, effect).
pub fn transition(status: ServerStatus, event: &Event) -> (ServerStatus, Option<Effect>) {
    use ServerStatus::*;

    match (status, event) {
        (Stopped | Error, Event::StartRequested) => (Starting, Some(Effect::SpawnServer)),
        (Starting, Event::ServerUp) => (Running, None),
        (Starting | Running, Event::ServerFailed(_)) => (Error, None),
        (Starting | Running, Event::StopRequested) => (Stopped, Some(Effect::ShutdownServer)),
        (Starting | Running, Event::Quit) => (Stopped, Some(Effect::ShutdownServer)),
        (status, _) => (status, None),
    }
}

pub async fn run(config: Arc<Config>) -> Result<()> {
    let (events_tx, mut events) = mpsc::channel::<Event>(16);
    let (shutdown_tx, _) = watch::channel(false);

    spawn_command_reader(events_tx.clone());
    spawn_ticker(events_tx.clone());

    let mut status = ServerStatus::Stopped;
    let mut running_since: Option<Instant> = None;
    banner(&config);
    render(status, running_since);

    while let Some(event) = events.recv().await {
        let quitting = matches!(event, Event::Quit);
        if let Event::ServerFailed(ref reason) = event {
            error!("server failed: {reason}");
        }

        let (next, effect) = transition(status, &event);
        match effect {
            Some(Effect::SpawnServer) => {
                let _ = shutdown_tx.send(false);
                spawn_server(
                    config.clone(),
                    events_tx.clone(),
                    shutdown_tx.subscribe(),
                );
            }
            Some(Effect::ShutdownServer) => {
                let _ = shutdown_tx.send(true);
            }
            None => {}
        }

        if next != status {
            status = next;
            running_since = if status == ServerStatus::Running {
                Some(Instant::now())
            } else {
                None
            };
            render(status, running_since);
        } else if refresh_on_tick(status, &event) {
            // Keep the uptime counter moving between status changes.
            render(status, running_since);
        }

        if quitting {
            break;
        }
    }

    Ok(())
}

/// One-shot background unit of work: connectivity gate, then serve. Outcome
/// comes back as events; the loop stays responsive while the server runs.
fn spawn_server(
    config: Arc<Config>,
    events: mpsc::Sender<Event>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let snow = match SnowClient::new(&config.servicenow) {
            Ok(snow) => snow,
            Err(err) => {
                let _ = events.send(Event::ServerFailed(err.to_string())).await;
                return;
            }
        };
        if let Err(err) = snow.test_connection().await {
            let _ = events.send(Event::ServerFailed(err.to_string())).await;
            return;
        }

        let _ = events.send(Event::ServerUp).await;

        let shutdown_signal = async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        };
        if let Err(err) = http::run(config, snow, shutdown_signal).await {
            let _ = events.send(Event::ServerFailed(err.to_string())).await;
        }
    });
}

fn spawn_command_reader(events: mpsc::Sender<Event>) {
    // Blocking stdin reads live on a dedicated thread; commands are handed to
    // the event loop over the channel.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let event = match line.trim() {
                "start" => Event::StartRequested,
                "stop" => Event::StopRequested,
                "quit" | "q" => Event::Quit,
                _ => continue,
            };
            if events.blocking_send(event).is_err() {
                break;
            }
        }
    });
}

fn spawn_ticker(events: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        loop {
            tick.tick().await;
            if events.send(Event::Tick).await.is_err() {
                break;
            }
        }
    });
}

/// True when a tick should repaint the status line even though the status
/// itself did not change; only a running server has an uptime to refresh.
fn refresh_on_tick(status: ServerStatus, event: &Event) -> bool {
    status == ServerStatus::Running && matches!(event, Event::Tick)
}

fn banner(config: &Config) {
    println!("LiteMID server dashboard");
    println!("  bind:     {}:{}", config.server.host, config.server.port);
    println!("  instance: {}", config.servicenow.instance);
    println!("  routes:   GET /health | POST /proxy/ecc_queue | GET /");
    println!("  commands: start | stop | quit");
    println!();
}

fn render(status: ServerStatus, running_since: Option<Instant>) {
    let label = match status {
        ServerStatus::Stopped => "stopped",
        ServerStatus::Starting => "starting",
        ServerStatus::Running => "running",
        ServerStatus::Error => "error",
    };
    match running_since {
        Some(since) => println!("[dashboard] status: {label} (up {}s)", since.elapsed().as_secs()),
        None => println!("[dashboard] status: {label}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ServerStatus::*;

    #[test]
    fn start_from_stopped_spawns_server() {
        let (next, effect) = transition(Stopped, &Event::StartRequested);
        assert_eq!(next, Starting);
        assert_eq!(effect, Some(Effect::SpawnServer));
    }

    #[test]
    fn full_lifecycle() {
        let (next, _) = transition(Stopped, &Event::StartRequested);
        let (next, effect) = transition(next, &Event::ServerUp);
        assert_eq!(next, Running);
        assert_eq!(effect, None);

        let (next, effect) = transition(next, &Event::StopRequested);
        assert_eq!(next, Stopped);
        assert_eq!(effect, Some(Effect::ShutdownServer));
    }

    #[test]
    fn failure_moves_to_error_and_can_restart() {
        let (next, _) = transition(Starting, &Event::ServerFailed("bind".into()));
        assert_eq!(next, Error);

        let (next, effect) = transition(next, &Event::StartRequested);
        assert_eq!(next, Starting);
        assert_eq!(effect, Some(Effect::SpawnServer));
    }

    #[test]
    fn irrelevant_events_are_ignored() {
        assert_eq!(transition(Stopped, &Event::Tick), (Stopped, None));
        assert_eq!(transition(Stopped, &Event::StopRequested), (Stopped, None));
        assert_eq!(transition(Running, &Event::StartRequested), (Running, None));
        assert_eq!(transition(Stopped, &Event::ServerUp), (Stopped, None));
    }

    #[test]
    fn tick_refreshes_uptime_only_while_running() {
        assert!(refresh_on_tick(Running, &Event::Tick));
        assert!(!refresh_on_tick(Stopped, &Event::Tick));
        assert!(!refresh_on_tick(Error, &Event::Tick));
        assert!(!refresh_on_tick(Running, &Event::ServerUp));
    }

    #[test]
    fn quit_while_running_shuts_server_down() {
        let (next, effect) = transition(Running, &Event::Quit);
        assert_eq!(next, Stopped);
        assert_eq!(effect, Some(Effect::ShutdownServer));
    }
}
