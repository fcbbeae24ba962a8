//! parleyd — chat daemon built on the parley peer core.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use parley_core::config::ParleyConfig;
use parley_peers::Listener;

mod bridge;
mod net;
mod server;

use server::{CoreEvent, Server};

const REPORT_INTERVAL: Duration = Duration::from_secs(10);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = ParleyConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = ParleyConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ParleyConfig::default()
    });
    tracing::info!(
        server = %config.server.name,
        numeric = config.server.numeric,
        description = %config.server.description,
        listen = %config.network.listen_addr,
        max_connections = config.pools.max_connections,
        "parleyd starting"
    );

    let socket = TcpListener::bind(config.network.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.network.listen_addr))?;
    let listener = Arc::new(Listener {
        addr: socket
            .local_addr()
            .context("failed to read listen address")?,
    });

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<CoreEvent>();
    let mut server = Server::new(&config, listener.clone(), events_tx.clone());

    let accept_task = tokio::spawn(net::accept_loop(socket, listener, events_tx));

    // ── Core loop ────────────────────────────────────────────────────────────

    let mut report = tokio::time::interval(REPORT_INTERVAL);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(event) => server.handle(event),
                None => break,
            },
            _ = report.tick() => server.report(),
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    // ── Drain ────────────────────────────────────────────────────────────────

    accept_task.abort();
    server.shutdown();
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while !server.is_drained() {
            match events_rx.recv().await {
                Some(event) => server.handle(event),
                None => break,
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            parked = server.peers().parked(),
            "connections still waiting on cancellations at exit"
        );
    }
    tracing::info!(report = %server.peers().list_info().to_json(), "parleyd stopped");

    Ok(())
}
