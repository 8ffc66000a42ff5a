//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p cubesync_server -- [--port 9000] [--tick-hz 60] [--broadcast-ms 1000] [--config server.json]
//!
//! The server accepts client connections, keeps the authoritative player list
//! and broadcasts it to every client. Ctrl-C shuts it down.

use std::env;

use anyhow::Context;
use cubesync_server::GameServer;
use cubesync_shared::config::ServerConfig;
use tracing::{error, info};

fn parse_args() -> anyhow::Result<ServerConfig> {
    let args: Vec<String> = env::args().collect();

    // A config file is the base; flags override it.
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let path = &args[i + 1];
            let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
            ServerConfig::from_json_str(&text).with_context(|| format!("parse {path}"))?
        }
        _ => ServerConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                cfg.port = args[i + 1].parse().unwrap_or(cfg.port);
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(cfg.tick_hz);
                i += 2;
            }
            "--broadcast-ms" if i + 1 < args.len() => {
                cfg.broadcast_interval_ms = args[i + 1].parse().unwrap_or(cfg.broadcast_interval_ms);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(port = cfg.port, tick_hz = cfg.tick_hz, broadcast_ms = cfg.broadcast_interval_ms, "Starting server");

    let mut server = match GameServer::bind(cfg).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to bind to port");
            return Err(e).context("start server");
        }
    };
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("Server stopped");
    Ok(())
}
