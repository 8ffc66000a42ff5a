//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p cubesync_client -- [--addr 127.0.0.1] [--port 9000] [--tick-hz 60] [--publish-ms 500] [--prune-absent] [--config client.json]
//!
//! The client connects to the server, mirrors the shared player list and
//! moves its own player along a scripted path. Ctrl-C disconnects cleanly.

use std::{env, time::Duration};

use anyhow::Context;
use cubesync_client::{
    input::{InputState, DEFAULT_SPEED},
    GameClient,
};
use cubesync_shared::config::{ClientConfig, MirrorPolicy};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

fn parse_args() -> anyhow::Result<ClientConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let path = &args[i + 1];
            let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
            ClientConfig::from_json_str(&text).with_context(|| format!("parse {path}"))?
        }
        _ => ClientConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_ip = args[i + 1].clone();
                i += 2;
            }
            "--port" if i + 1 < args.len() => {
                cfg.server_port = args[i + 1].parse().unwrap_or(cfg.server_port);
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(cfg.tick_hz);
                i += 2;
            }
            "--publish-ms" if i + 1 < args.len() => {
                cfg.publish_interval_ms = args[i + 1].parse().unwrap_or(cfg.publish_interval_ms);
                i += 2;
            }
            "--prune-absent" => {
                cfg.mirror_policy = MirrorPolicy::PruneAbsent;
                i += 1;
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
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(server = %cfg.server_addr(), policy = ?cfg.mirror_policy, "Starting client");

    let mut client = GameClient::connect(cfg).await.context("connect")?;

    // Scripted input source, sampled at 10 Hz.
    let (input_tx, input_rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let step = Duration::from_millis(100);
        let mut t = 0.0f32;
        loop {
            tokio::time::sleep(step).await;
            t += step.as_secs_f32();
            let state = InputState::wander(t);
            debug!(axes = ?state.to_axes(), "Input sampled");
            if input_tx.send(state.to_position(DEFAULT_SPEED)).await.is_err() {
                break;
            }
        }
    });

    client
        .run_until(input_rx, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!(local_id = ?client.local_identity(), "Client exited");
    Ok(())
}
