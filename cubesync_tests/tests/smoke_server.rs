use std::time::Duration;

use cubesync_server::GameServer;
use cubesync_shared::config::ServerConfig;

fn ephemeral() -> ServerConfig {
    ServerConfig {
        port: 0,
        tick_hz: 100,
        broadcast_interval_ms: 20,
        ..Default::default()
    }
}

/// Smoke test: an idle server ticks and broadcasts without panicking.
#[tokio::test]
async fn server_runs_few_ticks() -> anyhow::Result<()> {
    let mut server = GameServer::bind(ephemeral()).await?;
    for _ in 0..3 {
        server.tick();
    }
    server.run_until(tokio::time::sleep(Duration::from_millis(100))).await;
    assert!(server.broadcasts_sent() >= 1);
    assert!(server.players().is_empty());
    Ok(())
}

/// A taken port fails startup with a bind error.
#[tokio::test]
async fn second_bind_on_same_port_fails() -> anyhow::Result<()> {
    let first = GameServer::bind(ephemeral()).await?;
    let port = first.local_addr()?.port();

    let taken = ServerConfig {
        port,
        ..ephemeral()
    };
    let err = match GameServer::bind(taken).await {
        Ok(_) => anyhow::bail!("bind on a taken port succeeded"),
        Err(e) => e,
    };
    assert_eq!(err.port, port);
    Ok(())
}
