//! Shared fixtures for the integration tests.
//!
//! `LoopbackWorld` runs one server and any number of clients over an
//! in-memory network, stepped by hand so every test is deterministic.

use cubesync_client::GameClient;
use cubesync_server::GameServer;
use cubesync_shared::{
    config::{ClientConfig, MirrorPolicy, ServerConfig},
    player::PlayerId,
    transport::{ConnectionHandle, LoopbackClient, LoopbackNetwork, LoopbackServer},
};

pub type LoopbackGameClient = GameClient<LoopbackClient>;

/// Installs a test-friendly subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

pub struct LoopbackWorld {
    pub net: LoopbackNetwork,
    pub server: GameServer<LoopbackServer>,
}

impl Default for LoopbackWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackWorld {
    pub fn new() -> Self {
        let net = LoopbackNetwork::new();
        let cfg = ServerConfig {
            color_seed: Some(42),
            ..Default::default()
        };
        let server = GameServer::with_transport(cfg, net.server());
        Self { net, server }
    }

    /// Opens a client connection. It is accepted on the next server tick.
    pub fn join(&self, policy: MirrorPolicy) -> LoopbackGameClient {
        let cfg = ClientConfig {
            mirror_policy: policy,
            ..Default::default()
        };
        GameClient::with_transport(cfg, self.net.connect())
    }

    /// One server tick, then one tick for each client.
    pub fn step(&mut self, clients: &mut [&mut LoopbackGameClient]) {
        self.server.tick();
        for client in clients.iter_mut() {
            client.tick();
        }
    }

    /// Broadcasts the player list and lets every client read it.
    pub fn broadcast(&mut self, clients: &mut [&mut LoopbackGameClient]) {
        self.server.broadcast_state();
        for client in clients.iter_mut() {
            client.tick();
        }
    }

    /// Identity the server registered for `client`.
    pub fn identity_of(&self, client: &LoopbackGameClient) -> Option<PlayerId> {
        self.server
            .registry()
            .identity_of(handle(client))
            .cloned()
    }
}

pub fn handle(client: &LoopbackGameClient) -> ConnectionHandle {
    client.transport().handle()
}
