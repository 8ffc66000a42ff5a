//! Server implementation.
//!
//! `GameServer` owns the whole authoritative session: the transport, the
//! connection registry and the player list. Two schedules drive it:
//! - `tick`: transport I/O, connection bookkeeping, message dispatch.
//! - `broadcast_state`: push the full player list to every client.
//!
//! `run_until` interleaves both on one task with `tokio::select!`, so the
//! player list only ever has one writer.
//!
//! Failure policy: anything that goes wrong on one connection (bad payload,
//! failed send) is logged and handled for that connection only. A failed send
//! counts as a disconnect.

use std::{future::Future, net::SocketAddr};

use anyhow::Context;
use cubesync_shared::{
    config::ServerConfig,
    dispatch::{dispatch, MessageHandler},
    math::Color,
    message::{encode, Message},
    player::{NetworkPlayer, PlayerId},
    transport::{
        BindError, ConnectionHandle, DisconnectReason, NetEvent, ServerTransport, TransportError,
        UdpServerTransport,
    },
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{registry::ConnectionRegistry, world::PlayerList};

/// Authoritative game server.
pub struct GameServer<T: ServerTransport> {
    cfg: ServerConfig,
    transport: T,
    registry: ConnectionRegistry,
    players: PlayerList,
    rng: StdRng,
    broadcasts: u64,
}

impl GameServer<UdpServerTransport> {
    /// Binds the configured UDP port. Failing here is fatal for this server
    /// instance; nothing is accepted.
    pub async fn bind(cfg: ServerConfig) -> Result<Self, BindError> {
        let transport = UdpServerTransport::bind(cfg.port, cfg.transport.clone()).await?;
        Ok(Self::with_transport(cfg, transport))
    }

    /// Returns the bound address (useful when the port was 0).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.transport.local_addr().context("server local_addr")
    }
}

impl<T: ServerTransport> GameServer<T> {
    /// Creates a server on an already listening transport.
    pub fn with_transport(cfg: ServerConfig, transport: T) -> Self {
        let rng = match cfg.color_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            cfg,
            transport,
            registry: ConnectionRegistry::new(),
            players: PlayerList::new(),
            rng,
            broadcasts: 0,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.cfg
    }

    pub fn players(&self) -> &PlayerList {
        &self.players
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Number of `ServerUpdate` broadcasts sent so far.
    pub fn broadcasts_sent(&self) -> u64 {
        self.broadcasts
    }

    /// One pass of the event loop.
    pub fn tick(&mut self) {
        if let Err(e) = self.transport.update() {
            warn!(error = %e, "Transport update failed");
        }
        self.cleanup_connections();
        self.accept_connections();
        self.read_incoming();
    }

    /// Sends the full player list to every live connection.
    pub fn broadcast_state(&mut self) {
        let msg = Message::ServerUpdate {
            players: self.players.snapshot(),
        };
        self.broadcast(&msg);
        self.broadcasts += 1;
        debug!(
            players = self.players.len(),
            connections = self.registry.len(),
            "Update sent to clients"
        );
    }

    /// Runs ticks and broadcasts on their schedules until `stop` completes,
    /// then closes every connection.
    pub async fn run_until<F: Future<Output = ()>>(&mut self, stop: F) {
        let mut tick = time::interval(self.cfg.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut broadcast = time::interval(self.cfg.broadcast_interval());
        broadcast.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(stop);

        info!(
            tick_hz = self.cfg.tick_hz,
            broadcast_ms = self.cfg.broadcast_interval_ms,
            "Server running"
        );
        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = tick.tick() => self.tick(),
                _ = broadcast.tick() => self.broadcast_state(),
            }
        }
        self.shutdown();
    }

    /// Closes every connection and clears the session.
    pub fn shutdown(&mut self) {
        let conns = self.registry.drain();
        for (conn, _) in &conns {
            self.transport.disconnect(*conn);
        }
        self.players = PlayerList::new();
        info!(connections = conns.len(), "Server shut down");
    }

    fn cleanup_connections(&mut self) {
        let transport = &self.transport;
        let gone = self.registry.prune(|conn| transport.is_live(conn));
        for (conn, id) in gone {
            info!(%conn, player_id = %id, "Pruned closed connection");
            self.disconnect_player(&id);
        }
    }

    fn accept_connections(&mut self) {
        while let Some(conn) = self.transport.accept() {
            let id = self.registry.accept(conn);
            let color = self.random_color();
            self.players.spawn(id.clone(), color);
            info!(%conn, player_id = %id, "Accepted a connection, player created");

            // The new player reaches everyone with the next broadcast.
            self.send_to(conn, &Message::Initialize { server_id: id });
        }
    }

    fn read_incoming(&mut self) {
        let conns: Vec<ConnectionHandle> = self.registry.live_connections().collect();
        for conn in conns {
            while let Some(event) = self.transport.pop_event(conn) {
                match event {
                    NetEvent::Data(payload) => {
                        if let Err(e) = dispatch(self, conn, &payload) {
                            warn!(%conn, error = %e, "Dropping undecodable message");
                        }
                    }
                    NetEvent::Disconnect(reason) => self.on_connection_closed(conn, reason),
                    NetEvent::Connect => debug!(%conn, "Ignoring connect event"),
                }
            }
        }
    }

    fn on_connection_closed(&mut self, conn: ConnectionHandle, reason: DisconnectReason) {
        match self.registry.remove(conn) {
            Some(id) => {
                info!(%conn, player_id = %id, ?reason, "Client disconnected from server");
                self.disconnect_player(&id);
            }
            None => debug!(%conn, ?reason, "Disconnect for unregistered connection"),
        }
    }

    /// Removes `id` from the list and tells every live connection. A miss
    /// means the notice already went out.
    fn disconnect_player(&mut self, id: &PlayerId) {
        if let Err(e) = self.players.remove(id) {
            debug!(error = %e, "Player already removed");
            return;
        }
        info!(player_id = %id, "Player removed");
        self.broadcast(&Message::PlayerDisconnect {
            server_id: id.clone(),
        });
    }

    fn send_to(&mut self, conn: ConnectionHandle, msg: &Message) {
        let payload = encode(msg);
        if let Err(e) = self.transport.send(conn, &payload) {
            self.on_send_failed(conn, e);
        }
    }

    fn broadcast(&mut self, msg: &Message) {
        let payload = encode(msg);
        let conns: Vec<ConnectionHandle> = self.registry.live_connections().collect();
        let mut failed = Vec::new();
        for conn in conns {
            if let Err(e) = self.transport.send(conn, &payload) {
                failed.push((conn, e));
            }
        }
        for (conn, e) in failed {
            self.on_send_failed(conn, e);
        }
    }

    fn on_send_failed(&mut self, conn: ConnectionHandle, error: TransportError) {
        warn!(%conn, %error, "Send failed, dropping connection");
        self.transport.disconnect(conn);
        if let Some(id) = self.registry.remove(conn) {
            self.disconnect_player(&id);
        }
    }

    fn random_color(&mut self) -> Color {
        Color::new(self.rng.gen(), self.rng.gen(), self.rng.gen())
    }

    /// Whether `conn` is the registered owner of `id`.
    fn owns(&self, conn: ConnectionHandle, id: &PlayerId) -> bool {
        self.registry.handle_of(id) == Some(conn)
    }
}

impl<T: ServerTransport> MessageHandler for GameServer<T> {
    type Origin = ConnectionHandle;

    fn on_initialize(&mut self, conn: ConnectionHandle, server_id: PlayerId) {
        warn!(%conn, %server_id, "Server received an initialize message");
    }

    fn on_handshake(&mut self, conn: ConnectionHandle, player: NetworkPlayer) {
        info!(%conn, player_id = %player.id, "Handshake message received");
    }

    fn on_player_update(&mut self, conn: ConnectionHandle, player: NetworkPlayer) {
        if !self.owns(conn, &player.id) {
            warn!(%conn, player_id = %player.id, "Rejecting update for a player this connection does not own");
            return;
        }
        let id = player.id.clone();
        match self.players.update(player) {
            Ok(()) => debug!(%conn, player_id = %id, "Player updated"),
            Err(e) => debug!(%conn, error = %e, "Ignoring update for unknown player"),
        }
    }

    fn on_server_update(&mut self, conn: ConnectionHandle, players: Vec<NetworkPlayer>) {
        debug!(%conn, players = players.len(), "Server update message received");
    }

    fn on_player_disconnect(&mut self, conn: ConnectionHandle, server_id: PlayerId) {
        if !self.owns(conn, &server_id) {
            warn!(%conn, %server_id, "Rejecting disconnect for a player this connection does not own");
            return;
        }
        info!(%conn, %server_id, "Player disconnect received");
        self.disconnect_player(&server_id);
    }
}
