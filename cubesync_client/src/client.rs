//! Client implementation.
//!
//! `GameClient` holds one connection to the server plus a mirror of the
//! server's player list. It learns its own identity from `Initialize`, folds
//! each `ServerUpdate` into the mirror, and while connected periodically
//! publishes its local player's state back to the server.
//!
//! The local player is whatever mirror entry carries the assigned id. Until
//! the first broadcast arrives there is none, and publishing logs an error
//! instead of sending.

use std::future::Future;

use anyhow::Context;
use cubesync_shared::{
    config::ClientConfig,
    dispatch::{dispatch, MessageHandler},
    math::{Color, Vec3},
    message::{encode, Message},
    player::{LookupError, NetworkPlayer, PlayerId},
    transport::{ClientTransport, DisconnectReason, NetEvent, UdpClientTransport},
};
use tokio::{
    sync::mpsc,
    time::{self, Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::mirror::Mirror;

pub struct GameClient<T: ClientTransport> {
    cfg: ClientConfig,
    transport: T,
    local_id: Option<PlayerId>,
    mirror: Mirror,
    /// Set between the transport `Connect` and teardown.
    publishing: bool,
    torn_down: bool,
}

impl GameClient<UdpClientTransport> {
    /// Resolves the configured server address and starts connecting.
    ///
    /// Returns once the connect request is out; the session becomes active
    /// when a later `tick` sees the server's accept.
    pub async fn connect(cfg: ClientConfig) -> anyhow::Result<Self> {
        let addr = cfg.server_addr();
        let server = tokio::net::lookup_host(&addr)
            .await
            .with_context(|| format!("resolve {addr}"))?
            .next()
            .with_context(|| format!("no address for {addr}"))?;
        let transport = UdpClientTransport::connect(server, cfg.transport.clone())
            .await
            .context("open client socket")?;
        Ok(Self::with_transport(cfg, transport))
    }
}

impl<T: ClientTransport> GameClient<T> {
    pub fn with_transport(cfg: ClientConfig, transport: T) -> Self {
        Self {
            cfg,
            transport,
            local_id: None,
            mirror: Mirror::new(),
            publishing: false,
            torn_down: false,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.cfg
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Identity assigned by the server, once `Initialize` has arrived.
    pub fn local_identity(&self) -> Option<&PlayerId> {
        self.local_id.as_ref()
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn mirror_entities(&self) -> &[NetworkPlayer] {
        self.mirror.as_slice()
    }

    pub fn is_local(&self, id: &PlayerId) -> bool {
        self.local_id.as_ref() == Some(id)
    }

    /// Whether the connection is up and local state is being published.
    pub fn is_active(&self) -> bool {
        self.publishing
    }

    /// Whether the connection has ended, from either side.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Sets the local player's position and color. The next publish sends it.
    pub fn publish_local_entity(&mut self, position: Vec3, color: Color) -> Result<(), LookupError> {
        let local = self.local_entity_mut()?;
        local.position = position;
        local.color = Color::clamped(color.r, color.g, color.b);
        Ok(())
    }

    /// Moves the local player, keeping its color.
    pub fn move_local_entity(&mut self, position: Vec3) -> Result<(), LookupError> {
        self.local_entity_mut()?.position = position;
        Ok(())
    }

    /// One pass of the event loop.
    pub fn tick(&mut self) {
        if let Err(e) = self.transport.update() {
            warn!(error = %e, "Transport update failed");
        }
        while let Some(event) = self.transport.pop_event() {
            match event {
                NetEvent::Connect => self.on_connected(),
                NetEvent::Data(payload) => {
                    if let Err(e) = dispatch(self, (), &payload) {
                        warn!(error = %e, "Dropping undecodable message");
                    }
                }
                NetEvent::Disconnect(reason) => self.on_disconnected(reason),
            }
        }
    }

    /// Sends the local player's current state. Does nothing unless the
    /// session is active.
    pub fn send_local_update(&mut self) {
        if !self.publishing {
            return;
        }
        let Some(player) = self.local_entity().cloned() else {
            error!(local_id = ?self.local_id, "No local player");
            return;
        };
        debug!(player_id = %player.id, "Publishing local player");
        self.send(&Message::PlayerUpdate { player });
    }

    /// Tells the server we are leaving, then closes the connection.
    pub fn disconnect(&mut self) {
        if self.torn_down {
            return;
        }
        if self.publishing {
            if let Some(id) = self.local_id.clone() {
                self.send(&Message::PlayerDisconnect { server_id: id });
            }
        }
        self.transport.disconnect();
        self.publishing = false;
        self.torn_down = true;
        info!("Disconnected from server");
    }

    /// Runs the session until `stop` completes or the connection ends.
    ///
    /// Positions received on `inputs` move the local player. On `stop` the
    /// client disconnects cleanly.
    pub async fn run_until<F: Future<Output = ()>>(
        &mut self,
        mut inputs: mpsc::Receiver<Vec3>,
        stop: F,
    ) {
        let mut tick = time::interval(self.cfg.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut publish: Option<Interval> = None;
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    self.disconnect();
                    break;
                }
                _ = tick.tick() => {
                    self.tick();
                    if self.torn_down {
                        break;
                    }
                    // The publish schedule lives exactly as long as the connection.
                    if self.publishing && publish.is_none() {
                        let period = self.cfg.publish_interval();
                        let mut interval = time::interval_at(Instant::now() + period, period);
                        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        publish = Some(interval);
                    } else if !self.publishing {
                        publish = None;
                    }
                }
                _ = next_publish(&mut publish) => self.send_local_update(),
                Some(position) = inputs.recv() => {
                    if let Err(e) = self.move_local_entity(position) {
                        debug!(error = %e, "Input ignored");
                    }
                }
            }
        }
        info!(players = self.mirror.len(), "Client stopped");
    }

    fn on_connected(&mut self) {
        let player = match self.local_entity() {
            Some(p) => p.clone(),
            None => NetworkPlayer::new(
                self.local_id.clone().unwrap_or_default(),
                Vec3::ZERO,
                Color::WHITE,
            ),
        };
        self.publishing = true;
        info!("Connected to server");
        self.send(&Message::Handshake { player });
    }

    fn on_disconnected(&mut self, reason: DisconnectReason) {
        self.publishing = false;
        self.torn_down = true;
        match reason {
            DisconnectReason::ConnectFailed => error!("Could not connect to server"),
            _ => info!(?reason, "Client got disconnected from server"),
        }
    }

    fn send(&mut self, msg: &Message) {
        if let Err(e) = self.transport.send(&encode(msg)) {
            warn!(command = %msg.command(), error = %e, "Send failed");
        }
    }

    fn local_entity(&self) -> Option<&NetworkPlayer> {
        self.local_id.as_ref().and_then(|id| self.mirror.get(id))
    }

    fn local_entity_mut(&mut self) -> Result<&mut NetworkPlayer, LookupError> {
        let id = self.local_id.as_ref().ok_or(LookupError::NoLocalPlayer)?;
        self.mirror
            .get_mut(id)
            .ok_or_else(|| LookupError::UnknownPlayer(id.clone()))
    }
}

async fn next_publish(publish: &mut Option<Interval>) {
    match publish {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl<T: ClientTransport> MessageHandler for GameClient<T> {
    type Origin = ();

    fn on_initialize(&mut self, _: (), server_id: PlayerId) {
        info!(%server_id, "Initialize message received, local identity assigned");
        self.local_id = Some(server_id);
    }

    fn on_player_update(&mut self, _: (), player: NetworkPlayer) {
        debug!(player_id = %player.id, "Player update message received");
    }

    fn on_server_update(&mut self, _: (), players: Vec<NetworkPlayer>) {
        debug!(players = players.len(), "Server update message received");
        self.mirror.reconcile(&players, self.cfg.mirror_policy);
    }

    fn on_player_disconnect(&mut self, _: (), server_id: PlayerId) {
        match self.mirror.remove(&server_id) {
            Ok(_) => info!(%server_id, "Player removed"),
            Err(_) => info!(%server_id, "Player did not exist"),
        }
    }
}
