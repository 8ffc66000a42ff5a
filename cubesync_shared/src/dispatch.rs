//! Protocol dispatch.
//!
//! `dispatch` decodes one inbound payload and routes it to the matching
//! `MessageHandler` method. Each message is handled on its own; no state is
//! carried between calls. Every method has a default that only logs receipt,
//! so server and client override just the commands they act on.
//!
//! Decode failures come back to the caller, which logs them with its own
//! connection context and carries on with the next event.

use tracing::debug;

use crate::{
    message::{decode, Command, DecodeError, InputAxes, Message},
    player::{NetworkPlayer, PlayerId},
};

/// Receiver side of the protocol.
///
/// `Origin` identifies where a message came from (a connection handle on the
/// server, `()` on the single-connection client).
pub trait MessageHandler {
    type Origin: Copy + std::fmt::Debug;

    fn on_initialize(&mut self, origin: Self::Origin, server_id: PlayerId) {
        debug!(?origin, %server_id, "Initialize message received");
    }

    fn on_handshake(&mut self, origin: Self::Origin, player: NetworkPlayer) {
        debug!(?origin, player_id = %player.id, "Handshake message received");
    }

    fn on_player_update(&mut self, origin: Self::Origin, player: NetworkPlayer) {
        debug!(?origin, player_id = %player.id, "Player update message received");
    }

    fn on_server_update(&mut self, origin: Self::Origin, players: Vec<NetworkPlayer>) {
        debug!(?origin, players = players.len(), "Server update message received");
    }

    fn on_player_input(&mut self, _origin: Self::Origin, _input: InputAxes) {}

    fn on_player_disconnect(&mut self, origin: Self::Origin, server_id: PlayerId) {
        debug!(?origin, %server_id, "Player disconnect message received");
    }
}

/// Routes an already decoded message.
pub fn route<H: MessageHandler>(handler: &mut H, origin: H::Origin, msg: Message) -> Command {
    let command = msg.command();
    match msg {
        Message::Initialize { server_id } => handler.on_initialize(origin, server_id),
        Message::Handshake { player } => handler.on_handshake(origin, player),
        Message::PlayerUpdate { player } => handler.on_player_update(origin, player),
        Message::ServerUpdate { players } => handler.on_server_update(origin, players),
        Message::PlayerInput { input } => handler.on_player_input(origin, input),
        Message::PlayerDisconnect { server_id } => handler.on_player_disconnect(origin, server_id),
    }
    command
}

/// Decodes `payload` and routes it. Returns the command that was handled.
pub fn dispatch<H: MessageHandler>(
    handler: &mut H,
    origin: H::Origin,
    payload: &[u8],
) -> Result<Command, DecodeError> {
    let msg = decode(payload)?;
    Ok(route(handler, origin, msg))
}
