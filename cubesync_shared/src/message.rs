//! Protocol messages and their wire codec.
//!
//! Every payload is a JSON object whose first field is the numeric `cmd`
//! discriminator. Decoding reads `cmd` alone first, then hands the bytes to the
//! decoder for that command's payload shape, producing one `Message` value.
//! Unknown object fields are ignored so peers can add optional fields without
//! breaking older builds.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::player::{NetworkPlayer, PlayerId};

/// Leading discriminator of every payload.
///
/// The numeric values are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Initialize = 0,
    PlayerUpdate = 1,
    ServerUpdate = 2,
    Handshake = 3,
    PlayerInput = 4,
    PlayerDisconnect = 5,
}

impl Command {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Command::Initialize),
            1 => Some(Command::PlayerUpdate),
            2 => Some(Command::ServerUpdate),
            3 => Some(Command::Handshake),
            4 => Some(Command::PlayerInput),
            5 => Some(Command::PlayerDisconnect),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Initialize => "INITIALIZE",
            Command::PlayerUpdate => "PLAYER_UPDATE",
            Command::ServerUpdate => "SERVER_UPDATE",
            Command::Handshake => "HANDSHAKE",
            Command::PlayerInput => "PLAYER_INPUT",
            Command::PlayerDisconnect => "PLAYER_DISCONNECT",
        };
        f.write_str(name)
    }
}

/// Raw input axes. Carried by `PlayerInput`, which neither side acts on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct InputAxes {
    pub horizontal: f32,
    pub vertical: f32,
}

/// Protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Server -> client: the identity assigned to this connection.
    Initialize { server_id: PlayerId },
    /// Client -> server greeting sent once on connect.
    Handshake { player: NetworkPlayer },
    /// Client -> server: current state of the sender's own player.
    PlayerUpdate { player: NetworkPlayer },
    /// Server -> client: the full authoritative player list.
    ServerUpdate { players: Vec<NetworkPlayer> },
    PlayerInput { input: InputAxes },
    /// Either direction: the named player has left.
    PlayerDisconnect { server_id: PlayerId },
}

impl Message {
    pub fn command(&self) -> Command {
        match self {
            Message::Initialize { .. } => Command::Initialize,
            Message::Handshake { .. } => Command::Handshake,
            Message::PlayerUpdate { .. } => Command::PlayerUpdate,
            Message::ServerUpdate { .. } => Command::ServerUpdate,
            Message::PlayerInput { .. } => Command::PlayerInput,
            Message::PlayerDisconnect { .. } => Command::PlayerDisconnect,
        }
    }
}

/// Payload decoding failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not a JSON object with a numeric `cmd` field (includes truncation).
    Malformed(String),
    /// `cmd` is a number this build does not know.
    UnknownCommand(u64),
    /// `cmd` is known but the rest of the payload does not have its shape.
    Mismatch { command: Command, detail: String },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(detail) => write!(f, "malformed payload: {detail}"),
            DecodeError::UnknownCommand(cmd) => write!(f, "unknown command {cmd}"),
            DecodeError::Mismatch { command, detail } => {
                write!(f, "payload does not match {command}: {detail}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

// Outbound shapes borrow from the message so encoding never clones lists.

#[derive(Serialize)]
struct IdWire<'a> {
    cmd: u8,
    #[serde(rename = "serverID")]
    server_id: &'a PlayerId,
}

#[derive(Serialize)]
struct PlayerWire<'a> {
    cmd: u8,
    player: &'a NetworkPlayer,
}

#[derive(Serialize)]
struct PlayersWire<'a> {
    cmd: u8,
    players: &'a [NetworkPlayer],
}

#[derive(Serialize)]
struct InputWire<'a> {
    cmd: u8,
    input: &'a InputAxes,
}

#[derive(Deserialize)]
struct Header {
    cmd: u64,
}

#[derive(Deserialize)]
struct IdBody {
    #[serde(rename = "serverID")]
    server_id: PlayerId,
}

#[derive(Deserialize)]
struct PlayerBody {
    player: NetworkPlayer,
}

#[derive(Deserialize)]
struct PlayersBody {
    players: Vec<NetworkPlayer>,
}

#[derive(Deserialize)]
struct InputBody {
    input: InputAxes,
}

/// Encodes a message into a self-contained payload.
pub fn encode(msg: &Message) -> Bytes {
    let cmd = msg.command().as_u8();
    let json = match msg {
        Message::Initialize { server_id } | Message::PlayerDisconnect { server_id } => {
            serde_json::to_vec(&IdWire { cmd, server_id })
        }
        Message::Handshake { player } | Message::PlayerUpdate { player } => {
            serde_json::to_vec(&PlayerWire { cmd, player })
        }
        Message::ServerUpdate { players } => serde_json::to_vec(&PlayersWire { cmd, players }),
        Message::PlayerInput { input } => serde_json::to_vec(&InputWire { cmd, input }),
    };
    // Only string-keyed structs and plain numbers are serialized here.
    Bytes::from(json.expect("message payloads always serialize"))
}

/// Reads only the discriminator of a payload.
pub fn peek_command(payload: &[u8]) -> Result<Command, DecodeError> {
    let header: Header =
        serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    u8::try_from(header.cmd)
        .ok()
        .and_then(Command::from_u8)
        .ok_or(DecodeError::UnknownCommand(header.cmd))
}

/// Decodes a payload into a typed message.
pub fn decode(payload: &[u8]) -> Result<Message, DecodeError> {
    let command = peek_command(payload)?;
    let mismatch = |e: serde_json::Error| DecodeError::Mismatch {
        command,
        detail: e.to_string(),
    };
    let msg = match command {
        Command::Initialize => {
            let body: IdBody = serde_json::from_slice(payload).map_err(mismatch)?;
            Message::Initialize {
                server_id: body.server_id,
            }
        }
        Command::PlayerDisconnect => {
            let body: IdBody = serde_json::from_slice(payload).map_err(mismatch)?;
            Message::PlayerDisconnect {
                server_id: body.server_id,
            }
        }
        Command::Handshake => {
            let body: PlayerBody = serde_json::from_slice(payload).map_err(mismatch)?;
            Message::Handshake {
                player: body.player,
            }
        }
        Command::PlayerUpdate => {
            let body: PlayerBody = serde_json::from_slice(payload).map_err(mismatch)?;
            Message::PlayerUpdate {
                player: body.player,
            }
        }
        Command::ServerUpdate => {
            let body: PlayersBody = serde_json::from_slice(payload).map_err(mismatch)?;
            Message::ServerUpdate {
                players: body.players,
            }
        }
        Command::PlayerInput => {
            let body: InputBody = serde_json::from_slice(payload).map_err(mismatch)?;
            Message::PlayerInput { input: body.input }
        }
    };
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Color, Vec3};

    fn player(id: &str, x: f32) -> NetworkPlayer {
        NetworkPlayer::new(id.into(), Vec3::new(x, 0.5, -x), Color::new(0.25, 0.5, 0.75))
    }

    fn roundtrip(msg: Message) {
        let bytes = encode(&msg);
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn roundtrip_id_messages() {
        roundtrip(Message::Initialize {
            server_id: "1".into(),
        });
        roundtrip(Message::PlayerDisconnect {
            server_id: "42".into(),
        });
    }

    #[test]
    fn roundtrip_single_player_messages() {
        roundtrip(Message::Handshake {
            player: player("", 0.0),
        });
        roundtrip(Message::PlayerUpdate {
            player: player("9", 3.0),
        });
    }

    #[test]
    fn roundtrip_server_update_lists() {
        roundtrip(Message::ServerUpdate { players: vec![] });
        roundtrip(Message::ServerUpdate {
            players: vec![player("1", 1.0)],
        });
        roundtrip(Message::ServerUpdate {
            players: (0..5).map(|i| player(&i.to_string(), i as f32)).collect(),
        });
    }

    #[test]
    fn roundtrip_player_input() {
        roundtrip(Message::PlayerInput {
            input: InputAxes {
                horizontal: -1.0,
                vertical: 0.5,
            },
        });
    }

    #[test]
    fn wire_shape_is_field_tagged_with_leading_cmd() {
        let bytes = encode(&Message::Initialize {
            server_id: "5".into(),
        });
        assert_eq!(&bytes[..], br#"{"cmd":0,"serverID":"5"}"#);

        let bytes = encode(&Message::PlayerUpdate {
            player: NetworkPlayer::new("2".into(), Vec3::new(1.0, 2.0, 3.0), Color::new(1.0, 0.0, 0.0)),
        });
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"cmd":1,"player":{"id":"2","position":{"x":1.0,"y":2.0,"z":3.0},"color":{"r":1.0,"g":0.0,"b":0.0}}}"#
        );
    }

    #[test]
    fn peek_reads_discriminator_only() {
        let bytes = encode(&Message::ServerUpdate { players: vec![] });
        assert_eq!(peek_command(&bytes).unwrap(), Command::ServerUpdate);
    }

    #[test]
    fn unknown_command_is_reported() {
        assert_eq!(
            decode(br#"{"cmd":17,"serverID":"1"}"#),
            Err(DecodeError::UnknownCommand(17))
        );
        assert_eq!(
            decode(br#"{"cmd":4096}"#),
            Err(DecodeError::UnknownCommand(4096))
        );
    }

    #[test]
    fn shape_mismatch_is_reported() {
        // SERVER_UPDATE discriminator with a single-player body.
        let err = decode(br#"{"cmd":2,"player":{"id":"1"}}"#).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Mismatch {
                command: Command::ServerUpdate,
                ..
            }
        ));
    }

    #[test]
    fn partial_bodies_do_not_decode() {
        for payload in [
            &br#"{"cmd":1,"player":{"id":"1"}}"#[..],
            br#"{"cmd":3,"player":{"id":"","position":{"x":0.0,"y":0.0,"z":0.0}}}"#,
        ] {
            assert!(matches!(decode(payload), Err(DecodeError::Mismatch { .. })));
        }
        assert!(matches!(
            decode(br#"{"cmd":4,"serverID":"x"}"#),
            Err(DecodeError::Mismatch {
                command: Command::PlayerInput,
                ..
            })
        ));
        assert!(matches!(
            decode(br#"{"cmd":4,"input":{"horizontal":1.0}}"#),
            Err(DecodeError::Mismatch { .. })
        ));
    }

    #[test]
    fn malformed_and_truncated_payloads_are_rejected() {
        assert!(matches!(decode(b"not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode(br#"{"serverID":"1"}"#), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode(br#"{"cmd":-1}"#), Err(DecodeError::Malformed(_))));

        let full = encode(&Message::ServerUpdate {
            players: vec![player("1", 1.0)],
        });
        let truncated = &full[..full.len() - 3];
        assert!(matches!(decode(truncated), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let msg = decode(br#"{"cmd":5,"serverID":"3","reason":"timeout"}"#).unwrap();
        assert_eq!(
            msg,
            Message::PlayerDisconnect {
                server_id: "3".into()
            }
        );
    }
}
