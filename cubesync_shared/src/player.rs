//! Replicated player model.
//!
//! A `NetworkPlayer` is the unit of state the server owns and every client
//! mirrors. Its `id` is the protocol-level identity handed out by the server's
//! connection registry; it is never derived from transport handles.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::math::{Color, Vec3};

/// Stable protocol-level player identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        PlayerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty id is what an unassigned client would put on the wire.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        PlayerId(s.to_string())
    }
}

impl From<String> for PlayerId {
    fn from(s: String) -> Self {
        PlayerId(s)
    }
}

/// Replicated state of one connected player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkPlayer {
    pub id: PlayerId,
    pub position: Vec3,
    pub color: Color,
}

impl NetworkPlayer {
    pub fn new(id: PlayerId, position: Vec3, color: Color) -> Self {
        Self {
            id,
            position,
            color,
        }
    }

    /// Copies position and color from `other`, keeping this player's id.
    pub fn apply(&mut self, other: &NetworkPlayer) {
        self.position = other.position;
        self.color = other.color;
    }
}

/// Error for operations that address a player by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    UnknownPlayer(PlayerId),
    /// The client has no assigned identity yet.
    NoLocalPlayer,
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupError::UnknownPlayer(id) => write!(f, "no player with id '{id}'"),
            LookupError::NoLocalPlayer => write!(f, "no local player"),
        }
    }
}

impl std::error::Error for LookupError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&PlayerId::new("7")).unwrap();
        assert_eq!(json, "\"7\"");
    }

    #[test]
    fn position_and_color_are_required() {
        assert!(serde_json::from_str::<NetworkPlayer>(r#"{"id":"3"}"#).is_err());
        assert!(serde_json::from_str::<NetworkPlayer>(
            r#"{"id":"3","position":{"x":0.0,"y":0.0,"z":0.0}}"#
        )
        .is_err());

        let p: NetworkPlayer = serde_json::from_str(
            r#"{"id":"3","position":{"x":0.0,"y":0.0,"z":0.0},"color":{"r":1.0,"g":1.0,"b":1.0}}"#,
        )
        .unwrap();
        assert_eq!(p.position, Vec3::ZERO);
        assert_eq!(p.color, Color::WHITE);
    }

    #[test]
    fn apply_keeps_identity() {
        let mut a = NetworkPlayer::new("a".into(), Vec3::ZERO, Color::WHITE);
        let b = NetworkPlayer::new("b".into(), Vec3::new(1.0, 2.0, 3.0), Color::new(0.1, 0.2, 0.3));
        a.apply(&b);
        assert_eq!(a.id, PlayerId::new("a"));
        assert_eq!(a.position, b.position);
        assert_eq!(a.color, b.color);
    }
}
