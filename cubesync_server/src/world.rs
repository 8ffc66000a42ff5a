//! Authoritative player list.
//!
//! The single source of truth for every connected player's state. Lookups are
//! linear scans; player counts are small and a `Vec` keeps broadcast order
//! stable (join order).

use cubesync_shared::{
    math::{Color, Vec3},
    player::{LookupError, NetworkPlayer, PlayerId},
};

#[derive(Debug, Default)]
pub struct PlayerList {
    players: Vec<NetworkPlayer>,
}

impl PlayerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a player at the origin. An existing entry with the same id is
    /// replaced, so ids stay unique.
    pub fn spawn(&mut self, id: PlayerId, color: Color) -> &NetworkPlayer {
        let player = NetworkPlayer::new(id, Vec3::ZERO, color);
        let idx = match self.position_of(&player.id) {
            Some(idx) => {
                self.players[idx] = player;
                idx
            }
            None => {
                self.players.push(player);
                self.players.len() - 1
            }
        };
        &self.players[idx]
    }

    /// Replaces the entry with `player.id` in place. Never creates one.
    pub fn update(&mut self, player: NetworkPlayer) -> Result<(), LookupError> {
        match self.position_of(&player.id) {
            Some(idx) => {
                self.players[idx] = player;
                Ok(())
            }
            None => Err(LookupError::UnknownPlayer(player.id)),
        }
    }

    pub fn remove(&mut self, id: &PlayerId) -> Result<NetworkPlayer, LookupError> {
        match self.position_of(id) {
            Some(idx) => Ok(self.players.remove(idx)),
            None => Err(LookupError::UnknownPlayer(id.clone())),
        }
    }

    pub fn get(&self, id: &PlayerId) -> Option<&NetworkPlayer> {
        self.players.iter().find(|p| &p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkPlayer> {
        self.players.iter()
    }

    pub fn as_slice(&self) -> &[NetworkPlayer] {
        &self.players
    }

    /// Owned copy of the whole list, for building a broadcast.
    pub fn snapshot(&self) -> Vec<NetworkPlayer> {
        self.players.clone()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    fn position_of(&self, id: &PlayerId) -> Option<usize> {
        self.players.iter().position(|p| &p.id == id)
    }
}
