//! Client-side mirror of the server's player list.
//!
//! The server is authoritative; the mirror only ever copies what it is told.
//! `reconcile` folds a full `ServerUpdate` list into the mirror:
//! - ids never seen before are created,
//! - known ids get their position and color overwritten,
//! - ids missing from the update are kept or dropped per `MirrorPolicy`.
//!
//! Reconciling the same list twice leaves the mirror as after the first time.

use cubesync_shared::{
    config::MirrorPolicy,
    player::{LookupError, NetworkPlayer, PlayerId},
};
use tracing::{debug, info};

/// What one `reconcile` call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<PlayerId>,
    pub updated: usize,
    pub pruned: Vec<PlayerId>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.pruned.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Mirror {
    players: Vec<NetworkPlayer>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reconcile(&mut self, incoming: &[NetworkPlayer], policy: MirrorPolicy) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for player in incoming {
            match self.get_mut(&player.id) {
                Some(existing) => {
                    existing.apply(player);
                    report.updated += 1;
                }
                None => {
                    info!(player_id = %player.id, "Player created");
                    self.players.push(player.clone());
                    report.created.push(player.id.clone());
                }
            }
        }

        if policy == MirrorPolicy::PruneAbsent {
            self.players.retain(|p| {
                let keep = incoming.iter().any(|q| q.id == p.id);
                if !keep {
                    report.pruned.push(p.id.clone());
                }
                keep
            });
            for id in &report.pruned {
                info!(player_id = %id, "Player pruned, absent from server update");
            }
        }

        debug!(
            created = report.created.len(),
            updated = report.updated,
            pruned = report.pruned.len(),
            "Mirror reconciled"
        );
        report
    }

    pub fn remove(&mut self, id: &PlayerId) -> Result<NetworkPlayer, LookupError> {
        match self.players.iter().position(|p| &p.id == id) {
            Some(idx) => Ok(self.players.remove(idx)),
            None => Err(LookupError::UnknownPlayer(id.clone())),
        }
    }

    pub fn get(&self, id: &PlayerId) -> Option<&NetworkPlayer> {
        self.players.iter().find(|p| &p.id == id)
    }

    pub fn get_mut(&mut self, id: &PlayerId) -> Option<&mut NetworkPlayer> {
        self.players.iter_mut().find(|p| &p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkPlayer> {
        self.players.iter()
    }

    pub fn as_slice(&self) -> &[NetworkPlayer] {
        &self.players
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
