//! Connection registry.
//!
//! Maps live transport connections to the player identities the server hands
//! out. Identities are generated here (a process-wide counter rendered as a
//! decimal string) and are never reused, so a late message from a dropped
//! connection can never be mistaken for a newer player.

use cubesync_shared::{player::PlayerId, transport::ConnectionHandle};

#[derive(Debug, Clone)]
struct Entry {
    handle: ConnectionHandle,
    id: PlayerId,
}

/// Live connections and their identities.
#[derive(Debug)]
pub struct ConnectionRegistry {
    entries: Vec<Entry>,
    next_id: u64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    /// Registers `handle` and returns its new identity. Accepting a handle
    /// that is already live returns the identity it already has.
    pub fn accept(&mut self, handle: ConnectionHandle) -> PlayerId {
        if let Some(id) = self.identity_of(handle) {
            return id.clone();
        }
        let id = PlayerId::new(self.next_id.to_string());
        self.next_id += 1;
        self.entries.push(Entry {
            handle,
            id: id.clone(),
        });
        id
    }

    /// Drops `handle` from the live set. Returns its identity the first time,
    /// `None` afterwards. Does not preserve order.
    pub fn remove(&mut self, handle: ConnectionHandle) -> Option<PlayerId> {
        let idx = self.entries.iter().position(|e| e.handle == handle)?;
        Some(self.entries.swap_remove(idx).id)
    }

    /// Drops every connection for which `is_live` is false and returns them.
    pub fn prune(
        &mut self,
        mut is_live: impl FnMut(ConnectionHandle) -> bool,
    ) -> Vec<(ConnectionHandle, PlayerId)> {
        let mut pruned = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            if is_live(self.entries[i].handle) {
                i += 1;
            } else {
                let entry = self.entries.swap_remove(i);
                pruned.push((entry.handle, entry.id));
            }
        }
        pruned
    }

    /// Empties the live set. The identity counter keeps counting.
    pub fn drain(&mut self) -> Vec<(ConnectionHandle, PlayerId)> {
        self.entries.drain(..).map(|e| (e.handle, e.id)).collect()
    }

    pub fn live_connections(&self) -> impl Iterator<Item = ConnectionHandle> + '_ {
        self.entries.iter().map(|e| e.handle)
    }

    pub fn identity_of(&self, handle: ConnectionHandle) -> Option<&PlayerId> {
        self.entries
            .iter()
            .find(|e| e.handle == handle)
            .map(|e| &e.id)
    }

    pub fn handle_of(&self, id: &PlayerId) -> Option<ConnectionHandle> {
        self.entries.iter().find(|e| &e.id == id).map(|e| e.handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
