use hashbrown::HashMap;

use crate::net::protocol::PeerId;

/// Avatars of every known remote peer, remembering join order
#[derive(Debug)]
pub struct ActivePlayers<V> {
    players: HashMap<PeerId, V>,
    order: Vec<PeerId>,
}

impl<V> ActivePlayers<V> {
    pub fn new() -> Self {
        Self {
            players: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Insert or replace; a replaced peer keeps its original position
    pub fn insert(&mut self, peer_id: PeerId, avatar: V) -> Option<V> {
        let previous = self.players.insert(peer_id.clone(), avatar);
        if previous.is_none() {
            self.order.push(peer_id);
        }
        previous
    }

    pub fn remove(&mut self, peer_id: &str) -> Option<V> {
        let removed = self.players.remove(peer_id)?;
        self.order.retain(|id| id.as_str() != peer_id);
        Some(removed)
    }

    pub fn get(&self, peer_id: &str) -> Option<&V> {
        self.players.get(peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &str) -> Option<&mut V> {
        self.players.get_mut(peer_id)
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.players.contains_key(peer_id)
    }

    /// Peer ids in join order
    pub fn ids(&self) -> &[PeerId] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &V)> {
        self.order
            .iter()
            .filter_map(|id| self.players.get(id).map(|avatar| (id, avatar)))
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

impl<V> Default for ActivePlayers<V> {
    fn default() -> Self {
        Self::new()
    }
}
