use std::collections::VecDeque;
use tracing::error;

use crate::avatar::player::NetworkedPlayer;
use crate::avatar::{Avatar, AvatarAllocator};

/// Fixed set of pre-created players handed out in order
#[derive(Debug, Clone, Default)]
pub struct PlayerPool {
    inactive: VecDeque<NetworkedPlayer>,
    capacity: usize,
}

impl PlayerPool {
    /// Pool of `capacity` players named `Player 0..capacity`
    pub fn new(capacity: usize) -> Self {
        Self::from_players((0..capacity).map(|i| NetworkedPlayer::new(format!("Player {}", i))))
    }

    pub fn from_players(players: impl IntoIterator<Item = NetworkedPlayer>) -> Self {
        let inactive: VecDeque<NetworkedPlayer> = players.into_iter().collect();
        let capacity = inactive.len();
        Self { inactive, capacity }
    }

    /// Players still available
    pub fn available(&self) -> usize {
        self.inactive.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl AvatarAllocator for PlayerPool {
    type Avatar = NetworkedPlayer;

    fn get_entity(&mut self, username: Option<&str>) -> Option<NetworkedPlayer> {
        let Some(mut player) = self.inactive.pop_front() else {
            error!("Player pool exhausted ({} players in use)", self.capacity);
            return None;
        };

        if let Some(name) = username {
            player.set_display_name(name);
        }
        player.activate();
        Some(player)
    }

    fn return_entity(&mut self, mut player: NetworkedPlayer) {
        player.deactivate();
        player.restore_default_name();
        self.inactive.push_back(player);
    }
}
