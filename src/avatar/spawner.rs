use crate::avatar::player::NetworkedPlayer;
use crate::avatar::AvatarAllocator;

/// Creates a fresh player for every join, never runs out
#[derive(Debug, Clone, Default)]
pub struct PlayerSpawner {
    spawned: usize,
    retired: usize,
}

impl PlayerSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total players ever created
    pub fn spawned(&self) -> usize {
        self.spawned
    }

    /// Players handed back and disposed
    pub fn retired(&self) -> usize {
        self.retired
    }
}

impl AvatarAllocator for PlayerSpawner {
    type Avatar = NetworkedPlayer;

    fn get_entity(&mut self, username: Option<&str>) -> Option<NetworkedPlayer> {
        let name = match username {
            Some(name) => name.to_string(),
            None => format!("Player {}", self.spawned),
        };
        self.spawned += 1;

        let mut player = NetworkedPlayer::new(name);
        player.activate();
        Some(player)
    }

    fn return_entity(&mut self, mut player: NetworkedPlayer) {
        player.deactivate();
        self.retired += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawner_default_names() {
        let mut spawner = PlayerSpawner::new();

        assert_eq!(spawner.get_entity(None).unwrap().name, "Player 0");
        assert_eq!(spawner.get_entity(Some("Alice")).unwrap().name, "Alice");
        assert_eq!(spawner.get_entity(None).unwrap().name, "Player 2");
        assert_eq!(spawner.spawned(), 3);
    }

    #[test]
    fn test_spawner_retires_returned_players() {
        let mut spawner = PlayerSpawner::new();
        let player = spawner.get_entity(None).unwrap();
        assert!(player.active);

        spawner.return_entity(player);
        assert_eq!(spawner.retired(), 1);
    }
}
