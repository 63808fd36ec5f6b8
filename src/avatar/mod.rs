//! Avatar allocation
//!
//! The session borrows one avatar per remote peer from an allocator and
//! hands it back when the peer leaves.

pub mod player;
pub mod pool;
pub mod roster;
pub mod spawner;

use crate::net::protocol::PlayerTransforms;
use player::NetworkedPlayer;
use pool::PlayerPool;
use spawner::PlayerSpawner;

/// Positionable representation of a remote participant
pub trait Avatar {
    /// Return head and hands to their rest pose
    fn reset_pose(&mut self);

    fn apply_transforms(&mut self, transforms: &PlayerTransforms);

    fn set_display_name(&mut self, _name: &str) {}
}

/// Supplies and reclaims avatars
pub trait AvatarAllocator {
    type Avatar: Avatar;

    /// `None` means no capacity left; the caller decides how fatal that is
    fn get_entity(&mut self, username: Option<&str>) -> Option<Self::Avatar>;

    /// Take an avatar back for reuse or disposal
    fn return_entity(&mut self, avatar: Self::Avatar);
}

/// Either allocation strategy, picked at startup
#[derive(Debug, Clone)]
pub enum AvatarSource {
    Pool(PlayerPool),
    Spawner(PlayerSpawner),
}

impl AvatarSource {
    /// Fixed pool when a size is given, unbounded spawner otherwise
    pub fn from_pool_size(pool_size: Option<usize>) -> Self {
        match pool_size {
            Some(size) => Self::Pool(PlayerPool::new(size)),
            None => Self::Spawner(PlayerSpawner::new()),
        }
    }
}

impl AvatarAllocator for AvatarSource {
    type Avatar = NetworkedPlayer;

    fn get_entity(&mut self, username: Option<&str>) -> Option<NetworkedPlayer> {
        match self {
            Self::Pool(pool) => pool.get_entity(username),
            Self::Spawner(spawner) => spawner.get_entity(username),
        }
    }

    fn return_entity(&mut self, avatar: NetworkedPlayer) {
        match self {
            Self::Pool(pool) => pool.return_entity(avatar),
            Self::Spawner(spawner) => spawner.return_entity(avatar),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_selection() {
        assert!(matches!(AvatarSource::from_pool_size(Some(4)), AvatarSource::Pool(_)));
        assert!(matches!(AvatarSource::from_pool_size(None), AvatarSource::Spawner(_)));
    }

    #[test]
    fn test_source_pool_exhausts() {
        let mut source = AvatarSource::from_pool_size(Some(1));
        assert!(source.get_entity(None).is_some());
        assert!(source.get_entity(None).is_none());
    }

    #[test]
    fn test_source_spawner_unbounded() {
        let mut source = AvatarSource::from_pool_size(None);
        for _ in 0..64 {
            assert!(source.get_entity(None).is_some());
        }
    }
}
