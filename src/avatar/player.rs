use crate::avatar::Avatar;
use crate::net::protocol::PlayerTransforms;
use crate::util::dual_quat::DualQuat;

/// Renderable stand-in for a remote participant
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkedPlayer {
    pub name: String,
    /// Name the player had before anyone claimed it
    default_name: String,
    pub head: DualQuat,
    pub right_hand: DualQuat,
    pub left_hand: DualQuat,
    pub active: bool,
    /// Number of pose updates applied since the last reset
    pub updates: u64,
}

impl NetworkedPlayer {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            default_name: name.clone(),
            name,
            head: DualQuat::IDENTITY,
            right_hand: DualQuat::IDENTITY,
            left_hand: DualQuat::IDENTITY,
            active: false,
            updates: 0,
        }
    }

    /// Current pose as it would go back out on the wire
    pub fn transforms(&self) -> PlayerTransforms {
        PlayerTransforms {
            head: self.head,
            right_hand: self.right_hand,
            left_hand: self.left_hand,
        }
    }

    pub fn activate(&mut self) {
        self.active = true;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Drop any name a peer announced
    pub fn restore_default_name(&mut self) {
        self.name.clone_from(&self.default_name);
    }
}

impl Avatar for NetworkedPlayer {
    fn reset_pose(&mut self) {
        self.head = DualQuat::IDENTITY;
        self.right_hand = DualQuat::IDENTITY;
        self.left_hand = DualQuat::IDENTITY;
        self.updates = 0;
    }

    fn apply_transforms(&mut self, transforms: &PlayerTransforms) {
        self.head = transforms.head;
        self.right_hand = transforms.right_hand;
        self.left_hand = transforms.left_hand;
        self.updates += 1;
    }

    fn set_display_name(&mut self, name: &str) {
        self.name = name.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_new() {
        let player = NetworkedPlayer::new("Player 0");
        assert_eq!(player.name, "Player 0");
        assert!(!player.active);
        assert_eq!(player.transforms(), PlayerTransforms::default());
    }

    #[test]
    fn test_apply_and_reset() {
        let mut player = NetworkedPlayer::new("P");
        let transforms = PlayerTransforms {
            head: DualQuat::from_axis_angle_y(0.5, [0.0, 1.7, 0.0]),
            right_hand: DualQuat::from_axis_angle_y(0.1, [0.3, 1.1, 0.2]),
            left_hand: DualQuat::from_axis_angle_y(-0.1, [-0.3, 1.1, 0.2]),
        };

        player.apply_transforms(&transforms);
        assert_eq!(player.transforms(), transforms);
        assert_eq!(player.updates, 1);

        player.reset_pose();
        assert_eq!(player.transforms(), PlayerTransforms::default());
        assert_eq!(player.updates, 0);
    }

    #[test]
    fn test_display_name() {
        let mut player = NetworkedPlayer::new("Player 3");
        player.set_display_name("Alice");
        assert_eq!(player.name, "Alice");

        player.restore_default_name();
        assert_eq!(player.name, "Player 3");
    }
}
