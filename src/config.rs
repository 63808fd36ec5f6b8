use std::time::Duration;

use crate::net::protocol::PeerId;

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Rendezvous id: the identity a host registers and clients join
    pub server_id: PeerId,
    /// Seconds between outbound flushes
    pub send_interval_secs: f32,
    /// Place and accept voice calls
    pub voice_enabled: bool,
    /// Name announced to the host when joining
    pub display_name: String,
    /// Delay between consecutive voice calls to newly announced peers
    pub call_stagger: Duration,
    /// Fixed avatar pool size; `None` spawns avatars on demand
    pub avatar_pool_size: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_id: PeerId::from("peer-session-room"),
            send_interval_secs: 0.01,
            voice_enabled: true,
            display_name: "Player".to_string(),
            call_stagger: Duration::from_millis(500),
            avatar_pool_size: None,
        }
    }
}

impl SessionConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(server_id) = std::env::var("SERVER_ID") {
            if !server_id.trim().is_empty() {
                config.server_id = PeerId::new(server_id.trim());
            } else {
                tracing::warn!("SERVER_ID is empty, using default");
            }
        }

        if let Ok(interval) = std::env::var("SEND_INTERVAL_MS") {
            if let Ok(parsed) = interval.parse::<u32>() {
                if parsed > 0 && parsed <= 10_000 {
                    config.send_interval_secs = parsed as f32 / 1000.0;
                } else {
                    tracing::warn!("SEND_INTERVAL_MS must be 1-10000, using default");
                }
            } else {
                tracing::warn!("Invalid SEND_INTERVAL_MS '{}', using default", interval);
            }
        }

        if let Ok(voice) = std::env::var("VOICE_ENABLED") {
            match voice.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.voice_enabled = true,
                "0" | "false" | "no" | "off" => config.voice_enabled = false,
                _ => tracing::warn!("Invalid VOICE_ENABLED '{}', using default", voice),
            }
        }

        if let Ok(name) = std::env::var("DISPLAY_NAME") {
            config.display_name = name;
        }

        if let Ok(stagger) = std::env::var("CALL_STAGGER_MS") {
            if let Ok(parsed) = stagger.parse::<u64>() {
                config.call_stagger = Duration::from_millis(parsed);
            } else {
                tracing::warn!("Invalid CALL_STAGGER_MS '{}', using default", stagger);
            }
        }

        if let Ok(pool_size) = std::env::var("AVATAR_POOL_SIZE") {
            if let Ok(parsed) = pool_size.parse::<usize>() {
                config.avatar_pool_size = Some(parsed);
            } else {
                tracing::warn!("Invalid AVATAR_POOL_SIZE '{}', using spawner", pool_size);
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.server_id.is_empty() {
            return Err("server_id cannot be empty".to_string());
        }
        if !self.send_interval_secs.is_finite() || self.send_interval_secs <= 0.0 {
            return Err("send_interval_secs must be a positive number".to_string());
        }
        if self.avatar_pool_size == Some(0) {
            return Err("avatar_pool_size must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.send_interval_secs, 0.01);
        assert!(config.voice_enabled);
        assert_eq!(config.call_stagger, Duration::from_millis(500));
        assert!(config.avatar_pool_size.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default() {
        let config = SessionConfig::load_or_default();
        assert!(config.send_interval_secs > 0.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SessionConfig::default();
        config.server_id = PeerId::from("");
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.send_interval_secs = 0.0;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.avatar_pool_size = Some(0);
        assert!(config.validate().is_err());
    }
}
