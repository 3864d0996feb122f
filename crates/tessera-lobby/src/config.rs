//! Lobby configuration.

use std::time::Duration;

/// Seat limits and housekeeping for lobbies.
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// Seats needed before the host may start.
    pub min_players: usize,

    /// Seats available.
    pub max_players: usize,

    /// A waiting lobby with no mutation for this long is closed.
    pub idle_timeout: Duration,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            min_players: 2,
            max_players: 4,
            idle_timeout: Duration::from_secs(30 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lobby_config_default() {
        let config = LobbyConfig::default();
        assert_eq!(config.min_players, 2);
        assert_eq!(config.max_players, 4);
        assert_eq!(config.idle_timeout, Duration::from_secs(1800));
    }
}
