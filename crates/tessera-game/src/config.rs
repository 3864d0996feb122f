//! Session configuration.

use std::time::Duration;

use tessera_recovery::RecoveryConfig;

// ---------------------------------------------------------------------------
// TurnConfig
// ---------------------------------------------------------------------------

/// Turn deadlines.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Full length of a turn.
    pub timeout: Duration,

    /// `TURN_WARNING` goes out this long before the deadline.
    pub warning: Duration,

    /// When the active seat disconnects, its deadline is pulled in to at
    /// most this far away.
    pub disconnect_grace: Duration,

    /// Timed-out turns before a seat is removed.
    pub max_skips: u32,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            warning: Duration::from_secs(10),
            disconnect_grace: Duration::from_secs(30),
            max_skips: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// ScoreConfig
// ---------------------------------------------------------------------------

/// Score publication and history.
#[derive(Debug, Clone)]
pub struct ScoreConfig {
    /// How often the authoritative `SCORE_SYNC` goes out. Zero disables it.
    pub sync_interval: Duration,

    /// Events kept per seat since its last checkpoint. Older events are
    /// folded into the checkpoint.
    pub history_limit: usize,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(5),
            history_limit: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Everything a session needs besides its rules.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Below this many active seats the session ends early.
    pub min_players: usize,

    pub turn: TurnConfig,

    pub recovery: RecoveryConfig,

    pub scores: ScoreConfig,

    /// Auto-save period. Zero disables periodic saves; triggered saves
    /// still happen.
    pub autosave_interval: Duration,

    /// How long a finished session waits for every seat to acknowledge
    /// before it is torn down anyway.
    pub end_linger: Duration,

    /// Bound of the session actor's command channel.
    pub channel_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_players: 2,
            turn: TurnConfig::default(),
            recovery: RecoveryConfig::default(),
            scores: ScoreConfig::default(),
            autosave_interval: Duration::from_secs(30),
            end_linger: Duration::from_secs(60),
            channel_size: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.min_players, 2);
        assert_eq!(config.turn.timeout, Duration::from_secs(60));
        assert_eq!(config.turn.warning, Duration::from_secs(10));
        assert_eq!(config.turn.max_skips, 2);
        assert_eq!(config.scores.sync_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_default_grace_fits_inside_turn_and_recovery_window() {
        let config = SessionConfig::default();
        assert!(config.turn.disconnect_grace < config.turn.timeout);
        assert!(config.recovery.window() >= config.turn.disconnect_grace);
    }
}
