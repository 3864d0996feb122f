//! Server configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Durations are written in milliseconds.
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0:5000"
//!
//! [turn]
//! timeout_ms = 60000
//! warning_ms = 10000
//!
//! [snapshots]
//! save_dir = "game_saves"
//! restore_on_start = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_game::{ScoreConfig, SessionConfig, TurnConfig};
use tessera_lobby::LobbyConfig;
use tessera_recovery::RecoveryConfig;
use tessera_snapshot::SnapshotConfig;
use tessera_transport::HeartbeatConfig;
use tracing::info;

/// Why a configuration could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The values parse but contradict each other.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the server reads from its configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub heartbeat: HeartbeatSettings,
    pub lobby: LobbySettings,
    pub turn: TurnSettings,
    pub recovery: RecoverySettings,
    pub scores: ScoreSettings,
    pub snapshots: SnapshotSettings,
    pub logging: LoggingConfig,
}

/// Network binding and connection setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_address: String,
    /// A connection must complete its handshake within this time.
    pub handshake_timeout_ms: u64,
    /// A finished session waits this long for every seat to acknowledge.
    pub end_linger_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5000".to_string(),
            handshake_timeout_ms: 5_000,
            end_linger_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub interval_ms: u64,
    pub missed_limit: u32,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            missed_limit: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbySettings {
    pub min_players: usize,
    pub max_players: usize,
    pub idle_timeout_ms: u64,
    /// How often idle lobbies are swept.
    pub sweep_interval_ms: u64,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            min_players: 2,
            max_players: 4,
            idle_timeout_ms: 30 * 60 * 1_000,
            sweep_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnSettings {
    pub timeout_ms: u64,
    pub warning_ms: u64,
    pub disconnect_grace_ms: u64,
    pub max_skips: u32,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            warning_ms: 10_000,
            disconnect_grace_ms: 30_000,
            max_skips: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreSettings {
    pub sync_interval_ms: u64,
    /// Drift a client accepts before it asks for reconciliation.
    pub tolerance: i32,
    pub history_limit: usize,
}

impl Default for ScoreSettings {
    fn default() -> Self {
        Self {
            sync_interval_ms: 5_000,
            tolerance: 5,
            history_limit: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    /// Without snapshots sessions live in memory only.
    pub enabled: bool,
    pub save_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub retain: usize,
    pub autosave_interval_ms: u64,
    /// Bring back unfinished sessions from `save_dir` at startup.
    pub restore_on_start: bool,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            save_dir: PathBuf::from("game_saves"),
            temp_dir: PathBuf::from("temp_saves"),
            retain: 5,
            autosave_interval_ms: 30_000,
            restore_on_start: false,
        }
    }
}

/// Log output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set, e.g. `info` or
    /// `tessera=debug,info`.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl ServerConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    /// [`ConfigError::Parse`] on malformed TOML or mistyped fields.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Reads and parses `path`. A missing file yields the defaults.
    ///
    /// # Errors
    /// [`ConfigError::Read`] if the file exists but cannot be read,
    /// [`ConfigError::Parse`] if it is not valid.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no configuration file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Rejects settings that contradict each other.
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.server.bind_address.trim().is_empty() {
            return invalid("server.bind_address is empty".into());
        }
        if self.heartbeat.interval_ms == 0 {
            return invalid("heartbeat.interval_ms must be positive".into());
        }

        let lobby = &self.lobby;
        if !(2..=4).contains(&lobby.min_players) || !(2..=4).contains(&lobby.max_players) {
            return invalid(format!(
                "lobby players must be within 2..=4, got {}..={}",
                lobby.min_players, lobby.max_players
            ));
        }
        if lobby.min_players > lobby.max_players {
            return invalid(format!(
                "lobby.min_players ({}) exceeds lobby.max_players ({})",
                lobby.min_players, lobby.max_players
            ));
        }

        let turn = &self.turn;
        if turn.timeout_ms == 0 {
            return invalid("turn.timeout_ms must be positive".into());
        }
        if turn.warning_ms >= turn.timeout_ms {
            return invalid(format!(
                "turn.warning_ms ({}) must be shorter than turn.timeout_ms ({})",
                turn.warning_ms, turn.timeout_ms
            ));
        }
        if turn.disconnect_grace_ms >= turn.timeout_ms {
            return invalid(format!(
                "turn.disconnect_grace_ms ({}) must be shorter than turn.timeout_ms ({})",
                turn.disconnect_grace_ms, turn.timeout_ms
            ));
        }

        let window = self.recovery().window();
        if window < self.turn().disconnect_grace {
            return invalid(format!(
                "recovery window ({}ms) is shorter than turn.disconnect_grace_ms ({})",
                window.as_millis(),
                turn.disconnect_grace_ms
            ));
        }

        if self.snapshots.retain == 0 {
            return invalid("snapshots.retain must be at least 1".into());
        }
        Ok(())
    }

    pub fn heartbeat(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            interval: ms(self.heartbeat.interval_ms),
            missed_limit: self.heartbeat.missed_limit,
        }
    }

    pub fn lobby(&self) -> LobbyConfig {
        LobbyConfig {
            min_players: self.lobby.min_players,
            max_players: self.lobby.max_players,
            idle_timeout: ms(self.lobby.idle_timeout_ms),
        }
    }

    pub fn turn(&self) -> TurnConfig {
        TurnConfig {
            timeout: ms(self.turn.timeout_ms),
            warning: ms(self.turn.warning_ms),
            disconnect_grace: ms(self.turn.disconnect_grace_ms),
            max_skips: self.turn.max_skips,
        }
    }

    pub fn recovery(&self) -> RecoveryConfig {
        RecoveryConfig {
            max_attempts: self.recovery.max_attempts,
            backoff_base: ms(self.recovery.backoff_base_ms),
        }
    }

    /// Settings handed to every session.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            min_players: self.lobby.min_players,
            turn: self.turn(),
            recovery: self.recovery(),
            scores: ScoreConfig {
                sync_interval: ms(self.scores.sync_interval_ms),
                history_limit: self.scores.history_limit,
            },
            autosave_interval: ms(self.snapshots.autosave_interval_ms),
            end_linger: ms(self.server.end_linger_ms),
            ..SessionConfig::default()
        }
    }

    /// Store settings, or `None` when snapshots are off.
    pub fn snapshot_store(&self) -> Option<SnapshotConfig> {
        self.snapshots.enabled.then(|| SnapshotConfig {
            save_dir: self.snapshots.save_dir.clone(),
            temp_dir: self.snapshots.temp_dir.clone(),
            retain: self.snapshots.retain,
        })
    }

    pub fn handshake_timeout(&self) -> Duration {
        ms(self.server.handshake_timeout_ms)
    }

    pub fn lobby_sweep_interval(&self) -> Duration {
        ms(self.lobby.sweep_interval_ms)
    }
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:5000");
        assert_eq!(config.recovery().window(), Duration::from_secs(30));
        assert_eq!(config.turn().disconnect_grace, Duration::from_secs(30));
        assert_eq!(config.scores.tolerance, 5);
        assert_eq!(config.snapshots.retain, 5);
    }

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = ServerConfig::from_toml(
            r#"
            [turn]
            timeout_ms = 20000
            warning_ms = 5000
            disconnect_grace_ms = 10000

            [logging]
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(config.turn().timeout, Duration::from_secs(20));
        assert_eq!(config.turn.max_skips, 2);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_mistyped_field_is_a_parse_error() {
        let result = ServerConfig::from_toml("[turn]\ntimeout_ms = \"soon\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_grace_must_be_shorter_than_turn() {
        let mut config = ServerConfig::default();
        config.turn.disconnect_grace_ms = config.turn.timeout_ms;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_warning_must_be_shorter_than_turn() {
        let mut config = ServerConfig::default();
        config.turn.warning_ms = 90_000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_player_bounds() {
        let mut config = ServerConfig::default();
        config.lobby.min_players = 3;
        config.lobby.max_players = 2;
        assert!(config.validate().is_err());

        config.lobby.min_players = 1;
        config.lobby.max_players = 4;
        assert!(config.validate().is_err());

        config.lobby.min_players = 2;
        config.lobby.max_players = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_recovery_window_must_cover_grace() {
        let mut config = ServerConfig::default();
        config.recovery.max_attempts = 1;
        config.recovery.backoff_base_ms = 1_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("recovery window"));
    }

    #[test]
    fn test_zero_retain_rejected() {
        let mut config = ServerConfig::default();
        config.snapshots.retain = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_config_mirrors_sections() {
        let mut config = ServerConfig::default();
        config.lobby.min_players = 3;
        config.scores.sync_interval_ms = 0;
        let session = config.session();
        assert_eq!(session.min_players, 3);
        assert_eq!(session.scores.sync_interval, Duration::ZERO);
        assert_eq!(session.end_linger, Duration::from_secs(60));
    }

    #[test]
    fn test_disabled_snapshots_have_no_store() {
        let mut config = ServerConfig::default();
        assert!(config.snapshot_store().is_some());
        config.snapshots.enabled = false;
        assert!(config.snapshot_store().is_none());
    }

    #[tokio::test]
    async fn test_missing_file_loads_defaults() {
        let config = ServerConfig::load(Path::new("/definitely/not/here.toml"))
            .await
            .unwrap();
        assert_eq!(config, ServerConfig::default());
    }
}
