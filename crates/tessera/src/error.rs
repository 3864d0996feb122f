//! Unified error type for Tessera.

use tessera_game::SessionError;
use tessera_lobby::LobbyError;
use tessera_protocol::ProtocolError;
use tessera_recovery::RecoveryError;
use tessera_snapshot::SnapshotError;
use tessera_transport::TransportError;

use crate::config::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TesseraError {
    /// Connect, send, receive or liveness failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encode, decode or an unexpected message.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Lobby(#[from] LobbyError),

    /// Identity or seat recovery.
    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// Snapshot I/O.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use tessera_protocol::LobbyId;

    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let tessera_err: TesseraError = err.into();
        assert!(matches!(tessera_err, TesseraError::Transport(_)));
        assert!(tessera_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let tessera_err: TesseraError = err.into();
        assert!(matches!(tessera_err, TesseraError::Protocol(_)));
    }

    #[test]
    fn test_from_lobby_error() {
        let err = LobbyError::LobbyFull(LobbyId(3));
        let tessera_err: TesseraError = err.into();
        assert!(matches!(tessera_err, TesseraError::Lobby(_)));
        assert_eq!(tessera_err.to_string(), "lobby L-3 is full");
    }

    #[test]
    fn test_from_config_error() {
        let err = ConfigError::Invalid("retain must be at least 1".into());
        let tessera_err: TesseraError = err.into();
        assert!(matches!(tessera_err, TesseraError::Config(_)));
    }
}
