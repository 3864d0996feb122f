//! Error types for the recovery layer.

use tessera_protocol::PlayerId;

/// Errors from identity resolution and seat recovery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecoveryError {
    /// The [`Authenticator`](crate::Authenticator) refused the handshake.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The player holds no seat in this session.
    #[error("no seat for player {0}")]
    NotFound(PlayerId),

    /// The token does not match the one issued for the seat.
    #[error("invalid reconnection token")]
    InvalidToken,

    /// Reconnection attempts for the seat ran out.
    #[error("seat {0} has failed; reconnection attempts exhausted")]
    Failed(PlayerId),

    /// The seat left or was removed and cannot be reclaimed.
    #[error("seat {0} is no longer part of the session")]
    Gone(PlayerId),

    /// The operation needs a live seat and this one has none.
    #[error("seat {0} is not connected")]
    NotConnected(PlayerId),
}
