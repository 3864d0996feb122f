//! Error types for the session layer.

use tessera_protocol::{PlayerId, SessionId};
use tessera_recovery::RecoveryError;
use tessera_snapshot::SnapshotError;

/// Why a submitted move was refused. Never changes session state; the text
/// goes back to the submitter only, as `MOVE_REJECTED`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// The session is between rounds or over.
    #[error("the game is not in progress")]
    NotInProgress,

    /// The submitter holds no seat in this session.
    #[error("player {0} has no seat in this session")]
    UnknownSeat(PlayerId),

    #[error("it is not your turn")]
    NotYourTurn,

    /// The rules refused the move.
    #[error("illegal move: {0}")]
    Illegal(String),
}

/// Errors from session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The player already holds a seat in a live session.
    #[error("player {0} is already seated in session {1}")]
    AlreadySeated(PlayerId, SessionId),

    #[error("player {0} is not seated in any session")]
    NotSeated(PlayerId),

    #[error("a session needs at least {min} players, got {have}")]
    BelowMinPlayers { min: usize, have: usize },

    /// A seat could not be reclaimed.
    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// The session's command channel is closed: it has been torn down.
    #[error("session {0} is unavailable")]
    Unavailable(SessionId),
}
