//! The game message family.

use serde::{Deserialize, Serialize};

use crate::{
    GameResult, Move, PlayerId, ScoreCheckpoint, ScoreEvent, ScoreVector,
    SessionId, SessionView,
};

/// A move as it was applied, attached to the state broadcast it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMove {
    pub player_id: PlayerId,
    #[serde(rename = "move")]
    pub mv: Move,
    /// `true` when the server issued the move on the seat's behalf.
    #[serde(default)]
    pub synthesized: bool,
}

/// In-session messages. `B` is the rule engine's board state.
///
/// Each variant names the seat it concerns. For client requests that field
/// is informational: the server always acts for the identity established at
/// handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameMessage<B> {
    /// Client → Server: submit a move for the current turn.
    Move {
        player_id: PlayerId,
        #[serde(rename = "move")]
        mv: Move,
    },

    /// Server → Client (submitter only): the move was refused. `version` is
    /// the unchanged session version.
    MoveRejected {
        player_id: PlayerId,
        reason: String,
        version: u64,
    },

    /// Server → Client: full state at a new version. Exactly one per
    /// version, in version order.
    Sync {
        state: SessionView<B>,
        #[serde(default)]
        last_move: Option<AppliedMove>,
    },

    /// Either direction: free-text chat.
    Chat { player_id: PlayerId, text: String },

    /// Server → Client: your seat in a session, with the token that
    /// reclaims it after a disconnect.
    ///
    /// Client → Server: reclaim that seat on a new connection.
    Join {
        player_id: PlayerId,
        session_id: SessionId,
        #[serde(default)]
        token: Option<String>,
    },

    /// Client → Server: leave the session for good. After `GAME_END` this
    /// doubles as the acknowledgment.
    Leave { player_id: PlayerId },

    /// Server → Client: a seat's turn began.
    TurnStart { player_id: PlayerId, time_left_ms: u64 },

    /// Server → Client: a seat's deadline is near.
    TurnWarning { player_id: PlayerId, time_left_ms: u64 },

    /// Server → Client: a reconnected seat got its turn back with a fresh
    /// deadline.
    TurnResumed { player_id: PlayerId, time_left_ms: u64 },

    /// Server → Client: a seat skipped too many turns and is out.
    PlayerRemoved { player_id: PlayerId, skips: u32 },

    /// Server → Client: one incremental score change.
    ScoreUpdate { player_id: PlayerId, event: ScoreEvent },

    /// Server → Client: periodic authoritative scores.
    ScoreSync { scores: ScoreVector },

    /// Client → Server: local scores drifted; send my history.
    ScoreReconciliationRequest { player_id: PlayerId },

    /// Server → Client (requester only): replace your history with this.
    ScoreReconciliationResponse {
        player_id: PlayerId,
        checkpoint: ScoreCheckpoint,
        events: Vec<ScoreEvent>,
    },

    /// Server → Client: a seat lost its connection; the seat is held.
    PlayerDisconnected { player_id: PlayerId, attempts_left: u32 },

    /// Server → Client: a held seat is back.
    PlayerReconnected { player_id: PlayerId },

    /// Server → Client: a seat is gone for good (left or failed).
    PlayerLeft { player_id: PlayerId },

    /// Server → Client: play is over; these are the final scores.
    GameEnd { scores: ScoreVector, truncated: bool },

    /// Server → Client: the ranked result. Follows `GAME_END`.
    GameResult { result: GameResult },

    /// Either direction: typed liveness check, answered with `PONG`.
    Ping { player_id: PlayerId },

    Pong { player_id: PlayerId },
}

impl<B> GameMessage<B> {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Move { .. } => "MOVE",
            Self::MoveRejected { .. } => "MOVE_REJECTED",
            Self::Sync { .. } => "SYNC",
            Self::Chat { .. } => "CHAT",
            Self::Join { .. } => "JOIN",
            Self::Leave { .. } => "LEAVE",
            Self::TurnStart { .. } => "TURN_START",
            Self::TurnWarning { .. } => "TURN_WARNING",
            Self::TurnResumed { .. } => "TURN_RESUMED",
            Self::PlayerRemoved { .. } => "PLAYER_REMOVED",
            Self::ScoreUpdate { .. } => "SCORE_UPDATE",
            Self::ScoreSync { .. } => "SCORE_SYNC",
            Self::ScoreReconciliationRequest { .. } => {
                "SCORE_RECONCILIATION_REQUEST"
            }
            Self::ScoreReconciliationResponse { .. } => {
                "SCORE_RECONCILIATION_RESPONSE"
            }
            Self::PlayerDisconnected { .. } => "PLAYER_DISCONNECTED",
            Self::PlayerReconnected { .. } => "PLAYER_RECONNECTED",
            Self::PlayerLeft { .. } => "PLAYER_LEFT",
            Self::GameEnd { .. } => "GAME_END",
            Self::GameResult { .. } => "GAME_RESULT",
            Self::Ping { .. } => "PING",
            Self::Pong { .. } => "PONG",
        }
    }
}
