//! Data carried by lobby and game messages.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{LobbyId, PlayerId, SessionId};

// ---------------------------------------------------------------------------
// Moves
// ---------------------------------------------------------------------------

/// The five tile colours.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TileColor {
    Blue,
    Yellow,
    Red,
    Black,
    White,
}

impl TileColor {
    pub const ALL: [TileColor; 5] = [
        TileColor::Blue,
        TileColor::Yellow,
        TileColor::Red,
        TileColor::Black,
        TileColor::White,
    ];
}

impl fmt::Display for TileColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Blue => "blue",
            Self::Yellow => "yellow",
            Self::Red => "red",
            Self::Black => "black",
            Self::White => "white",
        };
        f.write_str(name)
    }
}

/// Where a `SelectTiles` move draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileSource {
    /// One of the factory displays, by index.
    Factory(usize),
    /// The shared centre area.
    Center,
}

/// Where a `PlaceTiles` move puts the tiles in hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Line {
    /// Pattern line 0..=4; line `i` holds `i + 1` tiles.
    Pattern(u8),
    /// The floor line; every tile there is a penalty.
    Floor,
}

/// A seat's action. Immutable once accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Move {
    SelectTiles { source: TileSource, color: TileColor },
    PlaceTiles { color: TileColor, line: Line },
    EndTurn,
}

impl Move {
    /// Short label for logs and score-event reasons.
    pub fn label(&self) -> &'static str {
        match self {
            Self::SelectTiles { .. } => "select tiles",
            Self::PlaceTiles { .. } => "place tiles",
            Self::EndTurn => "end turn",
        }
    }
}

// ---------------------------------------------------------------------------
// Lobby
// ---------------------------------------------------------------------------

/// Lifecycle of a lobby.
///
/// ```text
/// Waiting → Starting → InProgress → Finished
/// ```
///
/// A failed session creation sends `Starting` back to `Waiting`; that is the
/// only backwards edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LobbyStatus {
    Waiting,
    Starting,
    InProgress,
    Finished,
}

impl LobbyStatus {
    /// Returns `true` if seats may still join, leave, or toggle ready.
    pub fn is_joinable(&self) -> bool {
        matches!(self, Self::Waiting)
    }

    /// The next state in the forward order, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Waiting => Some(Self::Starting),
            Self::Starting => Some(Self::InProgress),
            Self::InProgress => Some(Self::Finished),
            Self::Finished => None,
        }
    }

    /// Returns `true` if transitioning to `target` is valid.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
            || (self == Self::Starting && target == Self::Waiting)
    }
}

/// One participant in a lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub player_id: PlayerId,
    pub name: String,
    pub ready: bool,
}

/// Full snapshot of a lobby, broadcast after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lobby {
    pub id: LobbyId,
    pub name: String,
    pub host: PlayerId,
    pub seats: Vec<Seat>,
    pub min_players: usize,
    pub max_players: usize,
    pub status: LobbyStatus,
    /// Set once the lobby has been promoted.
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

impl Lobby {
    pub fn seat(&self, player_id: &PlayerId) -> Option<&Seat> {
        self.seats.iter().find(|s| &s.player_id == player_id)
    }

    pub fn is_member(&self, player_id: &PlayerId) -> bool {
        self.seat(player_id).is_some()
    }

    pub fn is_full(&self) -> bool {
        self.seats.len() >= self.max_players
    }

    /// Every seat ready. The host's seat is always ready.
    pub fn all_ready(&self) -> bool {
        self.seats.iter().all(|s| s.ready)
    }

    /// Player ids in sorted order, the seat order of the resulting session.
    pub fn seat_order(&self) -> Vec<PlayerId> {
        let mut order: Vec<PlayerId> =
            self.seats.iter().map(|s| s.player_id.clone()).collect();
        order.sort();
        order
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Waiting,
    InProgress,
    RoundEnd,
    GameEnd,
}

/// Connection standing of a seat as seen by other players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Connected,
    Disconnected,
    Reconnected,
    /// Reconnection attempts exhausted.
    Failed,
    /// Left voluntarily.
    Left,
    /// Removed for skipping too many turns.
    Removed,
}

impl SeatStatus {
    /// Whether the seat still counts toward the minimum player count.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connected | Self::Disconnected | Self::Reconnected
        )
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Reconnected)
    }
}

/// Per-seat line of a [`SessionView`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatView {
    pub player_id: PlayerId,
    pub status: SeatStatus,
    pub skips: u32,
}

/// Authoritative score per seat, with its own revision counter.
///
/// `version` moves only when a score changes, so republishing an unchanged
/// vector yields an identical value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreVector {
    pub version: u64,
    pub scores: BTreeMap<PlayerId, i32>,
}

impl ScoreVector {
    pub fn score(&self, player_id: &PlayerId) -> i32 {
        self.scores.get(player_id).copied().unwrap_or(0)
    }
}

/// What produced a score change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreKind {
    TilePlacement,
    RowCompletion,
    ColumnCompletion,
    ColorSetCompletion,
    Penalty,
    Bonus,
    /// Correction so that history sums to the recomputed score.
    Adjustment,
}

/// One score-affecting event for one seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEvent {
    /// Session-wide, strictly increasing.
    pub seq: u64,
    pub player_id: PlayerId,
    pub delta: i32,
    /// Seat total after this event.
    pub total: i32,
    pub kind: ScoreKind,
    pub reason: String,
    /// Session version that produced the event.
    pub version: u64,
}

/// Settled total for a seat; history before it is no longer replayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreCheckpoint {
    /// Last event sequence folded into `total` (0 = none).
    pub seq: u64,
    pub total: i32,
}

/// One line of a final result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub player_id: PlayerId,
    pub score: i32,
    /// 1-based; equal scores share a rank.
    pub rank: u32,
}

/// Final outcome of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameResult {
    pub standings: Vec<Standing>,
    /// `true` if the session ended early for lack of players.
    pub truncated: bool,
    pub reason: String,
}

impl GameResult {
    /// Ranks `scores` descending; ties keep `seat_order` and share a rank.
    pub fn rank(
        scores: &ScoreVector,
        seat_order: &[PlayerId],
        truncated: bool,
        reason: impl Into<String>,
    ) -> Self {
        let mut lines: Vec<(PlayerId, i32)> = seat_order
            .iter()
            .map(|p| (p.clone(), scores.score(p)))
            .collect();
        // stable: equal scores stay in seat order
        lines.sort_by(|a, b| b.1.cmp(&a.1));

        let mut standings = Vec::with_capacity(lines.len());
        let mut rank = 0;
        let mut previous = None;
        for (i, (player_id, score)) in lines.into_iter().enumerate() {
            if previous != Some(score) {
                rank = i as u32 + 1;
                previous = Some(score);
            }
            standings.push(Standing {
                player_id,
                score,
                rank,
            });
        }

        Self {
            standings,
            truncated,
            reason: reason.into(),
        }
    }

    pub fn winners(&self) -> impl Iterator<Item = &PlayerId> {
        self.standings
            .iter()
            .filter(|s| s.rank == 1)
            .map(|s| &s.player_id)
    }
}

/// Everything a client needs to render a session at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView<B> {
    pub session_id: SessionId,
    #[serde(default)]
    pub lobby_id: Option<LobbyId>,
    pub version: u64,
    pub phase: Phase,
    /// In seat order.
    pub seats: Vec<SeatView>,
    pub current_turn: Option<PlayerId>,
    pub round: u32,
    pub scores: ScoreVector,
    pub board: B,
}

impl<B> SessionView<B> {
    pub fn seat_order(&self) -> Vec<PlayerId> {
        self.seats.iter().map(|s| s.player_id.clone()).collect()
    }

    pub fn seat(&self, player_id: &PlayerId) -> Option<&SeatView> {
        self.seats.iter().find(|s| &s.player_id == player_id)
    }
}
