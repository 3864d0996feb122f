//! The `RuleEngine` trait, the seam between session coordination and the
//! rules of the game being played.
//!
//! The session layer never interprets a board. It asks the engine whether a
//! move is legal, has it apply the move, and reads scores back. Everything
//! else (turns, deadlines, seats, versions, persistence) is handled here.

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::{Serialize, de::DeserializeOwned};
use tessera_protocol::{Move, PlayerId, ScoreKind};

/// A score change reported by the engine while applying a move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreDelta {
    pub player_id: PlayerId,
    pub delta: i32,
    pub kind: ScoreKind,
    pub reason: String,
}

impl ScoreDelta {
    pub fn new(
        player_id: PlayerId,
        delta: i32,
        kind: ScoreKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            player_id,
            delta,
            kind,
            reason: reason.into(),
        }
    }
}

/// What applying a move did beyond changing the board.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// In the order they happened.
    pub scores: Vec<ScoreDelta>,
    /// The acting seat's turn is over.
    pub turn_over: bool,
    /// The round is over; the next one starts with [`RuleEngine::start_round`].
    pub round_over: bool,
    /// Play is over.
    pub game_over: bool,
}

impl Outcome {
    /// The turn goes on.
    pub fn continues() -> Self {
        Self::default()
    }

    /// The turn ended and nothing else happened.
    pub fn turn_ended() -> Self {
        Self {
            turn_over: true,
            ..Self::default()
        }
    }
}

/// The rules of a tile-drafting game.
///
/// Implementations are stateless apart from configuration: all game data
/// lives in [`State`](Self::State), which the session owns, versions, clones
/// and persists. Methods take `&self` so one engine is shared by every
/// session behind an `Arc`.
///
/// The session calls [`apply_move`](Self::apply_move) and
/// [`force_end_turn`](Self::force_end_turn) on a scratch copy of the state
/// and only keeps it if the call succeeds, so an engine may bail out halfway
/// through a move without cleaning up.
pub trait RuleEngine: Send + Sync + 'static {
    /// The full game state. Sent to clients inside every `SYNC` and written
    /// into every snapshot.
    type State: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Deals the first round for `seats`, given in turn order.
    fn init(&self, seats: &[PlayerId]) -> Self::State;

    /// Checks `mv` for `seat` without changing anything. Turn ownership is
    /// already checked by the caller.
    ///
    /// # Errors
    /// A human-readable reason, sent back to the submitter.
    fn is_legal(
        &self,
        state: &Self::State,
        seat: &PlayerId,
        mv: &Move,
    ) -> Result<(), String>;

    /// Applies a move that passed [`is_legal`](Self::is_legal).
    ///
    /// # Errors
    /// A reason if the move turns out not to apply after all.
    fn apply_move(
        &self,
        state: &mut Self::State,
        seat: &PlayerId,
        mv: &Move,
    ) -> Result<Outcome, String>;

    /// Ends `seat`'s turn on its behalf, whatever it is holding. Used when a
    /// turn times out or the seat leaves mid-turn. Always ends the turn.
    fn force_end_turn(&self, state: &mut Self::State, seat: &PlayerId) -> Outcome;

    /// Deals the next round after one reported `round_over`. Returns the seat
    /// that should open it, if the rules say so.
    fn start_round(&self, state: &mut Self::State) -> Option<PlayerId>;

    /// Every seat's score, recomputed from `state` alone.
    fn compute_score(&self, state: &Self::State) -> BTreeMap<PlayerId, i32>;
}
