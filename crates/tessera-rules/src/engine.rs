//! [`AzulRules`]: the [`RuleEngine`] implementation.

use std::collections::BTreeMap;

use tessera_game::{Outcome, RuleEngine, ScoreDelta};
use tessera_protocol::{Move, PlayerId, TileSource};
use tracing::debug;

use crate::board::Points;
use crate::{AzulState, PlayerBoard};

/// The tile-drafting rules.
///
/// A turn is one `SelectTiles`, then `PlaceTiles` until the hand is empty,
/// then `EndTurn`. The round ends with the turn that empties the last
/// source.
#[derive(Debug, Clone, Default)]
pub struct AzulRules {
    seed: Option<u64>,
}

impl AzulRules {
    /// Rules that shuffle from a random seed per session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules that deal every session from `seed`. For tests and replays.
    pub fn seeded(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }

    fn check(&self, state: &AzulState, seat: &PlayerId, mv: &Move) -> Result<(), String> {
        let board = state
            .board(seat)
            .ok_or_else(|| format!("{seat} has no board"))?;
        match *mv {
            Move::SelectTiles { source, color } => {
                if board.selected {
                    return Err("already selected tiles this turn".into());
                }
                let tiles = state
                    .source(source)
                    .ok_or_else(|| format!("no such source {source:?}"))?;
                if !tiles.contains(&color) {
                    return Err(format!("no {color} tiles there"));
                }
                Ok(())
            }
            Move::PlaceTiles { color, line } => board.can_place(color, line),
            Move::EndTurn => {
                if !board.selected {
                    return Err("select tiles before ending the turn".into());
                }
                if !board.hand.is_empty() {
                    return Err("place every tile in hand before ending the turn".into());
                }
                Ok(())
            }
        }
    }

    /// Ends `seat`'s turn, and the round with it once nothing is left to
    /// draft.
    fn finish_turn(&self, state: &mut AzulState, seat: &PlayerId) -> Outcome {
        if let Some(board) = state.boards.get_mut(seat) {
            board.selected = false;
        }
        if !state.is_drafted_out() {
            return Outcome::turn_ended();
        }

        let mut scores = Vec::new();
        let mut lid = std::mem::take(&mut state.lid);
        for (player_id, board) in &mut state.boards {
            let points = board.score_round(&mut lid);
            scores.extend(attribute(player_id, points));
        }
        state.lid = lid;

        let game_over = state.boards.values().any(PlayerBoard::has_complete_row);
        if game_over {
            for (player_id, board) in &mut state.boards {
                let points = board.score_bonuses();
                scores.extend(attribute(player_id, points));
            }
        }
        debug!(round = state.round, game_over, "round scored");

        Outcome {
            scores,
            turn_over: true,
            round_over: true,
            game_over,
        }
    }
}

fn attribute(player_id: &PlayerId, points: Vec<Points>) -> impl Iterator<Item = ScoreDelta> + '_ {
    points
        .into_iter()
        .map(move |(kind, delta, reason)| ScoreDelta::new(player_id.clone(), delta, kind, reason))
}

impl RuleEngine for AzulRules {
    type State = AzulState;

    fn init(&self, seats: &[PlayerId]) -> AzulState {
        AzulState::new(self.seed.unwrap_or_else(rand::random), seats)
    }

    fn is_legal(&self, state: &AzulState, seat: &PlayerId, mv: &Move) -> Result<(), String> {
        self.check(state, seat, mv)
    }

    fn apply_move(&self, state: &mut AzulState, seat: &PlayerId, mv: &Move) -> Result<Outcome, String> {
        self.check(state, seat, mv)?;
        match *mv {
            Move::SelectTiles { source, color } => {
                let taken = state.take(source, color);
                let marker = source == TileSource::Center && state.marker_in_center;
                if marker {
                    state.marker_in_center = false;
                    state.next_first = Some(seat.clone());
                }
                if let Some(board) = state.boards.get_mut(seat) {
                    board.hand.extend(taken);
                    board.selected = true;
                    board.has_marker |= marker;
                }
                Ok(Outcome::continues())
            }
            Move::PlaceTiles { color, line } => {
                let mut lid = std::mem::take(&mut state.lid);
                if let Some(board) = state.boards.get_mut(seat) {
                    board.place(color, line, &mut lid);
                }
                state.lid = lid;
                Ok(Outcome::continues())
            }
            Move::EndTurn => Ok(self.finish_turn(state, seat)),
        }
    }

    fn force_end_turn(&self, state: &mut AzulState, seat: &PlayerId) -> Outcome {
        let mut lid = std::mem::take(&mut state.lid);
        if let Some(board) = state.boards.get_mut(seat) {
            let hand = std::mem::take(&mut board.hand);
            board.drop_to_floor(hand, &mut lid);
        }
        state.lid = lid;
        self.finish_turn(state, seat)
    }

    fn start_round(&self, state: &mut AzulState) -> Option<PlayerId> {
        state.round += 1;
        state.marker_in_center = true;
        state.fill_factories();
        state.next_first.take()
    }

    fn compute_score(&self, state: &AzulState) -> BTreeMap<PlayerId, i32> {
        state
            .boards
            .iter()
            .map(|(p, board)| (p.clone(), board.score))
            .collect()
    }
}
