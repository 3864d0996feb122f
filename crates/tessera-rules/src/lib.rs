//! A tile-drafting rule engine for Tessera.
//!
//! Seats take turns drafting every tile of one colour from a factory or the
//! centre, place what they drafted on their pattern lines, and end the turn.
//! When the factories and the centre are empty the round ends: full pattern
//! lines move to the wall and score, and the floor line costs points. The
//! game ends after the round in which some seat completes a wall row.
//!
//! [`AzulRules`] implements [`tessera_game::RuleEngine`]; all game data
//! lives in [`AzulState`], which the session owns.

mod board;
mod engine;
mod state;

pub use board::{FLOOR_PENALTIES, FLOOR_SIZE, PatternLine, PlayerBoard, WALL_SIZE, wall_color};
pub use engine::AzulRules;
pub use state::{AzulState, TILES_PER_COLOR, TILES_PER_FACTORY};
