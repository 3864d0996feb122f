//! The shared table: bag, lid, factories, centre and every seat's board.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tessera_protocol::{PlayerId, TileColor, TileSource};

use crate::PlayerBoard;

pub const TILES_PER_COLOR: usize = 20;
pub const TILES_PER_FACTORY: usize = 4;

/// Complete game data of one session.
///
/// Every shuffle is seeded from `seed` and a shuffle counter, so a restored
/// state deals exactly what the saved one would have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzulState {
    seed: u64,
    shuffles: u64,
    pub round: u32,
    pub bag: Vec<TileColor>,
    /// Discarded tiles, shuffled back into the bag when it runs dry.
    pub lid: Vec<TileColor>,
    pub factories: Vec<Vec<TileColor>>,
    pub center: Vec<TileColor>,
    /// The first-player marker is still in the centre.
    pub marker_in_center: bool,
    /// Took the marker this round; opens the next one.
    pub next_first: Option<PlayerId>,
    pub boards: BTreeMap<PlayerId, PlayerBoard>,
}

impl AzulState {
    /// A fresh table for `seats`: `2n + 1` factories, dealt from a full bag.
    pub fn new(seed: u64, seats: &[PlayerId]) -> Self {
        let mut state = Self {
            seed,
            shuffles: 0,
            round: 1,
            bag: TileColor::ALL
                .iter()
                .flat_map(|c| std::iter::repeat_n(*c, TILES_PER_COLOR))
                .collect(),
            lid: Vec::new(),
            factories: vec![Vec::new(); seats.len() * 2 + 1],
            center: Vec::new(),
            marker_in_center: true,
            next_first: None,
            boards: seats
                .iter()
                .map(|p| (p.clone(), PlayerBoard::default()))
                .collect(),
        };
        state.shuffle_bag();
        state.fill_factories();
        state
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn board(&self, player_id: &PlayerId) -> Option<&PlayerBoard> {
        self.boards.get(player_id)
    }

    /// The tiles at `source`, if it exists.
    pub fn source(&self, source: TileSource) -> Option<&[TileColor]> {
        match source {
            TileSource::Factory(i) => self.factories.get(i).map(Vec::as_slice),
            TileSource::Center => Some(&self.center),
        }
    }

    /// Nothing left to draft this round.
    pub fn is_drafted_out(&self) -> bool {
        self.center.is_empty() && self.factories.iter().all(Vec::is_empty)
    }

    /// Every tile in the game, wherever it is. Always the full set.
    pub fn tile_count(&self) -> usize {
        let boards: usize = self.boards.values().map(PlayerBoard::tile_count).sum();
        let factories: usize = self.factories.iter().map(Vec::len).sum();
        self.bag.len() + self.lid.len() + self.center.len() + factories + boards
    }

    /// Takes every tile of `color` from `source`. A factory's remaining
    /// tiles move to the centre.
    pub(crate) fn take(&mut self, source: TileSource, color: TileColor) -> Vec<TileColor> {
        let tiles = match source {
            TileSource::Factory(i) => match self.factories.get_mut(i) {
                Some(factory) => std::mem::take(factory),
                None => return Vec::new(),
            },
            TileSource::Center => std::mem::take(&mut self.center),
        };
        let (taken, rest): (Vec<_>, Vec<_>) = tiles.into_iter().partition(|c| *c == color);
        self.center.extend(rest);
        taken
    }

    /// Deals up to four tiles to every factory. Refills the bag from the lid
    /// when it runs dry; if both are empty some factories stay short.
    pub(crate) fn fill_factories(&mut self) {
        for i in 0..self.factories.len() {
            while self.factories[i].len() < TILES_PER_FACTORY {
                match self.draw() {
                    Some(tile) => self.factories[i].push(tile),
                    None => return,
                }
            }
        }
    }

    fn draw(&mut self) -> Option<TileColor> {
        if self.bag.is_empty() && !self.lid.is_empty() {
            self.bag.append(&mut self.lid);
            self.shuffle_bag();
        }
        self.bag.pop()
    }

    fn shuffle_bag(&mut self) {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.shuffles));
        self.shuffles += 1;
        self.bag.shuffle(&mut rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seats(n: usize) -> Vec<PlayerId> {
        (0..n).map(|i| PlayerId::from(format!("p{i}").as_str())).collect()
    }

    #[test]
    fn test_new_table_deals_two_n_plus_one_factories() {
        for n in 2..=4 {
            let state = AzulState::new(7, &seats(n));
            assert_eq!(state.factories.len(), 2 * n + 1);
            assert!(state.factories.iter().all(|f| f.len() == TILES_PER_FACTORY));
            assert_eq!(state.tile_count(), TILES_PER_COLOR * 5);
            assert!(state.marker_in_center);
        }
    }

    #[test]
    fn test_same_seed_same_deal() {
        let a = AzulState::new(42, &seats(2));
        let b = AzulState::new(42, &seats(2));
        assert_eq!(a.factories, b.factories);
        let c = AzulState::new(43, &seats(2));
        assert_ne!(a.bag, c.bag);
    }

    #[test]
    fn test_take_from_factory_moves_rest_to_center() {
        let mut state = AzulState::new(1, &seats(2));
        state.factories[0] = vec![TileColor::Red, TileColor::Blue, TileColor::Red, TileColor::White];
        let taken = state.take(TileSource::Factory(0), TileColor::Red);
        assert_eq!(taken, [TileColor::Red, TileColor::Red]);
        assert!(state.factories[0].is_empty());
        assert_eq!(state.center, [TileColor::Blue, TileColor::White]);
    }

    #[test]
    fn test_lid_refills_the_bag() {
        let mut state = AzulState::new(3, &seats(2));
        state.lid.append(&mut state.bag);
        for factory in &mut state.factories {
            factory.clear();
        }
        state.lid.truncate(10);
        state.fill_factories();

        let dealt: usize = state.factories.iter().map(Vec::len).sum();
        assert_eq!(dealt, 10);
        assert!(state.lid.is_empty());
        assert!(state.bag.is_empty());
    }
}
