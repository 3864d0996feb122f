//! One seat's board: pattern lines, wall, floor line, and the tiles it is
//! holding this turn.

use serde::{Deserialize, Serialize};
use tessera_protocol::{Line, ScoreKind, TileColor};

pub const WALL_SIZE: usize = 5;

/// Slots on the floor line. Tiles beyond it go straight to the lid.
pub const FLOOR_SIZE: usize = 7;

/// Cost of each floor slot, left to right.
pub const FLOOR_PENALTIES: [i32; FLOOR_SIZE] = [-1, -1, -2, -2, -2, -3, -3];

const ROW_BONUS: i32 = 2;
const COLUMN_BONUS: i32 = 7;
const COLOR_BONUS: i32 = 10;

/// The colour that belongs at `(row, col)` of the wall. Each row is the
/// colour order shifted one step right from the row above.
pub fn wall_color(row: usize, col: usize) -> TileColor {
    TileColor::ALL[(col + WALL_SIZE - row % WALL_SIZE) % WALL_SIZE]
}

fn wall_column(row: usize, color: TileColor) -> usize {
    let index = TileColor::ALL
        .iter()
        .position(|c| *c == color)
        .unwrap_or_default();
    (index + row) % WALL_SIZE
}

/// A score change on one board, before it is attributed to a seat.
pub(crate) type Points = (ScoreKind, i32, String);

/// Pattern line `row` holds up to `row + 1` tiles of one colour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternLine {
    pub color: Option<TileColor>,
    pub count: u8,
}

impl PatternLine {
    fn is_full(&self, row: usize) -> bool {
        usize::from(self.count) > row
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerBoard {
    pub pattern_lines: [PatternLine; WALL_SIZE],
    pub wall: [[bool; WALL_SIZE]; WALL_SIZE],
    pub floor: Vec<TileColor>,
    /// The first-player marker, which takes up a floor slot.
    pub has_marker: bool,
    pub score: i32,
    /// Drafted this turn, not yet placed.
    pub hand: Vec<TileColor>,
    /// Already drafted this turn.
    pub selected: bool,
}

impl PlayerBoard {
    pub fn has_on_wall(&self, row: usize, color: TileColor) -> bool {
        row < WALL_SIZE && self.wall[row][wall_column(row, color)]
    }

    /// Occupied floor slots, marker included.
    pub fn floor_count(&self) -> usize {
        self.floor.len() + usize::from(self.has_marker)
    }

    pub fn floor_penalty(&self) -> i32 {
        FLOOR_PENALTIES.iter().take(self.floor_count()).sum()
    }

    pub fn has_complete_row(&self) -> bool {
        self.wall.iter().any(|row| row.iter().all(|t| *t))
    }

    /// Tiles on the board, hand included.
    pub fn tile_count(&self) -> usize {
        let lines: usize = self.pattern_lines.iter().map(|l| usize::from(l.count)).sum();
        let wall = self.wall.iter().flatten().filter(|t| **t).count();
        lines + wall + self.floor.len() + self.hand.len()
    }

    /// Whether the tiles of `color` in hand may go to `line`.
    pub fn can_place(&self, color: TileColor, line: Line) -> Result<(), String> {
        if !self.hand.contains(&color) {
            return Err(format!("no {color} tiles in hand"));
        }
        let Line::Pattern(row) = line else {
            return Ok(());
        };
        let row = usize::from(row);
        let Some(pattern) = self.pattern_lines.get(row) else {
            return Err(format!("there is no pattern line {row}"));
        };
        if self.has_on_wall(row, color) {
            return Err(format!("wall row {row} already has {color}"));
        }
        match pattern.color {
            Some(held) if held != color => Err(format!("pattern line {row} holds {held}")),
            _ if pattern.is_full(row) => Err(format!("pattern line {row} is full")),
            _ => Ok(()),
        }
    }

    /// Moves every tile of `color` from hand to `line`; what does not fit
    /// falls to the floor. Call [`can_place`](Self::can_place) first.
    pub(crate) fn place(&mut self, color: TileColor, line: Line, lid: &mut Vec<TileColor>) {
        let taken = self.hand.iter().filter(|c| **c == color).count();
        self.hand.retain(|c| *c != color);

        let mut overflow = taken;
        if let Line::Pattern(row) = line {
            let row = usize::from(row);
            if let Some(pattern) = self.pattern_lines.get_mut(row) {
                let space = (row + 1).saturating_sub(usize::from(pattern.count));
                let fits = taken.min(space);
                pattern.color = Some(color);
                pattern.count += fits as u8;
                overflow -= fits;
            }
        }
        self.drop_to_floor(std::iter::repeat_n(color, overflow), lid);
    }

    /// Puts tiles on the floor line; the ones that do not fit go to the lid.
    pub(crate) fn drop_to_floor(
        &mut self,
        tiles: impl IntoIterator<Item = TileColor>,
        lid: &mut Vec<TileColor>,
    ) {
        for tile in tiles {
            if self.floor_count() < FLOOR_SIZE {
                self.floor.push(tile);
            } else {
                lid.push(tile);
            }
        }
    }

    /// Round-end scoring: full pattern lines move to the wall and score for
    /// their neighbours, then the floor costs points. The score never drops
    /// below zero. Leftover tiles go to the lid.
    pub(crate) fn score_round(&mut self, lid: &mut Vec<TileColor>) -> Vec<Points> {
        let mut points = Vec::new();
        for row in 0..WALL_SIZE {
            let pattern = self.pattern_lines[row];
            let Some(color) = pattern.color.filter(|_| pattern.is_full(row)) else {
                continue;
            };
            let col = wall_column(row, color);
            self.wall[row][col] = true;
            lid.extend(std::iter::repeat_n(color, row));
            self.pattern_lines[row] = PatternLine::default();

            let gained = self.adjacency(row, col);
            self.score += gained;
            points.push((
                ScoreKind::TilePlacement,
                gained,
                format!("{color} tile on wall row {row}"),
            ));
        }

        let penalty = self.floor_penalty().max(-self.score);
        if penalty != 0 {
            self.score += penalty;
            points.push((
                ScoreKind::Penalty,
                penalty,
                format!("{} tiles on the floor", self.floor_count()),
            ));
        }
        lid.append(&mut self.floor);
        self.has_marker = false;
        points
    }

    /// End-of-game bonuses for complete rows, columns and colours.
    pub(crate) fn score_bonuses(&mut self) -> Vec<Points> {
        let rows = (0..WALL_SIZE)
            .filter(|r| self.wall[*r].iter().all(|t| *t))
            .count() as i32;
        let columns = (0..WALL_SIZE)
            .filter(|c| self.wall.iter().all(|row| row[*c]))
            .count() as i32;
        let colors = TileColor::ALL
            .iter()
            .filter(|color| (0..WALL_SIZE).all(|r| self.has_on_wall(r, **color)))
            .count() as i32;

        let mut points = Vec::new();
        for (kind, count, each, what) in [
            (ScoreKind::RowCompletion, rows, ROW_BONUS, "rows"),
            (ScoreKind::ColumnCompletion, columns, COLUMN_BONUS, "columns"),
            (ScoreKind::ColorSetCompletion, colors, COLOR_BONUS, "colours"),
        ] {
            if count > 0 {
                self.score += count * each;
                points.push((kind, count * each, format!("{count} complete {what}")));
            }
        }
        points
    }

    /// Points for a tile just set at `(row, col)`: the length of its
    /// horizontal run plus the length of its vertical run, counting only runs
    /// longer than the tile itself; a lone tile scores one.
    fn adjacency(&self, row: usize, col: usize) -> i32 {
        let run = |dr: isize, dc: isize| {
            let mut n = 0;
            let (mut r, mut c) = (row as isize + dr, col as isize + dc);
            while (0..WALL_SIZE as isize).contains(&r)
                && (0..WALL_SIZE as isize).contains(&c)
                && self.wall[r as usize][c as usize]
            {
                n += 1;
                r += dr;
                c += dc;
            }
            n
        };
        let horizontal = 1 + run(0, -1) + run(0, 1);
        let vertical = 1 + run(-1, 0) + run(1, 0);
        match (horizontal > 1, vertical > 1) {
            (true, true) => horizontal + vertical,
            (true, false) => horizontal,
            (false, true) => vertical,
            (false, false) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_with_wall(tiles: &[(usize, usize)]) -> PlayerBoard {
        let mut board = PlayerBoard::default();
        for (r, c) in tiles {
            board.wall[*r][*c] = true;
        }
        board
    }

    #[test]
    fn test_wall_pattern_shifts_each_row() {
        assert_eq!(wall_color(0, 0), TileColor::Blue);
        assert_eq!(wall_color(1, 0), TileColor::White);
        assert_eq!(wall_color(1, 1), TileColor::Blue);
        assert_eq!(wall_color(4, 4), TileColor::Blue);
        for row in 0..WALL_SIZE {
            for color in TileColor::ALL {
                assert_eq!(wall_color(row, wall_column(row, color)), color);
            }
        }
    }

    #[test]
    fn test_adjacency_scoring() {
        assert_eq!(PlayerBoard::default().adjacency(2, 2), 1);

        // a horizontal run of three with the new tile at the end
        let board = board_with_wall(&[(0, 0), (0, 1), (0, 2)]);
        assert_eq!(board.adjacency(0, 2), 3);

        // crossing runs count both ways
        let board = board_with_wall(&[(1, 1), (1, 2), (0, 2), (2, 2)]);
        assert_eq!(board.adjacency(1, 2), 2 + 3);
    }

    #[test]
    fn test_place_overflows_to_floor_then_lid() {
        let mut board = PlayerBoard {
            hand: vec![TileColor::Red; 10],
            ..PlayerBoard::default()
        };
        let mut lid = Vec::new();
        board.can_place(TileColor::Red, Line::Pattern(1)).unwrap();
        board.place(TileColor::Red, Line::Pattern(1), &mut lid);

        assert_eq!(board.pattern_lines[1].count, 2);
        assert_eq!(board.floor.len(), FLOOR_SIZE);
        assert_eq!(lid.len(), 1);
        assert!(board.hand.is_empty());
        assert_eq!(board.floor_penalty(), -14);
    }

    #[test]
    fn test_can_place_refusals() {
        let mut board = PlayerBoard {
            hand: vec![TileColor::Blue],
            ..PlayerBoard::default()
        };
        assert!(board.can_place(TileColor::Red, Line::Floor).is_err());
        assert!(board.can_place(TileColor::Blue, Line::Pattern(5)).is_err());

        board.wall[0][0] = true;
        let err = board.can_place(TileColor::Blue, Line::Pattern(0)).unwrap_err();
        assert!(err.contains("already has blue"), "{err}");

        board.pattern_lines[2] = PatternLine {
            color: Some(TileColor::Red),
            count: 1,
        };
        assert!(board.can_place(TileColor::Blue, Line::Pattern(2)).is_err());
        board.pattern_lines[3] = PatternLine {
            color: Some(TileColor::Blue),
            count: 4,
        };
        assert!(board.can_place(TileColor::Blue, Line::Pattern(3)).is_err());
        assert!(board.can_place(TileColor::Blue, Line::Floor).is_ok());
    }

    #[test]
    fn test_score_round_tiles_full_lines_and_clamps_at_zero() {
        let mut board = PlayerBoard {
            floor: vec![TileColor::Red; 4],
            has_marker: true,
            ..PlayerBoard::default()
        };
        board.pattern_lines[0] = PatternLine {
            color: Some(TileColor::Yellow),
            count: 1,
        };
        board.pattern_lines[2] = PatternLine {
            color: Some(TileColor::Red),
            count: 2,
        };
        let mut lid = Vec::new();
        let points = board.score_round(&mut lid);

        assert!(board.wall[0][1]);
        // the unfinished line stays for next round
        assert_eq!(board.pattern_lines[2].count, 2);
        // 1 for the tile, then -8 clamped to -1
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].0, ScoreKind::Penalty);
        assert_eq!(points[1].1, -1);
        assert_eq!(board.score, 0);
        assert!(board.floor.is_empty());
        assert!(!board.has_marker);
        assert_eq!(lid.len(), 4);
    }

    #[test]
    fn test_bonuses() {
        let mut board = PlayerBoard::default();
        for c in 0..WALL_SIZE {
            board.wall[0][c] = true;
        }
        for r in 0..WALL_SIZE {
            board.wall[r][0] = true;
            board.wall[r][wall_column(r, TileColor::Blue)] = true;
        }
        let points = board.score_bonuses();
        let total: i32 = points.iter().map(|p| p.1).sum();
        assert_eq!(total, ROW_BONUS + COLUMN_BONUS + COLOR_BONUS);
        assert!(board.has_complete_row());
    }
}
