// 15-puzzle board representation
//
// A board is a 4x4 tile grid stored as a flat array of 16 values, 0 being
// the blank. Alongside the tiles the board carries its diagonal mirror
// reflection, which the solvers use for symmetry reduction and for the
// mirrored pattern-database orientation.

use std::convert::TryInto;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Number of cells on the board.
pub const SIZE: usize = 16;
/// Cells per row (and column).
pub const ROW_SIZE: usize = 4;
/// Number of move directions.
pub const DIR_SIZE: usize = 4;
/// Upper bound of optimal solution length for any solvable 4x4 board.
pub const MAX_MOVE: usize = 80;

/// Diagonal transpose of cell positions: position `i` maps to `(i % 4) * 4 + i / 4`.
pub const MIRROR_POS: [u8; SIZE] = [0, 4, 8, 12, 1, 5, 9, 13, 2, 6, 10, 14, 3, 7, 11, 15];

/// Diagonal transpose of tile values: the tile whose goal cell is the
/// transpose of tile `v`'s goal cell.
pub const MIRROR_VAL: [u8; SIZE] = [0, 1, 5, 9, 13, 2, 6, 10, 14, 3, 7, 11, 15, 4, 8, 12];

const GOAL_TILES: [u8; SIZE] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 0];

// Manhattan distance bands for random board generation.
const MIN_RANGE_EASY: u32 = 5;
const MIN_RANGE_MODERATE: u32 = 21;
const MIN_RANGE_HARD: u32 = 46;

/// Preset hard boards with the blank at the upper left corner, used to seed
/// hard random boards. All are at or near the 80-move diameter.
const HARD_ZERO_AT_0: [[u8; SIZE]; 12] = [
    [0, 12, 9, 13, 15, 11, 10, 14, 3, 7, 6, 2, 4, 8, 5, 1],
    [0, 12, 9, 13, 15, 11, 10, 14, 3, 7, 2, 5, 4, 8, 6, 1],
    [0, 12, 10, 13, 15, 11, 14, 9, 3, 7, 2, 5, 4, 8, 6, 1],
    [0, 12, 14, 13, 15, 11, 9, 10, 3, 7, 6, 2, 4, 8, 5, 1],
    [0, 12, 10, 13, 15, 11, 14, 9, 3, 7, 6, 2, 4, 8, 5, 1],
    [0, 12, 11, 13, 15, 14, 10, 9, 3, 7, 6, 2, 4, 8, 5, 1],
    [0, 12, 10, 13, 15, 11, 9, 14, 7, 3, 6, 2, 4, 8, 5, 1],
    [0, 12, 9, 13, 15, 11, 14, 10, 3, 8, 6, 2, 4, 7, 5, 1],
    [0, 12, 9, 13, 15, 11, 10, 14, 8, 3, 6, 2, 4, 7, 5, 1],
    [0, 12, 14, 13, 15, 11, 9, 10, 8, 3, 6, 2, 4, 7, 5, 1],
    [0, 12, 9, 13, 15, 11, 10, 14, 7, 8, 6, 2, 4, 3, 5, 1],
    [0, 12, 10, 13, 15, 11, 14, 9, 7, 8, 6, 2, 4, 3, 5, 1],
];

/// Preset hard boards with the blank at the lower right corner.
const HARD_ZERO_AT_15: [[u8; SIZE]; 8] = [
    [1, 10, 14, 13, 7, 6, 5, 9, 8, 2, 11, 15, 4, 3, 12, 0],
    [1, 10, 9, 13, 7, 6, 5, 14, 3, 2, 11, 15, 4, 8, 12, 0],
    [1, 5, 14, 13, 2, 6, 10, 9, 8, 7, 11, 15, 4, 3, 12, 0],
    [1, 5, 9, 13, 2, 6, 10, 14, 3, 7, 11, 15, 4, 8, 12, 0],
    [6, 5, 13, 9, 2, 1, 10, 14, 4, 7, 11, 12, 3, 8, 15, 0],
    [6, 5, 14, 13, 2, 1, 10, 9, 8, 7, 11, 12, 4, 3, 15, 0],
    [6, 5, 9, 13, 2, 1, 10, 14, 3, 7, 11, 12, 4, 8, 15, 0],
    [6, 5, 9, 14, 2, 1, 10, 13, 3, 7, 11, 12, 8, 4, 15, 0],
];

/// Returns the diagonal mirror reflection of the given tiles.
pub fn tiles_to_mirror(tiles: &[u8; SIZE]) -> [u8; SIZE] {
    let mut mirror = [0u8; SIZE];
    for pos in 0..SIZE {
        mirror[MIRROR_POS[pos] as usize] = MIRROR_VAL[tiles[pos] as usize];
    }
    mirror
}

/// The four blank-shift directions. RIGHT means the blank moves right
/// (the tile to its right moves left).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Move {
    Right,
    Down,
    Left,
    Up,
}

impl Move {
    /// All directions in the solver's canonical order.
    pub const ALL: [Move; DIR_SIZE] = [Move::Right, Move::Down, Move::Left, Move::Up];

    /// Numeric code 0..=3, also the index into per-direction tables.
    pub fn value(self) -> usize {
        match self {
            Move::Right => 0,
            Move::Down => 1,
            Move::Left => 2,
            Move::Up => 3,
        }
    }

    /// Direction from its numeric code.
    pub fn from_value(val: usize) -> Option<Move> {
        Move::ALL.get(val).copied()
    }

    /// The reverse of this direction.
    pub fn opposite(self) -> Move {
        match self {
            Move::Right => Move::Left,
            Move::Down => Move::Up,
            Move::Left => Move::Right,
            Move::Up => Move::Down,
        }
    }

    /// The same shift viewed through the diagonal mirror.
    pub fn mirror(self) -> Move {
        match self {
            Move::Right => Move::Down,
            Move::Down => Move::Right,
            Move::Left => Move::Up,
            Move::Up => Move::Left,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Move::Right => "RIGHT",
            Move::Down => "DOWN",
            Move::Left => "LEFT",
            Move::Up => "UP",
        }
    }
}

/// Difficulty bands for random board generation, measured by the board's
/// Manhattan distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyLevel {
    Easy,
    Moderate,
    Hard,
    Random,
}

/// An immutable 15-puzzle position with its mirror reflection, blank
/// coordinates, packed hash keys and solvability flag.
#[derive(Debug, Clone)]
pub struct Board {
    tiles: [u8; SIZE],
    mirror: [u8; SIZE],
    zero_x: u8,
    zero_y: u8,
    hash_key1: u32,
    hash_key2: u32,
    solvable: bool,
    valid_moves: [bool; DIR_SIZE],
}

impl Board {
    /// Builds a board from 16 tile values. Rejects anything that is not a
    /// permutation of 0..=15.
    pub fn new(blocks: [u8; SIZE]) -> Result<Board, String> {
        let mut seen = [false; SIZE];
        for &value in &blocks {
            if value as usize >= SIZE || seen[value as usize] {
                return Err(format!("invalid tiles, not a permutation of 0-15: {:?}", blocks));
            }
            seen[value as usize] = true;
        }
        Ok(Board::from_tiles(blocks))
    }

    /// Builds a board from a slice, validating its length first.
    pub fn from_slice(blocks: &[u8]) -> Result<Board, String> {
        let tiles: [u8; SIZE] = blocks
            .try_into()
            .map_err(|_| format!("expected {} tiles, got {}", SIZE, blocks.len()))?;
        Board::new(tiles)
    }

    /// The goal position.
    pub fn goal() -> Board {
        Board::from_tiles(GOAL_TILES)
    }

    /// Generates a random solvable board within the given difficulty band.
    pub fn random(level: DifficultyLevel) -> Board {
        match level {
            DifficultyLevel::Random => Board::from_tiles(random_permutation()),
            DifficultyLevel::Moderate => loop {
                let board = Board::from_tiles(random_permutation());
                let estimate = manhattan(&board.tiles);
                if (MIN_RANGE_MODERATE..MIN_RANGE_HARD).contains(&estimate) {
                    return board;
                }
            },
            DifficultyLevel::Easy | DifficultyLevel::Hard => Board::random_walk(level),
        }
    }

    // Shuffle-walk generation: start from the goal (easy) or a preset hard
    // board (hard, 20/80 split between the two blank corners), walk the
    // blank 10-99 random steps, keep the result when it lands in band.
    fn random_walk(level: DifficultyLevel) -> Board {
        let mut rng = rand::rng();
        loop {
            let (mut blocks, mut zero) = if level == DifficultyLevel::Hard {
                if rng.random_range(0..5) == 0 {
                    (HARD_ZERO_AT_15[rng.random_range(0..HARD_ZERO_AT_15.len())], 15usize)
                } else {
                    (HARD_ZERO_AT_0[rng.random_range(0..HARD_ZERO_AT_0.len())], 0usize)
                }
            } else {
                (GOAL_TILES, 15usize)
            };

            let shuffle = rng.random_range(10..100);
            for _ in 0..shuffle {
                let next = match rng.random_range(0..DIR_SIZE) {
                    0 if zero % ROW_SIZE < ROW_SIZE - 1 => zero + 1,
                    1 if zero / ROW_SIZE < ROW_SIZE - 1 => zero + ROW_SIZE,
                    2 if zero % ROW_SIZE > 0 => zero - 1,
                    3 if zero / ROW_SIZE > 0 => zero - ROW_SIZE,
                    _ => continue,
                };
                blocks[zero] = blocks[next];
                blocks[next] = 0;
                zero = next;
            }

            if blocks == GOAL_TILES {
                continue;
            }
            let estimate = manhattan(&blocks);
            let in_band = match level {
                DifficultyLevel::Hard => estimate >= MIN_RANGE_HARD,
                _ => (MIN_RANGE_EASY..MIN_RANGE_MODERATE).contains(&estimate),
            };
            if in_band {
                return Board::from_tiles(blocks);
            }
        }
    }

    fn from_tiles(tiles: [u8; SIZE]) -> Board {
        let mut zero_x = 0u8;
        let mut zero_y = 0u8;
        let mut inversions = 0u32;
        for i in 0..SIZE {
            let value = tiles[i];
            if value == 0 {
                zero_x = (i % ROW_SIZE) as u8;
                zero_y = (i / ROW_SIZE) as u8;
            } else {
                for j in (i + 1)..SIZE {
                    if tiles[j] > 0 && value > tiles[j] {
                        inversions += 1;
                    }
                }
            }
        }
        // Solvable when the blank's row parity and the inversion parity
        // disagree (blank on an even row from the top pairs with odd
        // inversions and vice versa).
        let solvable = (zero_y % 2 == 0) != (inversions % 2 == 0);

        let mut hash_key1 = 0u32;
        let mut hash_key2 = 0u32;
        for i in 0..SIZE / 2 {
            hash_key1 = (hash_key1 << 4) | u32::from(tiles[i]);
        }
        for i in SIZE / 2..SIZE {
            hash_key2 = (hash_key2 << 4) | u32::from(tiles[i]);
        }

        let mirror = tiles_to_mirror(&tiles);

        let mut valid_moves = [
            (zero_x as usize) < ROW_SIZE - 1,
            (zero_y as usize) < ROW_SIZE - 1,
            zero_x > 0,
            zero_y > 0,
        ];
        // A board identical to its own reflection only needs one of the two
        // symmetric move subsets explored from the root.
        if tiles == mirror {
            valid_moves[Move::Down.value()] = false;
            valid_moves[Move::Up.value()] = false;
        }

        Board {
            tiles,
            mirror,
            zero_x,
            zero_y,
            hash_key1,
            hash_key2,
            solvable,
            valid_moves,
        }
    }

    /// Returns the board after shifting the blank one cell in the given
    /// direction, or `None` when the move runs off the edge.
    pub fn shift(&self, dir: Move) -> Option<Board> {
        let zero = self.zero_pos() as usize;
        let next = match dir {
            Move::Right if (self.zero_x as usize) < ROW_SIZE - 1 => zero + 1,
            Move::Down if (self.zero_y as usize) < ROW_SIZE - 1 => zero + ROW_SIZE,
            Move::Left if self.zero_x > 0 => zero - 1,
            Move::Up if self.zero_y > 0 => zero - ROW_SIZE,
            _ => return None,
        };
        let mut moved = self.tiles;
        moved[zero] = moved[next];
        moved[next] = 0;
        Some(Board::from_tiles(moved))
    }

    /// Applies a full solution and verifies it ends at the goal.
    pub fn check_solution(&self, solution: &[Move]) -> bool {
        if !self.solvable {
            return false;
        }
        let mut board = self.clone();
        for &dir in solution {
            match board.shift(dir) {
                Some(next) => board = next,
                None => return false,
            }
        }
        board.is_goal()
    }

    pub fn is_goal(&self) -> bool {
        self.tiles == GOAL_TILES
    }

    pub fn is_solvable(&self) -> bool {
        self.solvable
    }

    pub fn tiles(&self) -> &[u8; SIZE] {
        &self.tiles
    }

    pub fn mirror_tiles(&self) -> &[u8; SIZE] {
        &self.mirror
    }

    pub fn zero_x(&self) -> u8 {
        self.zero_x
    }

    pub fn zero_y(&self) -> u8 {
        self.zero_y
    }

    /// Blank position as a flat 0..16 index.
    pub fn zero_pos(&self) -> u8 {
        self.zero_y * ROW_SIZE as u8 + self.zero_x
    }

    /// Legal first moves, with the symmetric subset removed for
    /// self-mirrored boards.
    pub fn valid_moves(&self) -> [bool; DIR_SIZE] {
        self.valid_moves
    }

    pub fn hash_keys(&self) -> (u32, u32) {
        (self.hash_key1, self.hash_key2)
    }
}

impl PartialEq for Board {
    fn eq(&self, other: &Board) -> bool {
        self.hash_key1 == other.hash_key1 && self.hash_key2 == other.hash_key2
    }
}

impl Eq for Board {}

impl std::hash::Hash for Board {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash_key1.hash(state);
        self.hash_key2.hash(state);
    }
}

impl std::fmt::Display for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for row in 0..ROW_SIZE {
            for col in 0..ROW_SIZE {
                write!(f, "{:2} ", self.tiles[row * ROW_SIZE + col])?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Plain Manhattan distance of the given tiles to the goal.
pub fn manhattan(tiles: &[u8; SIZE]) -> u32 {
    let mut total = 0u32;
    for pos in 0..SIZE {
        let value = tiles[pos] as usize;
        if value != 0 {
            let goal = value - 1;
            total += (goal % ROW_SIZE).abs_diff(pos % ROW_SIZE) as u32;
            total += (goal / ROW_SIZE).abs_diff(pos / ROW_SIZE) as u32;
        }
    }
    total
}

fn random_permutation() -> [u8; SIZE] {
    // Knuth shuffle, then a pair swap away from the blank to flip an
    // unsolvable draw into a solvable one.
    let mut rng = rand::rng();
    let mut blocks = [0u8; SIZE];
    for count in 1..SIZE {
        let pick = rng.random_range(0..=count);
        blocks[count] = blocks[pick];
        blocks[pick] = count as u8;
    }

    let board = Board::from_tiles(blocks);
    if !board.solvable {
        if board.zero_y == 0 {
            blocks.swap(ROW_SIZE, ROW_SIZE + 1);
        } else {
            blocks.swap(0, 1);
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goal_board_is_goal_and_solvable() {
        let board = Board::goal();
        assert!(board.is_goal());
        assert!(board.is_solvable());
        assert_eq!(board.zero_pos(), 15);
    }

    #[test]
    fn rejects_non_permutation() {
        assert!(Board::new([1; SIZE]).is_err());
        assert!(Board::from_slice(&[1, 2, 3]).is_err());
    }

    #[test]
    fn swap_two_tiles_is_unsolvable() {
        let mut tiles = *Board::goal().tiles();
        tiles.swap(0, 1);
        let board = Board::new(tiles).unwrap();
        assert!(!board.is_solvable());
    }

    #[test]
    fn mirror_is_diagonal_transpose() {
        let board = Board::random(DifficultyLevel::Random);
        let mirror = board.mirror_tiles();
        for pos in 0..SIZE {
            assert_eq!(
                mirror[MIRROR_POS[pos] as usize],
                MIRROR_VAL[board.tiles()[pos] as usize]
            );
        }
        // Mirroring twice restores the original.
        let twice = tiles_to_mirror(mirror);
        assert_eq!(&twice, board.tiles());
    }

    #[test]
    fn shift_and_reverse_restores_board() {
        let board = Board::random(DifficultyLevel::Easy);
        for dir in Move::ALL {
            if let Some(next) = board.shift(dir) {
                let back = next.shift(dir.opposite()).unwrap();
                assert_eq!(back, board);
            }
        }
    }

    #[test]
    fn shift_off_edge_is_none() {
        // Blank at position 15: RIGHT and DOWN run off the edge.
        let board = Board::goal();
        assert!(board.shift(Move::Right).is_none());
        assert!(board.shift(Move::Down).is_none());
    }

    #[test]
    fn self_mirrored_board_drops_symmetric_root_moves() {
        let goal = Board::goal();
        assert_eq!(goal.tiles(), &tiles_to_mirror(goal.tiles()));
        let moves = goal.valid_moves();
        assert!(moves[Move::Left.value()]);
        assert!(!moves[Move::Up.value()]);
        assert!(!moves[Move::Down.value()]);
    }

    #[test]
    fn difficulty_bands_hold() {
        let easy = Board::random(DifficultyLevel::Easy);
        let easy_md = manhattan(easy.tiles());
        assert!((MIN_RANGE_EASY..MIN_RANGE_MODERATE).contains(&easy_md));

        let hard = Board::random(DifficultyLevel::Hard);
        assert!(manhattan(hard.tiles()) >= MIN_RANGE_HARD);
        assert!(hard.is_solvable());
    }

    #[test]
    fn solution_check_detects_bad_paths() {
        let board = Board::goal().shift(Move::Left).unwrap();
        assert!(board.check_solution(&[Move::Right]));
        assert!(!board.check_solution(&[Move::Left]));
    }
}
