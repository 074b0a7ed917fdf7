// Walking distance tables
//
// Walking distance collapses a board into row-occupancy signatures: for each
// physical row, how many of its tiles belong in each goal row (and which row
// holds the blank). A breadth-first scan from the goal signature yields the
// exact minimum number of vertical moves for every signature, plus a link
// table that advances a signature by one move. The same tables serve the
// column direction through the board's mirror reflection.
//
// Key packing, matching the table layout used throughout the solvers:
//   row key      - 4 counts, 3 bits each
//   pattern key  - 4 row-key indices, 6 bits each, plus 4 bits of blank row
//   link table   - pattern index * 8 + goal-row * 2 + arrow

use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::io::Write;
use std::path::Path;

use log::info;

use crate::board::{ROW_SIZE, SIZE};

/// Distinct row keys: 35 full-row signatures plus 20 blank-row signatures.
pub const KEY_SIZE: usize = 55;
/// Reachable pattern signatures.
pub const PATTERN_SIZE: usize = 24964;
/// No transition (empty goal-row slot or edge of the board).
pub const NO_LINK: i32 = -1;

const KEY_BIT_SIZE: u32 = 3;
const KEY_BITS: u32 = 0x07;
const KEY_IDX_BIT_SIZE: u32 = 6;
const KEY_IDX_BITS: u32 = 0x3F;
const ZERO_ROW_BIT_SHIFT: u32 = 4;
const ZERO_ROW_BITS: u32 = 0x03;

const FILE_MAGIC: &[u8; 8] = b"WDTAB\x00\x01\x00";

/// Blank-row travel direction. Forward moves the blank one row down (a tile
/// moves up); backward is the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrow {
    Forward,
    Backward,
}

impl Arrow {
    pub fn value(self) -> usize {
        match self {
            Arrow::Forward => 0,
            Arrow::Backward => 1,
        }
    }

    fn row_change(self) -> i32 {
        match self {
            Arrow::Forward => 1,
            Arrow::Backward => -1,
        }
    }
}

/// The generated walking-distance tables: per-signature distances, the
/// transition links, and the signature-to-index maps used to seed a search.
pub struct WalkingDistance {
    pattern: Vec<u8>,
    link: Vec<i32>,
    row_idx_map: HashMap<u32, u32>,
    ptn_idx_map: HashMap<u32, u32>,
}

impl WalkingDistance {
    /// Loads the tables from the cache file under `data_dir`, regenerating
    /// and re-saving when the file is missing or unreadable.
    pub fn load_or_generate(data_dir: &Path) -> WalkingDistance {
        let filepath = data_dir.join("walking_distance.db");
        if let Some(tables) = WalkingDistance::load(&filepath) {
            return tables;
        }

        info!("generating walking distance tables ({} patterns)", PATTERN_SIZE);
        let tables = WalkingDistance::generate();
        tables.save(data_dir, &filepath);
        tables
    }

    /// Generates the tables from scratch.
    pub fn generate() -> WalkingDistance {
        let (row_idx_map, row_key_link) = gen_keys();
        let (pattern, link, ptn_idx_map) = gen_pattern(&row_idx_map, &row_key_link);
        WalkingDistance {
            pattern,
            link,
            row_idx_map,
            ptn_idx_map,
        }
    }

    /// Distance stored for a pattern index.
    pub fn value(&self, ptn_idx: usize) -> u8 {
        self.pattern[ptn_idx]
    }

    /// Advance a pattern index by one move: `goal_row` is the moved tile's
    /// goal row (or goal column for the mirrored automaton). `NO_LINK` when
    /// the transition is impossible.
    pub fn advance(&self, ptn_idx: usize, goal_row: usize, arrow: Arrow) -> i32 {
        self.link[ptn_idx * ROW_SIZE * 2 + goal_row * 2 + arrow.value()]
    }

    /// Computes the pattern index of a board's row signature. `rows[r][g]`
    /// counts tiles in physical row `r` whose goal row is `g`; `zero_row` is
    /// the blank's row.
    pub fn pattern_index(&self, rows: &[[u32; ROW_SIZE]; ROW_SIZE], zero_row: usize) -> usize {
        let mut combo = 0u32;
        for row in rows {
            let key = row_combo_to_key(row);
            combo = (combo << KEY_IDX_BIT_SIZE) | self.row_idx_map[&key];
        }
        combo = (combo << ZERO_ROW_BIT_SHIFT) | zero_row as u32;
        self.ptn_idx_map[&combo] as usize
    }

    /// Row signature and pattern index for the vertical direction.
    pub fn index_vertical(&self, tiles: &[u8; SIZE], zero_row: usize) -> usize {
        let mut rows = [[0u32; ROW_SIZE]; ROW_SIZE];
        for pos in 0..SIZE {
            let value = tiles[pos] as usize;
            if value != 0 {
                rows[pos / ROW_SIZE][(value - 1) / ROW_SIZE] += 1;
            }
        }
        self.pattern_index(&rows, zero_row)
    }

    fn load(filepath: &Path) -> Option<WalkingDistance> {
        let bytes = fs::read(filepath).ok()?;
        let mut cursor = 0usize;

        let magic = bytes.get(..FILE_MAGIC.len())?;
        if magic != FILE_MAGIC {
            return None;
        }
        cursor += FILE_MAGIC.len();

        let pattern = bytes.get(cursor..cursor + PATTERN_SIZE)?.to_vec();
        cursor += PATTERN_SIZE;

        let mut read_u32 = |cursor: &mut usize| -> Option<u32> {
            let chunk = bytes.get(*cursor..*cursor + 4)?;
            *cursor += 4;
            Some(u32::from_le_bytes(chunk.try_into().ok()?))
        };

        let mut row_idx_map = HashMap::with_capacity(KEY_SIZE);
        for _ in 0..KEY_SIZE {
            let key = read_u32(&mut cursor)?;
            let idx = read_u32(&mut cursor)?;
            row_idx_map.insert(key, idx);
        }

        let mut ptn_idx_map = HashMap::with_capacity(PATTERN_SIZE);
        for _ in 0..PATTERN_SIZE {
            let key = read_u32(&mut cursor)?;
            let idx = read_u32(&mut cursor)?;
            ptn_idx_map.insert(key, idx);
        }

        let link_len = PATTERN_SIZE * ROW_SIZE * 2;
        let mut link = Vec::with_capacity(link_len);
        for _ in 0..link_len {
            link.push(read_u32(&mut cursor)? as i32);
        }

        Some(WalkingDistance {
            pattern,
            link,
            row_idx_map,
            ptn_idx_map,
        })
    }

    fn save(&self, data_dir: &Path, filepath: &Path) {
        if let Err(err) = fs::create_dir_all(data_dir) {
            log::warn!("cannot create data directory {}: {}", data_dir.display(), err);
            return;
        }

        let result = (|| -> std::io::Result<()> {
            let mut out = Vec::with_capacity(PATTERN_SIZE * 9);
            out.extend_from_slice(FILE_MAGIC);
            out.extend_from_slice(&self.pattern);
            for (&key, &idx) in &self.row_idx_map {
                out.extend_from_slice(&key.to_le_bytes());
                out.extend_from_slice(&idx.to_le_bytes());
            }
            for (&key, &idx) in &self.ptn_idx_map {
                out.extend_from_slice(&key.to_le_bytes());
                out.extend_from_slice(&idx.to_le_bytes());
            }
            for &value in &self.link {
                out.extend_from_slice(&(value as u32).to_le_bytes());
            }
            let mut file = fs::File::create(filepath)?;
            file.write_all(&out)
        })();

        match result {
            Ok(()) => info!("saved walking distance tables to {}", filepath.display()),
            Err(err) => {
                log::warn!("cannot save walking distance tables: {}", err);
                let _ = fs::remove_file(filepath);
            }
        }
    }
}

fn row_combo_to_key(combo: &[u32; ROW_SIZE]) -> u32 {
    combo.iter().fold(0, |key, &count| (key << KEY_BIT_SIZE) | count)
}

// Masks that clear one 3-bit slot of a row key.
fn partial_key(slot: usize) -> u32 {
    let mut mask = 0u32;
    for j in 0..ROW_SIZE {
        mask <<= KEY_BIT_SIZE;
        if j != slot {
            mask |= KEY_BITS;
        }
    }
    mask
}

// Masks that keep all but one adjacent 6-bit row-index pair of a pattern combo.
fn partial_pattern(merge: usize) -> u32 {
    let mut mask = 0u32;
    for j in 0..ROW_SIZE - 1 {
        mask <<= KEY_IDX_BIT_SIZE;
        if j != merge {
            mask |= KEY_IDX_BITS;
        } else {
            mask <<= KEY_IDX_BIT_SIZE;
        }
    }
    mask
}

/// Enumerates the 55 row keys and the links between them: full rows link to
/// blank rows by removing one tile of a goal-row type, blank rows link back
/// by adding one.
fn gen_keys() -> (HashMap<u32, u32>, Vec<i32>) {
    let mut row_idx_map: HashMap<u32, u32> = HashMap::with_capacity(KEY_SIZE);
    let mut row_keys: Vec<u32> = Vec::with_capacity(KEY_SIZE);

    // Compositions of `total` tiles over the 4 goal rows, breadth-first from
    // the single-type rows so indices group by distance from them.
    let mut seed = |total: u32, row_idx_map: &mut HashMap<u32, u32>, row_keys: &mut Vec<u32>| {
        let mut frontier: Vec<[u32; ROW_SIZE]> = Vec::new();
        for i in 0..ROW_SIZE {
            let mut combo = [0u32; ROW_SIZE];
            combo[i] = total;
            let key = row_combo_to_key(&combo);
            row_idx_map.insert(key, row_keys.len() as u32);
            row_keys.push(key);
            frontier.push(combo);
        }
        while !frontier.is_empty() {
            let expand = std::mem::take(&mut frontier);
            for combo in expand {
                for i in 0..ROW_SIZE {
                    if combo[i] == 0 {
                        continue;
                    }
                    for j in 0..ROW_SIZE {
                        if i == j {
                            continue;
                        }
                        let mut shifted = combo;
                        shifted[i] -= 1;
                        shifted[j] += 1;
                        let key = row_combo_to_key(&shifted);
                        if !row_idx_map.contains_key(&key) {
                            row_idx_map.insert(key, row_keys.len() as u32);
                            row_keys.push(key);
                            frontier.push(shifted);
                        }
                    }
                }
            }
        }
    };

    seed(ROW_SIZE as u32, &mut row_idx_map, &mut row_keys);
    let split_idx = row_keys.len();
    seed(ROW_SIZE as u32 - 1, &mut row_idx_map, &mut row_keys);
    debug_assert_eq!(row_keys.len(), KEY_SIZE);

    let mut row_key_link = vec![NO_LINK; KEY_SIZE * ROW_SIZE];

    // Full rows: remove one tile of goal-row type j.
    for i in 0..split_idx {
        let combo = row_keys[i];
        for j in 0..ROW_SIZE {
            let shift_bits = (ROW_SIZE - j - 1) as u32 * KEY_BIT_SIZE;
            let count = (combo >> shift_bits) & KEY_BITS;
            if count > 0 {
                let next_key = (combo & partial_key(j)) | ((count - 1) << shift_bits);
                row_key_link[i * ROW_SIZE + j] = row_idx_map[&next_key] as i32;
            }
        }
    }

    // Blank rows: add one tile of goal-row type j.
    for i in split_idx..KEY_SIZE {
        let combo = row_keys[i];
        for j in 0..ROW_SIZE {
            let shift_bits = (ROW_SIZE - j - 1) as u32 * KEY_BIT_SIZE;
            let count = (combo >> shift_bits) & KEY_BITS;
            let next_key = (combo & partial_key(j)) | ((count + 1) << shift_bits);
            row_key_link[i * ROW_SIZE + j] = row_idx_map[&next_key] as i32;
        }
    }

    (row_idx_map, row_key_link)
}

fn row_key_idx(combo: u32, row: usize) -> usize {
    ((combo >> ((ROW_SIZE - row - 1) as u32 * KEY_IDX_BIT_SIZE)) & KEY_IDX_BITS) as usize
}

/// Breadth-first scan over pattern signatures from the goal, filling the
/// distance and link tables.
fn gen_pattern(
    row_idx_map: &HashMap<u32, u32>,
    row_key_link: &[i32],
) -> (Vec<u8>, Vec<i32>, HashMap<u32, u32>) {
    let mut pattern = vec![0u8; PATTERN_SIZE];
    let mut link = vec![NO_LINK; PATTERN_SIZE * ROW_SIZE * 2];
    let mut ptn_idx_map: HashMap<u32, u32> = HashMap::with_capacity(PATTERN_SIZE);
    let mut ptn_keys: Vec<u32> = Vec::with_capacity(PATTERN_SIZE);

    // Goal signature: rows 0-2 hold their own 4 tiles, row 3 holds its 3.
    let mut init_combo = 0u32;
    for i in 0..ROW_SIZE - 1 {
        let mut combo = [0u32; ROW_SIZE];
        combo[i] = ROW_SIZE as u32;
        let key = row_combo_to_key(&combo);
        init_combo = (init_combo << KEY_IDX_BIT_SIZE) | row_idx_map[&key];
    }
    init_combo = (init_combo << KEY_IDX_BIT_SIZE) | row_idx_map[&(ROW_SIZE as u32 - 1)];
    init_combo = (init_combo << ZERO_ROW_BIT_SHIFT) | (ROW_SIZE as u32 - 1);

    ptn_idx_map.insert(init_combo, 0);
    ptn_keys.push(init_combo);

    let mut moves = 0u8;
    let mut top = 0usize;
    let mut end = 1usize;

    while top < end {
        moves += 1;
        let (scan_from, scan_to) = (top, end);
        top = end;

        for i in scan_from..scan_to {
            let curr = ptn_keys[i];
            let ptn_combo = curr >> ZERO_ROW_BIT_SHIFT;
            let zero_row = (curr & ZERO_ROW_BITS) as usize;
            let zero_idx = row_key_idx(ptn_combo, zero_row);

            for arrow in [Arrow::Forward, Arrow::Backward] {
                if (arrow == Arrow::Forward && zero_row == ROW_SIZE - 1)
                    || (arrow == Arrow::Backward && zero_row == 0)
                {
                    continue;
                }
                let zero_next = (zero_row as i32 + arrow.row_change()) as usize;
                let next_idx = row_key_idx(ptn_combo, zero_next);

                for j in 0..ROW_SIZE {
                    let link_pos = i * ROW_SIZE * 2 + j * 2 + arrow.value();
                    let from_next = row_key_link[next_idx * ROW_SIZE + j];
                    if from_next == NO_LINK {
                        continue;
                    }
                    let from_zero = row_key_link[zero_idx * ROW_SIZE + j];

                    // Splice the two changed row indices back into the combo;
                    // they always sit in adjacent 6-bit slots.
                    let (pair, merge) = match arrow {
                        Arrow::Forward => {
                            (((from_zero as u32) << KEY_IDX_BIT_SIZE) | from_next as u32, zero_row)
                        }
                        Arrow::Backward => (
                            ((from_next as u32) << KEY_IDX_BIT_SIZE) | from_zero as u32,
                            zero_row - 1,
                        ),
                    };
                    let mut new_ptn = (pair << ((2 - merge) as u32 * KEY_IDX_BIT_SIZE))
                        | (ptn_combo & partial_pattern(merge));
                    new_ptn = (new_ptn << ZERO_ROW_BIT_SHIFT) | zero_next as u32;

                    match ptn_idx_map.get(&new_ptn) {
                        Some(&existing) => link[link_pos] = existing as i32,
                        None => {
                            let fresh = ptn_keys.len();
                            ptn_idx_map.insert(new_ptn, fresh as u32);
                            ptn_keys.push(new_ptn);
                            pattern[fresh] = moves;
                            link[link_pos] = fresh as i32;
                            end += 1;
                        }
                    }
                }
            }
        }
    }
    debug_assert_eq!(ptn_keys.len(), PATTERN_SIZE);

    (pattern, link, ptn_idx_map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Board;

    #[test]
    fn table_sizes_match() {
        let wd = WalkingDistance::generate();
        assert_eq!(wd.row_idx_map.len(), KEY_SIZE);
        assert_eq!(wd.ptn_idx_map.len(), PATTERN_SIZE);
        assert_eq!(wd.pattern.len(), PATTERN_SIZE);
        assert_eq!(wd.link.len(), PATTERN_SIZE * ROW_SIZE * 2);
    }

    #[test]
    fn goal_signature_has_distance_zero() {
        let wd = WalkingDistance::generate();
        let goal = Board::goal();
        let idx = wd.index_vertical(goal.tiles(), goal.zero_y() as usize);
        assert_eq!(idx, 0);
        assert_eq!(wd.value(idx), 0);
    }

    #[test]
    fn one_vertical_move_has_distance_one() {
        let wd = WalkingDistance::generate();
        // Blank moved up one: tile 12 walked down a row.
        let board = Board::goal().shift(crate::board::Move::Up).unwrap();
        let idx = wd.index_vertical(board.tiles(), board.zero_y() as usize);
        assert_eq!(wd.value(idx), 1);
    }

    #[test]
    fn advance_matches_recomputed_signature() {
        let wd = WalkingDistance::generate();
        let mut board = Board::goal();
        // Walk the blank up the last column; each UP is a backward arrow on
        // the vertical automaton moving a tile whose goal row is known.
        for _ in 0..3 {
            let zero = board.zero_pos() as usize;
            let moved_tile = board.tiles()[zero - ROW_SIZE] as usize;
            let goal_row = (moved_tile - 1) / ROW_SIZE;
            let idx = wd.index_vertical(board.tiles(), board.zero_y() as usize);
            let next_idx = wd.advance(idx, goal_row, Arrow::Backward);
            board = board.shift(crate::board::Move::Up).unwrap();
            let expect = wd.index_vertical(board.tiles(), board.zero_y() as usize);
            assert_eq!(next_idx, expect as i32);
        }
    }

    #[test]
    fn save_and_reload_round_trip() {
        let wd = WalkingDistance::generate();
        let dir = std::env::temp_dir().join("fifteen_solver_wd_test");
        let file = dir.join("walking_distance.db");
        let _ = std::fs::remove_file(&file);
        wd.save(&dir, &file);
        let loaded = WalkingDistance::load(&file).expect("reload");
        assert_eq!(loaded.pattern, wd.pattern);
        assert_eq!(loaded.link, wd.link);
        assert_eq!(loaded.ptn_idx_map, wd.ptn_idx_map);
        let _ = std::fs::remove_file(&file);
    }
}
