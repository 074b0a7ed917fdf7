//! Shared cache of hard boards with verified optimal move counts.
//!
//! Each stored board is canonicalized: the blank is walked along a fixed
//! chain of four cells into its corner, boards whose blank falls in the
//! mirror-flip region are replaced by their diagonal reflection, and the
//! tile permutation is rotated so every key describes a puzzle solved at
//! the lower-right corner. One record therefore covers four blank
//! positions plus their mirrors, each with its own move count and a
//! packed 8-move solution prefix.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};
use parking_lot::RwLock;

use crate::board::{Board, Move, MIRROR_POS, SIZE};

/// Lookup index of the blank within its chain, per board position.
const REFERENCE_LOOKUP: [u8; SIZE] = [0, 1, 3, 0, 3, 2, 2, 1, 3, 2, 2, 3, 0, 1, 1, 0];

/// Chain group of each board position. Group 3 is stored as the mirror
/// reflection of group 1.
const REFERENCE_GROUP: [u8; SIZE] = [2, 2, 1, 1, 2, 2, 1, 1, 3, 3, 0, 0, 3, 3, 0, 0];

/// Board position of each (group, lookup) pair. Index 0 is the corner the
/// blank is walked into during canonicalization.
const GROUP_LOOKUP_POS: [[usize; 4]; 4] = [
    [15, 14, 10, 11],
    [3, 7, 6, 2],
    [0, 1, 5, 4],
    [12, 13, 9, 8],
];

const MIRROR_FLIP_GROUP: u8 = 3;

/// Position conversion for a quarter turn, applied to group 1 keys.
const ROTATE_90_POS: [usize; SIZE] = [12, 8, 4, 0, 13, 9, 5, 1, 14, 10, 6, 2, 15, 11, 7, 3];

/// Position conversion for a half turn, applied to group 2 keys.
const ROTATE_180_POS: [usize; SIZE] = [15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0];

pub const NUM_LOOKUPS: usize = 4;
pub const NUM_PARTIAL_MOVES: usize = 8;

const STATUS_BIT: [u8; NUM_LOOKUPS] = [1, 2, 4, 8];
const STATUS_COMPLETED: u8 = 15;

const FILE_MAGIC: &[u8; 8] = b"REFLOG\x01\x00";
const FILE_NAME: &str = "reference_boards.db";
/// 8-byte transform key, group, two hash words, hashcode, then 4 move
/// counts, 4 packed prefixes and the status byte.
const RECORD_SIZE: usize = 34;

const MIN_CUTOFF_SECONDS: u32 = 1;
const MAX_CUTOFF_SECONDS: u32 = 10;
const DEFAULT_CUTOFF_SECONDS: u32 = 8;
/// Percentage shaved off the cutoff setting before comparing search times.
const CUTOFF_BUFFER_PCT: f64 = 15.0;

/// Chain lookup index of the blank at the given board position.
pub fn reference_lookup(zero_pos: usize) -> usize {
    REFERENCE_LOOKUP[zero_pos] as usize
}

/// Chain group of the blank at the given board position.
pub fn reference_group(zero_pos: usize) -> u8 {
    REFERENCE_GROUP[zero_pos]
}

/// The given position belongs to the mirror-flip region; its record is
/// keyed by the reflected board.
pub fn is_mirror_flip_group(zero_pos: usize) -> bool {
    REFERENCE_GROUP[zero_pos] == MIRROR_FLIP_GROUP
}

/// Canonical key of a stored board. Equality and hashing use the two
/// packed tile words, which encode the full canonical permutation.
#[derive(Debug, Clone)]
pub struct ReferenceBoard {
    transform: [u8; SIZE],
    group: u8,
    hash1: u32,
    hash2: u32,
    hashcode: u32,
}

impl PartialEq for ReferenceBoard {
    fn eq(&self, other: &ReferenceBoard) -> bool {
        self.hashcode == other.hashcode && self.hash1 == other.hash1 && self.hash2 == other.hash2
    }
}

impl Eq for ReferenceBoard {}

impl std::hash::Hash for ReferenceBoard {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u32(self.hashcode);
    }
}

impl ReferenceBoard {
    pub fn new(board: &Board) -> ReferenceBoard {
        ReferenceBoard::from_parts(*board.tiles(), board.zero_pos() as usize)
    }

    /// Key of the diagonal reflection, used to probe for a stored mirror
    /// of a group 0 or group 2 board.
    pub fn new_mirror(board: &Board) -> ReferenceBoard {
        ReferenceBoard::from_parts(
            *board.mirror_tiles(),
            MIRROR_POS[board.zero_pos() as usize] as usize,
        )
    }

    fn from_parts(tiles: [u8; SIZE], zero_pos: usize) -> ReferenceBoard {
        let mut tiles = tiles;
        let mut group = REFERENCE_GROUP[zero_pos];
        let mut lookup = REFERENCE_LOOKUP[zero_pos] as usize;
        if group == MIRROR_FLIP_GROUP {
            group = 1;
            tiles = crate::board::tiles_to_mirror(&tiles);
        }

        // Walk the blank down the chain into the corner cell.
        while lookup > 0 {
            tiles[GROUP_LOOKUP_POS[group as usize][lookup]] =
                tiles[GROUP_LOOKUP_POS[group as usize][lookup - 1]];
            tiles[GROUP_LOOKUP_POS[group as usize][lookup - 1]] = 0;
            lookup -= 1;
        }

        let mut rotated = [0u8; SIZE];
        match group {
            0 => rotated.copy_from_slice(&tiles),
            1 => {
                for i in 0..SIZE {
                    rotated[i] = tiles[ROTATE_90_POS[i]];
                }
            }
            _ => {
                for i in 0..SIZE {
                    rotated[i] = tiles[ROTATE_180_POS[i]];
                }
            }
        }

        // Inverse permutation: maps a tile value onto the value sitting
        // in its cell of the rotated canonical board.
        let mut transform = [0u8; SIZE];
        for i in 1..SIZE {
            transform[rotated[i - 1] as usize] = i as u8;
        }

        let mut hash1: u32 = 0;
        let mut hash2: u32 = 0;
        for i in 0..SIZE / 2 {
            hash1 = (hash1 << 4) | u32::from(tiles[i]);
        }
        for i in SIZE / 2..SIZE {
            hash2 = (hash2 << 4) | u32::from(tiles[i]);
        }
        let hashcode = hash1.wrapping_mul(hash2.wrapping_add(0x1111));

        ReferenceBoard { transform, group, hash1, hash2, hashcode }
    }

    /// Rebuild a key from its stored file record.
    fn from_record(key: u64, group: u8, hash1: u32, hash2: u32, hashcode: u32) -> Result<ReferenceBoard, String> {
        if group > 2 {
            return Err(format!("reference record group {} out of range", group));
        }
        let mut transform = [0u8; SIZE];
        let mut seen = [false; SIZE];
        let mut copy = key;
        for pos in (0..SIZE).rev() {
            let val = (copy & 0xF) as usize;
            if seen[val] {
                return Err("reference record transform key is not a permutation".to_string());
            }
            seen[val] = true;
            transform[pos] = val as u8;
            copy >>= 4;
        }
        Ok(ReferenceBoard { transform, group, hash1, hash2, hashcode })
    }

    /// Canonical tiles, restored from the two hash words.
    pub fn tiles(&self) -> [u8; SIZE] {
        let mut tiles = [0u8; SIZE];
        let mut value = self.hash1;
        for pos in (0..SIZE / 2).rev() {
            tiles[pos] = (value & 0xF) as u8;
            value >>= 4;
        }
        value = self.hash2;
        for pos in (SIZE / 2..SIZE).rev() {
            tiles[pos] = (value & 0xF) as u8;
            value >>= 4;
        }
        tiles
    }

    /// Re-express the given tiles with this stored board as the goal
    /// state, so a plain distance estimate measures distance to it.
    pub fn transformer(&self, blocks: &[u8; SIZE]) -> [u8; SIZE] {
        let mut trans = [0u8; SIZE];
        for pos in 0..SIZE {
            trans[pos] = self.transform[blocks[pos] as usize];
        }

        match self.group {
            0 => trans,
            1 => {
                let mut rotated = [0u8; SIZE];
                for i in 0..SIZE {
                    rotated[i] = trans[ROTATE_90_POS[i]];
                }
                rotated
            }
            _ => {
                let mut rotated = [0u8; SIZE];
                for i in 0..SIZE {
                    rotated[i] = trans[ROTATE_180_POS[i]];
                }
                rotated
            }
        }
    }

    pub fn group(&self) -> u8 {
        self.group
    }

    fn transform_key(&self) -> u64 {
        let mut key = 0u64;
        for &val in self.transform.iter() {
            key = (key << 4) | u64::from(val);
        }
        key
    }
}

/// Per-lookup move counts and packed solution prefixes of one stored
/// board. Lookup 0 is the corner; counts for unreviewed lookups are
/// seeded one move apart along the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceMoves {
    moves: [u8; NUM_LOOKUPS],
    init_moves: [u16; NUM_LOOKUPS],
    status: u8,
}

impl ReferenceMoves {
    /// Seed all four lookups from one known move count: walking the blank
    /// one cell along the chain changes the optimal count by exactly one.
    pub fn seed(zero_pos: usize, steps: u8) -> ReferenceMoves {
        let lookup = REFERENCE_LOOKUP[zero_pos] as usize;
        let mut moves = [0u8; NUM_LOOKUPS];
        moves[lookup] = steps;
        for count in 1..=lookup {
            moves[lookup - count] = steps.saturating_sub(count as u8);
        }
        for count in 1..NUM_LOOKUPS - lookup {
            moves[lookup + count] = steps.saturating_sub(count as u8);
        }
        ReferenceMoves { moves, init_moves: [0; NUM_LOOKUPS], status: 0 }
    }

    fn from_record(moves: [u8; NUM_LOOKUPS], init_moves: [u16; NUM_LOOKUPS], status: u8) -> ReferenceMoves {
        ReferenceMoves { moves, init_moves, status }
    }

    /// Merge a second record for the same key, keeping the larger
    /// estimates and filling in missing prefixes.
    pub fn merge(&mut self, other: &ReferenceMoves) {
        self.status |= other.status;
        for lookup in 0..NUM_LOOKUPS {
            if self.moves[lookup] < other.moves[lookup] {
                self.moves[lookup] = other.moves[lookup];
                self.init_moves[lookup] = other.init_moves[lookup];
            } else if self.init_moves[lookup] == 0 {
                self.init_moves[lookup] = other.init_moves[lookup];
            }
        }
    }

    /// Store a verified move count and solution prefix for one lookup.
    pub fn update_solution(&mut self, lookup: usize, steps: u8, solution: &[Move], mirrored: bool) {
        self.status |= STATUS_BIT[lookup];
        self.moves[lookup] = steps;
        if solution.len() >= NUM_PARTIAL_MOVES {
            self.init_moves[lookup] = pack_moves(solution, mirrored);
        }
    }

    pub fn estimate(&self, lookup: usize) -> u8 {
        self.moves[lookup]
    }

    pub fn has_initial_moves(&self, lookup: usize) -> bool {
        self.init_moves[lookup] != 0
    }

    /// Unpack the stored 8-move prefix, reflecting each move when the
    /// probe matched through the mirror.
    pub fn initial_moves(&self, lookup: usize, mirrored: bool) -> [Move; NUM_PARTIAL_MOVES] {
        let mut value = self.init_moves[lookup];
        let mut prefix = [Move::Right; NUM_PARTIAL_MOVES];
        for slot in prefix.iter_mut() {
            let mut mv = Move::from_value((value & 0x3) as usize).unwrap_or(Move::Right);
            if mirrored {
                mv = mv.mirror();
            }
            *slot = mv;
            value >>= 2;
        }
        prefix
    }

    pub fn is_completed(&self) -> bool {
        self.status == STATUS_COMPLETED
    }
}

/// Pack the first 8 moves two bits each, first move in the low bits.
fn pack_moves(solution: &[Move], mirrored: bool) -> u16 {
    let mut value: u16 = 0;
    for i in (1..NUM_PARTIAL_MOVES).rev() {
        let mv = if mirrored { solution[i].mirror() } else { solution[i] };
        value |= mv.value() as u16;
        value <<= 2;
    }
    let mv = if mirrored { solution[0].mirror() } else { solution[0] };
    value | mv.value() as u16
}

/// Reference cache failure. The cache is a boost layer, so callers treat
/// this as a signal to fall back to plain search, not as a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceError {
    Unavailable,
}

impl fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceError::Unavailable => write!(f, "reference collection is unavailable"),
        }
    }
}

impl std::error::Error for ReferenceError {}

/// Access to the reference collection. Every call may fail when the
/// backing store goes away; callers demote to plain search on error.
pub trait ReferenceProvider: Send + Sync {
    /// Record stored under the given canonical key.
    fn get(&self, key: &ReferenceBoard) -> Result<Option<ReferenceMoves>, ReferenceError>;

    /// Add a solved board with its move count and solution. Returns true
    /// when the collection changed.
    fn put(&self, board: &Board, steps: u8, solution: &[Move]) -> Result<bool, ReferenceError>;

    /// Copy of every stored entry, for full-collection scans.
    fn snapshot(&self) -> Result<Vec<(ReferenceBoard, ReferenceMoves)>, ReferenceError>;

    /// Minimum search seconds before a solved board is worth storing.
    fn cutoff_limit(&self) -> f64;
}

/// Hand-picked hard boards seeded into a fresh collection, as
/// (tiles, blank position, optimal moves).
const DEFAULT_BOARDS: [([u8; SIZE], u8, u8); 30] = [
    ([0, 15, 8, 3, 12, 11, 7, 4, 14, 10, 6, 5, 9, 13, 2, 1], 0, 70),
    ([6, 5, 9, 13, 2, 1, 10, 14, 3, 7, 0, 15, 4, 8, 12, 11], 10, 72),
    ([0, 12, 8, 4, 15, 11, 7, 3, 14, 10, 6, 2, 13, 9, 5, 1], 0, 72),
    ([6, 5, 14, 13, 2, 1, 10, 9, 8, 7, 0, 15, 4, 3, 12, 11], 10, 70),
    ([0, 5, 9, 13, 2, 1, 10, 14, 3, 7, 11, 15, 4, 8, 12, 6], 0, 72),
    ([0, 12, 7, 4, 15, 11, 8, 3, 10, 14, 6, 2, 13, 9, 5, 1], 0, 70),
    ([0, 15, 8, 7, 12, 11, 4, 3, 14, 13, 6, 5, 10, 9, 2, 1], 0, 72),
    ([1, 5, 9, 13, 2, 6, 10, 14, 3, 7, 11, 15, 4, 8, 12, 0], 15, 72),
    ([0, 15, 8, 4, 12, 11, 7, 5, 14, 10, 6, 3, 13, 2, 9, 1], 0, 70),
    ([1, 10, 14, 13, 7, 6, 5, 9, 8, 2, 11, 15, 4, 3, 12, 0], 15, 72),
    ([0, 12, 8, 7, 15, 11, 4, 3, 14, 13, 6, 2, 10, 9, 5, 1], 0, 72),
    ([6, 5, 14, 13, 2, 1, 10, 9, 8, 7, 11, 12, 4, 3, 15, 0], 15, 70),
    ([0, 5, 9, 13, 2, 6, 10, 14, 3, 7, 1, 15, 4, 8, 12, 11], 0, 72),
    ([6, 5, 9, 13, 2, 1, 10, 14, 3, 7, 11, 12, 4, 8, 15, 0], 15, 70),
    ([0, 15, 8, 13, 12, 11, 9, 10, 14, 3, 6, 2, 4, 7, 5, 1], 0, 78),
    ([11, 15, 9, 13, 12, 0, 10, 14, 3, 7, 6, 2, 4, 8, 5, 1], 5, 78),
    ([0, 12, 5, 13, 15, 6, 10, 9, 2, 7, 11, 14, 4, 3, 8, 1], 0, 78),
    ([0, 12, 8, 13, 15, 11, 7, 9, 14, 10, 6, 2, 4, 3, 5, 1], 0, 78),
    ([0, 14, 15, 13, 8, 11, 10, 5, 12, 7, 6, 9, 4, 2, 3, 1], 0, 78),
    ([0, 15, 9, 13, 11, 12, 10, 14, 3, 7, 6, 2, 4, 8, 5, 1], 0, 80),
    ([0, 12, 9, 13, 15, 11, 10, 14, 8, 3, 6, 2, 4, 7, 5, 1], 0, 80),
    ([0, 12, 9, 13, 15, 11, 10, 14, 7, 8, 6, 2, 4, 3, 5, 1], 0, 80),
    ([0, 12, 9, 13, 15, 8, 10, 14, 11, 7, 6, 2, 4, 3, 5, 1], 0, 80),
    ([0, 12, 9, 13, 15, 11, 10, 14, 3, 7, 5, 6, 4, 8, 2, 1], 0, 80),
    ([0, 12, 9, 13, 15, 11, 10, 14, 7, 8, 5, 6, 4, 3, 2, 1], 0, 80),
    ([0, 12, 9, 13, 15, 11, 10, 14, 3, 7, 6, 2, 4, 8, 5, 1], 0, 80),
    ([0, 12, 9, 13, 15, 11, 14, 10, 3, 8, 6, 2, 4, 7, 5, 1], 0, 80),
    ([0, 12, 10, 13, 15, 11, 9, 14, 7, 3, 6, 2, 4, 8, 5, 1], 0, 80),
    ([0, 12, 14, 13, 15, 11, 9, 10, 8, 3, 6, 2, 4, 7, 5, 1], 0, 80),
    ([0, 12, 10, 13, 15, 11, 14, 9, 7, 8, 6, 2, 4, 3, 5, 1], 0, 80),
];

/// In-process reference collection behind a read-write lock, with
/// optional binary file persistence.
pub struct ReferenceStore {
    map: RwLock<HashMap<ReferenceBoard, ReferenceMoves>>,
    path: Option<PathBuf>,
    cutoff_setting: u32,
    cutoff_limit: f64,
}

impl ReferenceStore {
    /// Load the collection from the data directory, falling back to the
    /// seeded defaults when the file is absent or unreadable.
    pub fn load_or_default(data_dir: &Path, cutoff_seconds: u32) -> ReferenceStore {
        let path = data_dir.join(FILE_NAME);
        match ReferenceStore::load(&path) {
            Ok((cutoff, map)) => {
                info!("loaded {} reference boards from {}", map.len(), path.display());
                ReferenceStore {
                    map: RwLock::new(map),
                    path: Some(path),
                    cutoff_setting: cutoff,
                    cutoff_limit: buffered_limit(cutoff),
                }
            }
            Err(reason) => {
                info!("seeding default reference boards ({})", reason);
                let store = ReferenceStore::with_defaults(cutoff_seconds, Some(path));
                store.save();
                store
            }
        }
    }

    /// Collection without file persistence.
    pub fn in_memory(cutoff_seconds: u32) -> ReferenceStore {
        ReferenceStore::with_defaults(cutoff_seconds, None)
    }

    fn with_defaults(cutoff_seconds: u32, path: Option<PathBuf>) -> ReferenceStore {
        let cutoff = clamp_cutoff(cutoff_seconds);
        let mut map = HashMap::new();
        for &(tiles, zero_pos, steps) in DEFAULT_BOARDS.iter() {
            let key = ReferenceBoard::from_parts(tiles, zero_pos as usize);
            map.insert(key, ReferenceMoves::seed(zero_pos as usize, steps));
        }
        ReferenceStore {
            map: RwLock::new(map),
            path,
            cutoff_setting: cutoff,
            cutoff_limit: buffered_limit(cutoff),
        }
    }

    pub fn cutoff_setting(&self) -> u32 {
        self.cutoff_setting
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    fn load(path: &Path) -> Result<(u32, HashMap<ReferenceBoard, ReferenceMoves>), String> {
        let bytes = fs::read(path).map_err(|e| format!("open {}: {}", path.display(), e))?;
        let header = FILE_MAGIC.len() + 4;
        if bytes.len() < header || &bytes[..FILE_MAGIC.len()] != FILE_MAGIC {
            return Err(format!("{} is not a reference collection file", path.display()));
        }
        if (bytes.len() - header) % RECORD_SIZE != 0 {
            return Err(format!("{} has a truncated record", path.display()));
        }
        let cutoff = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        if !(MIN_CUTOFF_SECONDS..=MAX_CUTOFF_SECONDS).contains(&cutoff) {
            return Err(format!("{} stores cutoff {} out of range", path.display(), cutoff));
        }

        let mut map: HashMap<ReferenceBoard, ReferenceMoves> = HashMap::new();
        for record in bytes[header..].chunks_exact(RECORD_SIZE) {
            let mut key_bytes = [0u8; 8];
            key_bytes.copy_from_slice(&record[..8]);
            let group = record[8];
            let hash1 = u32::from_be_bytes([record[9], record[10], record[11], record[12]]);
            let hash2 = u32::from_be_bytes([record[13], record[14], record[15], record[16]]);
            let hashcode = u32::from_be_bytes([record[17], record[18], record[19], record[20]]);
            let key = ReferenceBoard::from_record(
                u64::from_be_bytes(key_bytes),
                group,
                hash1,
                hash2,
                hashcode,
            )?;

            let mut moves = [0u8; NUM_LOOKUPS];
            moves.copy_from_slice(&record[21..25]);
            let mut init_moves = [0u16; NUM_LOOKUPS];
            for (i, slot) in init_moves.iter_mut().enumerate() {
                *slot = u16::from_be_bytes([record[25 + i * 2], record[26 + i * 2]]);
            }
            let entry = ReferenceMoves::from_record(moves, init_moves, record[33]);

            match map.get_mut(&key) {
                Some(existing) => existing.merge(&entry),
                None => {
                    map.insert(key, entry);
                }
            }
        }
        Ok((cutoff, map))
    }

    /// Rewrite the whole collection through a temporary file so a crash
    /// mid-write never leaves a truncated collection behind.
    fn save(&self) {
        let path = match &self.path {
            Some(path) => path,
            None => return,
        };
        if let Err(reason) = self.write_file(path) {
            warn!("unable to save reference collection: {}", reason);
        }
    }

    fn write_file(&self, path: &Path) -> Result<(), String> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| format!("create {}: {}", dir.display(), e))?;
        }
        let tmp = path.with_extension("tmp");
        {
            let mut file =
                File::create(&tmp).map_err(|e| format!("create {}: {}", tmp.display(), e))?;
            let mut write = |buf: &[u8]| -> Result<(), String> {
                file.write_all(buf).map_err(|e| format!("write {}: {}", tmp.display(), e))
            };
            write(FILE_MAGIC)?;
            write(&self.cutoff_setting.to_be_bytes())?;
            for (key, entry) in self.map.read().iter() {
                write(&key.transform_key().to_be_bytes())?;
                write(&[key.group])?;
                write(&key.hash1.to_be_bytes())?;
                write(&key.hash2.to_be_bytes())?;
                write(&key.hashcode.to_be_bytes())?;
                write(&entry.moves)?;
                for &packed in entry.init_moves.iter() {
                    write(&packed.to_be_bytes())?;
                }
                write(&[entry.status])?;
            }
            file.flush().map_err(|e| format!("flush {}: {}", tmp.display(), e))?;
        }
        fs::rename(&tmp, path).map_err(|e| format!("rename {}: {}", path.display(), e))
    }

    /// Store or merge a solved board. Returns true when the map changed.
    fn store(&self, board: &Board, steps: u8, solution: &[Move]) -> bool {
        let zero_pos = board.zero_pos() as usize;
        let lookup = REFERENCE_LOOKUP[zero_pos] as usize;
        let group = REFERENCE_GROUP[zero_pos];
        let key = ReferenceBoard::new(board);

        let mut map = self.map.write();
        if let Some(entry) = map.get_mut(&key) {
            entry.update_solution(lookup, steps, solution, group == MIRROR_FLIP_GROUP);
            return true;
        }

        if group == 0 || group == 2 {
            let mirror_key = ReferenceBoard::new_mirror(board);
            if let Some(entry) = map.get_mut(&mirror_key) {
                // The stored entry is the reflection, so lookups 1 and 3
                // trade places and the prefix is reflected.
                let mirror_lookup = match lookup {
                    1 => 3,
                    3 => 1,
                    other => other,
                };
                entry.update_solution(mirror_lookup, steps, solution, true);
                return true;
            }
        }

        let mut entry = ReferenceMoves::seed(zero_pos, steps);
        entry.update_solution(lookup, steps, solution, group == MIRROR_FLIP_GROUP);
        map.insert(key, entry);
        true
    }
}

impl ReferenceProvider for ReferenceStore {
    fn get(&self, key: &ReferenceBoard) -> Result<Option<ReferenceMoves>, ReferenceError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, board: &Board, steps: u8, solution: &[Move]) -> Result<bool, ReferenceError> {
        let changed = self.store(board, steps, solution);
        if changed {
            self.save();
        }
        Ok(changed)
    }

    fn snapshot(&self) -> Result<Vec<(ReferenceBoard, ReferenceMoves)>, ReferenceError> {
        let map = self.map.read();
        Ok(map.iter().map(|(key, entry)| (key.clone(), entry.clone())).collect())
    }

    fn cutoff_limit(&self) -> f64 {
        self.cutoff_limit
    }
}

fn clamp_cutoff(seconds: u32) -> u32 {
    if !(MIN_CUTOFF_SECONDS..=MAX_CUTOFF_SECONDS).contains(&seconds) {
        warn!(
            "reference cutoff {}s out of range {}..={}, using {}s",
            seconds, MIN_CUTOFF_SECONDS, MAX_CUTOFF_SECONDS, DEFAULT_CUTOFF_SECONDS
        );
        return DEFAULT_CUTOFF_SECONDS;
    }
    seconds
}

fn buffered_limit(cutoff: u32) -> f64 {
    f64::from(cutoff) * ((100.0 - CUTOFF_BUFFER_PCT) / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board(tiles: [u8; SIZE]) -> Board {
        match Board::new(tiles) {
            Ok(board) => board,
            Err(reason) => panic!("bad test board: {}", reason),
        }
    }

    #[test]
    fn blank_positions_on_one_chain_share_a_key() {
        let (tiles, zero_pos, _) = DEFAULT_BOARDS[1];
        assert_eq!(zero_pos, 10);
        let base = board(tiles);
        let key = ReferenceBoard::new(&base);

        // Walk the blank one cell along its chain: 10 is lookup 2 of
        // group 0, so the next cell toward the corner is 14.
        let mut shifted = tiles;
        shifted[10] = shifted[14];
        shifted[14] = 0;
        assert_eq!(ReferenceBoard::new(&board(shifted)), key);

        let mut corner = shifted;
        corner[14] = corner[15];
        corner[15] = 0;
        assert_eq!(ReferenceBoard::new(&board(corner)), key);
    }

    #[test]
    fn flip_group_key_matches_the_mirrored_board() {
        // Walk the blank of a seeded board to position 8, which sits in
        // the mirror-flip region.
        let (tiles, _, _) = DEFAULT_BOARDS[1];
        let mut shifted = tiles;
        shifted[10] = shifted[9];
        shifted[9] = 0;
        shifted[9] = shifted[8];
        shifted[8] = 0;
        let flip = board(shifted);
        assert!(is_mirror_flip_group(flip.zero_pos() as usize));

        let direct = ReferenceBoard::new(&flip);
        let mirrored = match Board::new(*flip.mirror_tiles()) {
            Ok(board) => board,
            Err(reason) => panic!("mirror board invalid: {}", reason),
        };
        assert_eq!(ReferenceBoard::new(&mirrored), direct);
    }

    #[test]
    fn transformer_maps_the_stored_board_to_goal() {
        for &(tiles, zero_pos, _) in DEFAULT_BOARDS.iter().take(5) {
            let base = board(tiles);
            let key = ReferenceBoard::new(&base);
            if is_mirror_flip_group(zero_pos as usize) {
                continue;
            }
            // The canonical board transformed by its own key reads as a
            // solved puzzle with the blank at the lower right.
            let trans = key.transformer(&key.tiles());
            for (pos, &val) in trans.iter().enumerate().take(SIZE - 1) {
                assert_eq!(val as usize, pos + 1);
            }
            assert_eq!(trans[SIZE - 1], 0);
        }
    }

    #[test]
    fn seeding_spreads_estimates_along_the_chain() {
        let seeded = ReferenceMoves::seed(10, 72);
        assert_eq!(seeded.estimate(0), 70);
        assert_eq!(seeded.estimate(1), 71);
        assert_eq!(seeded.estimate(2), 72);
        assert_eq!(seeded.estimate(3), 71);
        assert!(!seeded.is_completed());
        for lookup in 0..NUM_LOOKUPS {
            assert!(!seeded.has_initial_moves(lookup));
        }
    }

    #[test]
    fn prefix_round_trip_with_mirror() {
        let solution = [
            Move::Right,
            Move::Down,
            Move::Down,
            Move::Left,
            Move::Up,
            Move::Right,
            Move::Down,
            Move::Left,
            Move::Up,
            Move::Up,
        ];
        let mut entry = ReferenceMoves::seed(0, 60);
        entry.update_solution(0, 60, &solution, false);
        assert!(entry.has_initial_moves(0));
        assert_eq!(&entry.initial_moves(0, false)[..], &solution[..NUM_PARTIAL_MOVES]);

        let reflected = entry.initial_moves(0, true);
        for (mv, orig) in reflected.iter().zip(solution.iter()) {
            assert_eq!(*mv, orig.mirror());
        }

        entry.update_solution(1, 61, &solution, true);
        let back = entry.initial_moves(1, true);
        assert_eq!(&back[..], &solution[..NUM_PARTIAL_MOVES]);
    }

    #[test]
    fn merge_keeps_larger_estimates_and_fills_prefixes() {
        let mut first = ReferenceMoves::seed(0, 60);
        let solution = [Move::Down; 8];
        let mut second = ReferenceMoves::seed(15, 62);
        second.update_solution(0, 62, &solution, false);

        first.merge(&second);
        assert_eq!(first.estimate(0), 62);
        assert!(first.has_initial_moves(0));
        assert_eq!(first.estimate(1), 61);
        assert_eq!(first.estimate(3), 59);
    }

    #[test]
    fn store_updates_instead_of_duplicating() {
        let store = ReferenceStore::in_memory(8);
        let seeded = store.len();

        // Goal with the blank walked to position 10, nowhere near the
        // seeded boards.
        let puzzle = board([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 0, 11, 13, 14, 15, 12]);
        let solution = [Move::Down; 12];
        assert!(matches!(store.put(&puzzle, 64, &solution), Ok(true)));
        assert_eq!(store.len(), seeded + 1);

        assert!(matches!(store.put(&puzzle, 64, &solution), Ok(true)));
        assert_eq!(store.len(), seeded + 1);

        let stored = match store.get(&ReferenceBoard::new(&puzzle)) {
            Ok(Some(entry)) => entry,
            other => panic!("expected stored entry, got {:?}", other),
        };
        let lookup = reference_lookup(puzzle.zero_pos() as usize);
        assert_eq!(stored.estimate(lookup), 64);
    }

    #[test]
    fn defaults_answer_direct_lookups() {
        let store = ReferenceStore::in_memory(8);
        let (tiles, zero_pos, steps) = DEFAULT_BOARDS[0];
        let key = ReferenceBoard::new(&board(tiles));
        let entry = match store.get(&key) {
            Ok(Some(entry)) => entry,
            other => panic!("expected seeded entry, got {:?}", other),
        };
        assert_eq!(entry.estimate(reference_lookup(zero_pos as usize)), steps);
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = std::env::temp_dir().join("fifteen_solver_ref_test");
        let _ = std::fs::remove_file(dir.join(FILE_NAME));
        let store = ReferenceStore::load_or_default(&dir, 6);
        let count = store.len();
        assert!(count > 0);

        let reloaded = ReferenceStore::load_or_default(&dir, 9);
        // The stored cutoff wins over the constructor argument.
        assert_eq!(reloaded.cutoff_setting(), 6);
        assert_eq!(reloaded.len(), count);
        assert!((reloaded.cutoff_limit() - 6.0 * 0.85).abs() < 1e-9);

        let _ = std::fs::remove_file(dir.join(FILE_NAME));
    }
}
