// Additive pattern databases. Each group of a pattern partition gets a
// distance table indexed by (key, format) combo; the blank wanders for free,
// so a group's value counts only that group's tile moves and the per-group
// values stay additive.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;
use rayon::prelude::*;

use crate::board::{Move, ROW_SIZE, SIZE};
use crate::pattern::{
    format_bit, GroupElements, FORMAT_SIZE, KEY_SIZE, MAX_GROUP_SIZE,
};

const FILE_MAGIC: &[u8; 8] = b"PDBSET\x01\x00";

/// The preset pattern partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternOption {
    Pdb555,
    Pdb663,
    Pdb78,
}

impl PatternOption {
    /// Cell labels of the partition; `[15]` stays 0 and `[14]` doubles as the
    /// group count, so the highest-numbered group always owns the last tile.
    pub fn pattern(self) -> [u8; SIZE] {
        match self {
            PatternOption::Pdb555 => [2, 2, 1, 1, 2, 3, 1, 1, 2, 3, 3, 1, 2, 3, 3, 0],
            PatternOption::Pdb663 => [1, 1, 1, 1, 1, 1, 2, 2, 3, 3, 3, 2, 3, 3, 3, 0],
            PatternOption::Pdb78 => [1, 1, 1, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 2, 2, 0],
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            PatternOption::Pdb555 => "pattern_555.db",
            PatternOption::Pdb663 => "pattern_663.db",
            PatternOption::Pdb78 => "pattern_78.db",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PatternOption::Pdb555 => "555",
            PatternOption::Pdb663 => "663",
            PatternOption::Pdb78 => "78",
        }
    }
}

/// Distance tables plus the element links the solver consults per move.
pub struct PatternDbSet {
    groups: Vec<u8>,
    distances: Vec<Vec<u8>>,
    elements: Vec<Arc<GroupElements>>,
    format_size: Vec<usize>,
    val_to_order: [u8; SIZE],
    val_to_key: [u8; SIZE],
}

struct ParsedPattern {
    groups: Vec<u8>,
    goal_formats: Vec<u32>,
    val_to_order: [u8; SIZE],
    val_to_key: [u8; SIZE],
}

impl PatternDbSet {
    /// Load a preset database from the data directory, generating and saving
    /// it when the file is absent or unreadable. The 78 set takes hours to
    /// build from scratch.
    pub fn load_or_generate(option: PatternOption, data_dir: &Path) -> Result<PatternDbSet, String> {
        let path = db_path(option, data_dir);
        match Self::load(&path, option) {
            Ok(set) => Ok(set),
            Err(err) => {
                info!(
                    "pattern database {} not usable ({}), generating",
                    option.label(),
                    err
                );
                let set = Self::from_pattern(&option.pattern())?;
                if let Err(save_err) = set.save(&path) {
                    info!("pattern database save failed: {}", save_err);
                }
                Ok(set)
            }
        }
    }

    /// Validate a partition and generate all of its group tables.
    pub fn from_pattern(pattern: &[u8; SIZE]) -> Result<PatternDbSet, String> {
        let parsed = validate_pattern(pattern)?;

        let mut element_cache: HashMap<usize, Arc<GroupElements>> = HashMap::new();
        for &group in &parsed.groups {
            element_cache
                .entry(group as usize)
                .or_insert_with(|| Arc::new(GroupElements::build(group as usize)));
        }
        let elements: Vec<Arc<GroupElements>> = parsed
            .groups
            .iter()
            .map(|&g| Arc::clone(&element_cache[&(g as usize)]))
            .collect();

        let jobs: Vec<(usize, u32)> = parsed
            .groups
            .iter()
            .zip(parsed.goal_formats.iter())
            .map(|(&g, &f)| (g as usize, f))
            .collect();
        let distances: Vec<Vec<u8>> = jobs
            .par_iter()
            .zip(elements.par_iter())
            .map(|(&(group, goal_fmt), el)| {
                info!("generating pattern group of {} tiles", group);
                if group == MAX_GROUP_SIZE {
                    gen_group_byte(goal_fmt, el)
                } else {
                    gen_group_short(group, goal_fmt, el)
                }
            })
            .collect();

        let format_size = parsed
            .groups
            .iter()
            .map(|&g| FORMAT_SIZE[g as usize])
            .collect();
        Ok(PatternDbSet {
            groups: parsed.groups,
            distances,
            elements,
            format_size,
            val_to_order: parsed.val_to_order,
            val_to_key: parsed.val_to_key,
        })
    }

    pub fn order_count(&self) -> usize {
        self.groups.len()
    }

    pub fn group_size(&self, order: usize) -> usize {
        self.groups[order] as usize
    }

    #[inline]
    pub fn distance(&self, order: usize, combo: usize) -> u8 {
        self.distances[order][combo]
    }

    pub fn elements(&self, order: usize) -> &GroupElements {
        &self.elements[order]
    }

    #[inline]
    pub fn format_size(&self, order: usize) -> usize {
        self.format_size[order]
    }

    /// Group order owning a tile value, values 1..=15.
    #[inline]
    pub fn val_to_order(&self, value: u8) -> usize {
        self.val_to_order[value as usize] as usize
    }

    /// Ordinal of a tile value within its group, values 1..=15.
    #[inline]
    pub fn val_to_key(&self, value: u8) -> usize {
        self.val_to_key[value as usize] as usize
    }

    fn load(path: &Path, option: PatternOption) -> Result<PatternDbSet, String> {
        let mut file = File::open(path).map_err(|e| format!("open {}: {}", path.display(), e))?;
        let mut magic = [0u8; 8];
        read_exact(&mut file, &mut magic)?;
        if &magic != FILE_MAGIC {
            return Err("bad file header".to_string());
        }

        let mut count = [0u8; 1];
        read_exact(&mut file, &mut count)?;
        let count = count[0] as usize;
        let mut groups = vec![0u8; count];
        read_exact(&mut file, &mut groups)?;

        // reject a stale file from a different partition
        let parsed = validate_pattern(&option.pattern())?;
        if groups != parsed.groups {
            return Err("group sizes do not match the preset pattern".to_string());
        }

        let mut val_to_key = [0u8; SIZE];
        let mut val_to_order = [0u8; SIZE];
        read_exact(&mut file, &mut val_to_key)?;
        read_exact(&mut file, &mut val_to_order)?;

        let mut distances = Vec::with_capacity(count);
        for &group in &groups {
            let group = group as usize;
            if !(2..=MAX_GROUP_SIZE).contains(&group) {
                return Err(format!("invalid group size {} in file", group));
            }
            let mut table = vec![0u8; KEY_SIZE[group] * FORMAT_SIZE[group]];
            read_exact(&mut file, &mut table)?;
            distances.push(table);
        }

        let mut element_cache: HashMap<usize, Arc<GroupElements>> = HashMap::new();
        for &group in &groups {
            element_cache
                .entry(group as usize)
                .or_insert_with(|| Arc::new(GroupElements::build(group as usize)));
        }
        let elements = groups
            .iter()
            .map(|&g| Arc::clone(&element_cache[&(g as usize)]))
            .collect();
        let format_size = groups.iter().map(|&g| FORMAT_SIZE[g as usize]).collect();

        Ok(PatternDbSet {
            groups,
            distances,
            elements,
            format_size,
            val_to_order,
            val_to_key,
        })
    }

    fn save(&self, path: &Path) -> Result<(), String> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| format!("create {}: {}", dir.display(), e))?;
        }
        let mut file =
            File::create(path).map_err(|e| format!("create {}: {}", path.display(), e))?;
        let mut write = |buf: &[u8]| -> Result<(), String> {
            file.write_all(buf)
                .map_err(|e| format!("write {}: {}", path.display(), e))
        };
        write(FILE_MAGIC)?;
        write(&[self.groups.len() as u8])?;
        write(&self.groups.clone())?;
        write(&self.val_to_key)?;
        write(&self.val_to_order)?;
        for table in &self.distances {
            write(table)?;
        }
        Ok(())
    }
}

fn db_path(option: PatternOption, data_dir: &Path) -> PathBuf {
    data_dir.join(option.file_name())
}

fn read_exact(file: &mut File, buf: &mut [u8]) -> Result<(), String> {
    io::Read::read_exact(file, buf).map_err(|e| format!("read: {}", e))
}

fn validate_pattern(pattern: &[u8; SIZE]) -> Result<ParsedPattern, String> {
    if pattern[SIZE - 1] != 0 {
        return Err("pattern cell 15 must be 0".to_string());
    }
    let count = pattern[SIZE - 2] as usize;
    if !(2..=MAX_GROUP_SIZE).contains(&count) {
        return Err(format!("pattern group count {} out of range", count));
    }

    let mut groups = vec![0u8; count];
    let mut goal_formats = vec![0u32; count];
    for (pos, &label) in pattern.iter().enumerate().take(SIZE - 1) {
        if label < 1 || label as usize > count {
            return Err(format!("pattern cell {} label {} out of range", pos, label));
        }
        let order = (label - 1) as usize;
        groups[order] += 1;
        goal_formats[order] |= format_bit(pos);
    }
    for (order, &size) in groups.iter().enumerate() {
        if !(2..=MAX_GROUP_SIZE as u8).contains(&size) {
            return Err(format!("pattern group {} has size {}", order + 1, size));
        }
    }

    let mut val_to_order = [0xFFu8; SIZE];
    let mut val_to_key = [0xFFu8; SIZE];
    for val in 1..SIZE {
        val_to_order[val] = pattern[val - 1] - 1;
    }
    for order in 0..count {
        let mut ordinal = 0u8;
        for val in 1..SIZE {
            if val_to_order[val] == order as u8 {
                val_to_key[val] = ordinal;
                ordinal += 1;
            }
        }
    }

    Ok(ParsedPattern {
        groups,
        goal_formats,
        val_to_order,
        val_to_key,
    })
}

/// Flood the blank through unoccupied cells; returns every cell it can reach.
fn free_move(init: u16, fmt: u32) -> u16 {
    let mut reach = init;
    let mut frontier = init;
    while frontier != 0 {
        let mut added = 0u16;
        for pos in 0..SIZE {
            if frontier & format_bit(pos) as u16 == 0 {
                continue;
            }
            let mut visit = |neighbor: usize| {
                let bit = format_bit(neighbor) as u16;
                if fmt & format_bit(neighbor) == 0 && reach & bit == 0 {
                    reach |= bit;
                    added |= bit;
                }
            };
            if pos % ROW_SIZE < ROW_SIZE - 1 {
                visit(pos + 1);
            }
            if pos / ROW_SIZE < ROW_SIZE - 1 {
                visit(pos + ROW_SIZE);
            }
            if pos % ROW_SIZE > 0 {
                visit(pos - 1);
            }
            if pos / ROW_SIZE > 0 {
                visit(pos - ROW_SIZE);
            }
        }
        frontier = added;
    }
    reach
}

/// Group-tile neighbors of a reachable blank cell, ascending by position.
fn tile_neighbors(zero_pos: usize, fmt: u32) -> [(usize, Move); 4] {
    let mut out = [(usize::MAX, Move::Right); 4];
    let mut n = 0;
    if zero_pos >= ROW_SIZE && fmt & format_bit(zero_pos - ROW_SIZE) != 0 {
        out[n] = (zero_pos - ROW_SIZE, Move::Up);
        n += 1;
    }
    if zero_pos % ROW_SIZE > 0 && fmt & format_bit(zero_pos - 1) != 0 {
        out[n] = (zero_pos - 1, Move::Left);
        n += 1;
    }
    if zero_pos % ROW_SIZE < ROW_SIZE - 1 && fmt & format_bit(zero_pos + 1) != 0 {
        out[n] = (zero_pos + 1, Move::Right);
        n += 1;
    }
    if zero_pos + ROW_SIZE < SIZE && fmt & format_bit(zero_pos + ROW_SIZE) != 0 {
        out[n] = (zero_pos + ROW_SIZE, Move::Down);
        n += 1;
    }
    out
}

/// Rank of an occupied position within its format.
#[inline]
fn tile_order(fmt: u32, tile_pos: usize) -> usize {
    if tile_pos == 0 {
        0
    } else {
        (fmt >> (SIZE - tile_pos)).count_ones() as usize
    }
}

/// Breadth-first table build for groups of 2 to 7, tracking pending blank
/// positions per combo in a 16-bit board mask.
fn gen_group_short(group: usize, goal_fmt: u32, el: &GroupElements) -> Vec<u8> {
    let size_fmt = FORMAT_SIZE[group];
    let total = KEY_SIZE[group] * size_fmt;
    let mut distances = vec![0u8; total];

    let goal_fmt_idx = el.format_index[&goal_fmt] as usize;
    let origin = goal_fmt_idx; // identity key index 0
    let mut curr = vec![0u16; total];
    let seed = (12..SIZE)
        .filter(|&p| goal_fmt & format_bit(p) == 0)
        .fold(0u16, |m, p| m | format_bit(p) as u16);
    curr[origin] = free_move(seed, goal_fmt);
    distances[origin] = 1;

    let mut pending = total - 1;
    let mut step = 1u8;
    while pending > 0 {
        let mut next = vec![0u16; total];
        let mut moved = false;
        for (state, &mask) in curr.iter().enumerate() {
            if mask == 0 {
                continue;
            }
            let k = state / size_fmt;
            let f = state % size_fmt;
            let fmt = el.formats_to_combo[f];
            let reach = free_move(mask, fmt);

            for zero_pos in 0..SIZE {
                if fmt & format_bit(zero_pos) != 0 || reach & format_bit(zero_pos) as u16 == 0 {
                    continue;
                }
                for &(tile_pos, mv) in tile_neighbors(zero_pos, fmt).iter() {
                    if tile_pos == usize::MAX {
                        break;
                    }
                    let order = tile_order(fmt, tile_pos);
                    let entry = el.link_format_combo[(f * group + order) * 4 + mv.value()];
                    if entry == 0 {
                        continue;
                    }
                    let next_fmt = entry >> 4;
                    let next_fmt_idx = el.format_index[&next_fmt] as usize;
                    let rot = (entry & 0xF) as usize;
                    let next_key = if rot == 0 { k } else { el.rotate_key(k, order, rot) };
                    let idx = next_key * size_fmt + next_fmt_idx;
                    if distances[idx] == 0 {
                        distances[idx] = step;
                        pending -= 1;
                    }
                    next[idx] |= format_bit(tile_pos) as u16;
                    moved = true;
                }
            }
        }
        if !moved {
            break;
        }
        step += 1;
        curr = next;
    }

    distances[origin] = 0;
    distances
}

/// Table build for the group of 8, where only 8 cells are free; pending blank
/// positions compress into one byte of free-cell ordinals.
fn gen_group_byte(goal_fmt: u32, el: &GroupElements) -> Vec<u8> {
    let group = MAX_GROUP_SIZE;
    let size_fmt = FORMAT_SIZE[group];
    let total = KEY_SIZE[group] * size_fmt;
    let mut distances = vec![0u8; total];

    let goal_fmt_idx = el.format_index[&goal_fmt] as usize;
    let origin = goal_fmt_idx;
    let mut curr = vec![0u8; total];
    curr[origin] = order_bit(zero_idx_to_pos(SIZE - 1, goal_fmt));
    distances[origin] = 1;

    let mut pending = total - 1;
    let mut step = 1u8;
    while pending > 0 {
        let mut next = vec![0u8; total];
        let mut moved = false;
        for (state, &order_mask) in curr.iter().enumerate() {
            if order_mask == 0 {
                continue;
            }
            let k = state / size_fmt;
            let f = state % size_fmt;
            let fmt = el.formats_to_combo[f];
            let reach = free_move(expand_order_mask(order_mask, fmt), fmt);

            for zero_pos in 0..SIZE {
                if fmt & format_bit(zero_pos) != 0 || reach & format_bit(zero_pos) as u16 == 0 {
                    continue;
                }
                for &(tile_pos, mv) in tile_neighbors(zero_pos, fmt).iter() {
                    if tile_pos == usize::MAX {
                        break;
                    }
                    let order = tile_order(fmt, tile_pos);
                    let entry = el.link_format_combo[(f * group + order) * 4 + mv.value()];
                    if entry == 0 {
                        continue;
                    }
                    let next_fmt = entry >> 4;
                    let next_fmt_idx = el.format_index[&next_fmt] as usize;
                    let rot = (entry & 0xF) as usize;
                    let next_key = if rot == 0 { k } else { el.rotate_key(k, order, rot) };
                    let idx = next_key * size_fmt + next_fmt_idx;
                    if distances[idx] == 0 {
                        distances[idx] = step;
                        pending -= 1;
                    }
                    next[idx] |= order_bit(zero_idx_to_pos(tile_pos, next_fmt));
                    moved = true;
                }
            }
        }
        if !moved {
            break;
        }
        step += 1;
        curr = next;
    }

    distances[origin] = 0;
    distances
}

/// Ordinal of a free cell within its format, counting free cells above it.
fn zero_idx_to_pos(zero_idx: usize, fmt: u32) -> usize {
    (0..zero_idx)
        .filter(|&p| fmt & format_bit(p) == 0)
        .count()
}

#[inline]
fn order_bit(order: usize) -> u8 {
    1 << (7 - order)
}

fn expand_order_mask(order_mask: u8, fmt: u32) -> u16 {
    let mut out = 0u16;
    let mut order = 0usize;
    for pos in 0..SIZE {
        if fmt & format_bit(pos) != 0 {
            continue;
        }
        if order_mask & order_bit(order) != 0 {
            out |= format_bit(pos) as u16;
        }
        order += 1;
    }
    out
}
