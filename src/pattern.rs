// Detached element tables for the additive pattern databases.
//
// A pattern group of size g tracks g tiles and ignores the rest of the board.
// Its state splits into a format (which cells the group occupies, a 16-bit
// mask) and a key (the order the group's tiles appear in, scanning the board
// row by row). Keys are permutations of 0..g packed 4 bits per slot; formats
// and keys are kept in sorted order so the packed value maps to a stable
// index. The link tables answer "blank swaps with a group tile" in O(1):
// the next format index plus a rotation code when a vertical move slides the
// tile past group mates and reorders the key.

use std::collections::HashMap;

use crate::board::{Move, ROW_SIZE, SIZE};

pub const MAX_GROUP_SIZE: usize = 8;

/// Permutation count g! per group size.
pub const KEY_SIZE: [usize; MAX_GROUP_SIZE + 1] = [1, 1, 2, 6, 24, 120, 720, 5040, 40320];
/// Occupancy mask count C(16, g) per group size.
pub const FORMAT_SIZE: [usize; MAX_GROUP_SIZE + 1] =
    [1, 16, 120, 560, 1820, 4368, 8008, 11440, 12870];
/// A vertical move slides a tile past at most 3 group mates.
pub const MAX_SHIFT: [usize; MAX_GROUP_SIZE + 1] = [0, 0, 1, 2, 3, 3, 3, 3, 3];

/// 16 blank positions x 4 directions.
pub const FORMAT_MOVE_SIZE: usize = 64;
pub const KEY_BIT_SIZE: u32 = 4;

/// Format bit for a board position, position 0 in the top bit.
#[inline]
pub fn format_bit(pos: usize) -> u32 {
    1 << (15 - pos)
}

/// Element tables for one group size.
pub struct GroupElements {
    pub group: usize,
    pub max_shift_x2: usize,
    /// Key index to packed permutation.
    pub keys_to_combo: Vec<u32>,
    /// Packed permutation to key index.
    pub key_index: HashMap<u32, u32>,
    /// Format index to occupancy bits.
    pub formats_to_combo: Vec<u32>,
    /// Occupancy bits to format index.
    pub format_index: HashMap<u32, u32>,
    /// `[key_idx * group * max_shift_x2 + slot * max_shift_x2 + code]` ->
    /// key index after the slot's element shifts. Even codes shift left
    /// (tile moved up the board), odd codes shift right (tile moved down),
    /// by `code / 2 + 1` slots.
    pub rotate_key_by_pos: Vec<u32>,
    /// `[fmt_idx * 64 + zero_pos * 4 + move]` ->
    /// `(next_fmt_idx << 8) | (tile_order << 4) | shift_code`, for the solver.
    pub link_format_move: Vec<u32>,
    /// `[fmt_idx * group * 4 + tile_order * 4 + move]` ->
    /// `(next_fmt_bits << 4) | shift_code`, for the database generator.
    pub link_format_combo: Vec<u32>,
}

impl GroupElements {
    pub fn build(group: usize) -> GroupElements {
        debug_assert!((2..=MAX_GROUP_SIZE).contains(&group));
        let max_shift_x2 = MAX_SHIFT[group] * 2;

        let perms = permutations(group);
        let keys_to_combo: Vec<u32> = perms.iter().map(|p| pack_key(p)).collect();
        let key_index: HashMap<u32, u32> = keys_to_combo
            .iter()
            .enumerate()
            .map(|(i, &k)| (k, i as u32))
            .collect();

        let mut formats_to_combo = Vec::with_capacity(FORMAT_SIZE[group]);
        for bits in 0..=0xFFFFu32 {
            if bits.count_ones() as usize == group {
                formats_to_combo.push(bits);
            }
        }
        let format_index: HashMap<u32, u32> = formats_to_combo
            .iter()
            .enumerate()
            .map(|(i, &f)| (f, i as u32))
            .collect();

        let rotate_key_by_pos =
            build_rotate_table(group, max_shift_x2, &perms, &key_index);
        let (link_format_move, link_format_combo) =
            build_link_tables(group, &formats_to_combo, &format_index);

        GroupElements {
            group,
            max_shift_x2,
            keys_to_combo,
            key_index,
            formats_to_combo,
            format_index,
            rotate_key_by_pos,
            link_format_move,
            link_format_combo,
        }
    }

    /// Key index after the element at `slot` rotates by the 1-based shift
    /// code from a link table entry.
    #[inline]
    pub fn rotate_key(&self, key_idx: usize, slot: usize, shift_code: usize) -> usize {
        self.rotate_key_by_pos
            [(key_idx * self.group + slot) * self.max_shift_x2 + shift_code - 1] as usize
    }
}

fn pack_key(perm: &[u8]) -> u32 {
    perm.iter()
        .fold(0u32, |acc, &v| (acc << KEY_BIT_SIZE) | u32::from(v))
}

/// All permutations of 0..group in lexicographic order, so the packed values
/// come out sorted and the identity lands at index 0.
fn permutations(group: usize) -> Vec<Vec<u8>> {
    let mut out = Vec::with_capacity(KEY_SIZE[group]);
    let mut current: Vec<u8> = Vec::with_capacity(group);
    let mut used = vec![false; group];
    expand_perms(group, &mut current, &mut used, &mut out);
    out
}

fn expand_perms(group: usize, current: &mut Vec<u8>, used: &mut [bool], out: &mut Vec<Vec<u8>>) {
    if current.len() == group {
        out.push(current.clone());
        return;
    }
    for v in 0..group {
        if !used[v] {
            used[v] = true;
            current.push(v as u8);
            expand_perms(group, current, used, out);
            current.pop();
            used[v] = false;
        }
    }
}

fn build_rotate_table(
    group: usize,
    max_shift_x2: usize,
    perms: &[Vec<u8>],
    key_index: &HashMap<u32, u32>,
) -> Vec<u32> {
    let mut table = vec![0u32; KEY_SIZE[group] * group * max_shift_x2];
    let mut scratch: Vec<u8> = Vec::with_capacity(group);
    for (key_idx, perm) in perms.iter().enumerate() {
        for slot in 0..group {
            let base = (key_idx * group + slot) * max_shift_x2;
            for shift in 1..=MAX_SHIFT[group] {
                // odd codes: element moves right (toward higher slots)
                if slot + shift < group {
                    scratch.clear();
                    scratch.extend_from_slice(perm);
                    let v = scratch.remove(slot);
                    scratch.insert(slot + shift, v);
                    table[base + shift * 2 - 1] = key_index[&pack_key(&scratch)];
                }
                // even codes: element moves left
                if slot >= shift {
                    scratch.clear();
                    scratch.extend_from_slice(perm);
                    let v = scratch.remove(slot);
                    scratch.insert(slot - shift, v);
                    table[base + (shift - 1) * 2] = key_index[&pack_key(&scratch)];
                }
            }
        }
    }
    table
}

fn build_link_tables(
    group: usize,
    formats_to_combo: &[u32],
    format_index: &HashMap<u32, u32>,
) -> (Vec<u32>, Vec<u32>) {
    let dir_size = 4;
    let mut link_move = vec![0u32; FORMAT_SIZE[group] * FORMAT_MOVE_SIZE];
    let mut link_combo = vec![0u32; FORMAT_SIZE[group] * group * dir_size];

    for (fmt_idx, &fmt) in formats_to_combo.iter().enumerate() {
        let mut tile_order = 0usize;
        for pos in 0..SIZE {
            if fmt & format_bit(pos) == 0 {
                continue;
            }
            let base = fmt ^ format_bit(pos);
            let mut next: [Option<u32>; 4] = [None; 4];
            let mut shift = [0u32; 4];

            // blank right, tile left
            if pos % ROW_SIZE > 0 && fmt & format_bit(pos - 1) == 0 {
                next[Move::Right.value()] = Some(base | format_bit(pos - 1));
            }
            // blank down, tile up; passing group mates reorders the key
            if pos / ROW_SIZE > 0 && fmt & format_bit(pos - ROW_SIZE) == 0 {
                next[Move::Down.value()] = Some(base | format_bit(pos - ROW_SIZE));
                let passed = (1..ROW_SIZE)
                    .filter(|&s| fmt & format_bit(pos - s) != 0)
                    .count();
                if passed > 0 {
                    shift[Move::Down.value()] = (passed * 2 - 1) as u32;
                }
            }
            // blank left, tile right
            if pos % ROW_SIZE < ROW_SIZE - 1 && fmt & format_bit(pos + 1) == 0 {
                next[Move::Left.value()] = Some(base | format_bit(pos + 1));
            }
            // blank up, tile down
            if pos / ROW_SIZE < ROW_SIZE - 1 && fmt & format_bit(pos + ROW_SIZE) == 0 {
                next[Move::Up.value()] = Some(base | format_bit(pos + ROW_SIZE));
                let passed = (1..ROW_SIZE)
                    .filter(|&s| fmt & format_bit(pos + s) != 0)
                    .count();
                if passed > 0 {
                    shift[Move::Up.value()] = (passed * 2) as u32;
                }
            }

            for mv in 0..dir_size {
                if let Some(next_fmt) = next[mv] {
                    let zero_pos = match Move::ALL[mv] {
                        Move::Right => pos - 1,
                        Move::Down => pos - ROW_SIZE,
                        Move::Left => pos + 1,
                        Move::Up => pos + ROW_SIZE,
                    };
                    link_combo[(fmt_idx * group + tile_order) * dir_size + mv] =
                        (next_fmt << KEY_BIT_SIZE) | shift[mv];
                    link_move[fmt_idx * FORMAT_MOVE_SIZE + zero_pos * dir_size + mv] =
                        (format_index[&next_fmt] << (KEY_BIT_SIZE * 2))
                            | ((tile_order as u32) << KEY_BIT_SIZE)
                            | shift[mv];
                }
            }
            tile_order += 1;
        }
    }
    (link_move, link_combo)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_sizes_match_group_counts() {
        for group in 2..=4 {
            let el = GroupElements::build(group);
            assert_eq!(el.keys_to_combo.len(), KEY_SIZE[group]);
            assert_eq!(el.formats_to_combo.len(), FORMAT_SIZE[group]);
            assert_eq!(
                el.rotate_key_by_pos.len(),
                KEY_SIZE[group] * group * MAX_SHIFT[group] * 2
            );
            assert_eq!(el.link_format_move.len(), FORMAT_SIZE[group] * FORMAT_MOVE_SIZE);
        }
    }

    #[test]
    fn identity_key_is_index_zero() {
        let el = GroupElements::build(3);
        assert_eq!(el.keys_to_combo[0], 0x012);
        assert_eq!(el.key_index[&0x012], 0);
    }

    #[test]
    fn rotate_moves_element_between_slots() {
        let el = GroupElements::build(3);
        // [0, 1, 2] with slot 0 shifted right once -> [1, 0, 2]
        let from = el.key_index[&0x012] as usize;
        let to = el.key_index[&0x102] as usize;
        assert_eq!(el.rotate_key(from, 0, 1), to);
        // and slot 1 shifted left once undoes it
        assert_eq!(el.rotate_key(to, 1, 2), from);
    }

    #[test]
    fn vertical_link_reorders_key_past_group_mate() {
        // Tiles of a 2-group at positions 4 (second in key order is at 6):
        // key order by board position is [rel 1 at 4, rel 0 at 6] = 0x10.
        let el = GroupElements::build(2);
        let fmt = format_bit(4) | format_bit(6);
        let fmt_idx = el.format_index[&fmt] as usize;

        // Blank at 8, blank moves up: tile at 4 slides down past position 6.
        let entry =
            el.link_format_move[fmt_idx * FORMAT_MOVE_SIZE + 8 * 4 + Move::Up.value()];
        assert_ne!(entry, 0);
        let next_fmt_idx = (entry >> 8) as usize;
        let tile_order = ((entry >> 4) & 0xF) as usize;
        let shift_code = (entry & 0xF) as usize;

        assert_eq!(tile_order, 0, "moved tile is the first occupied cell");
        assert_eq!(shift_code, 2, "one group mate passed, tile moved down");
        let expect_fmt = format_bit(6) | format_bit(8);
        assert_eq!(el.formats_to_combo[next_fmt_idx], expect_fmt);

        let key_before = el.key_index[&0x10] as usize;
        let key_after = el.rotate_key(key_before, tile_order, shift_code);
        assert_eq!(el.keys_to_combo[key_after], 0x01);
    }

    #[test]
    fn horizontal_link_keeps_key() {
        let el = GroupElements::build(2);
        let fmt = format_bit(1) | format_bit(2);
        let fmt_idx = el.format_index[&fmt] as usize;

        // Blank at 0, blank moves right: tile at 1 slides left, no reorder.
        let entry =
            el.link_format_move[fmt_idx * FORMAT_MOVE_SIZE + 0 * 4 + Move::Right.value()];
        assert_ne!(entry, 0);
        assert_eq!(entry & 0xF, 0, "horizontal moves never rotate the key");
        let next_fmt_idx = (entry >> 8) as usize;
        assert_eq!(
            el.formats_to_combo[next_fmt_idx],
            format_bit(0) | format_bit(2)
        );
    }
}
