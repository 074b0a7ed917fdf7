// Incremental heuristic evaluators.
//
// Each evaluator tracks its own state down the search tree: `shift` is called
// with the frames still in their pre-move arrangement and returns the child's
// estimate plus the descend/goal verdict, and `undo` restores the state when
// the search backs out. The regular frame drives vertical arithmetic and the
// mirror frame drives horizontal arithmetic, so every family updates in O(1)
// or a single-row rescan per move.

use std::sync::Arc;

use crate::board::{manhattan, Board, Move, MIRROR_POS, MIRROR_VAL, ROW_SIZE, SIZE};
use crate::pattern::{format_bit, FORMAT_MOVE_SIZE};
use crate::pattern_db::PatternDbSet;
use crate::walking_distance::{Arrow, WalkingDistance};

/// The board and its diagonal reflection, kept in lockstep during search.
#[derive(Debug, Clone)]
pub struct Frames {
    pub tiles: [u8; SIZE],
    pub mirror: [u8; SIZE],
}

impl Frames {
    pub fn from_board(board: &Board) -> Frames {
        Frames {
            tiles: *board.tiles(),
            mirror: *board.mirror_tiles(),
        }
    }
}

/// Blank location in both frames.
#[derive(Debug, Clone, Copy)]
pub struct BlankPos {
    pub x: usize,
    pub y: usize,
    pub pos: usize,
    pub mirror: usize,
}

impl BlankPos {
    pub fn from_board(board: &Board) -> BlankPos {
        let pos = board.zero_pos() as usize;
        BlankPos {
            x: board.zero_x() as usize,
            y: board.zero_y() as usize,
            pos,
            mirror: MIRROR_POS[pos] as usize,
        }
    }

    /// Blank location after a shift. The caller guarantees the move stays on
    /// the board.
    pub fn shifted(self, mv: Move) -> BlankPos {
        match mv {
            Move::Right => BlankPos {
                x: self.x + 1,
                y: self.y,
                pos: self.pos + 1,
                mirror: self.mirror + ROW_SIZE,
            },
            Move::Down => BlankPos {
                x: self.x,
                y: self.y + 1,
                pos: self.pos + ROW_SIZE,
                mirror: self.mirror + 1,
            },
            Move::Left => BlankPos {
                x: self.x - 1,
                y: self.y,
                pos: self.pos - 1,
                mirror: self.mirror - ROW_SIZE,
            },
            Move::Up => BlankPos {
                x: self.x,
                y: self.y - 1,
                pos: self.pos - ROW_SIZE,
                mirror: self.mirror - 1,
            },
        }
    }
}

/// Swaps the blank with its neighbor in both frames; returns the new blank.
pub fn apply_move(frames: &mut Frames, pos: BlankPos, mv: Move) -> BlankPos {
    let next = pos.shifted(mv);
    frames.tiles.swap(pos.pos, next.pos);
    frames.mirror.swap(pos.mirror, next.mirror);
    next
}

/// Verdict for one candidate move.
#[derive(Debug, Clone, Copy)]
pub struct Outcome {
    /// Child's estimate, recorded for first-move ordering summaries.
    pub estimate: i32,
    /// Whether the child stays under the current limit.
    pub descend: bool,
    /// Whether the child is the goal.
    pub goal: bool,
}

/// One heuristic family with its in-flight search state.
pub enum Evaluator {
    Manhattan(MdEval),
    WalkingDist(WdEval),
    WdMd(WdMdEval),
    Pattern(PdbEval),
}

impl Evaluator {
    pub fn manhattan(linear_conflict: bool) -> Evaluator {
        Evaluator::Manhattan(MdEval {
            linear_conflict,
            stack: Vec::with_capacity(SIZE * ROW_SIZE),
        })
    }

    pub fn walking_distance(wd: Arc<WalkingDistance>) -> Evaluator {
        Evaluator::WalkingDist(WdEval {
            state: WdState::new(wd),
        })
    }

    pub fn wd_mdlc(wd: Arc<WalkingDistance>) -> Evaluator {
        Evaluator::WdMd(WdMdEval {
            state: WdState::new(wd),
            stack: Vec::with_capacity(SIZE * ROW_SIZE),
        })
    }

    pub fn pattern(db: Arc<PatternDbSet>) -> Evaluator {
        Evaluator::Pattern(PdbEval {
            db,
            combo: Vec::new(),
            val_reg: 0,
            val_mirror: 0,
            undo: Vec::with_capacity(SIZE * ROW_SIZE),
        })
    }

    /// Resets the evaluator onto a fresh root and returns its estimate, the
    /// basis the iterative deepening starts from.
    pub fn prepare(&mut self, frames: &Frames, pos: BlankPos) -> i32 {
        match self {
            Evaluator::Manhattan(eval) => {
                eval.stack.clear();
                let basis = md_estimate(&frames.tiles, &frames.mirror, eval.linear_conflict);
                eval.stack.push(basis);
                basis
            }
            Evaluator::WalkingDist(eval) => eval.state.prepare(frames, pos),
            Evaluator::WdMd(eval) => {
                let wd_sum = eval.state.prepare(frames, pos);
                let mdlc = md_estimate(&frames.tiles, &frames.mirror, true);
                eval.stack.clear();
                eval.stack.push(mdlc);
                wd_sum.max(mdlc)
            }
            Evaluator::Pattern(eval) => eval.prepare(frames),
        }
    }

    /// Evaluates one blank shift against the pre-move frames. Every call must
    /// be paired with an `undo`, descending or not.
    pub fn shift(&mut self, frames: &mut Frames, mv: Move, pos: BlankPos, limit: i32) -> Outcome {
        match self {
            Evaluator::Manhattan(eval) => {
                let current = *eval.stack.last().unwrap_or(&0);
                let estimate = md_shift(frames, mv, pos, current, eval.linear_conflict);
                eval.stack.push(estimate);
                Outcome {
                    estimate,
                    descend: estimate < limit,
                    goal: estimate == 0,
                }
            }
            Evaluator::WalkingDist(eval) => {
                let estimate = eval.state.shift(frames, mv, pos);
                Outcome {
                    estimate,
                    descend: estimate < limit,
                    goal: estimate == 0,
                }
            }
            Evaluator::WdMd(eval) => eval.shift(frames, mv, pos, limit),
            Evaluator::Pattern(eval) => {
                let estimate = eval.shift(frames, mv, pos);
                Outcome {
                    estimate,
                    descend: estimate < limit,
                    goal: estimate == 0,
                }
            }
        }
    }

    pub fn undo(&mut self) {
        match self {
            Evaluator::Manhattan(eval) => {
                eval.stack.pop();
            }
            Evaluator::WalkingDist(eval) => eval.state.undo(),
            Evaluator::WdMd(eval) => {
                eval.state.undo();
                eval.stack.pop();
            }
            Evaluator::Pattern(eval) => eval.undo(),
        }
    }

    /// Whether the position differs from its own reflection. When the blank
    /// sits on the diagonal and this is false, the mirrored half of the
    /// successor fan is a duplicate and gets pruned.
    pub fn is_not_symmetry(&self, frames: &Frames) -> bool {
        match self {
            Evaluator::Pattern(eval) => {
                let n = eval.db.order_count();
                (0..n).any(|i| eval.combo[i] != eval.combo[2 * n + i])
            }
            _ => frames.tiles != frames.mirror,
        }
    }
}

pub struct MdEval {
    linear_conflict: bool,
    stack: Vec<i32>,
}

pub struct WdEval {
    state: WdState,
}

pub struct WdMdEval {
    state: WdState,
    stack: Vec<i32>,
}

impl WdMdEval {
    // The walking distance gates first; the Manhattan side is only refined
    // when the move already survives the walking-distance cut. The stack
    // holds the pure MDLC chain; the max is only ever the reported estimate,
    // never the next parent value.
    fn shift(&mut self, frames: &mut Frames, mv: Move, pos: BlankPos, limit: i32) -> Outcome {
        let wd_est = self.state.shift(frames, mv, pos);
        if wd_est == 0 {
            self.stack.push(0);
            return Outcome {
                estimate: 0,
                descend: false,
                goal: true,
            };
        }
        if wd_est < limit {
            let current = *self.stack.last().unwrap_or(&0);
            let md_est = md_shift(frames, mv, pos, current, true);
            self.stack.push(md_est);
            Outcome {
                estimate: wd_est.max(md_est),
                descend: md_est < limit,
                goal: false,
            }
        } else {
            // Not descending; this entry is popped without being read.
            let current = *self.stack.last().unwrap_or(&0);
            self.stack.push(current);
            Outcome {
                estimate: wd_est,
                descend: false,
                goal: false,
            }
        }
    }
}

// --- Manhattan distance with optional linear conflict ---

/// Full-scan estimate: Manhattan distance, plus two per conflicting pair in
/// a goal row (and goal column, scanned as rows of the mirror frame).
pub fn md_estimate(tiles: &[u8; SIZE], mirror: &[u8; SIZE], linear_conflict: bool) -> i32 {
    let mut total = manhattan(tiles) as i32;
    if linear_conflict {
        for row in 0..ROW_SIZE {
            total += row_conflicts(tiles, row);
            total += row_conflicts(mirror, row);
        }
    }
    total
}

// Counts one conflict (worth 2 moves) per column at most: a tile in its goal
// row with a smaller goal-row mate somewhere to its right.
fn row_conflicts(tiles: &[u8; SIZE], row: usize) -> i32 {
    let base = row * ROW_SIZE;
    let low = base as u8;
    let high = low + ROW_SIZE as u8;
    let mut total = 0;
    for col in 0..ROW_SIZE {
        let val = tiles[base + col];
        if val > low && val <= high {
            for col2 in col + 1..ROW_SIZE {
                let val2 = tiles[base + col2];
                if val2 > low && val2 < val {
                    total += 2;
                    break;
                }
            }
        }
    }
    total
}

fn md_shift(frames: &mut Frames, mv: Move, pos: BlankPos, current: i32, lc: bool) -> i32 {
    match mv {
        // Horizontal moves run in the mirror frame, where they turn vertical.
        Move::Right => {
            let value = frames.mirror[pos.mirror + ROW_SIZE];
            let goal = (value as usize - 1) / ROW_SIZE;
            let estimate = current + if goal > pos.x { 1 } else { -1 };
            if lc {
                update_linear_conflict(&mut frames.mirror, pos.y, pos.x, goal, estimate, value, 1)
            } else {
                estimate
            }
        }
        Move::Left => {
            let value = frames.mirror[pos.mirror - ROW_SIZE];
            let goal = (value as usize - 1) / ROW_SIZE;
            let estimate = current + if goal < pos.x { 1 } else { -1 };
            if lc {
                update_linear_conflict(&mut frames.mirror, pos.y, pos.x, goal, estimate, value, -1)
            } else {
                estimate
            }
        }
        Move::Down => {
            let value = frames.tiles[pos.pos + ROW_SIZE];
            let goal = (value as usize - 1) / ROW_SIZE;
            let estimate = current + if goal > pos.y { 1 } else { -1 };
            if lc {
                update_linear_conflict(&mut frames.tiles, pos.x, pos.y, goal, estimate, value, 1)
            } else {
                estimate
            }
        }
        Move::Up => {
            let value = frames.tiles[pos.pos - ROW_SIZE];
            let goal = (value as usize - 1) / ROW_SIZE;
            let estimate = current + if goal < pos.y { 1 } else { -1 };
            if lc {
                update_linear_conflict(&mut frames.tiles, pos.x, pos.y, goal, estimate, value, -1)
            } else {
                estimate
            }
        }
    }
}

// Rescans the one row whose conflict count can change when a tile slides
// vertically: the row it enters (the blank's row) or the row it leaves.
// `diff` is +1 when the tile comes from below the blank, -1 from above.
// Temporary placements are reverted before returning; the real swap happens
// in `apply_move`.
fn update_linear_conflict(
    tiles_set: &mut [u8; SIZE],
    x: usize,
    y: usize,
    row_id: usize,
    mut priority: i32,
    value: u8,
    diff: i32,
) -> i32 {
    if row_id == y {
        priority -= row_conflicts(tiles_set, y);
        tiles_set[y * ROW_SIZE + x] = value;
        priority += row_conflicts(tiles_set, y);
        tiles_set[y * ROW_SIZE + x] = 0;
    } else if row_id as i32 == y as i32 + diff {
        let row = (y as i32 + diff) as usize;
        let cell = row * ROW_SIZE + x;
        priority -= row_conflicts(tiles_set, row);
        let saved = tiles_set[cell];
        tiles_set[cell] = 0;
        priority += row_conflicts(tiles_set, row);
        tiles_set[cell] = saved;
    }
    priority
}

// --- Walking distance ---

struct WdState {
    wd: Arc<WalkingDistance>,
    idx_v: usize,
    idx_h: usize,
    val_v: i32,
    val_h: i32,
    undo: Vec<(usize, usize, i32, i32)>,
}

impl WdState {
    fn new(wd: Arc<WalkingDistance>) -> WdState {
        WdState {
            wd,
            idx_v: 0,
            idx_h: 0,
            val_v: 0,
            val_h: 0,
            undo: Vec::with_capacity(SIZE * ROW_SIZE),
        }
    }

    fn prepare(&mut self, frames: &Frames, pos: BlankPos) -> i32 {
        self.undo.clear();
        self.idx_v = self.wd.index_vertical(&frames.tiles, pos.y);
        self.idx_h = self.wd.index_vertical(&frames.mirror, pos.x);
        self.val_v = self.wd.value(self.idx_v) as i32;
        self.val_h = self.wd.value(self.idx_h) as i32;
        self.val_v + self.val_h
    }

    fn shift(&mut self, frames: &Frames, mv: Move, pos: BlankPos) -> i32 {
        self.undo.push((self.idx_v, self.idx_h, self.val_v, self.val_h));
        match mv {
            Move::Right => {
                let value = frames.tiles[pos.pos + 1] as usize;
                let next = self.wd.advance(self.idx_h, (value - 1) % ROW_SIZE, Arrow::Forward);
                self.idx_h = next as usize;
                self.val_h = self.wd.value(self.idx_h) as i32;
            }
            Move::Left => {
                let value = frames.tiles[pos.pos - 1] as usize;
                let next = self.wd.advance(self.idx_h, (value - 1) % ROW_SIZE, Arrow::Backward);
                self.idx_h = next as usize;
                self.val_h = self.wd.value(self.idx_h) as i32;
            }
            Move::Down => {
                let value = frames.tiles[pos.pos + ROW_SIZE] as usize;
                let next = self.wd.advance(self.idx_v, (value - 1) / ROW_SIZE, Arrow::Forward);
                self.idx_v = next as usize;
                self.val_v = self.wd.value(self.idx_v) as i32;
            }
            Move::Up => {
                let value = frames.tiles[pos.pos - ROW_SIZE] as usize;
                let next = self.wd.advance(self.idx_v, (value - 1) / ROW_SIZE, Arrow::Backward);
                self.idx_v = next as usize;
                self.val_v = self.wd.value(self.idx_v) as i32;
            }
        }
        self.val_v + self.val_h
    }

    fn undo(&mut self) {
        if let Some((idx_v, idx_h, val_v, val_h)) = self.undo.pop() {
            self.idx_v = idx_v;
            self.idx_h = idx_h;
            self.val_v = val_v;
            self.val_h = val_h;
        }
    }
}

// --- Additive pattern database ---

pub struct PdbEval {
    db: Arc<PatternDbSet>,
    // Layout with n groups: [0,n) regular combos, [n,2n) regular values,
    // [2n,3n) mirror combos, [3n,4n) mirror values.
    combo: Vec<usize>,
    val_reg: i32,
    val_mirror: i32,
    undo: Vec<PdbUndo>,
}

struct PdbUndo {
    reg_order: usize,
    reg_combo: usize,
    reg_val: usize,
    mir_order: usize,
    mir_combo: usize,
    mir_val: usize,
    val_reg: i32,
    val_mirror: i32,
}

impl PdbEval {
    fn prepare(&mut self, frames: &Frames) -> i32 {
        let n = self.db.order_count();
        let reg = frame_combos(&self.db, &frames.tiles);
        let mirror = frame_combos(&self.db, &frames.mirror);

        self.combo = vec![0usize; 4 * n];
        self.val_reg = 0;
        self.val_mirror = 0;
        for order in 0..n {
            let reg_val = self.db.distance(order, reg[order]) as usize;
            let mir_val = self.db.distance(order, mirror[order]) as usize;
            self.combo[order] = reg[order];
            self.combo[n + order] = reg_val;
            self.combo[2 * n + order] = mirror[order];
            self.combo[3 * n + order] = mir_val;
            self.val_reg += reg_val as i32;
            self.val_mirror += mir_val as i32;
        }
        self.undo.clear();
        self.val_reg.max(self.val_mirror)
    }

    fn shift(&mut self, frames: &Frames, mv: Move, pos: BlankPos) -> i32 {
        let n = self.db.order_count();
        let (value, offset) = match mv {
            Move::Right => (frames.tiles[pos.pos + 1], 0),
            Move::Down => (frames.tiles[pos.pos + ROW_SIZE], 0),
            Move::Left => (frames.tiles[pos.pos - 1], 2),
            Move::Up => (frames.tiles[pos.pos - ROW_SIZE], 2),
        };
        let reg_order = self.db.val_to_order(value);
        let mir_order = self.db.val_to_order(MIRROR_VAL[value as usize]);
        let mir_idx = 2 * n + mir_order;

        self.undo.push(PdbUndo {
            reg_order,
            reg_combo: self.combo[reg_order],
            reg_val: self.combo[n + reg_order],
            mir_order,
            mir_combo: self.combo[mir_idx],
            mir_val: self.combo[3 * n + mir_order],
            val_reg: self.val_reg,
            val_mirror: self.val_mirror,
        });

        // A horizontal move is a column move of the mirror frame and vice
        // versa, so one frame takes the in-row link and the other the
        // reordering vertical link.
        match mv {
            Move::Right | Move::Left => {
                self.shift_in_row(pos.pos, reg_order, reg_order, offset);
                self.shift_across_rows(pos.mirror, mir_order, mir_idx, offset);
            }
            Move::Down | Move::Up => {
                self.shift_in_row(pos.mirror, mir_order, mir_idx, offset);
                self.shift_across_rows(pos.pos, reg_order, reg_order, offset);
            }
        }

        let reg_dist = self.db.distance(reg_order, self.combo[reg_order]) as i32;
        self.val_reg += reg_dist - self.combo[n + reg_order] as i32;
        self.combo[n + reg_order] = reg_dist as usize;

        let mir_dist = self.db.distance(mir_order, self.combo[mir_idx]) as i32;
        self.val_mirror += mir_dist - self.combo[3 * n + mir_order] as i32;
        self.combo[3 * n + mir_order] = mir_dist as usize;

        self.val_reg.max(self.val_mirror)
    }

    fn undo(&mut self) {
        let n = self.db.order_count();
        if let Some(token) = self.undo.pop() {
            self.combo[token.reg_order] = token.reg_combo;
            self.combo[n + token.reg_order] = token.reg_val;
            self.combo[2 * n + token.mir_order] = token.mir_combo;
            self.combo[3 * n + token.mir_order] = token.mir_val;
            self.val_reg = token.val_reg;
            self.val_mirror = token.val_mirror;
        }
    }

    // Tile slides within its row: the key order is untouched.
    fn shift_in_row(&mut self, zero_pos: usize, order: usize, combo_idx: usize, offset: usize) {
        let el = self.db.elements(order);
        let fmt_size = self.db.format_size(order);
        let combo = self.combo[combo_idx];
        let old_fmt = combo % fmt_size;
        let entry =
            el.link_format_move[old_fmt * FORMAT_MOVE_SIZE + zero_pos * 4 + offset] as usize;
        self.combo[combo_idx] = combo + (entry >> 8) - old_fmt;
    }

    // Tile slides between rows and may pass group mates, rotating the key.
    fn shift_across_rows(&mut self, zero_pos: usize, order: usize, combo_idx: usize, offset: usize) {
        let el = self.db.elements(order);
        let fmt_size = self.db.format_size(order);
        let combo = self.combo[combo_idx];
        let old_fmt = combo % fmt_size;
        let entry =
            el.link_format_move[old_fmt * FORMAT_MOVE_SIZE + zero_pos * 4 + 1 + offset] as usize;
        let shift_code = entry & 0xF;
        if shift_code > 0 {
            let key = combo / fmt_size;
            let slot = (entry >> 4) & 0xF;
            let next_key = el.rotate_key(key, slot, shift_code);
            self.combo[combo_idx] = next_key * fmt_size + (entry >> 8);
        } else {
            self.combo[combo_idx] = combo + (entry >> 8) - old_fmt;
        }
    }
}

// Packs each group's occupancy bits and tile order from one frame into its
// combo index.
fn frame_combos(db: &PatternDbSet, tiles: &[u8; SIZE]) -> Vec<usize> {
    let n = db.order_count();
    let mut fmts = vec![0u32; n];
    let mut keys = vec![0u32; n];
    for (pos, &value) in tiles.iter().enumerate() {
        if value == 0 {
            continue;
        }
        let order = db.val_to_order(value);
        fmts[order] |= format_bit(pos);
        keys[order] = (keys[order] << 4) | db.val_to_key(value) as u32;
    }
    (0..n)
        .map(|order| {
            let el = db.elements(order);
            let key_idx = el.key_index[&keys[order]] as usize;
            let fmt_idx = el.format_index[&fmts[order]] as usize;
            key_idx * db.format_size(order) + fmt_idx
        })
        .collect()
}
