// Iterative deepening A* engine.
//
// The depth-first walk is shared by every heuristic family: the evaluator
// supplies estimates move by move while the engine owns move ordering, the
// rotation-chain cut, mirror symmetry pruning and the timeout. Successors
// fan out relative to the previous move: continue straight first, then the
// two turns, which keeps the blank's rotation history meaningful.

use std::time::Duration;

use log::debug;

use crate::board::{Board, Move, DIR_SIZE, MAX_MOVE, ROW_SIZE};
use crate::heuristic::{apply_move, BlankPos, Evaluator, Frames};
use crate::stopwatch::Stopwatch;

/// Sentinel estimate: no solution within the 80-move diameter.
pub const END_OF_SEARCH: i32 = (MAX_MOVE + 1) as i32;
/// Node budget per first move for the advanced-order pre-scan.
pub const DFS_REVIEW_LIMIT: i32 = 10000;
/// Moves replayed from a stored solution before searching the remainder.
pub const NUM_PARTIAL_MOVES: usize = 8;

// Rotation chain codes, two bits per turn. Six same-way turns bring the
// blank full circle, so a half cycle of chained turns going one way (five
// clockwise, or four counterclockwise since the mirror covers the rest)
// can never start an optimal continuation.
const RESET_VAL: i32 = 0;
const CW_VAL: i32 = 1;
const CCW_VAL: i32 = 2;
const CW_HALF_CYCLE: i32 = 0x155;
const CW_HALF_BITS: i32 = 0x03FF;
const CCW_HALF_CYCLE: i32 = 0xAA;
const CCW_HALF_BITS: i32 = 0x00FF;

#[inline]
fn is_valid_clockwise(chain: i32) -> bool {
    chain & CW_HALF_BITS != CW_HALF_CYCLE
}

#[inline]
fn is_valid_counterclockwise(chain: i32) -> bool {
    chain & CCW_HALF_BITS != CCW_HALF_CYCLE
}

/// Result of one solve run.
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub solved: bool,
    pub timeout: bool,
    pub moves: Vec<Move>,
    pub node_count: u64,
    pub seconds: f64,
    /// Deepest limit searched; equals the solution length when solved.
    pub depth: i32,
}

/// One evaluator plus the mutable search bookkeeping.
pub struct Search {
    eval: Evaluator,
    timeout_limit: Option<f64>,
    frames: Frames,
    stopwatch: Stopwatch,
    solution_buf: [Move; MAX_MOVE + 1],
    terminated: bool,
    solved: bool,
    search_timeout: bool,
    steps: usize,
    ida_count: u64,
    count_base: u64,
    search_depth: i32,
    last_depth_summary: [i32; DIR_SIZE * 2],
}

impl Search {
    pub fn new(eval: Evaluator, timeout_limit: Option<Duration>) -> Search {
        Search {
            eval,
            timeout_limit: timeout_limit.map(|d| d.as_secs_f64()),
            frames: Frames {
                tiles: [0; 16],
                mirror: [0; 16],
            },
            stopwatch: Stopwatch::new(),
            solution_buf: [Move::Right; MAX_MOVE + 1],
            terminated: false,
            solved: false,
            search_timeout: false,
            steps: 0,
            ida_count: 0,
            count_base: 0,
            search_depth: 0,
            last_depth_summary: [0; DIR_SIZE * 2],
        }
    }

    pub fn set_timeout(&mut self, limit: Option<Duration>) {
        self.timeout_limit = limit.map(|cap| cap.as_secs_f64());
    }

    /// Sets the evaluator onto the board and returns its estimate. Does not
    /// search; the caller may raise the starting limit before `solve`.
    pub fn heuristic_basis(&mut self, board: &Board) -> i32 {
        self.frames = Frames::from_board(board);
        self.eval.prepare(&self.frames, BlankPos::from_board(board))
    }

    /// Runs iterative deepening from `start_limit`, raising the limit by two
    /// per round. `advanced_scan` runs cheap shallow rounds first to settle
    /// the first-move order before the costly deep rounds.
    pub fn solve(&mut self, board: &Board, start_limit: i32, advanced_scan: bool) -> SearchReport {
        self.clear_history();
        if board.is_goal() {
            self.solved = true;
            return self.report();
        }

        self.stopwatch = Stopwatch::started();
        self.frames = Frames::from_board(board);
        let pos = BlankPos::from_board(board);
        let basis = self.eval.prepare(&self.frames, pos);
        self.reset_depth_summary(board);
        self.ida_star(pos, start_limit.max(basis), basis, advanced_scan);
        self.stopwatch.stop();
        self.report()
    }

    /// Replays the first moves of a known solution, then searches only the
    /// remainder at the exact depth. The first seven moves are applied to
    /// the board and the eighth is pinned as the only root move.
    pub fn solve_from_partial(
        &mut self,
        board: &Board,
        depth: i32,
        partial: &[Move],
    ) -> Result<SearchReport, String> {
        if partial.len() < NUM_PARTIAL_MOVES {
            return Err(format!(
                "partial solution too short: {} moves",
                partial.len()
            ));
        }
        self.clear_history();
        self.stopwatch = Stopwatch::started();

        let mut advanced = board.clone();
        for &mv in &partial[..NUM_PARTIAL_MOVES - 1] {
            advanced = advanced
                .shift(mv)
                .ok_or_else(|| format!("partial solution move {:?} runs off the board", mv))?;
        }
        self.frames = Frames::from_board(&advanced);
        let pos = BlankPos::from_board(&advanced);
        self.eval.prepare(&self.frames, pos);
        self.pin_depth_summary(partial[NUM_PARTIAL_MOVES - 1]);

        self.ida_count = NUM_PARTIAL_MOVES as u64;
        self.search_depth = depth;
        let sub_limit = depth - NUM_PARTIAL_MOVES as i32 + 1;
        self.dfs_starting_order(pos, sub_limit);
        self.count_base = self.ida_count;
        self.stopwatch.stop();

        if self.solved {
            let mut moves = partial[..NUM_PARTIAL_MOVES - 1].to_vec();
            moves.extend_from_slice(&self.solution_buf[1..=self.steps]);
            Ok(SearchReport {
                solved: true,
                timeout: false,
                moves,
                node_count: self.count_base,
                seconds: self.stopwatch.seconds(),
                depth,
            })
        } else {
            Ok(self.report())
        }
    }

    /// Searches a bounded window of limits, stepping by two, and returns
    /// the solution length when one turns up inside the window. Used to
    /// measure how far a board sits from a stored reference board.
    pub fn solve_within(&mut self, board: &Board, lower: i32, upper: i32) -> Option<i32> {
        if lower > upper {
            return None;
        }
        self.clear_history();
        if board.is_goal() {
            return Some(0);
        }
        self.stopwatch = Stopwatch::started();
        self.frames = Frames::from_board(board);
        let pos = BlankPos::from_board(board);
        self.eval.prepare(&self.frames, pos);
        self.reset_depth_summary(board);

        let mut limit = lower;
        while limit <= upper {
            self.ida_count = 0;
            self.search_depth = limit;
            self.dfs_starting_order(pos, limit);
            self.count_base += self.ida_count;
            if self.solved {
                self.stopwatch.stop();
                return Some(self.steps as i32);
            }
            limit += 2;
        }
        self.stopwatch.stop();
        None
    }

    fn report(&self) -> SearchReport {
        SearchReport {
            solved: self.solved,
            timeout: self.search_timeout,
            moves: if self.solved {
                self.solution_buf[1..=self.steps].to_vec()
            } else {
                Vec::new()
            },
            node_count: self.count_base,
            seconds: self.stopwatch.seconds(),
            depth: if self.solved {
                self.steps as i32
            } else {
                self.search_depth
            },
        }
    }

    fn clear_history(&mut self) {
        self.solved = false;
        self.terminated = false;
        self.search_timeout = false;
        self.steps = 0;
        self.ida_count = 0;
        self.count_base = 0;
        self.search_depth = 0;
        self.solution_buf = [Move::Right; MAX_MOVE + 1];
        self.last_depth_summary = [0; DIR_SIZE * 2];
    }

    fn reset_depth_summary(&mut self, board: &Board) {
        self.last_depth_summary = [0; DIR_SIZE * 2];
        let valid = board.valid_moves();
        for i in 0..DIR_SIZE {
            if valid[i] {
                self.last_depth_summary[i + DIR_SIZE] = 1;
            } else {
                self.last_depth_summary[i] = END_OF_SEARCH;
            }
        }
    }

    // Restrict the root fan to a single known direction.
    fn pin_depth_summary(&mut self, dir: Move) {
        self.last_depth_summary = [0; DIR_SIZE * 2];
        for i in 0..DIR_SIZE {
            if i == dir.value() {
                self.last_depth_summary[i + DIR_SIZE] = 1;
            } else {
                self.last_depth_summary[i] = END_OF_SEARCH;
            }
        }
    }

    fn ida_star(&mut self, pos: BlankPos, init_limit: i32, basis: i32, advanced_scan: bool) {
        let mut limit = init_limit;
        self.count_base = 0;

        if advanced_scan {
            let open_dirs = (0..DIR_SIZE)
                .filter(|&i| self.last_depth_summary[i + DIR_SIZE] > 0)
                .count();
            // shallow rounds settle the first-move order cheaply; stop once
            // one direction blows past the review budget
            if open_dirs > 1 {
                let mut scan_limit = basis;
                while scan_limit < limit {
                    self.ida_count = 0;
                    self.search_depth = scan_limit;
                    self.dfs_starting_order(pos, scan_limit);
                    scan_limit += 2;
                    let overload = (DIR_SIZE..DIR_SIZE * 2)
                        .any(|i| self.last_depth_summary[i] > DFS_REVIEW_LIMIT);
                    if overload {
                        break;
                    }
                }
            }
        }

        while limit <= MAX_MOVE as i32 {
            self.ida_count = 0;
            self.search_depth = limit;
            self.dfs_starting_order(pos, limit);
            self.count_base += self.ida_count;

            if self.search_timeout {
                debug!("ida limit {}: {} nodes, timeout", limit, self.ida_count);
                return;
            }
            debug!("ida limit {}: {} nodes", limit, self.ida_count);
            if self.solved {
                return;
            }
            limit += 2;
        }
    }

    // Searches the root moves one at a time, least estimate first with node
    // count as the tie break, feeding each result back into the summary that
    // orders the next deepening round.
    fn dfs_starting_order(&mut self, pos: BlankPos, limit: i32) {
        let mut estimate_first = self.last_depth_summary;
        let mut estimate = limit;

        while !self.terminated && estimate != END_OF_SEARCH {
            let mut first_idx = DIR_SIZE;
            let mut node_count = i32::MAX;
            estimate = END_OF_SEARCH;

            for i in 0..DIR_SIZE {
                if estimate_first[i] == END_OF_SEARCH {
                    continue;
                } else if self.last_depth_summary[i] < estimate {
                    estimate = estimate_first[i];
                    node_count = self.last_depth_summary[i + DIR_SIZE];
                    first_idx = i;
                } else if self.last_depth_summary[i] == estimate
                    && self.last_depth_summary[i + DIR_SIZE] < node_count
                {
                    node_count = self.last_depth_summary[i + DIR_SIZE];
                    first_idx = i;
                }
            }

            if estimate < END_OF_SEARCH {
                let start_counter = self.ida_count;
                self.ida_count += 1;
                self.last_depth_summary[first_idx] =
                    self.shift(pos, 1, limit, RESET_VAL, Move::ALL[first_idx]);
                if self.terminated {
                    return;
                }
                self.last_depth_summary[first_idx + DIR_SIZE] =
                    (self.ida_count - start_counter) as i32;
                estimate_first[first_idx] = END_OF_SEARCH;
            }
        }
    }

    // Expands one node. Returns the least estimate seen in the subtree, the
    // value the next deepening round orders first moves by.
    fn dfs_next(
        &mut self,
        pos: BlankPos,
        cost: usize,
        limit: i32,
        estimate: i32,
        chain: i32,
        last: Move,
    ) -> i32 {
        self.ida_count += 1;
        if self.terminated {
            return END_OF_SEARCH;
        }
        if let Some(cap) = self.timeout_limit {
            if self.stopwatch.seconds() > cap {
                self.stopwatch.stop();
                self.search_timeout = true;
                self.terminated = true;
                return END_OF_SEARCH;
            }
        }

        let pass = if pos.pos == pos.mirror {
            self.eval.is_not_symmetry(&self.frames)
        } else {
            true
        };

        let mut priority = estimate;
        match last {
            Move::Right => {
                if pos.x < ROW_SIZE - 1 {
                    priority =
                        priority.min(self.shift(pos, cost, limit, RESET_VAL, Move::Right));
                }
                if pass {
                    if pos.y > 0 && is_valid_counterclockwise(chain) {
                        priority = priority
                            .min(self.shift(pos, cost, limit, chain << 2 | CCW_VAL, Move::Up));
                    }
                    if pos.y < ROW_SIZE - 1 && is_valid_clockwise(chain) {
                        priority = priority
                            .min(self.shift(pos, cost, limit, chain << 2 | CW_VAL, Move::Down));
                    }
                }
            }
            Move::Down => {
                if pos.y < ROW_SIZE - 1 {
                    priority = priority.min(self.shift(pos, cost, limit, RESET_VAL, Move::Down));
                }
                if pass {
                    if pos.x > 0 && is_valid_clockwise(chain) {
                        priority = priority
                            .min(self.shift(pos, cost, limit, chain << 2 | CW_VAL, Move::Left));
                    }
                    if pos.x < ROW_SIZE - 1 && is_valid_counterclockwise(chain) {
                        priority = priority
                            .min(self.shift(pos, cost, limit, chain << 2 | CCW_VAL, Move::Right));
                    }
                }
            }
            Move::Left => {
                if pos.x > 0 {
                    priority = priority.min(self.shift(pos, cost, limit, RESET_VAL, Move::Left));
                }
                if pass {
                    if pos.y < ROW_SIZE - 1 && is_valid_counterclockwise(chain) {
                        priority = priority
                            .min(self.shift(pos, cost, limit, chain << 2 | CCW_VAL, Move::Down));
                    }
                    if pos.y > 0 && is_valid_clockwise(chain) {
                        priority = priority
                            .min(self.shift(pos, cost, limit, chain << 2 | CW_VAL, Move::Up));
                    }
                }
            }
            Move::Up => {
                if pos.y > 0 {
                    priority = priority.min(self.shift(pos, cost, limit, RESET_VAL, Move::Up));
                }
                if pass {
                    if pos.x < ROW_SIZE - 1 && is_valid_clockwise(chain) {
                        priority = priority
                            .min(self.shift(pos, cost, limit, chain << 2 | CW_VAL, Move::Right));
                    }
                    if pos.x > 0 && is_valid_counterclockwise(chain) {
                        priority = priority
                            .min(self.shift(pos, cost, limit, chain << 2 | CCW_VAL, Move::Left));
                    }
                }
            }
        }
        priority
    }

    fn shift(&mut self, pos: BlankPos, cost: usize, limit: i32, chain: i32, mv: Move) -> i32 {
        if self.terminated {
            return END_OF_SEARCH;
        }

        let outcome = self.eval.shift(&mut self.frames, mv, pos, limit);
        let mut result = outcome.estimate;
        if outcome.goal {
            self.solution_buf[cost] = mv;
            result = self.goal_reached(cost);
        } else if outcome.descend {
            self.solution_buf[cost] = mv;
            let next = apply_move(&mut self.frames, pos, mv);
            result = self.dfs_next(next, cost + 1, limit - 1, outcome.estimate, chain, mv);
            apply_move(&mut self.frames, next, mv.opposite());
        }
        self.eval.undo();
        result
    }

    fn goal_reached(&mut self, cost: usize) -> i32 {
        self.stopwatch.stop();
        self.steps = cost;
        self.solved = true;
        self.terminated = true;
        END_OF_SEARCH
    }
}
