//! Solver facade: picks a heuristic family, runs the search engine and
//! layers the reference-cache boost on top of it.
//!
//! A `Prime` solver searches from the heuristic estimate alone. An
//! `Optimum` solver first consults the reference collection: a direct
//! hit hands back the exact distance (and resumes from the stored
//! prefix), otherwise nearby stored boards tighten the starting limit.
//! The first provider failure demotes the instance to `Prime` for good.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::board::{manhattan, Board, Move, MAX_MOVE};
use crate::heuristic::Evaluator;
use crate::pattern_db::{PatternDbSet, PatternOption};
use crate::reference::{
    is_mirror_flip_group, reference_group, reference_lookup, ReferenceBoard, ReferenceError,
    ReferenceProvider, NUM_PARTIAL_MOVES,
};
use crate::search::{Search, SearchReport};
use crate::walking_distance::WalkingDistance;

/// Boosting below this estimate rarely pays for the scan: 40% of the
/// 80-move ceiling.
const BOOST_PRIORITY_CUTOFF: i32 = (MAX_MOVE as i32 * 2) / 5;

/// A stored board only helps when the transformed distance to it stays
/// within this many moves.
const INVERSE_ALLOWANCE: i32 = 20;

/// Heuristic families the solver can run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeuristicKind {
    Manhattan,
    LinearConflict,
    WalkingDistance,
    WdMdlc,
    Pdb555,
    Pdb663,
    Pdb78,
}

impl HeuristicKind {
    pub fn from_name(name: &str) -> Option<HeuristicKind> {
        match name.to_ascii_lowercase().as_str() {
            "manhattan" | "md" => Some(HeuristicKind::Manhattan),
            "linear_conflict" | "mdlc" => Some(HeuristicKind::LinearConflict),
            "walking_distance" | "wd" => Some(HeuristicKind::WalkingDistance),
            "wd_mdlc" | "wdmd" => Some(HeuristicKind::WdMdlc),
            "pdb555" => Some(HeuristicKind::Pdb555),
            "pdb663" => Some(HeuristicKind::Pdb663),
            "pdb78" => Some(HeuristicKind::Pdb78),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            HeuristicKind::Manhattan => "manhattan distance",
            HeuristicKind::LinearConflict => "manhattan distance with linear conflict",
            HeuristicKind::WalkingDistance => "walking distance",
            HeuristicKind::WdMdlc => "walking distance with linear conflict",
            HeuristicKind::Pdb555 => "pattern database 5-5-5",
            HeuristicKind::Pdb663 => "pattern database 6-6-3",
            HeuristicKind::Pdb78 => "pattern database 7-8",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverVersion {
    /// Heuristic estimate only.
    Prime,
    /// Reference-cache boost on top of the heuristic.
    Optimum,
}

/// Whether the attached reference provider is still trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceState {
    Active,
    /// A provider call failed; the instance runs as Prime from here on.
    Demoted,
}

/// Result of one `find_optimal_path` call.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub solvable: bool,
    pub solved: bool,
    pub timeout: bool,
    pub moves: i32,
    pub solution: Vec<Move>,
    pub node_count: u64,
    pub seconds: f64,
    pub added_reference: bool,
}

impl SearchOutcome {
    fn unsolvable() -> SearchOutcome {
        SearchOutcome {
            solvable: false,
            solved: false,
            timeout: false,
            moves: 0,
            solution: Vec::new(),
            node_count: 0,
            seconds: 0.0,
            added_reference: false,
        }
    }

    fn from_report(report: SearchReport) -> SearchOutcome {
        SearchOutcome {
            solvable: true,
            solved: report.solved,
            timeout: report.timeout,
            moves: report.depth,
            solution: report.moves,
            node_count: report.node_count,
            seconds: report.seconds,
            added_reference: false,
        }
    }
}

/// Boost computed for one board before searching.
struct Boost {
    estimate: i32,
    /// Exact distance from a stored record, safe to resume from.
    exact: bool,
    prefix: Option<[Move; NUM_PARTIAL_MOVES]>,
}

pub struct Solver {
    heuristic: HeuristicKind,
    version: SolverVersion,
    verbose: bool,
    search: Search,
    /// Plain-MD engine for the bounded inverse-estimate sub-searches.
    md_search: Search,
    reference: Option<Arc<dyn ReferenceProvider>>,
    reference_state: ReferenceState,
    last_outcome: Option<SearchOutcome>,
}

impl Solver {
    /// Builds a Prime solver, loading (or generating) whatever distance
    /// tables the chosen family needs from the data directory.
    pub fn new(heuristic: HeuristicKind, data_dir: &Path) -> Result<Solver, String> {
        let eval = match heuristic {
            HeuristicKind::Manhattan => Evaluator::manhattan(false),
            HeuristicKind::LinearConflict => Evaluator::manhattan(true),
            HeuristicKind::WalkingDistance => {
                Evaluator::walking_distance(Arc::new(WalkingDistance::load_or_generate(data_dir)))
            }
            HeuristicKind::WdMdlc => {
                Evaluator::wd_mdlc(Arc::new(WalkingDistance::load_or_generate(data_dir)))
            }
            HeuristicKind::Pdb555 => Evaluator::pattern(Arc::new(PatternDbSet::load_or_generate(
                PatternOption::Pdb555,
                data_dir,
            )?)),
            HeuristicKind::Pdb663 => Evaluator::pattern(Arc::new(PatternDbSet::load_or_generate(
                PatternOption::Pdb663,
                data_dir,
            )?)),
            HeuristicKind::Pdb78 => Evaluator::pattern(Arc::new(PatternDbSet::load_or_generate(
                PatternOption::Pdb78,
                data_dir,
            )?)),
        };
        Ok(Solver {
            heuristic,
            version: SolverVersion::Prime,
            verbose: false,
            search: Search::new(eval, None),
            md_search: Search::new(Evaluator::manhattan(false), None),
            reference: None,
            reference_state: ReferenceState::Active,
            last_outcome: None,
        })
    }

    /// Applies version, timeout and reporting settings in one go. An
    /// Optimum request without an attached provider runs as Prime.
    pub fn configure(
        &mut self,
        version: SolverVersion,
        timeout: Option<Duration>,
        verbose: bool,
    ) {
        self.version = version;
        self.verbose = verbose;
        self.search.set_timeout(timeout);
    }

    pub fn attach_reference(&mut self, provider: Arc<dyn ReferenceProvider>) {
        self.reference = Some(provider);
        self.reference_state = ReferenceState::Active;
    }

    pub fn heuristic_kind(&self) -> HeuristicKind {
        self.heuristic
    }

    pub fn version(&self) -> SolverVersion {
        self.version
    }

    pub fn reference_state(&self) -> ReferenceState {
        self.reference_state
    }

    pub fn last_outcome(&self) -> Option<&SearchOutcome> {
        self.last_outcome.as_ref()
    }

    /// Heuristic estimate of the board. An Optimum instance consults the
    /// reference collection first, so a stored board reports its exact
    /// distance; Prime answers from the heuristic tables alone.
    pub fn heuristic(&mut self, board: &Board) -> i32 {
        let basis = self.search.heuristic_basis(board);
        let boost = self.compute_boost(board, basis);
        boost.estimate.max(basis)
    }

    /// Solves the board optimally. Unsolvable and timed-out boards are
    /// ordinary outcomes, not errors.
    pub fn find_optimal_path(&mut self, board: &Board) -> SearchOutcome {
        if !board.is_solvable() {
            let outcome = SearchOutcome::unsolvable();
            self.last_outcome = Some(outcome.clone());
            return outcome;
        }

        let basis = self.search.heuristic_basis(board);
        let boost = self.compute_boost(board, basis);

        let report = match boost.prefix {
            Some(prefix) if boost.exact && boost.estimate as usize > NUM_PARTIAL_MOVES => {
                match self.search.solve_from_partial(board, boost.estimate, &prefix) {
                    Ok(report) => report,
                    Err(reason) => {
                        warn!("stored prefix rejected, searching from scratch: {}", reason);
                        self.search.solve(board, boost.estimate, self.advanced_scan())
                    }
                }
            }
            _ => self
                .search
                .solve(board, boost.estimate.max(basis), self.advanced_scan()),
        };

        let mut outcome = SearchOutcome::from_report(report);
        if outcome.solved && !outcome.timeout {
            outcome.added_reference = self.archive_reference(board, &outcome, basis);
        }
        if self.verbose {
            info!(
                "{}: {} moves, {} nodes, {:.4}s",
                self.heuristic.label(),
                outcome.moves,
                outcome.node_count,
                outcome.seconds
            );
        }
        self.last_outcome = Some(outcome.clone());
        outcome
    }

    fn advanced_scan(&self) -> bool {
        self.version == SolverVersion::Optimum
    }

    fn boosting(&self) -> bool {
        self.version == SolverVersion::Optimum
            && self.reference_state == ReferenceState::Active
            && self.reference.is_some()
    }

    fn demote(&mut self, error: ReferenceError) {
        if self.reference_state == ReferenceState::Active {
            warn!("reference provider failed ({}), demoting to prime solver", error);
            self.reference_state = ReferenceState::Demoted;
            self.version = SolverVersion::Prime;
        }
    }

    fn compute_boost(&mut self, board: &Board, basis: i32) -> Boost {
        if !self.boosting() {
            return Boost { estimate: basis, exact: false, prefix: None };
        }
        match self.boost_estimate(board, basis) {
            Ok(boost) => boost,
            Err(error) => {
                self.demote(error);
                Boost { estimate: basis, exact: false, prefix: None }
            }
        }
    }

    /// The reference-cache estimate for a board: exact on a direct hit,
    /// otherwise tightened through stored neighbors.
    fn boost_estimate(&mut self, board: &Board, basis: i32) -> Result<Boost, ReferenceError> {
        let provider = match &self.reference {
            Some(provider) => Arc::clone(provider),
            None => return Ok(Boost { estimate: basis, exact: false, prefix: None }),
        };

        if let Some(hit) = direct_lookup(provider.as_ref(), board)? {
            return Ok(hit);
        }

        if basis < BOOST_PRIORITY_CUTOFF {
            return Ok(Boost { estimate: basis, exact: false, prefix: None });
        }

        let mut estimate = basis;
        for (key, entry) in provider.snapshot()? {
            let trans = key.transformer(board.tiles());
            let trans_priority = manhattan(&trans) as i32;
            if trans_priority > INVERSE_ALLOWANCE {
                continue;
            }
            let cached = i32::from(entry.estimate(0));
            if cached - trans_priority <= estimate {
                continue;
            }
            let trans_board = match Board::new(trans) {
                Ok(trans_board) => trans_board,
                Err(reason) => {
                    warn!("skipping malformed reference transform: {}", reason);
                    continue;
                }
            };
            if let Some(distance) =
                self.md_search
                    .solve_within(&trans_board, trans_priority, cached - estimate)
            {
                estimate = cached - distance;
            }
        }

        // A boost of broken parity overshoots by one short of the truth;
        // optimal distances from one board always share parity.
        if (estimate - basis) % 2 != 0 {
            estimate += 1;
        }
        Ok(Boost { estimate, exact: false, prefix: None })
    }

    /// Stores a freshly solved hard board in the reference collection.
    /// Only exact pattern-database results past the archive cutoff
    /// qualify, and a Prime result only when boosting could not have
    /// shortened the search.
    fn archive_reference(&mut self, board: &Board, outcome: &SearchOutcome, basis: i32) -> bool {
        if self.heuristic != HeuristicKind::Pdb78 {
            return false;
        }
        if self.reference_state != ReferenceState::Active {
            return false;
        }
        let provider = match &self.reference {
            Some(provider) => Arc::clone(provider),
            None => return false,
        };
        if outcome.seconds <= provider.cutoff_limit() {
            return false;
        }

        if self.version != SolverVersion::Optimum {
            match self.boost_estimate(board, basis) {
                Ok(boost) => {
                    if boost.estimate != basis {
                        return false;
                    }
                }
                Err(error) => {
                    self.demote(error);
                    return false;
                }
            }
        }

        match provider.put(board, outcome.moves as u8, &outcome.solution) {
            Ok(added) => {
                if added {
                    info!("archived {}-move board in the reference collection", outcome.moves);
                }
                added
            }
            Err(error) => {
                self.demote(error);
                false
            }
        }
    }
}

/// Probes the collection for the board itself, then for its diagonal
/// reflection. A mirror hit swaps lookups 1 and 3 and reflects the
/// stored prefix.
fn direct_lookup(
    provider: &dyn ReferenceProvider,
    board: &Board,
) -> Result<Option<Boost>, ReferenceError> {
    let zero_pos = board.zero_pos() as usize;
    let lookup = reference_lookup(zero_pos);
    let group = reference_group(zero_pos);

    if let Some(entry) = provider.get(&ReferenceBoard::new(board))? {
        let steps = i32::from(entry.estimate(lookup));
        let prefix = if entry.has_initial_moves(lookup) {
            Some(entry.initial_moves(lookup, is_mirror_flip_group(zero_pos)))
        } else {
            None
        };
        return Ok(Some(Boost { estimate: steps, exact: true, prefix }));
    }

    if group == 0 || group == 2 {
        if let Some(entry) = provider.get(&ReferenceBoard::new_mirror(board))? {
            let mirror_lookup = match lookup {
                1 => 3,
                3 => 1,
                other => other,
            };
            let steps = i32::from(entry.estimate(mirror_lookup));
            let prefix = if entry.has_initial_moves(mirror_lookup) {
                Some(entry.initial_moves(mirror_lookup, true))
            } else {
                None
            };
            return Ok(Some(Boost { estimate: steps, exact: true, prefix }));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{ReferenceMoves, ReferenceStore};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Provider that can be tripped into failing every call.
    struct FaultyReference {
        inner: ReferenceStore,
        broken: AtomicBool,
    }

    impl FaultyReference {
        fn new() -> FaultyReference {
            FaultyReference { inner: ReferenceStore::in_memory(8), broken: AtomicBool::new(false) }
        }

        fn break_connection(&self) {
            self.broken.store(true, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), ReferenceError> {
            if self.broken.load(Ordering::SeqCst) {
                Err(ReferenceError::Unavailable)
            } else {
                Ok(())
            }
        }
    }

    impl ReferenceProvider for FaultyReference {
        fn get(&self, key: &ReferenceBoard) -> Result<Option<ReferenceMoves>, ReferenceError> {
            self.check()?;
            self.inner.get(key)
        }

        fn put(&self, board: &Board, steps: u8, solution: &[Move]) -> Result<bool, ReferenceError> {
            self.check()?;
            self.inner.put(board, steps, solution)
        }

        fn snapshot(&self) -> Result<Vec<(ReferenceBoard, ReferenceMoves)>, ReferenceError> {
            self.check()?;
            self.inner.snapshot()
        }

        fn cutoff_limit(&self) -> f64 {
            self.inner.cutoff_limit()
        }
    }

    fn data_dir() -> std::path::PathBuf {
        std::env::temp_dir().join("fifteen_solver_facade_test")
    }

    fn solver(kind: HeuristicKind) -> Solver {
        match Solver::new(kind, &data_dir()) {
            Ok(solver) => solver,
            Err(reason) => panic!("solver setup failed: {}", reason),
        }
    }

    fn scramble(steps: usize) -> Board {
        let mut board = Board::goal();
        let mut last: Option<Move> = None;
        let mut seed = 0x2f6e2b1usize;
        for _ in 0..steps {
            loop {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let mv = Move::ALL[(seed >> 33) % 4];
                if Some(mv.opposite()) == last {
                    continue;
                }
                if let Some(next) = board.shift(mv) {
                    board = next;
                    last = Some(mv);
                    break;
                }
            }
        }
        board
    }

    #[test]
    fn unsolvable_board_reports_without_searching() {
        let mut tiles = *Board::goal().tiles();
        tiles.swap(0, 1);
        let board = match Board::new(tiles) {
            Ok(board) => board,
            Err(reason) => panic!("swap board rejected: {}", reason),
        };
        let mut solver = solver(HeuristicKind::LinearConflict);
        let outcome = solver.find_optimal_path(&board);
        assert!(!outcome.solvable);
        assert!(!outcome.solved);
        assert_eq!(outcome.node_count, 0);
    }

    #[test]
    fn prime_solver_finds_the_optimal_length() {
        let board = scramble(16);
        let mut lc = solver(HeuristicKind::LinearConflict);
        let outcome = lc.find_optimal_path(&board);
        assert!(outcome.solved);
        assert!(board.check_solution(&outcome.solution));

        let mut wd = solver(HeuristicKind::WdMdlc);
        let again = wd.find_optimal_path(&board);
        assert!(again.solved);
        assert_eq!(again.moves, outcome.moves);
    }

    #[test]
    fn direct_hit_resumes_from_the_stored_prefix() {
        let board = scramble(24);
        let mut prime = solver(HeuristicKind::LinearConflict);
        let exact = prime.find_optimal_path(&board);
        assert!(exact.solved);

        let store = Arc::new(ReferenceStore::in_memory(8));
        assert!(matches!(
            store.put(&board, exact.moves as u8, &exact.solution),
            Ok(true)
        ));

        let mut optimum = solver(HeuristicKind::LinearConflict);
        optimum.attach_reference(store);
        optimum.configure(SolverVersion::Optimum, None, false);
        let boosted = optimum.find_optimal_path(&board);
        assert!(boosted.solved);
        assert_eq!(boosted.moves, exact.moves);
        assert!(board.check_solution(&boosted.solution));
    }

    #[test]
    fn provider_failure_demotes_permanently() {
        let provider = Arc::new(FaultyReference::new());
        provider.break_connection();

        let mut optimum = solver(HeuristicKind::LinearConflict);
        optimum.attach_reference(Arc::clone(&provider) as Arc<dyn ReferenceProvider>);
        optimum.configure(SolverVersion::Optimum, None, false);

        let outcome = optimum.find_optimal_path(&scramble(12));
        assert!(outcome.solved);
        assert_eq!(optimum.reference_state(), ReferenceState::Demoted);
        assert_eq!(optimum.version(), SolverVersion::Prime);

        // Restoring the provider does not win back trust.
        provider.broken.store(false, Ordering::SeqCst);
        let _ = optimum.find_optimal_path(&scramble(12));
        assert_eq!(optimum.reference_state(), ReferenceState::Demoted);
    }

    #[test]
    fn archive_gate_rejects_fast_and_foreign_solves() {
        let store = Arc::new(ReferenceStore::in_memory(8));
        let mut lc = solver(HeuristicKind::LinearConflict);
        lc.attach_reference(Arc::clone(&store) as Arc<dyn ReferenceProvider>);
        lc.configure(SolverVersion::Optimum, None, false);

        let board = scramble(14);
        let outcome = lc.find_optimal_path(&board);
        assert!(outcome.solved);
        // Wrong family and far under the cutoff.
        assert!(!outcome.added_reference);
    }

    #[test]
    fn archive_accepts_a_slow_exact_pattern_solve() {
        let store = Arc::new(ReferenceStore::in_memory(8));
        let mut facade = solver(HeuristicKind::LinearConflict);
        facade.attach_reference(Arc::clone(&store) as Arc<dyn ReferenceProvider>);
        facade.configure(SolverVersion::Optimum, None, false);
        // The gate checks the family tag, not the loaded tables.
        facade.heuristic = HeuristicKind::Pdb78;

        let board = scramble(20);
        let mut prime = solver(HeuristicKind::LinearConflict);
        let exact = prime.find_optimal_path(&board);
        assert!(exact.solved);

        let before = store.len();
        let slow = SearchOutcome {
            seconds: 9.0,
            added_reference: false,
            ..exact.clone()
        };
        let basis = facade.heuristic(&board);
        assert!(facade.archive_reference(&board, &slow, basis));
        assert_eq!(store.len(), before + 1);

        // Same canonical key again: merged, not duplicated.
        assert!(facade.archive_reference(&board, &slow, basis));
        assert_eq!(store.len(), before + 1);
    }

    #[test]
    fn heuristic_names_round_trip() {
        for kind in [
            HeuristicKind::Manhattan,
            HeuristicKind::LinearConflict,
            HeuristicKind::WalkingDistance,
            HeuristicKind::WdMdlc,
            HeuristicKind::Pdb555,
            HeuristicKind::Pdb663,
            HeuristicKind::Pdb78,
        ] {
            assert!(!kind.label().is_empty());
        }
        assert_eq!(HeuristicKind::from_name("MD"), Some(HeuristicKind::Manhattan));
        assert_eq!(HeuristicKind::from_name("pdb78"), Some(HeuristicKind::Pdb78));
        assert_eq!(HeuristicKind::from_name("nonsense"), None);
    }
}
