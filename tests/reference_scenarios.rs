//! Reference collection scenarios
//!
//! Covers canonical-key symmetry collapse, idempotent population,
//! direct-lookup exactness in both solver versions and demotion when
//! the provider goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::Rng;

use fifteen_solver::board::{Board, Move};
use fifteen_solver::reference::{
    ReferenceBoard, ReferenceError, ReferenceMoves, ReferenceProvider, ReferenceStore,
};
use fifteen_solver::solver::{HeuristicKind, ReferenceState, Solver, SolverVersion};

fn data_dir() -> std::path::PathBuf {
    std::env::temp_dir().join("fifteen_solver_ref_scenarios")
}

fn solver(kind: HeuristicKind) -> Solver {
    Solver::new(kind, &data_dir()).expect("solver setup failed")
}

fn scramble(steps: usize) -> Board {
    let mut rng = rand::rng();
    let mut board = Board::goal();
    let mut last: Option<Move> = None;
    for _ in 0..steps {
        loop {
            let mv = Move::ALL[rng.random_range(0..4)];
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

/// Provider wrapper that fails every call once tripped.
struct FlakyProvider {
    inner: ReferenceStore,
    broken: AtomicBool,
}

impl FlakyProvider {
    fn new() -> FlakyProvider {
        FlakyProvider {
            inner: ReferenceStore::in_memory(8),
            broken: AtomicBool::new(false),
        }
    }

    fn check(&self) -> Result<(), ReferenceError> {
        if self.broken.load(Ordering::SeqCst) {
            Err(ReferenceError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl ReferenceProvider for FlakyProvider {
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

#[test]
fn test_canonical_key_collapses_blank_chain() {
    // Walking the blank between chain cells 10, 14 and 15 must not
    // change the stored key.
    let mut board = scramble(30);
    while board.zero_pos() != 10 {
        board = scramble(30);
    }
    let key = ReferenceBoard::new(&board);

    let down = board.shift(Move::Down).expect("blank at 10 can move down");
    assert_eq!(ReferenceBoard::new(&down), key);
    let corner = down.shift(Move::Down).expect("blank at 14 can move down");
    assert_eq!(ReferenceBoard::new(&corner), key);
}

#[test]
fn test_population_is_idempotent_per_key() {
    let store = ReferenceStore::in_memory(8);
    let seeded = store.len();
    let board = scramble(26);
    let mut prime = solver(HeuristicKind::LinearConflict);
    let exact = prime.find_optimal_path(&board);
    assert!(exact.solved);

    for _ in 0..3 {
        assert!(store
            .put(&board, exact.moves as u8, &exact.solution)
            .expect("in-memory provider never fails"));
    }
    assert!(store.len() <= seeded + 1);
}

#[test]
fn test_direct_lookup_matches_the_prime_answer() {
    let board = scramble(22);
    let mut prime = solver(HeuristicKind::LinearConflict);
    let exact = prime.find_optimal_path(&board);
    assert!(exact.solved);
    assert!(prime.heuristic(&board) <= exact.moves);

    let store = Arc::new(ReferenceStore::in_memory(8));
    store
        .put(&board, exact.moves as u8, &exact.solution)
        .expect("in-memory provider never fails");

    let mut optimum = solver(HeuristicKind::LinearConflict);
    optimum.attach_reference(Arc::clone(&store) as Arc<dyn ReferenceProvider>);
    optimum.configure(SolverVersion::Optimum, None, false);
    let boosted = optimum.find_optimal_path(&board);
    assert!(boosted.solved);
    assert_eq!(boosted.moves, exact.moves);
    assert!(board.check_solution(&boosted.solution));
}

#[test]
fn test_heuristic_query_reports_cached_distance() {
    let board = scramble(24);
    let mut prime = solver(HeuristicKind::LinearConflict);
    let exact = prime.find_optimal_path(&board);
    assert!(exact.solved);
    // Prime never exceeds the true distance.
    assert!(prime.heuristic(&board) <= exact.moves);

    let store = Arc::new(ReferenceStore::in_memory(8));
    store
        .put(&board, exact.moves as u8, &exact.solution)
        .expect("in-memory provider never fails");

    // Optimum answers the stored board with its exact distance.
    let mut optimum = solver(HeuristicKind::LinearConflict);
    optimum.attach_reference(Arc::clone(&store) as Arc<dyn ReferenceProvider>);
    optimum.configure(SolverVersion::Optimum, None, false);
    assert_eq!(optimum.heuristic(&board), exact.moves);
}

#[test]
fn test_provider_failure_demotes_to_prime() {
    let provider = Arc::new(FlakyProvider::new());
    let mut optimum = solver(HeuristicKind::WdMdlc);
    optimum.attach_reference(Arc::clone(&provider) as Arc<dyn ReferenceProvider>);
    optimum.configure(SolverVersion::Optimum, None, false);

    // Healthy provider: stays Optimum.
    let outcome = optimum.find_optimal_path(&scramble(12));
    assert!(outcome.solved);
    assert_eq!(optimum.reference_state(), ReferenceState::Active);

    provider.broken.store(true, Ordering::SeqCst);
    let outcome = optimum.find_optimal_path(&scramble(12));
    assert!(outcome.solved, "search must survive a dead provider");
    assert_eq!(optimum.reference_state(), ReferenceState::Demoted);
    assert_eq!(optimum.version(), SolverVersion::Prime);

    // Recovery does not reinstate the provider.
    provider.broken.store(false, Ordering::SeqCst);
    let _ = optimum.find_optimal_path(&scramble(12));
    assert_eq!(optimum.reference_state(), ReferenceState::Demoted);
}
