//! End-to-end solver scenarios
//!
//! Exercises the facade across heuristic families: trivial boards,
//! boards with provable optimal lengths, unsolvable input and the
//! timeout path.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;

use fifteen_solver::board::{Board, Move};
use fifteen_solver::solver::{HeuristicKind, Solver, SolverVersion};

fn data_dir() -> std::path::PathBuf {
    std::env::temp_dir().join("fifteen_solver_scenarios")
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

/// Breadth-first optimal depth, valid for shallow boards only.
fn optimal_depth(board: &Board) -> usize {
    if board.is_goal() {
        return 0;
    }
    let mut seen: HashMap<(u32, u32), usize> = HashMap::new();
    let mut frontier = vec![board.clone()];
    seen.insert(board.hash_keys(), 0);
    for depth in 1..=14 {
        let mut next_frontier = Vec::new();
        for current in frontier {
            for mv in Move::ALL {
                if let Some(next) = current.shift(mv) {
                    if next.is_goal() {
                        return depth;
                    }
                    if seen.insert(next.hash_keys(), depth).is_none() {
                        next_frontier.push(next);
                    }
                }
            }
        }
        frontier = next_frontier;
    }
    panic!("board deeper than the oracle limit");
}

#[test]
fn test_goal_board_needs_no_moves() {
    let mut solver = solver(HeuristicKind::Manhattan);
    let outcome = solver.find_optimal_path(&Board::goal());
    assert!(outcome.solved);
    assert_eq!(outcome.moves, 0);
    assert!(outcome.solution.is_empty());
}

#[test]
fn test_one_move_board_returns_a_single_move() {
    let board = Board::goal().shift(Move::Left).expect("legal shift");
    let mut solver = solver(HeuristicKind::Manhattan);
    let outcome = solver.find_optimal_path(&board);
    assert!(outcome.solved);
    assert_eq!(outcome.moves, 1);
    assert!(board.check_solution(&outcome.solution));
}

#[test]
fn test_seventeen_move_board_solves_in_seventeen() {
    // Each move below pushes a distinct tile one cell away from home, so
    // the Manhattan bound equals the 17-move witness and 17 is optimal.
    let walk = [
        Move::Up,
        Move::Up,
        Move::Up,
        Move::Left,
        Move::Left,
        Move::Left,
        Move::Down,
        Move::Down,
        Move::Down,
        Move::Right,
        Move::Right,
        Move::Up,
        Move::Up,
        Move::Up,
        Move::Left,
        Move::Down,
        Move::Down,
    ];
    let mut board = Board::goal();
    for mv in walk {
        board = board.shift(mv).expect("legal walk");
    }

    let mut md = solver(HeuristicKind::Manhattan);
    assert_eq!(md.heuristic(&board), 17, "witness must meet the bound");
    let outcome = md.find_optimal_path(&board);
    assert!(outcome.solved);
    assert_eq!(outcome.moves, 17);
    assert!(board.check_solution(&outcome.solution));
}

#[test]
fn test_families_agree_with_the_oracle() {
    for _ in 0..3 {
        let board = scramble(12);
        let depth = optimal_depth(&board) as i32;
        for kind in [
            HeuristicKind::Manhattan,
            HeuristicKind::LinearConflict,
            HeuristicKind::WalkingDistance,
            HeuristicKind::WdMdlc,
        ] {
            let mut solver = solver(kind);
            assert!(
                solver.heuristic(&board) <= depth,
                "{} overestimates",
                kind.label()
            );
            let outcome = solver.find_optimal_path(&board);
            assert!(outcome.solved, "{} failed to solve", kind.label());
            assert_eq!(outcome.moves, depth, "{} is not optimal", kind.label());
            assert!(board.check_solution(&outcome.solution));
        }
    }
}

#[test]
fn test_unsolvable_board_is_a_normal_outcome() {
    let mut tiles = *Board::goal().tiles();
    tiles.swap(13, 14);
    let board = Board::new(tiles).expect("swapped board is well formed");
    assert!(!board.is_solvable());

    let mut solver = solver(HeuristicKind::WdMdlc);
    let outcome = solver.find_optimal_path(&board);
    assert!(!outcome.solvable);
    assert!(!outcome.solved);
    assert!(outcome.solution.is_empty());
}

#[test]
fn test_timeout_is_reported_not_fatal() {
    // A 70-move board is far beyond plain Manhattan within 50ms.
    let board = Board::new([0, 15, 8, 3, 12, 11, 7, 4, 14, 10, 6, 5, 9, 13, 2, 1])
        .expect("preset board is well formed");
    let mut solver = solver(HeuristicKind::Manhattan);
    solver.configure(
        SolverVersion::Prime,
        Some(Duration::from_millis(50)),
        false,
    );

    let outcome = solver.find_optimal_path(&board);
    assert!(outcome.solvable);
    assert!(!outcome.solved);
    assert!(outcome.timeout);

    // The instance stays usable after an interrupted search.
    solver.configure(SolverVersion::Prime, None, false);
    let easy = solver.find_optimal_path(&Board::goal().shift(Move::Up).expect("legal shift"));
    assert!(easy.solved);
    assert_eq!(easy.moves, 1);
    assert_eq!(solver.heuristic_kind(), HeuristicKind::Manhattan);
    let recorded = solver.last_outcome().expect("outcome is recorded");
    assert!(recorded.solved);
    assert_eq!(recorded.moves, 1);
}
