// Console one-shot solver.
//
// Usage: solve <16 tiles, row by row, 0 for the blank> [heuristic]
// Example: solve 1 2 3 4 5 6 7 8 9 10 11 12 13 15 14 0 pdb78

use std::env;
use std::process;
use std::sync::Arc;

use fifteen_solver::board::Board;
use fifteen_solver::config::Config;
use fifteen_solver::reference::ReferenceStore;
use fifteen_solver::solver::{HeuristicKind, Solver};

fn main() {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.len() != 16 && args.len() != 17 {
        eprintln!("usage: solve <16 tiles, row by row, 0 for the blank> [heuristic]");
        process::exit(2);
    }

    let mut tiles = Vec::with_capacity(16);
    for arg in &args[..16] {
        match arg.parse::<u8>() {
            Ok(value) => tiles.push(value),
            Err(_) => {
                eprintln!("not a tile value: {}", arg);
                process::exit(2);
            }
        }
    }

    let board = match Board::from_slice(&tiles) {
        Ok(board) => board,
        Err(reason) => {
            eprintln!("invalid board: {}", reason);
            process::exit(2);
        }
    };

    let config = Config::load_or_default();
    let kind = match args.get(16) {
        Some(name) => match HeuristicKind::from_name(name) {
            Some(kind) => kind,
            None => {
                eprintln!("unknown heuristic: {}", name);
                process::exit(2);
            }
        },
        None => config.solver.heuristic,
    };

    let mut solver = match Solver::new(kind, &config.solver.data_dir()) {
        Ok(solver) => solver,
        Err(reason) => {
            eprintln!("solver setup failed: {}", reason);
            process::exit(1);
        }
    };
    if config.reference.enabled {
        solver.attach_reference(Arc::new(ReferenceStore::load_or_default(
            &config.solver.data_dir(),
            config.reference.cutoff_seconds,
        )));
    }
    solver.configure(config.solver.version, config.solver.timeout(), true);

    println!("heuristic: {}", kind.label());
    let outcome = solver.find_optimal_path(&board);
    if !outcome.solvable {
        println!("board is not solvable");
        return;
    }
    if outcome.timeout {
        println!(
            "timed out after {:.2}s and {} nodes",
            outcome.seconds, outcome.node_count
        );
        process::exit(1);
    }
    println!(
        "solved in {} moves, {} nodes, {:.4}s",
        outcome.moves, outcome.node_count, outcome.seconds
    );
    let solution: Vec<&str> = outcome.solution.iter().map(|mv| mv.as_str()).collect();
    println!("solution: {}", solution.join(" "));
    if outcome.added_reference {
        println!("board archived in the reference collection");
    }
}
