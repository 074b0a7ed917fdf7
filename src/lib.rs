// Library exports for the 15-puzzle solver
// This allows the console binary and integration tests to use the core logic

pub mod board;
pub mod config;
pub mod debug_logger;
pub mod heuristic;
pub mod pattern;
pub mod pattern_db;
pub mod reference;
pub mod search;
pub mod solver;
pub mod stopwatch;
pub mod walking_distance;
