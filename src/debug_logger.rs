// Debug logging module for asynchronous solve logging
//
// This module provides fire-and-forget async logging to avoid blocking
// the request/response cycle. Each completed solve is written to a JSONL file.

use log::error;
use serde::Serialize;
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::board::Board;
use crate::solver::{HeuristicKind, SearchOutcome};

/// Represents a single debug log entry
#[derive(Debug, Serialize)]
struct SolveLogEntry {
    tiles: Vec<u8>,
    heuristic: &'static str,
    solvable: bool,
    solved: bool,
    timeout: bool,
    moves: i32,
    solution: Vec<&'static str>,
    node_count: u64,
    seconds: f64,
    timestamp: String,
}

/// Shared debug logger state
/// Uses Arc<Mutex<File>> to allow concurrent async writes from multiple tasks
#[derive(Clone)]
pub struct DebugLogger {
    file: Arc<Mutex<Option<File>>>,
    enabled: bool,
}

impl DebugLogger {
    /// Creates a new debug logger
    /// If enabled is true, initializes the log file (truncating if it exists)
    pub async fn new(enabled: bool, log_file_path: &str) -> Self {
        if !enabled {
            return DebugLogger {
                file: Arc::new(Mutex::new(None)),
                enabled: false,
            };
        }

        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(log_file_path)
            .await
        {
            Ok(file) => {
                log::info!("Debug logging enabled: {}", log_file_path);
                DebugLogger {
                    file: Arc::new(Mutex::new(Some(file))),
                    enabled: true,
                }
            }
            Err(e) => {
                error!("Failed to create debug log file '{}': {}", log_file_path, e);
                DebugLogger {
                    file: Arc::new(Mutex::new(None)),
                    enabled: false,
                }
            }
        }
    }

    /// Creates a disabled debug logger (no-op)
    pub fn disabled() -> Self {
        DebugLogger {
            file: Arc::new(Mutex::new(None)),
            enabled: false,
        }
    }

    /// Logs a solve outcome asynchronously (fire-and-forget)
    /// This spawns a tokio task that writes to the file without blocking
    pub fn log_solve(&self, board: &Board, heuristic: HeuristicKind, outcome: &SearchOutcome) {
        if !self.enabled {
            return;
        }

        let file_handle = self.file.clone();
        let entry = SolveLogEntry {
            tiles: board.tiles().to_vec(),
            heuristic: heuristic.label(),
            solvable: outcome.solvable,
            solved: outcome.solved,
            timeout: outcome.timeout,
            moves: outcome.moves,
            solution: outcome.solution.iter().map(|mv| mv.as_str()).collect(),
            node_count: outcome.node_count,
            seconds: outcome.seconds,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        // Spawn fire-and-forget task
        tokio::spawn(async move {
            Self::write_entry(file_handle, entry).await;
        });
    }

    /// Internal async function that performs the actual file write
    async fn write_entry(file_handle: Arc<Mutex<Option<File>>>, entry: SolveLogEntry) {
        let mut file_guard = file_handle.lock().await;

        if let Some(file) = file_guard.as_mut() {
            match serde_json::to_string(&entry) {
                Ok(json_line) => {
                    let line_with_newline = format!("{}\n", json_line);
                    if let Err(e) = file.write_all(line_with_newline.as_bytes()).await {
                        error!("Failed to write debug log entry: {}", e);
                    } else if let Err(e) = file.flush().await {
                        error!("Failed to flush debug log: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize debug log entry: {}", e);
                }
            }
        }
    }
}
