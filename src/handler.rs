// HTTP handler bindings for the solver service endpoints
//
// This module provides the Rocket routes and the managed service state.
// Handlers are responsible for:
// - Deserializing incoming JSON requests
// - Extracting the service instance from Rocket's managed state
// - Delegating to the solver facade
// - Serializing responses

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rocket::response::status::BadRequest;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::board::{Board, DifficultyLevel};
use crate::config::Config;
use crate::debug_logger::DebugLogger;
use crate::reference::{ReferenceProvider, ReferenceStore};
use crate::solver::{HeuristicKind, Solver};

#[derive(Debug, Deserialize)]
pub struct SolveRequest {
    pub tiles: Vec<u8>,
    /// Heuristic name override; the configured default applies when absent.
    pub heuristic: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SolveResponse {
    pub solvable: bool,
    pub solved: bool,
    pub timeout: bool,
    pub moves: i32,
    pub solution: Vec<&'static str>,
    pub node_count: u64,
    pub seconds: f64,
    pub added_reference: bool,
    pub heuristic: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub difficulty: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub tiles: Vec<u8>,
    pub solvable: bool,
}

/// Managed service state: one lazily built solver per heuristic family,
/// all sharing the reference collection.
pub struct SolverService {
    config: Config,
    reference: Option<Arc<dyn ReferenceProvider>>,
    solvers: RwLock<HashMap<HeuristicKind, Arc<Mutex<Solver>>>>,
    debug: DebugLogger,
}

impl SolverService {
    pub fn new(config: Config, debug: DebugLogger) -> SolverService {
        let reference: Option<Arc<dyn ReferenceProvider>> = if config.reference.enabled {
            Some(Arc::new(ReferenceStore::load_or_default(
                &config.solver.data_dir(),
                config.reference.cutoff_seconds,
            )))
        } else {
            None
        };
        SolverService {
            config,
            reference,
            solvers: RwLock::new(HashMap::new()),
            debug,
        }
    }

    pub fn info(&self) -> Value {
        json!({
            "service": "15-puzzle optimal solver",
            "version": env!("CARGO_PKG_VERSION"),
            "heuristics": [
                "manhattan",
                "linear_conflict",
                "walking_distance",
                "wd_mdlc",
                "pdb555",
                "pdb663",
                "pdb78",
            ],
            "default_heuristic": self.config.solver.heuristic,
            "solver_version": self.config.solver.version,
            "reference_enabled": self.config.reference.enabled,
        })
    }

    pub fn solve(&self, request: &SolveRequest) -> Result<SolveResponse, String> {
        let board = Board::from_slice(&request.tiles)?;
        let kind = match &request.heuristic {
            Some(name) => HeuristicKind::from_name(name)
                .ok_or_else(|| format!("unknown heuristic: {}", name))?,
            None => self.config.solver.heuristic,
        };

        let solver = self.solver_for(kind)?;
        let outcome = solver.lock().find_optimal_path(&board);
        self.debug.log_solve(&board, kind, &outcome);

        Ok(SolveResponse {
            solvable: outcome.solvable,
            solved: outcome.solved,
            timeout: outcome.timeout,
            moves: outcome.moves,
            solution: outcome.solution.iter().map(|mv| mv.as_str()).collect(),
            node_count: outcome.node_count,
            seconds: outcome.seconds,
            added_reference: outcome.added_reference,
            heuristic: kind.label(),
        })
    }

    pub fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, String> {
        let level = match request.difficulty.as_deref() {
            None => DifficultyLevel::Random,
            Some(name) => match name.to_ascii_lowercase().as_str() {
                "easy" => DifficultyLevel::Easy,
                "moderate" => DifficultyLevel::Moderate,
                "hard" => DifficultyLevel::Hard,
                "random" => DifficultyLevel::Random,
                other => return Err(format!("unknown difficulty: {}", other)),
            },
        };
        let board = Board::random(level);
        Ok(GenerateResponse {
            tiles: board.tiles().to_vec(),
            solvable: board.is_solvable(),
        })
    }

    fn solver_for(&self, kind: HeuristicKind) -> Result<Arc<Mutex<Solver>>, String> {
        if let Some(solver) = self.solvers.read().get(&kind) {
            return Ok(Arc::clone(solver));
        }

        let mut solvers = self.solvers.write();
        // Another request may have built it while we waited for the lock.
        if let Some(solver) = solvers.get(&kind) {
            return Ok(Arc::clone(solver));
        }

        let mut solver = Solver::new(kind, &self.config.solver.data_dir())?;
        if let Some(reference) = &self.reference {
            solver.attach_reference(Arc::clone(reference));
        }
        solver.configure(self.config.solver.version, self.config.solver.timeout(), true);

        let solver = Arc::new(Mutex::new(solver));
        solvers.insert(kind, Arc::clone(&solver));
        Ok(solver)
    }
}

/// GET / endpoint
/// Returns service metadata and the available heuristic names
#[get("/")]
pub fn index(service: &rocket::State<SolverService>) -> Json<Value> {
    Json(service.info())
}

/// POST /solve endpoint
/// Solves the given board optimally and returns the outcome
#[post("/solve", format = "json", data = "<solve_req>")]
pub fn solve(
    service: &rocket::State<SolverService>,
    solve_req: Json<SolveRequest>,
) -> Result<Json<SolveResponse>, BadRequest<String>> {
    service
        .solve(&solve_req)
        .map(Json)
        .map_err(BadRequest)
}

/// POST /generate endpoint
/// Returns a random board of the requested difficulty
#[post("/generate", format = "json", data = "<generate_req>")]
pub fn generate(
    service: &rocket::State<SolverService>,
    generate_req: Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, BadRequest<String>> {
    service
        .generate(&generate_req)
        .map(Json)
        .map_err(BadRequest)
}
