// Configuration module for reading Solver.toml

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::solver::{HeuristicKind, SolverVersion};

/// Main configuration structure containing all tunable parameters
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub solver: SolverConfig,
    pub reference: ReferenceConfig,
    pub debug: DebugConfig,
}

/// Search engine settings
#[derive(Debug, Deserialize, Clone)]
pub struct SolverConfig {
    /// Wall-clock budget per solve in seconds; 0 disables the timeout.
    pub timeout_seconds: u64,
    pub heuristic: HeuristicKind,
    pub version: SolverVersion,
    /// Directory holding the generated distance table files.
    pub data_dir: String,
}

impl SolverConfig {
    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_seconds))
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }
}

/// Reference collection settings
#[derive(Debug, Deserialize, Clone)]
pub struct ReferenceConfig {
    pub enabled: bool,
    /// Minimum search seconds before a solved board is archived, 1 to 10.
    pub cutoff_seconds: u32,
}

/// Debug configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DebugConfig {
    pub enabled: bool,
    pub log_file_path: String,
}

impl Config {
    /// Loads configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let contents = fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        toml::from_str(&contents).map_err(|e| format!("Failed to parse config file: {}", e))
    }

    /// Loads default configuration from Solver.toml in the project root
    pub fn load_default() -> Result<Self, String> {
        Self::from_file("Solver.toml")
    }

    /// Creates a configuration with hardcoded default values as fallback
    /// This should match the constants defined in Solver.toml
    pub fn default_hardcoded() -> Self {
        Config {
            solver: SolverConfig {
                timeout_seconds: 10,
                heuristic: HeuristicKind::WdMdlc,
                version: SolverVersion::Optimum,
                data_dir: "data".to_string(),
            },
            reference: ReferenceConfig {
                enabled: true,
                cutoff_seconds: 8,
            },
            debug: DebugConfig {
                enabled: false,
                log_file_path: "solver_debug.jsonl".to_string(),
            },
        }
    }

    /// Attempts to load from file, falls back to hardcoded defaults on error
    pub fn load_or_default() -> Self {
        Self::load_default().unwrap_or_else(|e| {
            eprintln!(
                "Warning: Could not load Solver.toml ({}), using hardcoded defaults",
                e
            );
            Self::default_hardcoded()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_can_be_created() {
        let config = Config::default_hardcoded();
        assert_eq!(config.solver.timeout_seconds, 10);
        assert_eq!(config.solver.heuristic, HeuristicKind::WdMdlc);
        assert_eq!(config.reference.cutoff_seconds, 8);
    }

    #[test]
    fn test_zero_timeout_disables_the_budget() {
        let mut config = Config::default_hardcoded();
        assert_eq!(config.solver.timeout(), Some(Duration::from_secs(10)));
        config.solver.timeout_seconds = 0;
        assert_eq!(config.solver.timeout(), None);
    }

    #[test]
    fn test_solver_toml_can_be_parsed() {
        // This test ensures Solver.toml is valid and can be parsed
        let result = Config::from_file("Solver.toml");
        assert!(
            result.is_ok(),
            "Failed to parse Solver.toml: {:?}",
            result.err()
        );
    }

    #[test]
    fn test_all_config_values_match_hardcoded_defaults() {
        let file_config = Config::from_file("Solver.toml").expect("Solver.toml should be parseable");
        let hardcoded_config = Config::default_hardcoded();

        assert_eq!(
            file_config.solver.timeout_seconds,
            hardcoded_config.solver.timeout_seconds
        );
        assert_eq!(file_config.solver.heuristic, hardcoded_config.solver.heuristic);
        assert_eq!(file_config.solver.version, hardcoded_config.solver.version);
        assert_eq!(file_config.solver.data_dir, hardcoded_config.solver.data_dir);
        assert_eq!(file_config.reference.enabled, hardcoded_config.reference.enabled);
        assert_eq!(
            file_config.reference.cutoff_seconds,
            hardcoded_config.reference.cutoff_seconds
        );
        assert_eq!(
            file_config.debug.log_file_path,
            hardcoded_config.debug.log_file_path
        );
    }

    #[test]
    fn test_heuristic_names_parse_from_toml() {
        let parsed: Result<Config, String> = toml::from_str(
            r#"
            [solver]
            timeout_seconds = 5
            heuristic = "pdb78"
            version = "prime"
            data_dir = "tables"

            [reference]
            enabled = false
            cutoff_seconds = 3

            [debug]
            enabled = true
            log_file_path = "out.jsonl"
            "#,
        )
        .map_err(|e| e.to_string());
        let config = parsed.expect("inline toml should parse");
        assert_eq!(config.solver.heuristic, HeuristicKind::Pdb78);
        assert_eq!(config.solver.version, SolverVersion::Prime);
        assert!(!config.reference.enabled);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        // Test with a non-existent file
        let result = Config::from_file("nonexistent.toml");
        assert!(result.is_err());
    }
}
