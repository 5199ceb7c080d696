//! JSON configuration for the facade operations and the CLI.

use crate::session::DEFAULT_CACHE_CAPACITY;
use crate::workflow::WorkflowPolicy;
use camcal_chessboard::{BatchOptions, ChessboardParams};
use camcal_core::{BoardGeometry, UndistortOptions};
use camcal_solver::SolverOptions;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Everything a calibration run can be tuned with. Missing keys keep defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Board used when the caller does not pass one explicitly.
    pub board: Option<BoardGeometry>,
    pub chessboard: ChessboardParams,
    pub solver: SolverOptions,
    pub batch: BatchOptions,
    pub undistort: UndistortOptions,
    pub workflow: WorkflowPolicy,
    /// Undistorted images kept per session.
    pub cache_capacity: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            board: None,
            chessboard: ChessboardParams::default(),
            solver: SolverOptions::default(),
            batch: BatchOptions::default(),
            undistort: UndistortOptions::default(),
            workflow: WorkflowPolicy::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl CalibrationConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, crate::CalibError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), crate::CalibError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Solver options with the per-request `fix_k3` flag applied.
    pub fn solver_options(&self, fix_k3: bool) -> SolverOptions {
        self.solver.clone().with_fix_k3(fix_k3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: CalibrationConfig =
            serde_json::from_str(r#"{ "solver": { "fix_k3": true }, "cache_capacity": 4 }"#)
                .expect("parse");
        assert!(cfg.solver.fix_k3);
        assert_eq!(cfg.solver.min_views, 10);
        assert_eq!(cfg.cache_capacity, 4);
        assert_eq!(cfg.chessboard, ChessboardParams::default());
        assert!(cfg.board.is_none());
    }

    #[test]
    fn json_file_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("camcal.json");
        let cfg = CalibrationConfig {
            board: Some(BoardGeometry::new(9, 6, 25.0).expect("board")),
            ..CalibrationConfig::default()
        };
        cfg.write_json(&path).expect("write");
        let back = CalibrationConfig::load_json(&path).expect("load");
        assert_eq!(back, cfg);
    }

    #[test]
    fn per_request_fix_k3_overrides_config() {
        let cfg = CalibrationConfig::default();
        assert!(cfg.solver_options(true).fix_k3);
        assert!(!cfg.solver_options(false).fix_k3);
    }
}
