//! Planar camera calibration engine.
//!
//! This crate ties the workspace together:
//! - re-exports of the core types, the chessboard detector and the solver,
//! - the four operations an orchestration layer calls ([`detect_corners`],
//!   [`calibrate`], `undistort` and [`calibration_file`]),
//! - [`CalibrationWorkflow`], the guided `Config → Collecting → Verifying →
//!   Calibrated → Analysis` state machine,
//! - [`CalibrationSession`], which runs at most one solve at a time and caches
//!   undistorted images per artifact,
//! - a JSON [`CalibrationConfig`] and, with feature `cli`, the `camcal` binary.
//!
//! ## Quickstart
//!
//! ```no_run
//! use camcal::core::BoardGeometry;
//! use camcal::{calibrate, calibration_file, imageio, CalibrationConfig};
//!
//! # fn main() -> Result<(), camcal::CalibError> {
//! let images: Vec<_> = (0..12)
//!     .map(|i| imageio::load_gray(format!("view_{i:02}.png")))
//!     .collect::<Result<_, _>>()?;
//! let views: Vec<_> = images.iter().map(|img| img.view()).collect();
//!
//! let board = BoardGeometry::new(9, 6, 25.0)?;
//! let result = calibrate(&views, &board, true, &CalibrationConfig::default())?;
//! println!("rms = {:.3} px", result.artifact.rms());
//!
//! let file = calibration_file(&result.artifact);
//! std::fs::write(file.file_name, file.bytes)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `camcal::core`: images, board geometry, camera model, artifact codecs.
//! - `camcal::chessboard`: corner detection and batch detection.
//! - `camcal::solver`: Zhang initialisation and Levenberg–Marquardt refinement.
//! - `camcal::imageio` (feature `image`): decoding, PNG encoding, color undistortion.

pub use camcal_chessboard as chessboard;
pub use camcal_core as core;
pub use camcal_solver as solver;

mod config;
mod error;
mod ops;
mod session;
mod workflow;

#[cfg(feature = "image")]
pub mod imageio;

pub use config::CalibrationConfig;
pub use error::{CalibError, WorkflowError};
pub use ops::{
    calibrate, calibration_file, detect_corner_sets, detect_corners, parse_calibration_file,
    undistort_gray, Calibration, CalibrationFile, CalibrationResponse, VerifyResponse,
};
pub use session::{
    CalibrationSession, SolveCoordinator, SolveTicket, UndistortCache, DEFAULT_CACHE_CAPACITY,
};
pub use workflow::{CalibrationRecord, CalibrationWorkflow, Stage, WorkflowPolicy};

#[cfg(feature = "image")]
pub use ops::undistort;

pub use camcal_core::{BoardGeometry, CalibrationArtifact, CornerSet, GrayImage, GrayImageView};

/// Route `log` records to stderr, or through `tracing` when that feature is on.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_logging(level: log::LevelFilter, json: bool) {
    #[cfg(feature = "tracing")]
    {
        let _ = level;
        let _ = tracing_log::LogTracer::init();
        camcal_core::init_tracing(json);
    }
    #[cfg(not(feature = "tracing"))]
    {
        let _ = json;
        let _ = camcal_core::init_with_level(level);
    }
}
