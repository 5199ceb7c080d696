//! Planar camera calibration solver.
//!
//! Given ordered chessboard corners from several views, [`solve`] estimates
//! the zero-skew intrinsic matrix, the five Brown–Conrady distortion
//! coefficients and one board pose per view:
//!
//! 1. a DLT homography per view,
//! 2. Zhang's closed-form intrinsics from the stacked homography constraints,
//! 3. a pose per view from its homography,
//! 4. Levenberg–Marquardt over every parameter on total squared
//!    reprojection error, with k3 optionally held at zero.
//!
//! ```no_run
//! use camcal_core::BoardGeometry;
//! use camcal_solver::{solve, SolverOptions};
//!
//! # fn run(corner_sets: Vec<camcal_core::CornerSet>) -> Result<(), camcal_solver::SolverError> {
//! let board = BoardGeometry::new(9, 6, 25.0)?;
//! let solution = solve(&corner_sets, &board, &SolverOptions::default().with_fix_k3(true))?;
//! println!("rms = {:.3} px", solution.rms);
//! # Ok(())
//! # }
//! ```

mod error;
mod lm;
mod options;
mod pose;
mod problem;
mod solve;
mod zhang;

pub use error::SolverError;
pub use lm::LmReport;
pub use options::{SolverOptions, DEFAULT_MIN_VIEWS};
pub use pose::pose_from_homography;
pub use problem::project_point;
pub use solve::{initial_estimate, reprojection_stats, solve, CalibrationSolution, ViewStats};
pub use zhang::{estimate_intrinsics, Conditioning};
