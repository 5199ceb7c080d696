use crate::error::SolverError;
use crate::lm::{refine, LmReport};
use crate::options::SolverOptions;
use crate::pose::pose_from_homography;
use crate::problem::{project_point, PlanarProblem};
use crate::zhang::{estimate_intrinsics, Conditioning};
use camcal_core::{
    estimate_homography, BoardGeometry, CalibrationArtifact, CornerSet, DistortionCoefficients,
    DistortionModel, IntrinsicMatrix,
};
use levenberg_marquardt::LeastSquaresProblem;
use log::{debug, info};
use nalgebra::{Isometry3, Point2, Point3, Vector2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Reprojection statistics of one view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewStats {
    /// `predicted - observed` per corner, canonical order.
    pub residuals: Vec<Vector2<f64>>,
    /// Root mean squared corner distance.
    pub rms: f64,
    /// L2 norm of all residuals divided by the corner count.
    pub error: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationSolution {
    pub intrinsics: IntrinsicMatrix,
    pub distortion: DistortionCoefficients,
    /// Board-to-camera transform per view.
    pub poses: Vec<Isometry3<f64>>,
    pub views: Vec<ViewStats>,
    /// `sqrt(Σ d² / N)` over every corner of every view.
    pub rms: f64,
    /// Mean of the per-view `error`.
    pub mean_error: f64,
    pub report: LmReport,
}

impl CalibrationSolution {
    pub fn into_artifact(&self, board: &BoardGeometry, timestamp: u64) -> CalibrationArtifact {
        CalibrationArtifact::new(self.intrinsics, self.distortion, *board, self.rms, timestamp)
            .with_poses(self.poses.clone())
    }
}

/// Per-view and aggregate reprojection errors for a given camera.
pub fn reprojection_stats(
    board: &BoardGeometry,
    corner_sets: &[CornerSet],
    intrinsics: &IntrinsicMatrix,
    distortion: &DistortionCoefficients,
    poses: &[Isometry3<f64>],
) -> (Vec<ViewStats>, f64) {
    let objects = board.object_points();
    let model = DistortionModel::new(*distortion);
    let mut total_sq = 0.0;
    let mut total_n = 0usize;

    let views = corner_sets
        .iter()
        .zip(poses)
        .map(|(set, pose)| {
            let residuals: Vec<Vector2<f64>> = objects
                .iter()
                .zip(set.points())
                .map(|(obj, obs)| project_point(intrinsics, &model, pose, obj) - *obs)
                .collect();
            let sq: f64 = residuals.iter().map(|r| r.norm_squared()).sum();
            let n = residuals.len().max(1) as f64;
            total_sq += sq;
            total_n += residuals.len();
            ViewStats {
                rms: (sq / n).sqrt(),
                error: sq.sqrt() / n,
                residuals,
            }
        })
        .collect();

    (views, (total_sq / total_n.max(1) as f64).sqrt())
}

fn conditioning(board: &BoardGeometry, corner_sets: &[CornerSet]) -> Conditioning {
    let pts = corner_sets.iter().flat_map(|s| s.points().iter());
    let n = corner_sets.iter().map(CornerSet::len).sum::<usize>().max(1) as f64;
    let (sx, sy) = pts.clone().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let (u0, v0) = (sx / n, sy / n);
    let spread = (pts
        .map(|p| (p.x - u0).powi(2) + (p.y - v0).powi(2))
        .sum::<f64>()
        / n)
        .sqrt();

    Conditioning {
        u0,
        v0,
        f0: spread.max(1.0),
        plane_scale: board.square_size * board.columns.max(board.rows) as f64,
    }
}

fn check_finite(
    intrinsics: &IntrinsicMatrix,
    distortion: &DistortionCoefficients,
    poses: &[Isometry3<f64>],
) -> Result<(), SolverError> {
    if !intrinsics.is_finite() || intrinsics.fx <= 0.0 || intrinsics.fy <= 0.0 {
        return Err(SolverError::diverged(format!(
            "invalid intrinsics {intrinsics:?}"
        )));
    }
    if !distortion.is_finite() {
        return Err(SolverError::diverged("non-finite distortion coefficients"));
    }
    let pose_ok = poses.iter().all(|p| {
        p.translation.vector.iter().all(|v| v.is_finite())
            && p.rotation.coords.iter().all(|v| v.is_finite())
    });
    if !pose_ok {
        return Err(SolverError::diverged("non-finite pose"));
    }
    Ok(())
}

/// Initial camera and poses: homographies, Zhang, per-view decomposition.
pub fn initial_estimate(
    board: &BoardGeometry,
    corner_sets: &[CornerSet],
) -> Result<(IntrinsicMatrix, Vec<Isometry3<f64>>), SolverError> {
    let plane: Vec<Point2<f64>> = board.plane_points();
    let homographies = corner_sets
        .iter()
        .map(|set| estimate_homography(&plane, set.points()).map(|h| h.h))
        .collect::<Result<Vec<_>, _>>()?;

    let intrinsics = estimate_intrinsics(&homographies, &conditioning(board, corner_sets))?;
    debug!(
        "closed-form intrinsics fx={:.3} fy={:.3} cx={:.3} cy={:.3}",
        intrinsics.fx, intrinsics.fy, intrinsics.cx, intrinsics.cy
    );
    let poses = homographies
        .iter()
        .map(|h| pose_from_homography(&intrinsics, h))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((intrinsics, poses))
}

/// Calibrate from corner sets of one board seen in several views.
///
/// Fails with `InsufficientData` below `options.min_views` and with
/// `DidNotConverge` when any estimate turns non-finite. No partial result is
/// ever returned.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(views = corner_sets.len(), fix_k3 = options.fix_k3))
)]
pub fn solve(
    corner_sets: &[CornerSet],
    board: &BoardGeometry,
    options: &SolverOptions,
) -> Result<CalibrationSolution, SolverError> {
    board.validate()?;
    for set in corner_sets {
        set.validate(board)?;
    }
    let required = options.min_views.max(3);
    if corner_sets.len() < required {
        return Err(SolverError::InsufficientData {
            accepted: corner_sets.len(),
            required,
        });
    }

    let (k0, poses0) = initial_estimate(board, corner_sets)?;

    let objects: Vec<Point3<f64>> = board.object_points();
    let observations: Vec<&[Point2<f64>]> = corner_sets.iter().map(CornerSet::points).collect();
    let problem = PlanarProblem::new(&objects, &observations, options.fix_k3).with_start(
        &k0,
        &DistortionCoefficients::zero(),
        &poses0,
    );
    let (problem, report) = refine(problem, options)?;

    let x = problem.params();
    let (intrinsics, distortion) = problem.unpack_camera(&x);
    let poses = problem.unpack_poses(&x);
    check_finite(&intrinsics, &distortion, &poses)?;

    let (views, rms) = reprojection_stats(board, corner_sets, &intrinsics, &distortion, &poses);
    if !rms.is_finite() {
        return Err(SolverError::diverged("non-finite reprojection error"));
    }
    let mean_error = views.iter().map(|v| v.error).sum::<f64>() / views.len() as f64;

    info!(
        "calibrated {} views: rms={rms:.4}px after {} evaluations (converged: {})",
        corner_sets.len(),
        report.evaluations,
        report.converged
    );

    Ok(CalibrationSolution {
        intrinsics,
        distortion,
        poses,
        views,
        rms,
        mean_error,
        report,
    })
}
