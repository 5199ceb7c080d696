//! Closed-form intrinsics from plane homographies (Zhang), zero skew.
//!
//! With `B = K⁻ᵀK⁻¹` and zero skew, `B12 = 0` and the unknowns reduce to
//! `b = (B11, B22, B13, B23, B33)`. Each homography contributes
//! `h1ᵀBh2 = 0` and `h1ᵀBh1 - h2ᵀBh2 = 0`.

use crate::error::SolverError;
use camcal_core::IntrinsicMatrix;
use nalgebra::{DMatrix, Matrix3, SVector};

/// Constraint row `v_ij` restricted to the zero-skew unknowns.
fn v_ij(hmtx: &Matrix3<f64>, i: usize, j: usize) -> SVector<f64, 5> {
    let hi = hmtx.column(i);
    let hj = hmtx.column(j);

    SVector::<f64, 5>::from_row_slice(&[
        hi[0] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Pixel-space conditioning applied to homographies before the linear solve.
///
/// `N` maps pixels to roughly unit scale around `(u0, v0)`; the board
/// side is scaled by `plane_scale` so all homography entries are of
/// comparable magnitude.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Conditioning {
    pub u0: f64,
    pub v0: f64,
    pub f0: f64,
    pub plane_scale: f64,
}

impl Conditioning {
    pub fn identity() -> Self {
        Self {
            u0: 0.0,
            v0: 0.0,
            f0: 1.0,
            plane_scale: 1.0,
        }
    }

    fn image_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            1.0 / self.f0,
            0.0,
            -self.u0 / self.f0,
            0.0,
            1.0 / self.f0,
            -self.v0 / self.f0,
            0.0,
            0.0,
            1.0,
        )
    }

    fn apply(&self, hmtx: &Matrix3<f64>) -> Matrix3<f64> {
        let s = Matrix3::new(
            self.plane_scale,
            0.0,
            0.0,
            0.0,
            self.plane_scale,
            0.0,
            0.0,
            0.0,
            1.0,
        );
        let h = self.image_matrix() * hmtx * s;
        let n = h.norm();
        if n > 0.0 {
            h / n
        } else {
            h
        }
    }
}

/// Relative size below which a constraint singular value counts as zero.
const RANK_TOLERANCE: f64 = 1e-9;

/// Estimate zero-skew intrinsics from at least three plane homographies.
pub fn estimate_intrinsics(
    homographies: &[Matrix3<f64>],
    conditioning: &Conditioning,
) -> Result<IntrinsicMatrix, SolverError> {
    if homographies.len() < 3 {
        return Err(SolverError::diverged(format!(
            "need at least 3 homographies for intrinsics, got {}",
            homographies.len()
        )));
    }
    if !(conditioning.f0.is_finite() && conditioning.f0 > 0.0) {
        return Err(SolverError::diverged("invalid conditioning scale"));
    }

    let m = homographies.len();
    let mut vmtx = DMatrix::<f64>::zeros(2 * m, 5);
    for (k, hmtx) in homographies.iter().enumerate() {
        let h = conditioning.apply(hmtx);
        let v12 = v_ij(&h, 0, 1);
        let v11 = v_ij(&h, 0, 0);
        let v22 = v_ij(&h, 1, 1);
        vmtx.row_mut(2 * k).copy_from(&v12.transpose());
        vmtx.row_mut(2 * k + 1).copy_from(&(v11 - v22).transpose());
    }
    if !vmtx.iter().all(|v| v.is_finite()) {
        return Err(SolverError::diverged("non-finite homography"));
    }

    let svd = vmtx.svd(false, true);
    // A unique solution needs a one-dimensional null space. Repeated or
    // all fronto-parallel views leave several near-zero singular values.
    let mut sv: Vec<f64> = svd.singular_values.iter().copied().collect();
    sv.sort_by(f64::total_cmp);
    let largest = sv.last().copied().unwrap_or(0.0);
    if sv.len() < 2 || sv[1] <= RANK_TOLERANCE * largest {
        return Err(SolverError::diverged(
            "degenerate view configuration for intrinsics",
        ));
    }
    let v_t = svd
        .v_t
        .ok_or_else(|| SolverError::diverged("SVD of the intrinsic constraints failed"))?;
    let mut b = v_t.row(svd.singular_values.imin()).transpose();
    if b[0] < 0.0 {
        b = -b;
    }

    let (b11, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4]);
    if b11 <= 0.0 || b22 <= 0.0 {
        return Err(SolverError::diverged(
            "degenerate view configuration for intrinsics",
        ));
    }
    let cx = -b13 / b11;
    let cy = -b23 / b22;
    let lambda = b33 - (b13 * b13 / b11 + b23 * b23 / b22);
    if lambda <= 0.0 {
        return Err(SolverError::diverged("invalid scale in intrinsic estimate"));
    }
    let fx = (lambda / b11).sqrt();
    let fy = (lambda / b22).sqrt();

    // Undo the image conditioning: K = N⁻¹ K'.
    let f0 = conditioning.f0;
    let k = IntrinsicMatrix::new(
        f0 * fx,
        f0 * fy,
        f0 * cx + conditioning.u0,
        f0 * cy + conditioning.v0,
    );
    if !k.is_finite() {
        return Err(SolverError::diverged("non-finite intrinsic estimate"));
    }
    Ok(k)
}
