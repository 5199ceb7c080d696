//! Board pose from a plane homography and known intrinsics.

use crate::error::SolverError;
use camcal_core::IntrinsicMatrix;
use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion, Vector3};

/// Decompose `H = λ K [r1 r2 t]` into the board-to-camera transform.
///
/// The rotation is projected onto SO(3) and the sign is chosen so the board
/// lies in front of the camera.
pub fn pose_from_homography(
    intrinsics: &IntrinsicMatrix,
    hmtx: &Matrix3<f64>,
) -> Result<Isometry3<f64>, SolverError> {
    let k_inv = intrinsics
        .matrix()
        .try_inverse()
        .ok_or_else(|| SolverError::diverged("intrinsic matrix is singular"))?;

    let k_inv_h1 = k_inv * hmtx.column(0);
    let k_inv_h2 = k_inv * hmtx.column(1);
    let k_inv_h3 = k_inv * hmtx.column(2);

    let norm = 0.5 * (k_inv_h1.norm() + k_inv_h2.norm());
    if !(norm.is_finite() && norm > 0.0) {
        return Err(SolverError::diverged("degenerate homography for pose"));
    }
    let mut lambda = 1.0 / norm;
    if k_inv_h3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = lambda * k_inv_h1;
    let r2 = lambda * k_inv_h2;
    let r3 = r1.cross(&r2);
    let t: Vector3<f64> = lambda * k_inv_h3;

    let r_mat = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = r_mat.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(SolverError::diverged("SVD of the pose rotation failed"));
    };
    let mut r_orth = u * v_t;
    if r_orth.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r_orth = u_flipped * v_t;
    }

    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r_orth));
    Ok(Isometry3::from_parts(Translation3::from(t), rot))
}
