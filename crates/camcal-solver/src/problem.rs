//! Joint reprojection problem over intrinsics, distortion and per-view poses.
//!
//! Parameter layout: `[fx, fy, cx, cy, k1, k2, p1, p2, (k3)]` followed by
//! six values per view, an axis-angle rotation and a translation. `k3` is
//! absent when it is fixed at zero. Skew is never a parameter.

use camcal_core::{DistortionCoefficients, DistortionModel, IntrinsicMatrix};
use levenberg_marquardt::LeastSquaresProblem;
use nalgebra::{
    storage::Owned, DMatrix, DVector, Dyn, Isometry3, Point2, Point3, Translation3,
    UnitQuaternion, Vector3,
};

/// Central-difference step for a parameter of magnitude `|x|`.
#[inline]
fn fd_step(x: f64) -> f64 {
    1e-6 * x.abs().max(1.0)
}

/// Projection of a board-frame point through pose, lens and camera matrix.
pub fn project_point(
    intrinsics: &IntrinsicMatrix,
    distortion: &DistortionModel,
    pose: &Isometry3<f64>,
    object: &Point3<f64>,
) -> Point2<f64> {
    let pc = pose * object;
    let n = Point2::new(pc.x / pc.z, pc.y / pc.z);
    intrinsics.project(distortion.apply(n))
}

pub struct PlanarProblem<'a> {
    object_points: &'a [Point3<f64>],
    observations: &'a [&'a [Point2<f64>]],
    fix_k3: bool,
    params: DVector<f64>,
}

impl<'a> PlanarProblem<'a> {
    pub fn new(
        object_points: &'a [Point3<f64>],
        observations: &'a [&'a [Point2<f64>]],
        fix_k3: bool,
    ) -> Self {
        Self {
            object_points,
            observations,
            fix_k3,
            params: DVector::zeros(0),
        }
    }

    /// Start the problem at the given camera and poses.
    pub fn with_start(
        mut self,
        intrinsics: &IntrinsicMatrix,
        distortion: &DistortionCoefficients,
        poses: &[Isometry3<f64>],
    ) -> Self {
        self.params = self.pack(intrinsics, distortion, poses);
        self
    }

    pub fn num_params(&self) -> usize {
        self.num_intrinsic_params() + 6 * self.num_views()
    }

    pub fn num_residuals(&self) -> usize {
        self.rows_per_view() * self.num_views()
    }

    pub fn num_intrinsic_params(&self) -> usize {
        if self.fix_k3 {
            8
        } else {
            9
        }
    }

    pub fn num_views(&self) -> usize {
        self.observations.len()
    }

    pub fn pack(
        &self,
        intrinsics: &IntrinsicMatrix,
        distortion: &DistortionCoefficients,
        poses: &[Isometry3<f64>],
    ) -> DVector<f64> {
        let n0 = self.num_intrinsic_params();
        let mut x = DVector::zeros(n0 + 6 * poses.len());
        let d = distortion;
        let head = [
            intrinsics.fx,
            intrinsics.fy,
            intrinsics.cx,
            intrinsics.cy,
            d.k1,
            d.k2,
            d.p1,
            d.p2,
            d.k3,
        ];
        for (k, v) in head.iter().take(n0).enumerate() {
            x[k] = *v;
        }
        for (v, pose) in poses.iter().enumerate() {
            let rv = pose.rotation.scaled_axis();
            let t = pose.translation.vector;
            let o = n0 + 6 * v;
            for k in 0..3 {
                x[o + k] = rv[k];
                x[o + 3 + k] = t[k];
            }
        }
        x
    }

    pub fn unpack_camera(&self, x: &DVector<f64>) -> (IntrinsicMatrix, DistortionCoefficients) {
        let k3 = if self.fix_k3 { 0.0 } else { x[8] };
        (
            IntrinsicMatrix::new(x[0], x[1], x[2], x[3]),
            DistortionCoefficients {
                k1: x[4],
                k2: x[5],
                p1: x[6],
                p2: x[7],
                k3,
            },
        )
    }

    pub fn unpack_pose(&self, x: &DVector<f64>, view: usize) -> Isometry3<f64> {
        let o = self.num_intrinsic_params() + 6 * view;
        let rv = Vector3::new(x[o], x[o + 1], x[o + 2]);
        let t = Vector3::new(x[o + 3], x[o + 4], x[o + 5]);
        Isometry3::from_parts(Translation3::from(t), UnitQuaternion::from_scaled_axis(rv))
    }

    pub fn unpack_poses(&self, x: &DVector<f64>) -> Vec<Isometry3<f64>> {
        (0..self.num_views()).map(|v| self.unpack_pose(x, v)).collect()
    }

    /// Residuals `predicted - observed` for one view, x and y interleaved.
    fn view_residuals(
        &self,
        intrinsics: &IntrinsicMatrix,
        distortion: &DistortionModel,
        pose: &Isometry3<f64>,
        view: usize,
        out: &mut [f64],
    ) {
        for (k, (obj, obs)) in self
            .object_points
            .iter()
            .zip(self.observations[view].iter())
            .enumerate()
        {
            let p = project_point(intrinsics, distortion, pose, obj);
            out[2 * k] = p.x - obs.x;
            out[2 * k + 1] = p.y - obs.y;
        }
    }

    fn rows_per_view(&self) -> usize {
        2 * self.object_points.len()
    }
}

impl PlanarProblem<'_> {
    /// Stacked residuals of every view at `x`.
    pub fn residuals_at(&self, x: &DVector<f64>) -> DVector<f64> {
        let (k, d) = self.unpack_camera(x);
        let model = DistortionModel::new(d);
        let rows = self.rows_per_view();
        let mut r = DVector::zeros(self.num_residuals());
        for v in 0..self.num_views() {
            let pose = self.unpack_pose(x, v);
            let out = &mut r.as_mut_slice()[v * rows..(v + 1) * rows];
            self.view_residuals(&k, &model, &pose, v, out);
        }
        r
    }

    /// Central differences, exploiting that a pose only moves its own view.
    pub fn jacobian_at(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let n0 = self.num_intrinsic_params();
        let rows = self.rows_per_view();
        let mut jac = DMatrix::zeros(self.num_residuals(), self.num_params());
        let mut xp = x.clone();

        for k in 0..n0 {
            let h = fd_step(x[k]);
            xp[k] = x[k] + h;
            let rp = self.residuals_at(&xp);
            xp[k] = x[k] - h;
            let rm = self.residuals_at(&xp);
            xp[k] = x[k];
            jac.set_column(k, &((rp - rm) / (2.0 * h)));
        }

        let (intr, dist) = self.unpack_camera(x);
        let model = DistortionModel::new(dist);
        let mut rp = vec![0.0; rows];
        let mut rm = vec![0.0; rows];
        for v in 0..self.num_views() {
            for p in 0..6 {
                let col = n0 + 6 * v + p;
                let h = fd_step(x[col]);
                xp[col] = x[col] + h;
                self.view_residuals(&intr, &model, &self.unpack_pose(&xp, v), v, &mut rp);
                xp[col] = x[col] - h;
                self.view_residuals(&intr, &model, &self.unpack_pose(&xp, v), v, &mut rm);
                xp[col] = x[col];
                for r in 0..rows {
                    jac[(v * rows + r, col)] = (rp[r] - rm[r]) / (2.0 * h);
                }
            }
        }
        jac
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for PlanarProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let r = self.residuals_at(&self.params);
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let jac = self.jacobian_at(&self.params);
        jac.iter().all(|v| v.is_finite()).then_some(jac)
    }
}
