//! Brown–Conrady radial + tangential lens distortion.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Raised when the fixed-point inversion produces a non-finite iterate.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
#[error("distortion inversion diverged at ({x}, {y}) after {iterations} iterations")]
pub struct InversionError {
    pub x: f64,
    pub y: f64,
    pub iterations: u32,
}

/// Coefficients in OpenCV order `(k1, k2, p1, p2, k3)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DistortionCoefficients {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl DistortionCoefficients {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn from_array(c: [f64; 5]) -> Self {
        Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        }
    }

    pub fn to_array(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|c| c.is_finite())
    }
}

pub const DEFAULT_INVERT_ITERATIONS: u32 = 20;
pub const DEFAULT_INVERT_TOLERANCE: f64 = 1e-14;

/// Forward model plus the settings of its iterative inverse.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistortionModel {
    pub coeffs: DistortionCoefficients,
    /// Upper bound on fixed-point iterations in [`Self::invert`].
    pub max_iterations: u32,
    /// Stop once the update norm drops below this value.
    pub tolerance: f64,
}

impl Default for DistortionModel {
    fn default() -> Self {
        Self::new(DistortionCoefficients::zero())
    }
}

impl From<DistortionCoefficients> for DistortionModel {
    fn from(coeffs: DistortionCoefficients) -> Self {
        Self::new(coeffs)
    }
}

impl DistortionModel {
    pub fn new(coeffs: DistortionCoefficients) -> Self {
        Self {
            coeffs,
            max_iterations: DEFAULT_INVERT_ITERATIONS,
            tolerance: DEFAULT_INVERT_TOLERANCE,
        }
    }

    /// Undistorted normalized point -> distorted normalized point.
    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let DistortionCoefficients { k1, k2, p1, p2, k3 } = self.coeffs;
        let (x, y) = (p.x, p.y);

        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + k1 * r2 + k2 * r4 + k3 * r6;

        let xy = x * y;
        let x_tan = 2.0 * p1 * xy + p2 * (r2 + 2.0 * x * x);
        let y_tan = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * xy;

        Point2::new(x * radial + x_tan, y * radial + y_tan)
    }

    /// Distorted normalized point -> undistorted normalized point.
    ///
    /// Fixed-point iteration seeded with the distorted point: each step
    /// subtracts the forward-model residual from the current estimate.
    pub fn invert(&self, distorted: Point2<f64>) -> Result<Point2<f64>, InversionError> {
        let mut u = distorted;
        let mut iterations = 0;
        while iterations < self.max_iterations {
            iterations += 1;
            let step = self.apply(u) - distorted;
            u -= step;
            if !(u.x.is_finite() && u.y.is_finite()) {
                return Err(InversionError {
                    x: distorted.x,
                    y: distorted.y,
                    iterations,
                });
            }
            if step.norm() < self.tolerance {
                break;
            }
        }
        Ok(u)
    }
}
