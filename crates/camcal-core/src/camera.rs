use nalgebra::{Matrix3, Point2};
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics with zero skew.
///
/// The matrix form is always
/// ```text
/// [ fx  0  cx ]
/// [  0 fy  cy ]
/// [  0  0   1 ]
/// ```
/// so the structural zeros can never drift.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicMatrix {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl IntrinsicMatrix {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    pub fn to_rows(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Build from a row-major 3x3, rejecting non-zero skew or a broken last row.
    pub fn from_rows(rows: [[f64; 3]; 3]) -> Option<Self> {
        let structural = [rows[0][1], rows[1][0], rows[2][0], rows[2][1]];
        if structural.iter().any(|v| *v != 0.0) || rows[2][2] != 1.0 {
            return None;
        }
        Some(Self::new(rows[0][0], rows[1][1], rows[0][2], rows[1][2]))
    }

    pub fn is_finite(&self) -> bool {
        self.fx.is_finite() && self.fy.is_finite() && self.cx.is_finite() && self.cy.is_finite()
    }

    /// Pixel -> normalized camera plane.
    #[inline]
    pub fn unproject(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }

    /// Normalized camera plane -> pixel.
    #[inline]
    pub fn project(&self, n: Point2<f64>) -> Point2<f64> {
        Point2::new(self.fx * n.x + self.cx, self.fy * n.y + self.cy)
    }
}
