//! Anti-aliased chessboard renderer for detector tests.

use camcal_core::GrayImage;
use nalgebra::{Matrix3, Point2, Vector3};

pub const DARK: u8 = 30;
pub const LIGHT: u8 = 220;

/// Board-plane (square units, inner corner `(i, j)` at `(i, j)`) to image homography.
pub struct Scene {
    pub width: usize,
    pub height: usize,
    pub columns: usize,
    pub rows: usize,
    pub h: Matrix3<f64>,
}

impl Scene {
    /// Fronto-parallel board centred in the image, rotated by `angle` radians.
    pub fn rotated(
        width: usize,
        height: usize,
        columns: usize,
        rows: usize,
        square: f64,
        angle: f64,
    ) -> Self {
        let (s, c) = angle.sin_cos();
        let cx = (columns as f64 - 1.0) * 0.5;
        let cy = (rows as f64 - 1.0) * 0.5;
        let centre = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);
        let rot = Matrix3::new(
            square * c,
            -square * s,
            width as f64 * 0.5,
            square * s,
            square * c,
            height as f64 * 0.5,
            0.0,
            0.0,
            1.0,
        );
        Self {
            width,
            height,
            columns,
            rows,
            h: rot * centre,
        }
    }

    /// Same as `rotated`, followed by a mild projective tilt about the image centre.
    pub fn tilted(width: usize, height: usize, columns: usize, rows: usize, square: f64) -> Self {
        let mut scene = Self::rotated(width, height, columns, rows, square, 0.15);
        let (w2, h2) = (width as f64 * 0.5, height as f64 * 0.5);
        let to_centre = Matrix3::new(1.0, 0.0, -w2, 0.0, 1.0, -h2, 0.0, 0.0, 1.0);
        let back = Matrix3::new(1.0, 0.0, w2, 0.0, 1.0, h2, 0.0, 0.0, 1.0);
        let tilt = Matrix3::new(1.0, 0.05, 0.0, 0.0, 1.0, 0.0, 4.0e-4, 2.0e-4, 1.0);
        scene.h = back * tilt * to_centre * scene.h;
        scene
    }

    pub fn project(&self, i: f64, j: f64) -> Point2<f64> {
        let p = self.h * Vector3::new(i, j, 1.0);
        Point2::new(p.x / p.z, p.y / p.z)
    }

    /// Expected inner corners in canonical raster order.
    pub fn corners(&self) -> Vec<Point2<f64>> {
        let mut out = Vec::new();
        for j in 0..self.rows {
            for i in 0..self.columns {
                out.push(self.project(i as f64, j as f64));
            }
        }
        out
    }

    fn shade(&self, inv: &Matrix3<f64>, x: f64, y: f64) -> u32 {
        let b = inv * Vector3::new(x, y, 1.0);
        let (bx, by) = (b.x / b.z, b.y / b.z);
        let a = bx.floor() as i64;
        let c = by.floor() as i64;
        let on_board =
            a >= -1 && a <= self.columns as i64 - 1 && c >= -1 && c <= self.rows as i64 - 1;
        if on_board && (a + c).rem_euclid(2) == 0 {
            DARK as u32
        } else {
            LIGHT as u32
        }
    }

    /// Render with 4x4 supersampling per pixel.
    pub fn render(&self) -> GrayImage {
        let inv = self.h.try_inverse().expect("invertible homography");
        let ss = 4;
        let mut img = GrayImage::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                let mut acc = 0u32;
                for sy in 0..ss {
                    for sx in 0..ss {
                        let px = x as f64 + (sx as f64 + 0.5) / ss as f64 - 0.5;
                        let py = y as f64 + (sy as f64 + 0.5) / ss as f64 - 0.5;
                        acc += self.shade(&inv, px, py);
                    }
                }
                img.data[y * self.width + x] = ((acc + 8) / (ss * ss) as u32) as u8;
            }
        }
        img
    }
}
