//! Gradient-orthogonality sub-pixel refinement.
//!
//! For a true saddle point `q`, every image gradient `g(p)` in a small
//! window is orthogonal to `p - q`. Stacking `g gᵀ (p - q) = 0` over the
//! window with Gaussian weights gives a 2x2 system that is re-solved around
//! the updated estimate until the step becomes small.

use crate::params::RefineParams;
use camcal_core::{sample_bilinear, GrayImageView};
use nalgebra::Point2;

/// Smallest half-window that still collects enough gradient samples.
pub const MIN_HALF_WINDOW: u32 = 2;

/// Half-window for a corner whose closest grid neighbour is `spacing` pixels away.
pub fn half_window_for_spacing(params: &RefineParams, spacing: f32) -> u32 {
    let local = (0.25 * spacing).floor().max(0.0) as u32;
    local.min(params.half_window).max(MIN_HALF_WINDOW)
}

/// Refine one corner. Returns the coarse estimate unchanged if the solve is
/// singular or the corner wanders farther than the half-window.
pub fn refine_corner(
    img: &GrayImageView<'_>,
    coarse: Point2<f32>,
    half_window: u32,
    params: &RefineParams,
) -> Point2<f32> {
    let hw = half_window.max(1) as i32;
    let inv_h2 = 1.0 / (hw * hw) as f64;
    let mut cur = coarse;

    for _ in 0..params.max_iterations {
        let (mut a, mut b, mut c, mut bb1, mut bb2) = (0.0f64, 0.0f64, 0.0f64, 0.0f64, 0.0f64);

        for dy in -hw..=hw {
            for dx in -hw..=hw {
                let w = (-((dx * dx + dy * dy) as f64) * inv_h2).exp();
                let qx = cur.x + dx as f32;
                let qy = cur.y + dy as f32;
                let gx = 0.5
                    * (sample_bilinear(img, qx + 1.0, qy) - sample_bilinear(img, qx - 1.0, qy))
                        as f64;
                let gy = 0.5
                    * (sample_bilinear(img, qx, qy + 1.0) - sample_bilinear(img, qx, qy - 1.0))
                        as f64;

                let gxx = gx * gx * w;
                let gxy = gx * gy * w;
                let gyy = gy * gy * w;
                a += gxx;
                b += gxy;
                c += gyy;
                bb1 += gxx * dx as f64 + gxy * dy as f64;
                bb2 += gxy * dx as f64 + gyy * dy as f64;
            }
        }

        let det = a * c - b * b;
        if det.abs() <= f64::EPSILON * (a * c).abs().max(1.0) {
            break;
        }
        let sx = (c * bb1 - b * bb2) / det;
        let sy = (a * bb2 - b * bb1) / det;
        cur = Point2::new(cur.x + sx as f32, cur.y + sy as f32);

        if ((sx * sx + sy * sy).sqrt() as f32) < params.epsilon {
            break;
        }
    }

    let limit = half_window as f32;
    if !(cur.x.is_finite() && cur.y.is_finite())
        || (cur.x - coarse.x).abs() > limit
        || (cur.y - coarse.y).abs() > limit
    {
        return coarse;
    }
    cur
}
