//! Lens-distortion removal for whole images and point lists.
//!
//! Destination pixels live in the ideal (undistorted) camera. Each one is
//! lifted to the normalized plane with `K⁻¹`, pushed through the forward
//! distortion model to find where the lens actually imaged it, mapped back
//! with `K` and sampled bilinearly from the source. Pixels whose source
//! lies outside the image take the border value.

use crate::image::check_buffer;
use crate::{
    DistortionCoefficients, DistortionModel, GrayImage, GrayImageView, ImageError,
    IntrinsicMatrix, InversionError,
};
use nalgebra::Point2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

// Round-off slack when a source coordinate lands exactly on the image edge.
const EDGE_EPS: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndistortOptions {
    /// Fill value for pixels that map outside the source image.
    pub border: u8,
    /// Camera matrix of the corrected image. `None` keeps the calibrated one.
    pub new_camera: Option<IntrinsicMatrix>,
}

impl Default for UndistortOptions {
    fn default() -> Self {
        Self {
            border: 0,
            new_camera: None,
        }
    }
}

/// Per-pixel source coordinates for one image size and one calibration.
///
/// Building the map is the expensive part; applying it is a gather. Entries
/// that fall outside the source are stored as `NaN`.
#[derive(Clone, Debug)]
pub struct UndistortMap {
    pub width: usize,
    pub height: usize,
    map_x: Vec<f32>,
    map_y: Vec<f32>,
}

impl UndistortMap {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(intrinsics, distortion, options))
    )]
    pub fn new(
        width: usize,
        height: usize,
        intrinsics: &IntrinsicMatrix,
        distortion: &DistortionCoefficients,
        options: &UndistortOptions,
    ) -> Self {
        let model = DistortionModel::new(*distortion);
        let target = options.new_camera.unwrap_or(*intrinsics);
        let mut map_x = vec![f32::NAN; width * height];
        let mut map_y = vec![f32::NAN; width * height];
        let max_x = width as f64 - 1.0;
        let max_y = height as f64 - 1.0;

        if width > 0 {
            map_x
                .par_chunks_mut(width)
                .zip(map_y.par_chunks_mut(width))
                .enumerate()
                .for_each(|(y, (row_x, row_y))| {
                    for x in 0..width {
                        let n = target.unproject(Point2::new(x as f64, y as f64));
                        let src = intrinsics.project(model.apply(n));
                        if !(src.x.is_finite() && src.y.is_finite()) {
                            continue;
                        }
                        if src.x < -EDGE_EPS
                            || src.y < -EDGE_EPS
                            || src.x > max_x + EDGE_EPS
                            || src.y > max_y + EDGE_EPS
                        {
                            continue;
                        }
                        row_x[x] = src.x.clamp(0.0, max_x) as f32;
                        row_y[x] = src.y.clamp(0.0, max_y) as f32;
                    }
                });
        }

        Self {
            width,
            height,
            map_x,
            map_y,
        }
    }

    /// Source coordinate for destination pixel `(x, y)`, if it lands inside.
    pub fn source(&self, x: usize, y: usize) -> Option<(f32, f32)> {
        let idx = y * self.width + x;
        let (sx, sy) = (self.map_x[idx], self.map_y[idx]);
        (sx.is_finite() && sy.is_finite()).then_some((sx, sy))
    }

    pub fn remap_gray(&self, src: &GrayImageView<'_>, border: u8) -> Result<GrayImage, ImageError> {
        let data = self.remap_interleaved(src.data, src.width, src.height, 1, border)?;
        GrayImage::from_raw(self.width, self.height, data)
    }

    /// Remap a row-major interleaved buffer (`channels` bytes per pixel).
    pub fn remap_interleaved(
        &self,
        data: &[u8],
        width: usize,
        height: usize,
        channels: usize,
        border: u8,
    ) -> Result<Vec<u8>, ImageError> {
        check_buffer(width, height, channels, data.len())?;
        if width != self.width || height != self.height {
            return Err(ImageError::InvalidDimensions { width, height });
        }

        let row_len = width * channels;
        let mut out = vec![border; data.len()];
        out.par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(y, row)| {
                for x in 0..width {
                    let Some((sx, sy)) = self.source(x, y) else {
                        continue;
                    };
                    for c in 0..channels {
                        row[x * channels + c] =
                            sample_channel(data, width, height, channels, c, sx, sy);
                    }
                }
            });
        Ok(out)
    }
}

#[inline]
fn sample_channel(
    data: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    c: usize,
    x: f32,
    y: f32,
) -> u8 {
    let x0 = (x.floor() as usize).min(width - 1);
    let y0 = (y.floor() as usize).min(height - 1);
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let px = |xx: usize, yy: usize| data[(yy * width + xx) * channels + c] as f32;
    let a = px(x0, y0) + fx * (px(x1, y0) - px(x0, y0));
    let b = px(x0, y1) + fx * (px(x1, y1) - px(x0, y1));
    (a + fy * (b - a)).round().clamp(0.0, 255.0) as u8
}

/// Undistort a grayscale image with the calibrated camera matrix.
pub fn undistort_image(
    src: &GrayImageView<'_>,
    intrinsics: &IntrinsicMatrix,
    distortion: &DistortionCoefficients,
) -> Result<GrayImage, ImageError> {
    let options = UndistortOptions::default();
    let map = UndistortMap::new(src.width, src.height, intrinsics, distortion, &options);
    map.remap_gray(src, options.border)
}

/// Remove distortion from observed pixel positions.
///
/// Output points are pixels of the ideal camera with the same intrinsics.
pub fn undistort_points(
    points: &[Point2<f64>],
    intrinsics: &IntrinsicMatrix,
    distortion: &DistortionCoefficients,
) -> Result<Vec<Point2<f64>>, InversionError> {
    let model = DistortionModel::new(*distortion);
    points
        .iter()
        .map(|p| {
            let n = model.invert(intrinsics.unproject(*p))?;
            Ok(intrinsics.project(n))
        })
        .collect()
}
