//! ChESS saddle-point response.
//!
//! Sixteen samples on a radius-5 circle around each pixel. At an X-junction
//! opposite samples agree and quarter-turn samples disagree, which the
//! "sum" term rewards; edges and blobs are penalised by the "diff" and
//! "mean" terms.

use crate::params::ResponseParams;
use camcal_core::{sample_bilinear, GrayImageView};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Ring radius in pixels.
pub const RING_RADIUS: i32 = 5;

/// Ring offsets in angular order; `RING[n]` and `RING[n + 8]` are opposite.
pub const RING: [(i32, i32); 16] = [
    (5, 0),
    (5, 2),
    (4, 4),
    (2, 5),
    (0, 5),
    (-2, 5),
    (-4, 4),
    (-5, 2),
    (-5, 0),
    (-5, -2),
    (-4, -4),
    (-2, -5),
    (0, -5),
    (2, -5),
    (4, -4),
    (5, -2),
];

/// A saddle-point candidate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Corner {
    pub position: Point2<f32>,
    /// Direction of the bright diagonal, radians modulo π.
    pub orientation: f32,
    pub strength: f32,
}

/// Response map in row-major layout.
#[derive(Clone, Debug)]
pub struct ResponseMap {
    pub w: usize,
    pub h: usize,
    pub data: Vec<f32>,
}

impl ResponseMap {
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.w + x]
    }

    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(0.0, f32::max)
    }
}

/// Compute the ChESS response for every pixel at least `RING_RADIUS` from the border.
pub fn chess_response(img: &GrayImageView<'_>) -> ResponseMap {
    let (w, h) = (img.width, img.height);
    let mut data = vec![0.0f32; w * h];
    let r = RING_RADIUS as usize;
    if w <= 2 * r || h <= 2 * r {
        return ResponseMap { w, h, data };
    }

    for y in r..h - r {
        for x in r..w - r {
            let mut s = [0i32; 16];
            for (n, (dx, dy)) in RING.iter().enumerate() {
                let sx = (x as i32 + dx) as usize;
                let sy = (y as i32 + dy) as usize;
                s[n] = img.get(sx, sy) as i32;
            }

            let sum_resp: i32 = (0..4)
                .map(|n| ((s[n] + s[n + 8]) - (s[n + 4] + s[n + 12])).abs())
                .sum();
            let diff_resp: i32 = (0..8).map(|n| (s[n] - s[n + 8]).abs()).sum();

            let ring_mean = s.iter().sum::<i32>() as f32 / 16.0;
            let local = img.get(x, y) as i32
                + img.get(x - 1, y) as i32
                + img.get(x + 1, y) as i32
                + img.get(x, y - 1) as i32
                + img.get(x, y + 1) as i32;
            let local_mean = local as f32 / 5.0;
            let mean_resp = (ring_mean - local_mean).abs();

            data[y * w + x] = (sum_resp - diff_resp) as f32 - 16.0 * mean_resp;
        }
    }

    ResponseMap { w, h, data }
}

/// Strict local maxima above threshold, in raster order.
///
/// Equal neighbours are resolved in favour of the first pixel in raster
/// order so that plateaus yield exactly one candidate.
pub fn find_peaks(map: &ResponseMap, params: &ResponseParams) -> Vec<(usize, usize, f32)> {
    let max = map.max();
    if max <= 0.0 {
        return Vec::new();
    }
    let threshold = (params.threshold_rel * max).max(params.min_response);
    let rad = params.nms_radius as i32;
    let border = RING_RADIUS as usize;

    let mut peaks = Vec::new();
    if map.w <= 2 * border || map.h <= 2 * border {
        return peaks;
    }
    for y in border..map.h - border {
        for x in border..map.w - border {
            let v = map.at(x, y);
            if v <= threshold {
                continue;
            }
            let mut is_max = true;
            'window: for dy in -rad..=rad {
                for dx in -rad..=rad {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = x as i32 + dx;
                    let ny = y as i32 + dy;
                    if nx < 0 || ny < 0 || nx >= map.w as i32 || ny >= map.h as i32 {
                        continue;
                    }
                    let nv = map.at(nx as usize, ny as usize);
                    let earlier = dy < 0 || (dy == 0 && dx < 0);
                    if nv > v || (earlier && nv == v) {
                        is_max = false;
                        break 'window;
                    }
                }
            }
            if is_max {
                peaks.push((x, y, v));
            }
        }
    }
    peaks
}

/// Response-weighted centroid of the 3x3 neighbourhood of a peak.
fn peak_centroid(map: &ResponseMap, x: usize, y: usize) -> Point2<f32> {
    let mut sw = 0.0f32;
    let mut sx = 0.0f32;
    let mut sy = 0.0f32;
    for dy in -1i32..=1 {
        for dx in -1i32..=1 {
            let v = map.at((x as i32 + dx) as usize, (y as i32 + dy) as usize);
            if v > 0.0 {
                sw += v;
                sx += v * dx as f32;
                sy += v * dy as f32;
            }
        }
    }
    if sw > 0.0 {
        Point2::new(x as f32 + sx / sw, y as f32 + sy / sw)
    } else {
        Point2::new(x as f32, y as f32)
    }
}

/// Bright-diagonal direction from the second angular harmonic of the ring.
pub fn ring_orientation(img: &GrayImageView<'_>, p: Point2<f32>) -> f32 {
    let mut c = 0.0f32;
    let mut s = 0.0f32;
    for (dx, dy) in RING {
        let v = sample_bilinear(img, p.x + dx as f32, p.y + dy as f32);
        let phi = (dy as f32).atan2(dx as f32);
        c += v * (2.0 * phi).cos();
        s += v * (2.0 * phi).sin();
    }
    0.5 * s.atan2(c)
}

/// Detect saddle candidates with coarse sub-pixel position and orientation.
pub fn detect_saddles(img: &GrayImageView<'_>, params: &ResponseParams) -> Vec<Corner> {
    let map = chess_response(img);
    find_peaks(&map, params)
        .into_iter()
        .map(|(x, y, strength)| {
            let position = peak_centroid(&map, x, y);
            Corner {
                position,
                orientation: ring_orientation(img, position),
                strength,
            }
        })
        .collect()
}
