//! Canonical raster order for a detected grid.
//!
//! Grid coordinates from the graph walk are only defined up to the
//! symmetries of a rectangle. The canonical labelling is the one whose
//! column axis points most nearly along image +x in a right-handed frame
//! (rows grow "downwards" relative to columns), read row by row.

use crate::gridgraph::GridCoords;
use crate::response::Corner;
use nalgebra::{Point2, Vector2};

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PointGrid {
    pub width: usize,
    pub height: usize,
    pub points: Vec<Point2<f32>>,
}

impl PointGrid {
    pub fn from_coords(coords: &GridCoords, corners: &[Corner]) -> Option<Self> {
        if !coords.is_complete() {
            return None;
        }
        let mut points = vec![Point2::origin(); coords.width * coords.height];
        for &(node, i, j) in &coords.nodes {
            points[j as usize * coords.width + i as usize] = corners[node].position;
        }
        Some(Self {
            width: coords.width,
            height: coords.height,
            points,
        })
    }

    fn at(&self, i: usize, j: usize) -> Point2<f32> {
        self.points[j * self.width + i]
    }

    fn remap(
        &self,
        width: usize,
        height: usize,
        src: impl Fn(usize, usize) -> (usize, usize),
    ) -> Self {
        let mut points = Vec::with_capacity(width * height);
        for j in 0..height {
            for i in 0..width {
                let (si, sj) = src(i, j);
                points.push(self.at(si, sj));
            }
        }
        Self {
            width,
            height,
            points,
        }
    }

    pub fn transpose(&self) -> Self {
        self.remap(self.height, self.width, |i, j| (j, i))
    }

    pub fn flip_columns(&self) -> Self {
        let w = self.width;
        self.remap(self.width, self.height, |i, j| (w - 1 - i, j))
    }

    pub fn rotate_180(&self) -> Self {
        let (w, h) = (self.width, self.height);
        self.remap(w, h, |i, j| (w - 1 - i, h - 1 - j))
    }

    pub fn rotate_90(&self) -> Self {
        self.transpose().flip_columns()
    }

    /// Mean step along increasing column index.
    pub fn u_axis(&self) -> Vector2<f32> {
        let mut sum = Vector2::zeros();
        for j in 0..self.height {
            for i in 1..self.width {
                sum += self.at(i, j) - self.at(i - 1, j);
            }
        }
        sum
    }

    /// Mean step along increasing row index.
    pub fn v_axis(&self) -> Vector2<f32> {
        let mut sum = Vector2::zeros();
        for j in 1..self.height {
            for i in 0..self.width {
                sum += self.at(i, j) - self.at(i, j - 1);
            }
        }
        sum
    }

    fn score(&self) -> (f32, f32) {
        let u = self.u_axis();
        let v = self.v_axis();
        (u.x / u.norm().max(f32::EPSILON), v.y / v.norm().max(f32::EPSILON))
    }
}

/// Relabel a complete grid into the canonical `columns x rows` raster order.
///
/// Returns `None` when the grid extent matches neither orientation.
pub(crate) fn canonical_order(grid: PointGrid, columns: usize, rows: usize) -> Option<PointGrid> {
    let mut grid = if grid.width == columns && grid.height == rows {
        grid
    } else if grid.width == rows && grid.height == columns {
        grid.transpose()
    } else {
        return None;
    };

    let u = grid.u_axis();
    let v = grid.v_axis();
    if u.x * v.y - u.y * v.x < 0.0 {
        grid = grid.flip_columns();
    }

    let mut candidates = vec![grid.rotate_180(), grid];
    if columns == rows {
        let quarter = candidates[1].rotate_90();
        candidates.push(quarter.rotate_180());
        candidates.push(quarter);
    }

    candidates.into_iter().max_by(|a, b| {
        let (au, av) = a.score();
        let (bu, bv) = b.score();
        au.total_cmp(&bu).then(av.total_cmp(&bv))
    })
}
