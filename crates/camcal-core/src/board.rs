//! Board geometry and ordered corner sets.

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

/// Smallest accepted number of inner corners along either board axis.
pub const MIN_BOARD_DIM: u32 = 3;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("board dimensions must be at least 3x3 inner corners (got {columns}x{rows})")]
    InvalidDimensions { columns: u32, rows: u32 },

    #[error("square size must be positive and finite (got {0})")]
    InvalidSquareSize(f64),

    #[error("corner set has {got} points, board expects {expected}")]
    CornerCountMismatch { expected: usize, got: usize },

    #[error("corner {index} has a non-finite coordinate")]
    NonFiniteCorner { index: usize },
}

/// Inner-corner grid of a planar chessboard.
///
/// `columns` and `rows` count *inner* corners, matching the `patternSize`
/// convention of OpenCV chessboard routines. `square_size` is in millimetres.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardGeometry {
    pub columns: u32,
    pub rows: u32,
    pub square_size: f64,
}

impl BoardGeometry {
    pub fn new(columns: u32, rows: u32, square_size: f64) -> Result<Self, GeometryError> {
        let board = Self {
            columns,
            rows,
            square_size,
        };
        board.validate()?;
        Ok(board)
    }

    /// Check invariants of a value that may have come from deserialization.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.columns < MIN_BOARD_DIM || self.rows < MIN_BOARD_DIM {
            return Err(GeometryError::InvalidDimensions {
                columns: self.columns,
                rows: self.rows,
            });
        }
        if !(self.square_size.is_finite() && self.square_size > 0.0) {
            return Err(GeometryError::InvalidSquareSize(self.square_size));
        }
        Ok(())
    }

    #[inline]
    pub fn corner_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    /// Board-plane coordinates (Z = 0) of every inner corner in raster order.
    pub fn object_points(&self) -> Vec<Point3<f64>> {
        let s = self.square_size;
        (0..self.rows)
            .flat_map(|j| {
                (0..self.columns).map(move |i| Point3::new(i as f64 * s, j as f64 * s, 0.0))
            })
            .collect()
    }

    /// Same as [`Self::object_points`] without the Z coordinate.
    pub fn plane_points(&self) -> Vec<Point2<f64>> {
        self.object_points()
            .into_iter()
            .map(|p| Point2::new(p.x, p.y))
            .collect()
    }
}

/// Detected corners of one image, in canonical raster order.
///
/// Index `row * columns + col` holds the corner at grid position `(col, row)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CornerSet {
    columns: u32,
    rows: u32,
    points: Vec<Point2<f64>>,
}

impl CornerSet {
    pub fn new(board: &BoardGeometry, points: Vec<Point2<f64>>) -> Result<Self, GeometryError> {
        let set = Self {
            columns: board.columns,
            rows: board.rows,
            points,
        };
        set.validate(board)?;
        Ok(set)
    }

    /// Check the size against `board` and that every corner is finite.
    pub fn validate(&self, board: &BoardGeometry) -> Result<(), GeometryError> {
        if !self.matches(board) || self.points.len() != board.corner_count() {
            return Err(GeometryError::CornerCountMismatch {
                expected: board.corner_count(),
                got: self.points.len(),
            });
        }
        match self
            .points
            .iter()
            .position(|p| !(p.x.is_finite() && p.y.is_finite()))
        {
            Some(index) => Err(GeometryError::NonFiniteCorner { index }),
            None => Ok(()),
        }
    }

    #[inline]
    pub fn columns(&self) -> u32 {
        self.columns
    }

    #[inline]
    pub fn rows(&self) -> u32 {
        self.rows
    }

    #[inline]
    pub fn points(&self) -> &[Point2<f64>] {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn at(&self, col: u32, row: u32) -> Option<Point2<f64>> {
        if col >= self.columns || row >= self.rows {
            return None;
        }
        self.points
            .get(row as usize * self.columns as usize + col as usize)
            .copied()
    }

    /// Whether this set was produced for a board with the same grid size.
    pub fn matches(&self, board: &BoardGeometry) -> bool {
        self.columns == board.columns && self.rows == board.rows
    }
}
