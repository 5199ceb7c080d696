use crate::gridgraph::{assign_grid_coordinates, connected_components, GridGraph};
use crate::ordering::{canonical_order, PointGrid};
use crate::params::ChessboardParams;
use crate::refine::{half_window_for_spacing, refine_corner};
use crate::response::{detect_saddles, Corner, RING_RADIUS};
use camcal_core::{BoardGeometry, CornerSet, GeometryError, GrayImageView};
use log::{debug, info};
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Why a single image did not yield a corner set. Local to that image.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DetectionFailure {
    #[error("image {width}x{height} is too small for corner detection")]
    ImageTooSmall { width: usize, height: usize },

    #[error("found {found} corner candidates, need at least {required}")]
    NotEnoughCorners { found: usize, required: usize },

    #[error("largest connected grid has {largest} corners, need {required}")]
    PatternNotFound { largest: usize, required: usize },

    #[error("detected grid is {found_cols}x{found_rows}, expected {expected_cols}x{expected_rows}")]
    GridMismatch {
        found_cols: usize,
        found_rows: usize,
        expected_cols: usize,
        expected_rows: usize,
    },

    #[error("inconsistent grid topology at cell ({i}, {j})")]
    TopologyConflict { i: i32, j: i32 },

    #[error(transparent)]
    InvalidGeometry(#[from] GeometryError),
}

/// Smallest image side that leaves room for the response ring and a corner.
const MIN_IMAGE_SIDE: usize = 4 * RING_RADIUS as usize;

/// Chessboard inner-corner detector.
///
/// Pipeline: ChESS saddle response, grid graph over the candidates,
/// integer coordinates per connected component, canonical relabelling and
/// sub-pixel refinement. Only a component that covers the whole board is
/// accepted; nothing partial is returned.
#[derive(Clone, Debug, Default)]
pub struct ChessboardDetector {
    pub params: ChessboardParams,
}

impl ChessboardDetector {
    pub fn new(params: ChessboardParams) -> Self {
        Self { params }
    }

    /// Coarse saddle candidates, before any grid reasoning.
    pub fn detect_corners(&self, img: &GrayImageView<'_>) -> Vec<Corner> {
        detect_saddles(img, &self.params.response)
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "info",
            skip(self, img, board),
            fields(width = img.width, height = img.height, cols = board.columns, rows = board.rows)
        )
    )]
    pub fn detect(
        &self,
        img: &GrayImageView<'_>,
        board: &BoardGeometry,
    ) -> Result<CornerSet, DetectionFailure> {
        board.validate()?;
        if img.width < MIN_IMAGE_SIDE || img.height < MIN_IMAGE_SIDE {
            return Err(DetectionFailure::ImageTooSmall {
                width: img.width,
                height: img.height,
            });
        }

        let required = board.corner_count();
        let corners = self.detect_corners(img);
        debug!("{} saddle candidates", corners.len());
        if corners.len() < required {
            return Err(DetectionFailure::NotEnoughCorners {
                found: corners.len(),
                required,
            });
        }

        let grid = self.find_grid(&corners, board)?;
        let points = self.refine(img, &grid);
        info!(
            "chessboard {}x{} detected in {}x{} image",
            board.columns, board.rows, img.width, img.height
        );
        Ok(CornerSet::new(board, points)?)
    }

    /// Pick the largest component that forms exactly the requested grid.
    fn find_grid(
        &self,
        corners: &[Corner],
        board: &BoardGeometry,
    ) -> Result<PointGrid, DetectionFailure> {
        let required = board.corner_count();
        let (cols, rows) = (board.columns as usize, board.rows as usize);

        let graph = GridGraph::new(corners, &self.params.graph);
        let mut components = connected_components(&graph);
        components.sort_by(|a, b| b.len().cmp(&a.len()).then(a[0].cmp(&b[0])));
        let largest = components.first().map_or(0, Vec::len);
        debug!(
            "{} grid components, largest has {} nodes",
            components.len(),
            largest
        );

        let mut first_failure = None;
        for component in components.iter().filter(|c| c.len() >= required) {
            let failure = match assign_grid_coordinates(&graph, corners, component) {
                Ok(coords) if !coords.is_complete() => DetectionFailure::PatternNotFound {
                    largest: component.len(),
                    required,
                },
                Ok(coords) => {
                    let (w, h) = (coords.width, coords.height);
                    let ordered = PointGrid::from_coords(&coords, corners)
                        .and_then(|grid| canonical_order(grid, cols, rows));
                    match ordered {
                        Some(grid) => return Ok(grid),
                        None => DetectionFailure::GridMismatch {
                            found_cols: w,
                            found_rows: h,
                            expected_cols: cols,
                            expected_rows: rows,
                        },
                    }
                }
                Err(conflict) => conflict,
            };
            debug!("component of {} nodes rejected: {failure}", component.len());
            first_failure.get_or_insert(failure);
        }

        Err(first_failure.unwrap_or(DetectionFailure::PatternNotFound { largest, required }))
    }

    fn refine(&self, img: &GrayImageView<'_>, grid: &PointGrid) -> Vec<Point2<f64>> {
        let (w, h) = (grid.width, grid.height);
        let at = |i: usize, j: usize| grid.points[j * w + i];

        let mut out = Vec::with_capacity(w * h);
        for j in 0..h {
            for i in 0..w {
                let p = at(i, j);
                let mut spacing = f32::INFINITY;
                let adjacent = [
                    (i > 0).then(|| at(i - 1, j)),
                    (i + 1 < w).then(|| at(i + 1, j)),
                    (j > 0).then(|| at(i, j - 1)),
                    (j + 1 < h).then(|| at(i, j + 1)),
                ];
                for q in adjacent.into_iter().flatten() {
                    spacing = spacing.min((q - p).norm());
                }
                let hw = half_window_for_spacing(&self.params.refine, spacing);
                let r = refine_corner(img, p, hw, &self.params.refine);
                out.push(Point2::new(r.x as f64, r.y as f64));
            }
        }
        out
    }
}

/// Detect with default parameters.
pub fn detect(
    img: &GrayImageView<'_>,
    board: &BoardGeometry,
) -> Result<CornerSet, DetectionFailure> {
    ChessboardDetector::default().detect(img, board)
}
