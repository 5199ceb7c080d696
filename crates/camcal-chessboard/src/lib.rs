//! Chessboard inner-corner detector for `camcal-core` images.
//!
//! Algorithm (graph-based, rotation and perspective tolerant):
//! 1. ChESS saddle response with non-maximum suppression; each candidate
//!    carries a coarse sub-pixel position and the direction of its bright
//!    diagonal.
//! 2. Candidates are linked to up to four neighbours found through a
//!    KD-tree: orientations must be orthogonal and the edge must run at 45°
//!    to both. Only mutual links are kept.
//! 3. Each connected component is walked breadth-first with local axes to
//!    assign integer grid coordinates.
//! 4. A component that fills exactly `columns x rows` is relabelled into
//!    canonical raster order and refined to sub-pixel precision.
//!
//! Detection is deterministic and either returns every corner or fails.

mod batch;
mod detector;
mod geom;
mod gridgraph;
mod ordering;
mod params;
mod refine;
mod response;

pub use batch::{detect_batch, BatchOptions};
pub use detector::{detect, ChessboardDetector, DetectionFailure};
pub use gridgraph::{assign_grid_coordinates, connected_components, GridCoords, GridGraph};
pub use params::{ChessboardParams, GridGraphParams, RefineParams, ResponseParams};
pub use refine::refine_corner;
pub use response::{chess_response, detect_saddles, Corner, ResponseMap};
