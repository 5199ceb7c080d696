use serde::{Deserialize, Serialize};

/// ChESS saddle response and candidate extraction.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResponseParams {
    /// Keep candidates whose response exceeds this fraction of the image maximum.
    pub threshold_rel: f32,
    /// Absolute response floor; flat or noise-only images stay empty.
    pub min_response: f32,
    /// Half-size of the non-maximum suppression window.
    pub nms_radius: u32,
}

impl Default for ResponseParams {
    fn default() -> Self {
        Self {
            threshold_rel: 0.1,
            min_response: 16.0,
            nms_radius: 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GridGraphParams {
    pub min_spacing_pix: f32,
    pub k_neighbors: usize,
    /// Allowed deviation from orthogonality between neighbouring corner orientations.
    pub orientation_tolerance_deg: f32,
    /// Allowed deviation of an edge from 45° to each corner orientation.
    pub edge_tolerance_deg: f32,
    /// A neighbour may be at most this many times farther than the closest accepted one.
    pub max_edge_ratio: f32,
    /// Two neighbours of one corner must differ in direction by at least this much.
    pub min_separation_deg: f32,
}

impl Default for GridGraphParams {
    fn default() -> Self {
        Self {
            min_spacing_pix: 4.0,
            k_neighbors: 8,
            orientation_tolerance_deg: 22.5,
            edge_tolerance_deg: 30.0,
            max_edge_ratio: 1.8,
            min_separation_deg: 30.0,
        }
    }
}

/// Gradient-based sub-pixel refinement (the `cornerSubPix` scheme).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RefineParams {
    /// Largest half-size of the search window; shrunk for small squares.
    pub half_window: u32,
    pub max_iterations: u32,
    /// Stop once a refinement step moves less than this many pixels.
    pub epsilon: f32,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            half_window: 5,
            max_iterations: 30,
            epsilon: 0.01,
        }
    }
}

/// Parameters of the chessboard detector.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessboardParams {
    pub response: ResponseParams,
    pub graph: GridGraphParams,
    pub refine: RefineParams,
}
