use crate::workflow::Stage;
use camcal_chessboard::DetectionFailure;
use camcal_core::{GeometryError, ImageError, SerializationError};
use camcal_solver::SolverError;

/// Rejected workflow transitions.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("`{action}` is not allowed in stage {stage}")]
    NotAllowed { action: &'static str, stage: Stage },

    #[error("need at least {required} images, have {available}")]
    NotEnoughImages { available: usize, required: usize },

    #[error("need at least {required} valid and approved images, have {available}")]
    NotEnoughApproved { available: usize, required: usize },

    #[error("image index {index} is out of range ({len} images)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("image {index} has no detected corners and cannot be approved")]
    NotValid { index: usize },

    #[error("neither fix_k3 nor the approved images changed since the last calibration")]
    Unchanged,
}

/// Errors produced by the facade operations.
#[derive(thiserror::Error, Debug)]
pub enum CalibError {
    #[error(transparent)]
    Detection(#[from] DetectionFailure),

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("solve request was superseded by a newer one")]
    Superseded,

    #[error("no calibration is available yet")]
    NoCalibration,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "image")]
    #[error(transparent)]
    Codec(#[from] image::ImageError),
}
