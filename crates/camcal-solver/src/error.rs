use camcal_core::{GeometryError, HomographyError};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("need at least {required} accepted views, got {accepted}")]
    InsufficientData { accepted: usize, required: usize },

    #[error("calibration did not converge: {reason}")]
    DidNotConverge { reason: String },

    #[error(transparent)]
    InvalidGeometry(#[from] GeometryError),
}

impl SolverError {
    pub(crate) fn diverged(reason: impl Into<String>) -> Self {
        Self::DidNotConverge {
            reason: reason.into(),
        }
    }
}

impl From<HomographyError> for SolverError {
    fn from(err: HomographyError) -> Self {
        Self::diverged(format!("homography estimation failed: {err}"))
    }
}
