//! Immutable snapshot of a successful calibration.

use crate::storage::{SerializationError, StoredCalibration};
use crate::{BoardGeometry, DistortionCoefficients, IntrinsicMatrix};
use nalgebra::Isometry3;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

/// Default file name used when exporting the OpenCV YAML form.
pub const CALIBRATION_FILE_NAME: &str = "calibration_data.yml";
/// Content type used when the YAML form is handed out as a download.
pub const CALIBRATION_CONTENT_TYPE: &str = "application/octet-stream";
/// JSON key of the optional per-view board poses.
pub const KEY_POSES: &str = "poses";

/// Seconds since the Unix epoch (0 if the clock is before it).
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Content-derived identity of an artifact.
///
/// Two artifacts with identical numbers share an id, which is what a cache of
/// undistorted images wants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactId(pub u64);

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationArtifact {
    intrinsics: IntrinsicMatrix,
    distortion: DistortionCoefficients,
    board: BoardGeometry,
    rms: f64,
    timestamp: u64,
    /// Board-to-camera transform per calibration view; JSON only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    poses: Option<Vec<Isometry3<f64>>>,
}

impl CalibrationArtifact {
    pub fn new(
        intrinsics: IntrinsicMatrix,
        distortion: DistortionCoefficients,
        board: BoardGeometry,
        rms: f64,
        timestamp: u64,
    ) -> Self {
        Self {
            intrinsics,
            distortion,
            board,
            rms,
            timestamp,
            poses: None,
        }
    }

    /// Keep the per-view extrinsics of the solve alongside the camera.
    pub fn with_poses(mut self, poses: Vec<Isometry3<f64>>) -> Self {
        self.poses = Some(poses);
        self
    }

    /// Attach board and time information to values read back from YAML.
    pub fn from_stored(stored: StoredCalibration, board: BoardGeometry, timestamp: u64) -> Self {
        Self::new(
            stored.intrinsics,
            stored.distortion,
            board,
            stored.rms,
            timestamp,
        )
    }

    pub fn intrinsics(&self) -> &IntrinsicMatrix {
        &self.intrinsics
    }

    pub fn distortion(&self) -> &DistortionCoefficients {
        &self.distortion
    }

    pub fn board(&self) -> &BoardGeometry {
        &self.board
    }

    pub fn rms(&self) -> f64 {
        self.rms
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Per-view board poses, when the artifact came from a solve.
    pub fn poses(&self) -> Option<&[Isometry3<f64>]> {
        self.poses.as_deref()
    }

    pub fn id(&self) -> ArtifactId {
        let mut hasher = DefaultHasher::new();
        let k = &self.intrinsics;
        for v in [k.fx, k.fy, k.cx, k.cy, self.rms, self.board.square_size]
            .into_iter()
            .chain(self.distortion.to_array())
        {
            v.to_bits().hash(&mut hasher);
        }
        self.board.columns.hash(&mut hasher);
        self.board.rows.hash(&mut hasher);
        ArtifactId(hasher.finish())
    }

    pub fn stored(&self) -> StoredCalibration {
        StoredCalibration {
            intrinsics: self.intrinsics,
            distortion: self.distortion,
            rms: self.rms,
        }
    }

    /// OpenCV `FileStorage` YAML with `intrinsic`, `distCoeffs` and `rms`.
    pub fn to_opencv_yaml(&self) -> String {
        self.stored().to_opencv_yaml()
    }

    /// Full artifact, including board geometry, timestamp and any poses, as pretty JSON.
    pub fn to_json(&self) -> Result<String, SerializationError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, SerializationError> {
        let artifact: Self = serde_json::from_str(text)?;
        artifact.board.validate()?;
        if !artifact.intrinsics.is_finite() {
            return Err(SerializationError::NonFinite(crate::storage::KEY_INTRINSIC));
        }
        if !artifact.distortion.is_finite() {
            return Err(SerializationError::NonFinite(crate::storage::KEY_DIST_COEFFS));
        }
        if !artifact.rms.is_finite() {
            return Err(SerializationError::NonFinite(crate::storage::KEY_RMS));
        }
        let poses_finite = artifact.poses().unwrap_or_default().iter().all(|pose| {
            pose.translation.vector.iter().all(|v| v.is_finite())
                && pose.rotation.coords.iter().all(|v| v.is_finite())
        });
        if !poses_finite {
            return Err(SerializationError::NonFinite(KEY_POSES));
        }
        Ok(artifact)
    }
}
