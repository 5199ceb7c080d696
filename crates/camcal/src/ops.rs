//! The four operations exposed to an orchestration layer.
//!
//! All inputs and outputs are in-memory values; the caller owns any I/O.

use crate::config::CalibrationConfig;
use crate::error::CalibError;
use camcal_chessboard::{detect_batch, ChessboardDetector, DetectionFailure};
use camcal_core::{
    current_timestamp, BoardGeometry, CalibrationArtifact, CornerSet, GrayImage, GrayImageView,
    SerializationError, StoredCalibration, UndistortMap, UndistortOptions,
    CALIBRATION_CONTENT_TYPE, CALIBRATION_FILE_NAME,
};
use camcal_solver::{solve, CalibrationSolution};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Calibration result in the shape the presentation layer consumes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResponse {
    pub intrinsics: [[f64; 3]; 3],
    pub dist_coeffs: [[f64; 5]; 1],
    pub rms: f64,
}

impl From<&CalibrationArtifact> for CalibrationResponse {
    fn from(artifact: &CalibrationArtifact) -> Self {
        Self {
            intrinsics: artifact.intrinsics().to_rows(),
            dist_coeffs: [artifact.distortion().to_array()],
            rms: artifact.rms(),
        }
    }
}

/// Detector verdict per input image, index-aligned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: Vec<bool>,
}

impl From<Vec<bool>> for VerifyResponse {
    fn from(valid: Vec<bool>) -> Self {
        Self { valid }
    }
}

/// Outcome of a successful `calibrate`.
#[derive(Clone, Debug)]
pub struct Calibration {
    pub artifact: Arc<CalibrationArtifact>,
    pub solution: CalibrationSolution,
    /// Which input images contributed corners.
    pub valid: Vec<bool>,
}

impl Calibration {
    pub fn response(&self) -> CalibrationResponse {
        CalibrationResponse::from(self.artifact.as_ref())
    }
}

/// A downloadable calibration file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalibrationFile {
    pub file_name: &'static str,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Detect the board in every image. Order of results follows `images`.
pub fn detect_corner_sets(
    images: &[GrayImageView<'_>],
    board: &BoardGeometry,
    config: &CalibrationConfig,
) -> Result<Vec<Result<CornerSet, DetectionFailure>>, CalibError> {
    board.validate()?;
    let detector = ChessboardDetector::new(config.chessboard.clone());
    Ok(detect_batch(&detector, images, board, &config.batch))
}

/// Which images contain a complete `columns x rows` inner-corner grid.
pub fn detect_corners(
    images: &[GrayImageView<'_>],
    columns: u32,
    rows: u32,
    config: &CalibrationConfig,
) -> Result<Vec<bool>, CalibError> {
    // Square size plays no part in detection.
    let board = BoardGeometry::new(columns, rows, 1.0)?;
    let results = detect_corner_sets(images, &board, config)?;
    Ok(results.iter().map(Result::is_ok).collect())
}

/// Detect, then solve on every image where the board was found.
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "info",
        skip(images, board, config),
        fields(images = images.len(), cols = board.columns, rows = board.rows)
    )
)]
pub fn calibrate(
    images: &[GrayImageView<'_>],
    board: &BoardGeometry,
    fix_k3: bool,
    config: &CalibrationConfig,
) -> Result<Calibration, CalibError> {
    let results = detect_corner_sets(images, board, config)?;
    let valid: Vec<bool> = results.iter().map(Result::is_ok).collect();
    let sets: Vec<CornerSet> = results
        .into_iter()
        .enumerate()
        .filter_map(|(i, result)| match result {
            Ok(set) => Some(set),
            Err(failure) => {
                debug!("image {i} skipped: {failure}");
                None
            }
        })
        .collect();

    let solution = solve(&sets, board, &config.solver_options(fix_k3))?;
    let artifact = Arc::new(solution.into_artifact(board, current_timestamp()));
    info!(
        "calibration {} from {}/{} images: rms {:.4}px, mean error {:.4}px",
        artifact.id(),
        sets.len(),
        images.len(),
        solution.rms,
        solution.mean_error
    );
    Ok(Calibration {
        artifact,
        solution,
        valid,
    })
}

/// Remove lens distortion from a grayscale frame.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(width = image.width, height = image.height))
)]
pub fn undistort_gray(
    image: &GrayImageView<'_>,
    artifact: &CalibrationArtifact,
    options: &UndistortOptions,
) -> Result<GrayImage, CalibError> {
    let map = UndistortMap::new(
        image.width,
        image.height,
        artifact.intrinsics(),
        artifact.distortion(),
        options,
    );
    Ok(map.remap_gray(image, options.border)?)
}

/// Decode `image_bytes`, undistort with `artifact` and return PNG bytes.
///
/// Color images stay in color.
#[cfg(feature = "image")]
pub fn undistort(
    image_bytes: &[u8],
    artifact: &CalibrationArtifact,
) -> Result<Vec<u8>, CalibError> {
    crate::imageio::undistort_encoded(
        image_bytes,
        artifact.intrinsics(),
        artifact.distortion(),
        &UndistortOptions::default(),
    )
}

/// The artifact as an OpenCV YAML download.
pub fn calibration_file(artifact: &CalibrationArtifact) -> CalibrationFile {
    CalibrationFile {
        file_name: CALIBRATION_FILE_NAME,
        content_type: CALIBRATION_CONTENT_TYPE,
        bytes: artifact.to_opencv_yaml().into_bytes(),
    }
}

/// Read back the contents of a calibration file.
pub fn parse_calibration_file(bytes: &[u8]) -> Result<StoredCalibration, CalibError> {
    let text = std::str::from_utf8(bytes).map_err(|e| SerializationError::Malformed {
        line: 0,
        reason: format!("not UTF-8: {e}"),
    })?;
    Ok(StoredCalibration::from_opencv_yaml(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camcal_core::{DistortionCoefficients, IntrinsicMatrix};

    fn artifact() -> CalibrationArtifact {
        CalibrationArtifact::new(
            IntrinsicMatrix::new(1200.0, 1200.0, 640.0, 480.0),
            DistortionCoefficients::from_array([0.1, -0.2, 0.001, 0.001, 0.0]),
            BoardGeometry::new(9, 6, 25.0).expect("board"),
            0.3,
            1_700_000_000,
        )
    }

    #[test]
    fn response_has_the_documented_shape() {
        let response = CalibrationResponse::from(&artifact());
        let json = serde_json::to_value(&response).expect("json");
        assert_eq!(
            json,
            serde_json::json!({
                "intrinsics": [[1200.0, 0.0, 640.0], [0.0, 1200.0, 480.0], [0.0, 0.0, 1.0]],
                "dist_coeffs": [[0.1, -0.2, 0.001, 0.001, 0.0]],
                "rms": 0.3
            })
        );
    }

    #[test]
    fn verify_response_json() {
        let response = VerifyResponse::from(vec![true, false]);
        assert_eq!(
            serde_json::to_string(&response).expect("json"),
            r#"{"valid":[true,false]}"#
        );
    }

    #[test]
    fn calibration_file_round_trips() {
        let artifact = artifact();
        let file = calibration_file(&artifact);
        assert_eq!(file.file_name, "calibration_data.yml");
        assert_eq!(file.content_type, "application/octet-stream");

        let stored = parse_calibration_file(&file.bytes).expect("parse");
        assert_eq!(stored, artifact.stored());
    }

    #[test]
    fn non_utf8_file_is_a_serialization_error() {
        let err = parse_calibration_file(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, CalibError::Serialization(_)));
    }

    #[test]
    fn small_board_is_rejected_before_detection() {
        let img = GrayImage::new(64, 64);
        let err = detect_corners(&[img.view()], 2, 6, &CalibrationConfig::default()).unwrap_err();
        assert!(matches!(err, CalibError::Geometry(_)));
    }

    #[test]
    fn detection_flags_follow_input_order() {
        let blank = GrayImage::new(64, 64);
        let valid =
            detect_corners(&[blank.view(), blank.view()], 9, 6, &CalibrationConfig::default())
                .expect("detect");
        assert_eq!(valid, vec![false, false]);
    }

    #[test]
    fn calibrate_without_views_is_insufficient() {
        let blank = GrayImage::new(64, 64);
        let board = BoardGeometry::new(9, 6, 25.0).expect("board");
        let err = calibrate(&[blank.view()], &board, false, &CalibrationConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            CalibError::Solver(camcal_solver::SolverError::InsufficientData {
                accepted: 0,
                required: 10
            })
        ));
    }

    #[test]
    fn zero_distortion_undistort_is_identity() {
        let data: Vec<u8> = (0..48 * 64).map(|i| (i % 251) as u8).collect();
        let img = GrayImage::from_raw(64, 48, data).expect("image");
        let artifact = CalibrationArtifact::new(
            IntrinsicMatrix::new(50.0, 50.0, 31.5, 23.5),
            DistortionCoefficients::zero(),
            BoardGeometry::new(9, 6, 25.0).expect("board"),
            0.1,
            0,
        );
        let out = undistort_gray(&img.view(), &artifact, &UndistortOptions::default())
            .expect("undistort");
        assert_eq!(out, img);
    }
}
