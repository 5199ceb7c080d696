//! Core types for planar camera calibration.
//!
//! This crate holds the value types shared by the detector and the solver:
//! grayscale image views, board geometry and ordered corner sets, the
//! zero-skew intrinsic matrix, the Brown–Conrady distortion model, planar
//! homographies, the undistortion remap and the calibration artifact with its
//! OpenCV YAML and JSON codecs. Nothing here touches the filesystem.

mod artifact;
mod board;
mod camera;
mod distortion;
mod homography;
mod image;
mod logger;
mod storage;
mod undistort;

pub use artifact::{
    current_timestamp, ArtifactId, CalibrationArtifact, CALIBRATION_CONTENT_TYPE,
    CALIBRATION_FILE_NAME,
};
pub use board::{BoardGeometry, CornerSet, GeometryError, MIN_BOARD_DIM};
pub use camera::IntrinsicMatrix;
pub use distortion::{
    DistortionCoefficients, DistortionModel, InversionError, DEFAULT_INVERT_ITERATIONS,
    DEFAULT_INVERT_TOLERANCE,
};
pub use homography::{estimate_homography, homography_from_4pt, Homography, HomographyError};
pub use image::{sample_bilinear, CalibrationImage, GrayImage, GrayImageView, ImageError, ImageId};
pub use storage::{
    SerializationError, StoredCalibration, KEY_DIST_COEFFS, KEY_INTRINSIC, KEY_RMS,
};
pub use undistort::{undistort_image, undistort_points, UndistortMap, UndistortOptions};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
