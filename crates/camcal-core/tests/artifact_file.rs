use camcal_core::{
    BoardGeometry, CalibrationArtifact, DistortionCoefficients, IntrinsicMatrix,
    StoredCalibration, CALIBRATION_FILE_NAME,
};
use std::fs;

fn reference_artifact() -> CalibrationArtifact {
    CalibrationArtifact::new(
        IntrinsicMatrix::from_rows([[1200.0, 0.0, 640.0], [0.0, 1200.0, 480.0], [0.0, 0.0, 1.0]])
            .expect("pinhole"),
        DistortionCoefficients::from_array([0.1, -0.2, 0.001, 0.001, 0.0]),
        BoardGeometry::new(8, 6, 30.0).expect("board"),
        0.3,
        1_700_000_000,
    )
}

#[test]
fn yaml_file_round_trip_reproduces_exact_values() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(CALIBRATION_FILE_NAME);
    let artifact = reference_artifact();

    fs::write(&path, artifact.to_opencv_yaml()).expect("write");
    let text = fs::read_to_string(&path).expect("read");
    let stored = StoredCalibration::from_opencv_yaml(&text).expect("parse");

    assert_eq!(
        stored.intrinsics.to_rows(),
        [[1200.0, 0.0, 640.0], [0.0, 1200.0, 480.0], [0.0, 0.0, 1.0]]
    );
    assert_eq!(stored.distortion.to_array(), [0.1, -0.2, 0.001, 0.001, 0.0]);
    assert_eq!(stored.rms, 0.3);

    // Serializing the parsed values gives the same bytes back.
    assert_eq!(stored.to_opencv_yaml(), text);
}

#[test]
fn json_file_round_trip_keeps_board_and_timestamp() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("calibration.json");
    let artifact = reference_artifact();

    fs::write(&path, artifact.to_json().expect("json")).expect("write");
    let back = CalibrationArtifact::from_json(&fs::read_to_string(&path).expect("read"))
        .expect("parse");

    assert_eq!(back, artifact);
    assert_eq!(back.board().columns, 8);
    assert_eq!(back.timestamp(), 1_700_000_000);
    assert_eq!(back.id(), artifact.id());
}
