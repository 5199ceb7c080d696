mod common;

use camcal_chessboard::{
    detect_batch, BatchOptions, ChessboardDetector, ChessboardParams, DetectionFailure,
};
use camcal_core::{BoardGeometry, CornerSet, GrayImage, GrayImageView};
use common::{Scene, LIGHT};
use nalgebra::Point2;

const W: usize = 640;
const H: usize = 480;

fn board(columns: u32, rows: u32) -> BoardGeometry {
    BoardGeometry::new(columns, rows, 25.0).expect("board")
}

fn detector() -> ChessboardDetector {
    let _ = env_logger::builder().is_test(true).try_init();
    ChessboardDetector::new(ChessboardParams::default())
}

fn max_error(found: &CornerSet, expected: &[Point2<f64>]) -> f64 {
    found
        .points()
        .iter()
        .zip(expected)
        .map(|(a, b)| (a - b).norm())
        .fold(0.0, f64::max)
}

#[test]
fn detects_axis_aligned_board_in_raster_order() {
    let scene = Scene::rotated(W, H, 8, 6, 40.0, 0.0);
    let img = scene.render();
    let corners = detector().detect(&img.view(), &board(8, 6)).expect("detected");

    assert_eq!(corners.len(), 48);
    let err = max_error(&corners, &scene.corners());
    assert!(err < 0.1, "max corner error {err}");
}

#[test]
fn detects_rotated_board() {
    let scene = Scene::rotated(W, H, 8, 6, 40.0, 30f64.to_radians());
    let img = scene.render();
    let corners = detector().detect(&img.view(), &board(8, 6)).expect("detected");
    let err = max_error(&corners, &scene.corners());
    assert!(err < 0.15, "max corner error {err}");
}

#[test]
fn detects_board_under_perspective() {
    let scene = Scene::tilted(W, H, 8, 6, 36.0);
    let img = scene.render();
    let corners = detector().detect(&img.view(), &board(8, 6)).expect("detected");
    let err = max_error(&corners, &scene.corners());
    assert!(err < 0.2, "max corner error {err}");
}

#[test]
fn upside_down_board_is_reported_from_image_top_left() {
    let scene = Scene::rotated(W, H, 7, 5, 40.0, std::f64::consts::PI);
    let img = scene.render();
    let corners = detector().detect(&img.view(), &board(7, 5)).expect("detected");

    let first = corners.points()[0];
    let last = corners.points()[corners.len() - 1];
    assert!(first.x < last.x && first.y < last.y, "{first:?} {last:?}");
}

#[test]
fn blank_image_fails() {
    let img = GrayImage::from_raw(W, H, vec![LIGHT; W * H]).expect("image");
    let res = detector().detect(&img.view(), &board(8, 6));
    assert!(matches!(res, Err(DetectionFailure::NotEnoughCorners { found: 0, .. })));
}

#[test]
fn wrong_board_dimensions_fail() {
    let img = Scene::rotated(W, H, 8, 6, 40.0, 0.0).render();
    let res = detector().detect(&img.view(), &board(7, 6));
    assert!(matches!(res, Err(DetectionFailure::GridMismatch { .. })), "{res:?}");

    assert!(detector().detect(&img.view(), &board(9, 6)).is_err());
}

#[test]
fn partially_occluded_board_fails() {
    let scene = Scene::rotated(W, H, 8, 6, 40.0, 0.0);
    let mut img = scene.render();
    // Cover the right third of the board.
    let x0 = scene.project(5.5, 0.0).x as usize;
    for y in 0..H {
        for x in x0..W {
            img.data[y * W + x] = LIGHT;
        }
    }
    assert!(detector().detect(&img.view(), &board(8, 6)).is_err());
}

#[test]
fn tiny_image_is_rejected() {
    let img = GrayImage::new(12, 12);
    let res = detector().detect(&img.view(), &board(3, 3));
    assert!(matches!(res, Err(DetectionFailure::ImageTooSmall { .. })));
}

#[test]
fn detection_is_deterministic() {
    let img = Scene::rotated(W, H, 8, 6, 40.0, 0.4).render();
    let a = detector().detect(&img.view(), &board(8, 6)).expect("detected");
    let b = detector().detect(&img.view(), &board(8, 6)).expect("detected");
    assert_eq!(a, b);
}

#[test]
fn batch_results_follow_input_order() {
    let good = Scene::rotated(W, H, 8, 6, 40.0, 0.2).render();
    let blank = GrayImage::from_raw(W, H, vec![LIGHT; W * H]).expect("image");
    let images: Vec<GrayImageView<'_>> = vec![
        good.view(),
        blank.view(),
        good.view(),
        blank.view(),
        good.view(),
    ];

    for options in [BatchOptions::default(), BatchOptions { max_workers: Some(2) }] {
        let results = detect_batch(&detector(), &images, &board(8, 6), &options);
        let valid: Vec<bool> = results.iter().map(Result::is_ok).collect();
        assert_eq!(valid, vec![true, false, true, false, true]);
    }
}
