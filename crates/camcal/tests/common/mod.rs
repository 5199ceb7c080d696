//! Synthetic camera rig: an 8x6 board seen from twelve poses, rendered
//! anti-aliased at 1280x960 through a distortion-free pinhole camera.

#![allow(dead_code)]

use camcal::core::{BoardGeometry, GrayImage, IntrinsicMatrix};
use nalgebra::{Isometry3, Matrix3, Translation3, UnitQuaternion, Vector3};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const WIDTH: usize = 1280;
pub const HEIGHT: usize = 960;
const DARK: u8 = 30;
const LIGHT: u8 = 220;

pub fn board() -> BoardGeometry {
    BoardGeometry::new(8, 6, 30.0).expect("board")
}

pub fn truth() -> IntrinsicMatrix {
    IntrinsicMatrix::new(1200.0, 1200.0, 640.0, 480.0)
}

fn poses(board: &BoardGeometry) -> Vec<Isometry3<f64>> {
    let centre = Vector3::new(
        (board.columns - 1) as f64 * board.square_size * 0.5,
        (board.rows - 1) as f64 * board.square_size * 0.5,
        0.0,
    );
    let specs: [(f64, f64, f64, f64, f64, f64); 12] = [
        (0.30, 0.00, 0.00, 0.0, 0.0, 700.0),
        (-0.30, 0.05, 0.10, 40.0, -20.0, 720.0),
        (0.00, 0.30, -0.05, -50.0, 10.0, 680.0),
        (0.05, -0.30, 0.20, 30.0, 30.0, 750.0),
        (0.25, 0.25, 0.30, -20.0, -40.0, 800.0),
        (-0.25, -0.25, -0.30, 10.0, 40.0, 650.0),
        (0.35, -0.10, 0.50, 50.0, 0.0, 900.0),
        (-0.35, 0.15, -0.50, -50.0, 20.0, 850.0),
        (0.15, 0.35, 1.20, 0.0, -30.0, 780.0),
        (-0.10, -0.35, -1.00, 20.0, 30.0, 820.0),
        (0.20, -0.20, 3.00, -30.0, -10.0, 760.0),
        (-0.30, 0.30, 0.00, 40.0, 25.0, 700.0),
    ];
    specs
        .iter()
        .map(|&(rx, ry, rz, dx, dy, z)| {
            let rot = UnitQuaternion::from_euler_angles(rx, ry, rz);
            let t = Vector3::new(dx, dy, z) - rot * centre;
            Isometry3::from_parts(Translation3::from(t), rot)
        })
        .collect()
}

/// Board-plane (square units) to pixel homography `K [r1 r2 t] diag(s, s, 1)`.
fn homography(k: &IntrinsicMatrix, pose: &Isometry3<f64>, square: f64) -> Matrix3<f64> {
    let r = pose.rotation.to_rotation_matrix();
    let r = r.matrix();
    let t = pose.translation.vector;
    let rt = Matrix3::from_columns(&[r.column(0).into_owned(), r.column(1).into_owned(), t]);
    k.matrix() * rt * Matrix3::from_diagonal(&Vector3::new(square, square, 1.0))
}

fn render(h: &Matrix3<f64>, columns: u32, rows: u32) -> GrayImage {
    let inv = h.try_inverse().expect("invertible homography");
    let shade = |x: f64, y: f64| -> u32 {
        let b = inv * Vector3::new(x, y, 1.0);
        let (a, c) = ((b.x / b.z).floor() as i64, (b.y / b.z).floor() as i64);
        let on_board = a >= -1 && a < columns as i64 && c >= -1 && c < rows as i64;
        if on_board && (a + c).rem_euclid(2) == 0 {
            DARK as u32
        } else {
            LIGHT as u32
        }
    };

    let ss = 4;
    let mut img = GrayImage::new(WIDTH, HEIGHT);
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let mut acc = 0u32;
            for sy in 0..ss {
                for sx in 0..ss {
                    let px = x as f64 + (sx as f64 + 0.5) / ss as f64 - 0.5;
                    let py = y as f64 + (sy as f64 + 0.5) / ss as f64 - 0.5;
                    acc += shade(px, py);
                }
            }
            img.data[y * WIDTH + x] = ((acc + 8) / (ss * ss) as u32) as u8;
        }
    }
    img
}

/// The twelve rendered views, computed once per test binary.
pub fn views() -> &'static [GrayImage] {
    static VIEWS: OnceLock<Vec<GrayImage>> = OnceLock::new();
    VIEWS.get_or_init(|| {
        let board = board();
        let k = truth();
        poses(&board)
            .iter()
            .map(|pose| {
                let h = homography(&k, pose, board.square_size);
                render(&h, board.columns, board.rows)
            })
            .collect()
    })
}

pub fn png_bytes(img: &GrayImage) -> Vec<u8> {
    let buf = image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data.clone())
        .expect("buffer");
    let mut out = Vec::new();
    image::DynamicImage::ImageLuma8(buf)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .expect("encode");
    out
}

/// Write every view as `view_NN.png` into `dir`.
pub fn write_views(dir: &Path) -> Vec<PathBuf> {
    views()
        .iter()
        .enumerate()
        .map(|(i, img)| {
            let path = dir.join(format!("view_{i:02}.png"));
            std::fs::write(&path, png_bytes(img)).expect("write png");
            path
        })
        .collect()
}
