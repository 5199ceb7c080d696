use camcal_chessboard::{chess_response, ChessboardDetector, ChessboardParams};
use camcal_core::{BoardGeometry, GrayImage};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

/// Axis-aligned `columns x rows` inner-corner board with `square`-pixel squares.
fn render_board(
    width: usize,
    height: usize,
    columns: usize,
    rows: usize,
    square: usize,
) -> GrayImage {
    let x0 = (width - (columns + 1) * square) / 2;
    let y0 = (height - (rows + 1) * square) / 2;
    let mut img = GrayImage::from_raw(width, height, vec![220; width * height]).expect("image");
    for y in y0..y0 + (rows + 1) * square {
        for x in x0..x0 + (columns + 1) * square {
            let a = (x - x0) / square;
            let b = (y - y0) / square;
            if (a + b) % 2 == 0 {
                img.data[y * width + x] = 30;
            }
        }
    }
    img
}

fn bench_detect(c: &mut Criterion) {
    let img = render_board(1280, 960, 9, 6, 80);
    let board = BoardGeometry::new(9, 6, 25.0).expect("board");
    let detector = ChessboardDetector::new(ChessboardParams::default());

    c.bench_function("chess_response_1280x960", |b| {
        b.iter(|| chess_response(black_box(&img.view())))
    });
    c.bench_function("detect_9x6_1280x960", |b| {
        b.iter(|| detector.detect(black_box(&img.view()), &board))
    });
}

criterion_group!(benches, bench_detect);
criterion_main!(benches);
