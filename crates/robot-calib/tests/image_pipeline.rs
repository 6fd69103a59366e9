#![cfg(feature = "image")]

use approx::assert_abs_diff_eq;
use nalgebra::Point2;
use robot_calib::aruco::builtins::DICT_4X4_50;
use robot_calib::core::GrayImage;
use robot_calib::detect::{gray_image_from_slice, ImagePatternDetector};
use robot_calib::{ChessboardSpec, Frame, PatternDetector};

const BLACK: u8 = 25;
const WHITE: u8 = 230;

/// 3x3 box blur so edges are not perfectly sharp.
fn soften(img: &GrayImage) -> GrayImage {
    let mut out = img.clone();
    for y in 1..img.height - 1 {
        for x in 1..img.width - 1 {
            let mut sum = 0u32;
            for dy in 0..3 {
                for dx in 0..3 {
                    sum += img.data[(y + dy - 1) * img.width + (x + dx - 1)] as u32;
                }
            }
            out.data[y * img.width + x] = (sum / 9) as u8;
        }
    }
    out
}

fn to_image(img: &GrayImage) -> image::GrayImage {
    gray_image_from_slice(img.width as u32, img.height as u32, &img.data).expect("gray buffer")
}

/// Board of `squares_x x squares_y` squares with its outer corner at `origin`.
fn paint_board(img: &mut GrayImage, origin: (i64, i64), squares_x: i64, squares_y: i64, sq: i64) {
    for j in 0..squares_y {
        for i in 0..squares_x {
            if (i + j) % 2 == 0 {
                let x0 = origin.0 + i * sq;
                let y0 = origin.1 + j * sq;
                img.fill_rect(x0, y0, x0 + sq, y0 + sq, BLACK);
            }
        }
    }
}

/// Marker `id` with its own top-left corner at `tl`, turned by `angle` radians.
fn paint_marker(img: &mut GrayImage, id: u32, tl: (f64, f64), cell: f64, angle: f64) {
    let code = DICT_4X4_50.code(id).expect("id");
    let (s, c) = angle.sin_cos();
    let at = |gx: f64, gy: f64| {
        Point2::new(
            tl.0 + cell * (gx * c - gy * s),
            tl.1 + cell * (gx * s + gy * c),
        )
    };
    img.fill_convex_quad(&[at(0.0, 0.0), at(6.0, 0.0), at(6.0, 6.0), at(0.0, 6.0)], BLACK);
    for y in 0..4 {
        for x in 0..4 {
            if DICT_4X4_50.is_black(code, x, y) {
                continue;
            }
            let (gx, gy) = (x as f64 + 1.0, y as f64 + 1.0);
            img.fill_convex_quad(
                &[at(gx, gy), at(gx + 1.0, gy), at(gx + 1.0, gy + 1.0), at(gx, gy + 1.0)],
                WHITE,
            );
        }
    }
}

#[test]
fn chessboard_metrics_from_rendered_board() {
    // 10 x 7 squares of 30 px: 9 x 6 inner corners, 1.2 px/mm at 25 mm squares.
    let mut img = GrayImage::filled(420, 330, WHITE);
    paint_board(&mut img, (60, 60), 10, 7, 30);
    let frame = to_image(&soften(&img));

    let det = ImagePatternDetector::default().find_chessboard(&frame, &ChessboardSpec::default());
    assert!(det.found(), "{}", det.message);
    assert_eq!(det.corners.len(), 54);

    let ppm = det.ppm().expect("ppm");
    assert_abs_diff_eq!(ppm, 1.2, epsilon = 0.02);

    // Inner corners sit on the square edges, x = 90 + 30 * col, y = 90 + 30 * row
    // (within half a pixel depending on the sampling convention).
    let bl = det.bottom_left_px().expect("bottom-left");
    assert_abs_diff_eq!(bl.x, 90.0, epsilon = 1.0);
    assert_abs_diff_eq!(bl.y, 240.0, epsilon = 1.0);
    let center = det.center_px().expect("center");
    assert_abs_diff_eq!(center.x, 210.0, epsilon = 1.0);
    assert_abs_diff_eq!(center.y, 180.0, epsilon = 1.0);
}

#[test]
fn markers_from_rendered_frame() {
    let mut img = GrayImage::filled(480, 360, WHITE);
    let placed = [(0, (40.0, 40.0)), (1, (360.0, 40.0)), (2, (360.0, 240.0)), (3, (40.0, 240.0))];
    for (id, tl) in placed {
        paint_marker(&mut img, id, tl, 12.0, 0.0);
    }
    let frame = to_image(&img);
    assert_eq!(frame.image_center(), Point2::new(240.0, 180.0));

    let markers = ImagePatternDetector::default().detect_markers(&frame);
    assert_eq!(markers.iter().map(|m| m.id).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    for (m, (_, tl)) in markers.iter().zip(placed) {
        let p = m.top_left();
        assert_abs_diff_eq!(p.x, tl.0, epsilon = 1.5);
        assert_abs_diff_eq!(p.y, tl.1, epsilon = 1.5);
    }
}

#[test]
fn rotated_marker_reports_its_own_top_left() {
    let mut img = GrayImage::filled(480, 360, WHITE);
    paint_marker(&mut img, 0, (40.0, 40.0), 12.0, 0.0);

    // Marker 5 turned by 1.9 rad around (300, 180): its own top-left ends up
    // as the rightmost corner of the blob.
    let angle = 1.9f64;
    let (s, c) = angle.sin_cos();
    let half = 36.0;
    let tl = (300.0 - half * (c - s), 180.0 - half * (s + c));
    paint_marker(&mut img, 5, tl, 12.0, angle);
    let frame = to_image(&img);

    let markers = ImagePatternDetector::default().detect_markers(&frame);
    assert_eq!(markers.iter().map(|m| m.id).collect::<Vec<_>>(), vec![0, 5]);

    let aligned = markers[0].top_left();
    assert_abs_diff_eq!(aligned.x, 40.0, epsilon = 1.5);
    assert_abs_diff_eq!(aligned.y, 40.0, epsilon = 1.5);

    let turned = markers[1].top_left();
    assert!(
        (turned - Point2::new(tl.0, tl.1)).norm() < 2.0,
        "top-left {turned} vs ({:.1}, {:.1})",
        tl.0,
        tl.1
    );
    // The image-space upper-left corner is a different one.
    let upper_left = markers[1]
        .corners
        .iter()
        .min_by(|a, b| (a.x + a.y).total_cmp(&(b.x + b.y)))
        .copied()
        .expect("corners");
    assert!((upper_left - turned).norm() > 50.0);
}

#[test]
fn empty_frame_finds_nothing() {
    let frame = image::GrayImage::from_pixel(200, 150, image::Luma([WHITE]));
    let det = ImagePatternDetector::default();
    assert!(!det.find_chessboard(&frame, &ChessboardSpec::default()).found());
    assert!(det.detect_markers(&frame).is_empty());
}
