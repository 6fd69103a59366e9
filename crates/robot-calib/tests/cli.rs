#![cfg(all(feature = "cli", feature = "image"))]

use assert_cmd::Command;
use predicates::prelude::*;
use robot_calib::core::Homography;
use robot_calib::homography::save_homography;

fn cli() -> Command {
    Command::cargo_bin("robot-calib").expect("binary")
}

#[test]
fn simulate_writes_matrix() {
    let dir = tempfile::tempdir().unwrap();
    cli()
        .args(["simulate", "--out"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"persisted\": true"));

    assert!(dir.path().join("camera_to_robot_matrix.json").exists());
    assert!(dir.path().join("calibration_report.json").exists());
}

#[test]
fn check_homography_maps_through_saved_matrix() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.json");
    save_homography(&path, &Homography::identity()).unwrap();

    let out = cli()
        .args(["check-homography", "--x", "12.5", "--y", "-3", "--matrix"])
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(value["robot"], serde_json::json!([12.5, -3.0]));
}

#[test]
fn markers_on_blank_image_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blank.png");
    image::GrayImage::from_pixel(120, 90, image::Luma([200]))
        .save(&path)
        .unwrap();

    cli()
        .args(["markers", "--image"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("[]"));

    cli()
        .args(["chessboard", "--image"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"found\": false"));
}

#[test]
fn missing_image_reports_error() {
    cli()
        .args(["chessboard", "--image", "/nonexistent/board.png"])
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("error:"));
}
