//! End-to-end runs of the `rust-dso` binary on a small synthetic sequence.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use image::{GrayImage, Luma};

const BIN: &str = env!("CARGO_BIN_EXE_rust-dso");

/// Smoothly textured frames, each shifted one pixel right of the previous.
fn write_sequence(root: &Path, n: u32) -> PathBuf {
    let images = root.join("images");
    std::fs::create_dir_all(&images).unwrap();
    for i in 0..n {
        let img = GrayImage::from_fn(64, 48, |x, y| {
            let (u, v) = (x as f32 - i as f32, y as f32);
            let value = 128.0 + 60.0 * (u * 0.35).sin() * (v * 0.27).cos() + 30.0 * (u * 0.11 + v * 0.07).sin();
            Luma([value.clamp(0.0, 255.0) as u8])
        });
        img.save(images.join(format!("{:05}.png", i))).unwrap();
    }
    images
}

fn run_in(dir: &Path, args: &[String]) -> Output {
    Command::new(BIN)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .unwrap()
}

fn args(images: &Path, mode: u32) -> Vec<String> {
    vec![
        format!("files={}", images.display()),
        format!("mode={}", mode),
        "nogui=1".to_string(),
        "nolog=1".to_string(),
    ]
}

#[test]
fn test_calibrated_mode_without_gamma_exits_before_processing() {
    let dir = tempfile::tempdir().unwrap();
    let images = write_sequence(dir.path(), 4);

    let output = run_in(dir.path(), &args(&images, 0));

    assert_eq!(output.status.code(), Some(1));
    assert!(!dir.path().join("result.txt").exists());
}

#[test]
fn test_uncalibrated_run_writes_result() {
    let dir = tempfile::tempdir().unwrap();
    let images = write_sequence(dir.path(), 4);

    let output = run_in(dir.path(), &args(&images, 1));

    assert_eq!(output.status.code(), Some(0));
    assert!(dir.path().join("result.txt").exists());
}

#[test]
fn test_missing_source_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_in(dir.path(), &["nogui=1".to_string(), "nolog=1".to_string()]);
    assert_eq!(output.status.code(), Some(1));
}
