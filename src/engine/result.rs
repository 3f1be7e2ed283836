//! Per-frame engine output and the trajectory written at the end of a run.
//!
//! `FrameOutput` is what sinks receive after every submission:
//! - frame identity (index, timestamp)
//! - camera-to-world pose estimate
//! - alignment residual and brightness parameters
//! - the corrected image, shared between sinks without copying

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use nalgebra::Isometry3;

/// What the engine publishes to sinks for one frame.
#[derive(Debug, Clone)]
pub struct FrameOutput {
    pub index: usize,
    pub timestamp: f64,
    /// Camera to world.
    pub pose: Isometry3<f64>,
    /// Mean absolute photometric residual, 0 for the bootstrap frame.
    pub residual: f32,
    /// Brightness transfer `a * I + b` applied to this frame.
    pub affine: (f32, f32),
    /// Whether this frame became the new alignment reference.
    pub keyframe: bool,
    pub width: u32,
    pub height: u32,
    pub image: Arc<[f32]>,
}

/// One tracked pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryEntry {
    pub timestamp: f64,
    pub pose: Isometry3<f64>,
}

/// Write `timestamp tx ty tz qx qy qz qw` lines.
pub fn write_trajectory(path: &Path, trajectory: &[TrajectoryEntry]) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .from_writer(file);

    for entry in trajectory {
        let t = entry.pose.translation.vector;
        let q = entry.pose.rotation.coords;
        wtr.write_record(&[
            format!("{:.6}", entry.timestamp),
            format!("{:.9}", t.x),
            format!("{:.9}", t.y),
            format!("{:.9}", t.z),
            format!("{:.9}", q.x),
            format!("{:.9}", q.y),
            format!("{:.9}", q.z),
            format!("{:.9}", q.w),
        ])?;
    }
    wtr.flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Translation3, UnitQuaternion};

    #[test]
    fn test_write_trajectory_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.txt");
        let trajectory = vec![
            TrajectoryEntry {
                timestamp: 1.5,
                pose: Isometry3::identity(),
            },
            TrajectoryEntry {
                timestamp: 1.55,
                pose: Isometry3::from_parts(
                    Translation3::new(0.25, -0.5, 0.0),
                    UnitQuaternion::identity(),
                ),
            },
        ];
        write_trajectory(&path, &trajectory).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let fields: Vec<f64> = lines[1]
            .split(' ')
            .map(|f| f.parse().unwrap())
            .collect();
        assert_eq!(fields.len(), 8);
        assert!((fields[0] - 1.55).abs() < 1e-9);
        assert!((fields[2] + 0.5).abs() < 1e-9);
        assert!((fields[7] - 1.0).abs() < 1e-9);
    }
}
