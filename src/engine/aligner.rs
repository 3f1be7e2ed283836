//! Direct frame-to-reference image aligner.
//!
//! A deliberately small photometric odometry front-end:
//! 1. Select high-gradient pixels on a reference frame
//! 2. Search an image-plane shift for each new frame, coarse to fine,
//!    starting from a constant-velocity prediction
//! 3. Estimate affine brightness `a * I + b` per the photometric mode
//! 4. Replace the reference when overlap or age demands it
//!
//! The accumulated shift is reported as a camera translation in normalised
//! image units. Rotation and depth are not estimated.

use std::path::Path;

use anyhow::Result;
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector2};
use tracing::{debug, info, warn};

use crate::config::{AffineMode, RunConfig};
use crate::io::{CameraCalibration, Frame, GammaTable};
use crate::output::SinkView;

use super::result::{FrameOutput, TrajectoryEntry, write_trajectory};
use super::{EngineFactory, EngineStatus, Odometry};

/// Saturation bounds used without a gamma table.
const DEFAULT_SATURATION: (f32, f32) = (2.0, 253.0);

/// Fewer valid correspondences than this reject a shift outright.
const MIN_VALID_POINTS: usize = 8;

/// Tuning of the aligner.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignerConfig {
    pub calibration: CameraCalibration,
    /// Candidate pixels kept after thresholding, spread evenly over the image.
    pub immature_density: usize,
    /// Maximum number of selected points per reference.
    pub point_density: usize,
    /// Refinement steps always taken after the window search.
    pub min_opt_iterations: usize,
    /// Upper bound on refinement steps.
    pub max_opt_iterations: usize,
    /// Reference age after which a replacement is allowed.
    pub min_frames: usize,
    /// Reference age after which a replacement is forced.
    pub max_frames: usize,
    pub affine: (AffineMode, AffineMode),
    /// Added to the mean gradient to form the selection threshold.
    pub min_gradient_add: f32,
    /// Points a frame needs to bootstrap tracking.
    pub min_init_points: usize,
    /// Unusable frames tolerated before `init_failed` is raised.
    pub init_attempts: usize,
    /// Half-size of the window searched around the prediction, px.
    pub prediction_radius: i32,
    /// Half-size of the fallback window when the prediction fails, px.
    pub search_radius: i32,
    /// Mean absolute residual above which a frame counts as badly tracked.
    pub max_residual: f32,
    /// Consecutive badly tracked frames before the track is lost.
    pub lost_after: usize,
    /// Overlap fraction below which the reference is replaced.
    pub min_overlap: f32,
}

impl AlignerConfig {
    pub fn new(config: &RunConfig, calibration: CameraCalibration) -> Self {
        let s = &config.settings;
        Self {
            calibration,
            immature_density: s.desired_immature_density,
            point_density: s.desired_point_density,
            min_opt_iterations: s.min_opt_iterations,
            max_opt_iterations: s.max_opt_iterations,
            min_frames: s.min_frames,
            max_frames: s.max_frames,
            affine: config.mode.affine_modes(),
            min_gradient_add: config.mode.min_gradient_add(),
            ..Self::with_calibration(calibration)
        }
    }

    /// Default tuning for the given camera.
    pub fn with_calibration(calibration: CameraCalibration) -> Self {
        Self {
            calibration,
            immature_density: 1500,
            point_density: 2000,
            min_opt_iterations: 1,
            max_opt_iterations: 6,
            min_frames: 5,
            max_frames: 7,
            affine: (AffineMode::Optimize, AffineMode::Optimize),
            min_gradient_add: 7.0,
            min_init_points: 40,
            init_attempts: 8,
            prediction_radius: 2,
            search_radius: 16,
            max_residual: 30.0,
            lost_after: 3,
            min_overlap: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RefPoint {
    x: i32,
    y: i32,
    value: f32,
}

/// Frame the current one is aligned against.
#[derive(Debug)]
struct Reference {
    points: Vec<RefPoint>,
    timestamp: f64,
    /// Shift of this reference relative to the first one, px.
    offset: Vector2<i32>,
}

#[derive(Debug, Clone, Copy)]
struct Alignment {
    shift: Vector2<i32>,
    residual: f32,
    a: f32,
    b: f32,
    overlap: f32,
}

/// The bundled engine.
pub struct DirectAligner<'s> {
    config: AlignerConfig,
    sinks: SinkView<'s>,
    saturation: (f32, f32),
    linearize: bool,
    status: EngineStatus,

    reference: Option<Reference>,
    /// Current shift relative to the reference.
    shift: Vector2<i32>,
    /// Shift change over the last frame, used as the motion prior.
    velocity: Vector2<i32>,
    frames_since_keyframe: usize,
    failed_init_frames: usize,
    bad_frames: usize,

    trajectory: Vec<TrajectoryEntry>,
}

impl<'s> DirectAligner<'s> {
    pub fn new(config: AlignerConfig) -> Self {
        Self {
            config,
            sinks: &[],
            saturation: DEFAULT_SATURATION,
            linearize: false,
            status: EngineStatus::default(),
            reference: None,
            shift: Vector2::zeros(),
            velocity: Vector2::zeros(),
            frames_since_keyframe: 0,
            failed_init_frames: 0,
            bad_frames: 0,
            trajectory: Vec::new(),
        }
    }

    pub fn trajectory(&self) -> &[TrajectoryEntry] {
        &self.trajectory
    }

    /// Select high-gradient, unsaturated pixels.
    ///
    /// Candidates above the threshold are first thinned evenly to
    /// `immature_density`; the strongest `point_density` of those are kept.
    fn select_points(&self, frame: &Frame) -> Vec<RefPoint> {
        let (w, h) = (frame.width as i32, frame.height as i32);
        if w < 3 || h < 3 {
            return Vec::new();
        }

        let mut gradients = Vec::with_capacity(((w - 2) * (h - 2)) as usize);
        let mut sum = 0.0f32;
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let px = |dx: i32, dy: i32| frame.pixel(x + dx, y + dy).unwrap_or(0.0);
                let g = (px(1, 0) - px(-1, 0)).abs() + (px(0, 1) - px(0, -1)).abs();
                sum += g;
                gradients.push((x, y, g));
            }
        }
        let threshold = sum / gradients.len() as f32 + self.config.min_gradient_add;

        let (lo, hi) = self.saturation;
        let candidates: Vec<(RefPoint, f32)> = gradients
            .into_iter()
            .filter(|&(_, _, g)| g > threshold)
            .filter_map(|(x, y, g)| {
                let value = frame.pixel(x, y)?;
                (value > lo && value < hi).then_some((RefPoint { x, y, value }, g))
            })
            .collect();

        let stride = candidates
            .len()
            .div_ceil(self.config.immature_density.max(1))
            .max(1);
        let mut candidates: Vec<(RefPoint, f32)> = candidates.into_iter().step_by(stride).collect();

        let keep = self.config.point_density.max(1);
        if candidates.len() > keep {
            candidates.select_nth_unstable_by(keep - 1, |a, b| b.1.total_cmp(&a.1));
            candidates.truncate(keep);
        }
        candidates.into_iter().map(|(p, _)| p).collect()
    }

    /// Photometric residual of `frame` against the reference at `shift`.
    fn evaluate(&self, reference: &Reference, frame: &Frame, shift: Vector2<i32>) -> Option<Alignment> {
        let pairs: Vec<(f32, f32)> = reference
            .points
            .iter()
            .filter_map(|p| Some((p.value, frame.pixel(p.x + shift.x, p.y + shift.y)?)))
            .collect();
        if pairs.len() < MIN_VALID_POINTS {
            return None;
        }

        let n = pairs.len() as f32;
        let mean_r = pairs.iter().map(|(r, _)| r).sum::<f32>() / n;
        let mean_c = pairs.iter().map(|(_, c)| c).sum::<f32>() / n;

        let a = match self.config.affine.0 {
            AffineMode::Fixed => 1.0,
            AffineMode::Optimize => {
                let var_r = pairs.iter().map(|(r, _)| (r - mean_r).powi(2)).sum::<f32>() / n;
                let var_c = pairs.iter().map(|(_, c)| (c - mean_c).powi(2)).sum::<f32>() / n;
                if var_c > 1e-6 { (var_r / var_c).sqrt() } else { 1.0 }
            }
        };
        let b = match self.config.affine.1 {
            AffineMode::Fixed => 0.0,
            AffineMode::Optimize => mean_r - a * mean_c,
        };

        let residual = pairs.iter().map(|(r, c)| (a * c + b - r).abs()).sum::<f32>() / n;
        Some(Alignment {
            shift,
            residual,
            a,
            b,
            overlap: n / reference.points.len() as f32,
        })
    }

    /// Best alignment over every shift within `radius` of `center`.
    fn search_window(
        &self,
        reference: &Reference,
        frame: &Frame,
        center: Vector2<i32>,
        radius: i32,
    ) -> Option<Alignment> {
        let mut best: Option<Alignment> = None;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let candidate = self.evaluate(reference, frame, center + Vector2::new(dx, dy));
                if let Some(c) = candidate {
                    if best.is_none_or(|b| c.residual < b.residual) {
                        best = Some(c);
                    }
                }
            }
        }
        best
    }

    /// Window search around the constant-velocity prediction, widened to
    /// `search_radius` when the prediction misses, followed by single pixel
    /// refinement.
    fn align(&self, reference: &Reference, frame: &Frame) -> Option<Alignment> {
        let prediction = self.shift + self.velocity;
        let good_enough = self.config.max_residual / 2.0;

        let mut best = self.search_window(
            reference,
            frame,
            prediction,
            self.config.prediction_radius.max(1),
        );
        if best.is_none_or(|b| b.residual > good_enough)
            && self.config.search_radius > self.config.prediction_radius
        {
            let wide = self.search_window(reference, frame, prediction, self.config.search_radius);
            if let Some(w) = wide {
                if best.is_none_or(|b| w.residual < b.residual) {
                    best = Some(w);
                }
            }
        }

        let max_steps = self
            .config
            .max_opt_iterations
            .max(self.config.min_opt_iterations);
        for step in 0..max_steps {
            let Some(current) = best else {
                break;
            };
            let refined = self.search_window(reference, frame, current.shift, 1);
            match refined {
                Some(r) if r.residual < current.residual => best = Some(r),
                _ if step + 1 >= self.config.min_opt_iterations => break,
                _ => {}
            }
        }
        best
    }

    fn make_reference(&self, frame: &Frame, offset: Vector2<i32>) -> Option<Reference> {
        let points = self.select_points(frame);
        if points.len() < self.config.min_init_points {
            debug!(
                "frame {}: {} points, need {}",
                frame.index,
                points.len(),
                self.config.min_init_points
            );
            return None;
        }
        Some(Reference {
            points,
            timestamp: frame.timestamp,
            offset,
        })
    }

    fn pose_for(&self, total_shift: Vector2<i32>) -> Isometry3<f64> {
        let c = &self.config.calibration;
        Isometry3::from_parts(
            Translation3::new(-total_shift.x as f64 / c.fx, -total_shift.y as f64 / c.fy, 0.0),
            UnitQuaternion::identity(),
        )
    }

    fn note_failed_init(&mut self, index: usize) {
        self.failed_init_frames += 1;
        if self.failed_init_frames >= self.config.init_attempts {
            warn!(
                "initialization failed after {} frames (at frame {})",
                self.failed_init_frames, index
            );
            self.status.init_failed = true;
        }
    }

    /// Bootstrap: pick a reference, then (unless linearized) confirm it on
    /// the next frame before declaring the engine initialized.
    fn initialize(&mut self, frame: &Frame, index: usize) {
        let candidate = self.reference.take();
        let confirmed = match &candidate {
            Some(reference) if !self.linearize => self
                .align(reference, frame)
                .filter(|a| a.residual <= self.config.max_residual && a.overlap >= self.config.min_overlap),
            _ => None,
        };

        if let (Some(reference), Some(alignment)) = (candidate, confirmed) {
            self.trajectory.push(TrajectoryEntry {
                timestamp: reference.timestamp,
                pose: Isometry3::identity(),
            });
            self.reference = Some(reference);
            self.status.initialized = true;
            info!("initialized at frame {} (residual {:.2})", index, alignment.residual);
            self.track_accepted(frame, alignment);
            return;
        }

        match self.make_reference(frame, Vector2::zeros()) {
            Some(reference) if self.linearize => {
                self.reference = Some(reference);
                self.status.initialized = true;
                info!("initialized at frame {} (re-entrant)", index);
                self.publish_bootstrap(frame);
            }
            Some(reference) => {
                self.reference = Some(reference);
                self.note_failed_init(index);
            }
            None => self.note_failed_init(index),
        }
    }

    fn publish_bootstrap(&mut self, frame: &Frame) {
        self.trajectory.push(TrajectoryEntry {
            timestamp: frame.timestamp,
            pose: Isometry3::identity(),
        });
        self.publish(frame, Isometry3::identity(), 0.0, (1.0, 0.0), true);
    }

    /// Accept an alignment result and decide on a new reference.
    fn track_accepted(&mut self, frame: &Frame, alignment: Alignment) {
        let Some(reference) = &self.reference else {
            return;
        };
        let offset = reference.offset;

        self.velocity = alignment.shift - self.shift;
        self.shift = alignment.shift;
        self.frames_since_keyframe += 1;

        let total = offset + self.shift;
        let pose = self.pose_for(total);
        self.trajectory.push(TrajectoryEntry {
            timestamp: frame.timestamp,
            pose,
        });

        let aged = self.frames_since_keyframe >= self.config.max_frames
            || (self.frames_since_keyframe >= self.config.min_frames
                && alignment.residual > self.config.max_residual / 2.0);
        let mut keyframe = false;
        if aged || alignment.overlap < self.config.min_overlap {
            if let Some(next) = self.make_reference(frame, total) {
                self.reference = Some(next);
                self.shift = Vector2::zeros();
                self.frames_since_keyframe = 0;
                keyframe = true;
            }
        }

        self.publish(
            frame,
            pose,
            alignment.residual,
            (alignment.a, alignment.b),
            keyframe,
        );
    }

    fn publish(
        &self,
        frame: &Frame,
        pose: Isometry3<f64>,
        residual: f32,
        affine: (f32, f32),
        keyframe: bool,
    ) {
        if self.sinks.is_empty() {
            return;
        }
        let output = FrameOutput {
            index: frame.index,
            timestamp: frame.timestamp,
            pose,
            residual,
            affine,
            keyframe,
            width: frame.width,
            height: frame.height,
            image: frame.image.as_slice().into(),
        };
        for sink in self.sinks {
            sink.publish(&output);
        }
    }
}

impl<'s> Odometry<'s> for DirectAligner<'s> {
    fn add_active_frame(&mut self, frame: &Frame, index: usize) {
        if self.status.lost || self.status.init_failed {
            return;
        }
        if !self.status.initialized {
            self.initialize(frame, index);
            return;
        }

        let Some(reference) = &self.reference else {
            return;
        };
        let alignment = self.align(reference, frame);

        match alignment {
            Some(a) if a.residual <= self.config.max_residual => {
                self.bad_frames = 0;
                self.track_accepted(frame, a);
            }
            other => {
                self.bad_frames += 1;
                debug!(
                    "frame {}: poor alignment ({:?}), {} in a row",
                    index,
                    other.map(|a| a.residual),
                    self.bad_frames
                );
                if self.bad_frames >= self.config.lost_after {
                    warn!("track lost at frame {}", index);
                    self.status.lost = true;
                } else if let Some(a) = other {
                    self.track_accepted(frame, a);
                }
            }
        }
    }

    fn status(&self) -> EngineStatus {
        self.status
    }

    fn set_gamma_function(&mut self, gamma: Option<&GammaTable>) {
        self.saturation = gamma.map_or(DEFAULT_SATURATION, GammaTable::saturation_bounds);
    }

    fn set_linearize_operation(&mut self, enabled: bool) {
        self.linearize = enabled;
    }

    fn attach_sinks(&mut self, sinks: SinkView<'s>) {
        self.sinks = sinks;
    }

    fn detach_sinks(&mut self) -> SinkView<'s> {
        std::mem::take(&mut self.sinks)
    }

    fn print_result(&self, path: &Path) -> Result<()> {
        info!(
            "writing {} poses to {}",
            self.trajectory.len(),
            path.display()
        );
        write_trajectory(path, &self.trajectory)
    }
}

/// Creates [`DirectAligner`]s sharing one configuration.
#[derive(Debug, Clone)]
pub struct DirectAlignerFactory {
    config: AlignerConfig,
}

impl DirectAlignerFactory {
    pub fn new(config: AlignerConfig) -> Self {
        Self { config }
    }
}

impl EngineFactory for DirectAlignerFactory {
    fn create<'s>(&self) -> Box<dyn Odometry<'s> + 's> {
        Box::new(DirectAligner::new(self.config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::output::OutputSink;
    use crate::output::testing::{RecordingSink, SinkEvent};

    const W: u32 = 64;
    const H: u32 = 48;

    /// Smooth texture sampled at an offset, so shifted frames are exact
    /// translations of each other.
    fn textured(index: usize, dx: i32, dy: i32) -> Frame {
        let mut frame = Frame::empty(index, index as f64 * 0.05, W, H);
        for y in 0..H as i32 {
            for x in 0..W as i32 {
                let (u, v) = ((x - dx) as f32, (y - dy) as f32);
                let value = 128.0 + 60.0 * (u * 0.35).sin() * (v * 0.27).cos() + 30.0 * (u * 0.11 + v * 0.07).sin();
                frame.image[(y as u32 * W + x as u32) as usize] = value;
            }
        }
        frame
    }

    fn flat(index: usize) -> Frame {
        let mut frame = Frame::empty(index, index as f64 * 0.05, W, H);
        frame.image.iter_mut().for_each(|v| *v = 100.0);
        frame
    }

    fn config() -> AlignerConfig {
        AlignerConfig {
            point_density: 600,
            init_attempts: 3,
            ..AlignerConfig::with_calibration(CameraCalibration::from_image_size(W, H))
        }
    }

    #[test]
    fn test_select_points_skips_flat_images() {
        let aligner = DirectAligner::new(config());
        assert!(aligner.select_points(&flat(0)).is_empty());
        let points = aligner.select_points(&textured(0, 0, 0));
        assert!(points.len() >= 40);
        assert!(points.len() <= 600);
    }

    #[test]
    fn test_point_caps_follow_densities() {
        let frame = textured(0, 0, 0);
        let few_candidates = DirectAligner::new(AlignerConfig {
            immature_density: 50,
            ..config()
        });
        assert!(few_candidates.select_points(&frame).len() <= 50);

        let few_points = DirectAligner::new(AlignerConfig {
            immature_density: 600,
            point_density: 30,
            ..config()
        });
        assert_eq!(few_points.select_points(&frame).len(), 30);
    }

    #[test]
    fn test_initializes_after_confirmation_frame() {
        let mut aligner = DirectAligner::new(config());
        aligner.add_active_frame(&textured(0, 0, 0), 0);
        assert!(!aligner.status().initialized);
        aligner.add_active_frame(&textured(1, 1, 0), 1);
        assert!(aligner.status().initialized);
        assert_eq!(aligner.trajectory().len(), 2);
    }

    #[test]
    fn test_linearized_initializes_immediately() {
        let mut aligner = DirectAligner::new(config());
        aligner.set_linearize_operation(true);
        aligner.add_active_frame(&textured(0, 0, 0), 0);
        assert!(aligner.status().initialized);
    }

    #[test]
    fn test_recovers_known_shift() {
        let mut aligner = DirectAligner::new(config());
        aligner.set_linearize_operation(true);
        aligner.add_active_frame(&textured(0, 0, 0), 0);
        aligner.add_active_frame(&textured(1, 2, -1), 1);
        aligner.add_active_frame(&textured(2, 4, -2), 2);

        let status = aligner.status();
        assert!(status.initialized && !status.lost);
        let last = aligner.trajectory().last().unwrap();
        let fx = aligner.config.calibration.fx;
        assert!((last.pose.translation.x + 4.0 / fx).abs() < 1e-9);
        assert!((last.pose.translation.y - 2.0 / fx).abs() < 1e-9);
    }

    #[test]
    fn test_recovers_shift_outside_prediction_window() {
        let mut aligner = DirectAligner::new(config());
        aligner.set_linearize_operation(true);
        aligner.add_active_frame(&textured(0, 0, 0), 0);
        aligner.add_active_frame(&textured(1, 7, -5), 1);

        assert!(!aligner.status().lost);
        let last = aligner.trajectory().last().unwrap();
        let fx = aligner.config.calibration.fx;
        assert!((last.pose.translation.x + 7.0 / fx).abs() < 1e-9);
        assert!((last.pose.translation.y - 5.0 / fx).abs() < 1e-9);
    }

    #[test]
    fn test_flat_frames_raise_init_failed() {
        let mut aligner = DirectAligner::new(config());
        for i in 0..3 {
            aligner.add_active_frame(&flat(i), i);
        }
        let status = aligner.status();
        assert!(status.init_failed);
        assert!(!status.initialized);
    }

    #[test]
    fn test_textureless_sequence_gets_lost() {
        let mut aligner = DirectAligner::new(AlignerConfig {
            max_residual: 20.0,
            ..config()
        });
        aligner.set_linearize_operation(true);
        aligner.add_active_frame(&textured(0, 0, 0), 0);
        for i in 1..=3 {
            let mut noise = flat(i);
            for (k, v) in noise.image.iter_mut().enumerate() {
                *v = if (k * 7919) % 13 < 6 { 0.0 } else { 255.0 };
            }
            aligner.add_active_frame(&noise, i);
        }
        assert!(aligner.status().lost);
    }

    #[test]
    fn test_publishes_to_attached_sinks_until_detached() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sinks: Vec<Arc<dyn OutputSink>> = vec![RecordingSink::new("s", &log)];

        let mut aligner = DirectAligner::new(config());
        aligner.set_linearize_operation(true);
        aligner.attach_sinks(&sinks);
        aligner.add_active_frame(&textured(0, 0, 0), 0);
        aligner.add_active_frame(&textured(1, 1, 1), 1);

        let view = aligner.detach_sinks();
        assert_eq!(view.len(), 1);
        aligner.add_active_frame(&textured(2, 2, 2), 2);

        assert_eq!(
            *log.lock(),
            vec![
                SinkEvent::Publish {
                    sink: "s".into(),
                    index: 0
                },
                SinkEvent::Publish {
                    sink: "s".into(),
                    index: 1
                },
            ]
        );
    }

    #[test]
    fn test_print_result_writes_trajectory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.txt");
        let mut aligner = DirectAligner::new(config());
        aligner.set_linearize_operation(true);
        aligner.add_active_frame(&textured(0, 0, 0), 0);
        aligner.add_active_frame(&textured(1, 1, 0), 1);
        aligner.print_result(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
