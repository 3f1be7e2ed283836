//! Rerun-based viewer for direct odometry output.
//!
//! Entity hierarchy:
//!     status               - Frame index, residual and brightness parameters
//!     events               - Reset markers
//!     camera/
//!         image            - Photometrically corrected input frame
//!     world/
//!         camera           - Current camera pose
//!         trajectory       - Trajectory line (gray, thin)
//!     plots/
//!         residual         - Temporal plot
//!         affine_a         - Temporal plot

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use parking_lot::Mutex;
use rerun::{RecordingStream, external::glam};
use tracing::{debug, info, warn};

use crate::engine::FrameOutput;
use crate::io::Frame;
use crate::output::{OutputSink, Viewer};

/// Frames buffered between the frame loop and the viewer loop.
const QUEUE_CAPACITY: usize = 64;

/// How long a reset marker may wait for room in a full queue.
const RESET_SEND_TIMEOUT: Duration = Duration::from_secs(1);

enum ViewerEvent {
    Frame(FrameOutput),
    Reset,
    Close,
}

pub struct RerunViewer {
    rec: RecordingStream,
    tx: Sender<ViewerEvent>,
    rx: Receiver<ViewerEvent>,
    /// Camera centers since the last reset.
    trajectory: Mutex<Vec<[f32; 3]>>,
    start_timestamp: Mutex<Option<f64>>,
    dropped: AtomicUsize,
    closed: AtomicBool,
}

impl RerunViewer {
    /// Spawn a rerun viewer process and stream into it.
    pub fn new(app_name: &str) -> Result<Self> {
        let rec = rerun::RecordingStreamBuilder::new(app_name)
            .spawn()
            .context("Failed to spawn rerun viewer")?;

        // Camera convention: X right, Y down, Z forward
        rec.log_static("world", &rerun::ViewCoordinates::RDF()).ok();

        Ok(Self::with_recording(rec))
    }

    pub fn with_recording(rec: RecordingStream) -> Self {
        let (tx, rx) = bounded(QUEUE_CAPACITY);
        Self {
            rec,
            tx,
            rx,
            trajectory: Mutex::new(Vec::new()),
            start_timestamp: Mutex::new(None),
            dropped: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Frames skipped because the viewer loop fell behind.
    pub fn dropped_frames(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn trajectory_len(&self) -> usize {
        self.trajectory.lock().len()
    }

    fn handle(&self, event: ViewerEvent) -> bool {
        match event {
            ViewerEvent::Frame(output) => {
                self.log_frame(&output);
                true
            }
            ViewerEvent::Reset => {
                self.log_reset();
                true
            }
            ViewerEvent::Close => false,
        }
    }

    /// Apply everything queued without blocking.
    fn drain(&self) {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    self.handle(event);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn log_frame(&self, output: &FrameOutput) {
        let start = *self
            .start_timestamp
            .lock()
            .get_or_insert(output.timestamp);
        self.rec
            .set_duration_secs("time", (output.timestamp - start).max(0.0));

        let status = format!(
            "frame {} | residual {:.2} | a={:.3} b={:.1}{}",
            output.index,
            output.residual,
            output.affine.0,
            output.affine.1,
            if output.keyframe { " | **KEYFRAME**" } else { "" }
        );
        self.rec
            .log(
                "status",
                &rerun::TextDocument::new(status).with_media_type(rerun::MediaType::markdown()),
            )
            .ok();

        self.rec
            .log(
                "camera/image",
                &rerun::Image::from_l8(
                    Frame::to_luma8(&output.image),
                    [output.width, output.height],
                ),
            )
            .ok();

        let t = output.pose.translation.vector;
        let q = output.pose.rotation.coords;
        let translation = glam::Vec3::new(t.x as f32, t.y as f32, t.z as f32);
        let rotation = glam::Quat::from_xyzw(q.x as f32, q.y as f32, q.z as f32, q.w as f32);
        self.rec
            .log(
                "world/camera",
                &rerun::Transform3D::from_translation_rotation(translation, rotation),
            )
            .ok();

        let pts = {
            let mut trajectory = self.trajectory.lock();
            trajectory.push([translation.x, translation.y, translation.z]);
            trajectory.clone()
        };
        if pts.len() >= 2 {
            self.rec
                .log(
                    "world/trajectory",
                    &rerun::LineStrips3D::new([pts])
                        .with_colors([[128u8, 128, 128]])
                        .with_radii([0.005f32]),
                )
                .ok();
        }

        self.rec
            .log(
                "plots/residual",
                &rerun::Scalars::new([output.residual as f64]),
            )
            .ok();
        self.rec
            .log(
                "plots/affine_a",
                &rerun::Scalars::new([output.affine.0 as f64]),
            )
            .ok();
    }

    fn log_reset(&self) {
        self.trajectory.lock().clear();
        self.rec.log("world", &rerun::Clear::recursive()).ok();
        self.rec
            .log("events", &rerun::TextLog::new("engine reset"))
            .ok();
    }
}

impl OutputSink for RerunViewer {
    fn name(&self) -> &str {
        "rerun"
    }

    fn publish(&self, output: &FrameOutput) {
        match self.tx.try_send(ViewerEvent::Frame(output.clone())) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("viewer queue full, dropped frame {} ({} total)", output.index, dropped);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn reset(&self) {
        if self
            .tx
            .send_timeout(ViewerEvent::Reset, RESET_SEND_TIMEOUT)
            .is_err()
        {
            warn!("viewer queue stalled, applying reset directly");
            self.drain();
            self.log_reset();
        }
    }

    fn join(&self) {
        self.drain();
        let dropped = self.dropped_frames();
        if dropped > 0 {
            info!("viewer skipped {} frames", dropped);
        }
    }
}

impl Viewer for RerunViewer {
    fn run(&self) {
        info!("viewer loop started");
        while let Ok(event) = self.rx.recv() {
            if !self.handle(event) {
                break;
            }
        }
        self.drain();
        info!("viewer loop finished");
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.tx.send(ViewerEvent::Close).is_err() {
            warn!("viewer queue disconnected before close");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use nalgebra::Isometry3;

    use super::*;

    fn output(index: usize, x: f64) -> FrameOutput {
        FrameOutput {
            index,
            timestamp: index as f64 * 0.05,
            pose: Isometry3::translation(x, 0.0, 0.0),
            residual: 2.5,
            affine: (1.0, 0.0),
            keyframe: index == 0,
            width: 4,
            height: 2,
            image: vec![10.0f32; 8].into(),
        }
    }

    fn viewer() -> Arc<RerunViewer> {
        Arc::new(RerunViewer::with_recording(RecordingStream::disabled()))
    }

    #[test]
    fn test_run_returns_after_close_and_shows_queued_frames() {
        let viewer = viewer();
        let producer = {
            let viewer = viewer.clone();
            thread::spawn(move || {
                for i in 0..5 {
                    viewer.publish(&output(i, i as f64));
                }
                viewer.close();
            })
        };
        viewer.run();
        producer.join().unwrap();
        assert_eq!(viewer.trajectory_len(), 5);
    }

    #[test]
    fn test_reset_clears_trajectory_in_order() {
        let viewer = viewer();
        viewer.publish(&output(0, 0.0));
        viewer.publish(&output(1, 1.0));
        viewer.reset();
        viewer.publish(&output(2, 0.0));
        viewer.close();
        viewer.run();
        assert_eq!(viewer.trajectory_len(), 1);
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let viewer = viewer();
        for i in 0..QUEUE_CAPACITY + 3 {
            viewer.publish(&output(i, 0.0));
        }
        assert_eq!(viewer.dropped_frames(), 3);
        viewer.join();
        assert_eq!(viewer.trajectory_len(), QUEUE_CAPACITY);
    }

    #[test]
    fn test_close_is_idempotent() {
        let viewer = viewer();
        viewer.close();
        viewer.close();
        viewer.run();
        assert_eq!(viewer.trajectory_len(), 0);
    }
}
