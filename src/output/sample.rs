//! Minimal sink that reports every published pose through `tracing`.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;

use crate::engine::FrameOutput;

use super::OutputSink;

#[derive(Debug, Default)]
pub struct SampleOutput {
    published: AtomicUsize,
    resets: AtomicUsize,
}

impl SampleOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> usize {
        self.published.load(Ordering::Relaxed)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::Relaxed)
    }
}

impl OutputSink for SampleOutput {
    fn name(&self) -> &str {
        "sample"
    }

    fn publish(&self, output: &FrameOutput) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let t = output.pose.translation.vector;
        let q = output.pose.rotation.coords;
        info!(
            "frame {} t={:.3}: pos [{:.4} {:.4} {:.4}] quat [{:.4} {:.4} {:.4} {:.4}] res {:.2} a={:.3} b={:.2}{}",
            output.index,
            output.timestamp,
            t.x,
            t.y,
            t.z,
            q.x,
            q.y,
            q.z,
            q.w,
            output.residual,
            output.affine.0,
            output.affine.1,
            if output.keyframe { " (keyframe)" } else { "" }
        );
    }

    fn reset(&self) {
        let resets = self.resets.fetch_add(1, Ordering::Relaxed) + 1;
        info!("sample output: reset #{}", resets);
    }

    fn join(&self) {
        info!(
            "sample output: {} frames published, {} resets",
            self.published(),
            self.resets()
        );
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::Isometry3;

    use super::*;

    #[test]
    fn test_counts_publishes_and_resets() {
        let sink = SampleOutput::new();
        let output = FrameOutput {
            index: 3,
            timestamp: 0.3,
            pose: Isometry3::identity(),
            residual: 1.0,
            affine: (1.0, 0.0),
            keyframe: false,
            width: 1,
            height: 1,
            image: vec![0.0f32].into(),
        };
        sink.publish(&output);
        sink.publish(&output);
        sink.reset();
        sink.join();
        assert_eq!(sink.published(), 2);
        assert_eq!(sink.resets(), 1);
    }
}
