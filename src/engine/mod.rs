//! Estimation engine capability and the bundled direct aligner.
//!
//! The frame loop only talks to engines through [`Odometry`]: submit a frame,
//! read the status flags, swap the attached sinks during a reset, and write
//! the final trajectory. Engines are disposable; a reset builds a new one
//! through an [`EngineFactory`].

pub mod aligner;
pub mod result;
pub mod state;

use std::path::Path;

use anyhow::Result;

use crate::io::{Frame, GammaTable};
use crate::output::SinkView;

pub use aligner::{AlignerConfig, DirectAligner, DirectAlignerFactory};
pub use result::{FrameOutput, TrajectoryEntry};
pub use state::EngineState;

/// Flags read by the frame loop after each submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStatus {
    pub initialized: bool,
    pub lost: bool,
    pub init_failed: bool,
}

/// A stateful estimation engine.
///
/// `'s` is the lifetime of the sink registry the engine publishes to. The
/// engine only borrows it; the orchestrator owns the sinks.
pub trait Odometry<'s>: Send {
    /// Consume one frame. Recoverable failures surface through [`status`].
    ///
    /// [`status`]: Odometry::status
    fn add_active_frame(&mut self, frame: &Frame, index: usize);

    fn status(&self) -> EngineStatus;

    fn set_gamma_function(&mut self, gamma: Option<&GammaTable>);

    /// Re-entrant mode used for replacement engines: bootstrap on the first
    /// usable frame without waiting for confirmation.
    fn set_linearize_operation(&mut self, enabled: bool);

    fn attach_sinks(&mut self, sinks: SinkView<'s>);

    /// Hand the sink view back; the engine publishes nothing afterwards.
    fn detach_sinks(&mut self) -> SinkView<'s>;

    /// Write the estimated trajectory.
    fn print_result(&self, path: &Path) -> Result<()>;
}

/// Builds fresh engine instances, both at startup and on every reset.
pub trait EngineFactory: Send + Sync {
    fn create<'s>(&self) -> Box<dyn Odometry<'s> + 's>;
}
