//! Run orchestration and thread management.
//!
//! This module contains the top-level `Orchestrator` that drives the frame loop
//! on a background thread while the viewer owns the invoking thread. The
//! other modules hold what that driver shares with the rest of the process.

pub mod interrupt;
pub mod operator;
mod orchestrator;
pub mod preflight;
pub mod session;
pub mod shared_state;

pub use interrupt::{INTERRUPT_EXIT_CODE, InterruptWatcher};
pub use operator::{OperatorCommand, spawn_command_reader};
pub use orchestrator::Orchestrator;
pub use preflight::{PreflightError, check_photometric_calibration};
pub use session::{RunSummary, Session, SessionRange};
pub use shared_state::SharedState;
