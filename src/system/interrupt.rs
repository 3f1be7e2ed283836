//! Fail-fast interrupt handling.
//!
//! On SIGINT the process exits immediately with [`INTERRUPT_EXIT_CODE`]. The
//! join barrier, sink draining and result writing are all skipped.

use tracing::error;

/// Exit status used when the run is interrupted.
pub const INTERRUPT_EXIT_CODE: i32 = 1;

/// Installed interrupt handler.
///
/// `ctrlc` parks a dedicated thread on the signal; the handler runs there,
/// never on the frame-loop or viewer thread.
#[derive(Debug)]
pub struct InterruptWatcher {
    _private: (),
}

impl InterruptWatcher {
    /// Install the terminating handler. Must be called before the frame
    /// loop starts, and at most once per process.
    pub fn install() -> Result<Self, ctrlc::Error> {
        Self::install_with(|| {
            error!("Caught signal SIGINT, exiting");
            std::process::exit(INTERRUPT_EXIT_CODE);
        })
    }

    /// Install a custom action instead of terminating.
    pub fn install_with<F>(action: F) -> Result<Self, ctrlc::Error>
    where
        F: FnMut() + Send + 'static,
    {
        ctrlc::set_handler(action)?;
        Ok(Self { _private: () })
    }
}
