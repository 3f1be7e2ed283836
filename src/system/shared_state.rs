//! Flags shared between the frame loop and the rest of the process.
//!
//! The `SharedState` struct carries requests that may originate outside the
//! frame-loop thread (an operator, a viewer) and progress markers other
//! threads may poll.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cross-thread control flags for one run.
#[derive(Debug, Default)]
pub struct SharedState {
    /// A full engine reset was requested.
    /// Set by any holder, cleared by the frame loop once the reset is done.
    pub reset_requested: AtomicBool,

    /// The frame loop has exited (exhausted, lost, or failed).
    pub processing_finished: AtomicBool,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ask for the active engine to be replaced before the next frame.
    pub fn request_reset(&self) {
        self.reset_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_reset_requested(&self) -> bool {
        self.reset_requested.load(Ordering::SeqCst)
    }

    pub fn clear_reset_request(&self) {
        self.reset_requested.store(false, Ordering::SeqCst);
    }

    pub fn mark_processing_finished(&self) {
        self.processing_finished.store(true, Ordering::SeqCst);
    }

    pub fn is_processing_finished(&self) -> bool {
        self.processing_finished.load(Ordering::SeqCst)
    }
}
