//! Orchestrator - frame loop, engine reset, and thread coordination.
//!
//! The `Orchestrator` owns the frame source, the engine factory and the sink
//! registry. `run()` starts the frame loop on a background thread, hands the
//! invoking thread to the viewer (if one is registered), waits for both, and
//! then tears everything down in a fixed order.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, anyhow};
use tracing::{error, info, warn};

use crate::config::RunConfig;
use crate::engine::{EngineFactory, EngineState, Odometry};
use crate::io::FrameSource;
use crate::output::{SinkRegistry, Viewer};

use super::session::{RunSummary, Session, SessionRange};
use super::shared_state::SharedState;

/// Name of the background thread running the frame loop.
const FRAME_LOOP_THREAD: &str = "frame-loop";

type Engine<'s> = Box<dyn Odometry<'s> + 's>;

/// Top-level driver for one run.
pub struct Orchestrator {
    /// Frames, timestamps and the gamma table handed to every engine.
    source: Box<dyn FrameSource>,

    /// Builds the initial engine and every replacement.
    factory: Box<dyn EngineFactory>,

    /// Long-lived owner of all sinks; engines only borrow it.
    sinks: SinkRegistry,

    /// Reset requests and progress flags.
    shared: Arc<SharedState>,

    range: SessionRange,
    result_path: PathBuf,
}

impl Orchestrator {
    pub fn new(
        config: &RunConfig,
        source: Box<dyn FrameSource>,
        factory: Box<dyn EngineFactory>,
        sinks: SinkRegistry,
    ) -> Self {
        let range = SessionRange::clamped(config.start, config.end, source.num_images());
        if config.start >= range.end {
            warn!(
                "start={} leaves nothing to process ({} images)",
                config.start,
                source.num_images()
            );
        }
        Self {
            source,
            factory,
            sinks,
            shared: SharedState::new(),
            range,
            result_path: config.result_path.clone(),
        }
    }

    /// Handle for requesting resets from other threads.
    pub fn shared_state(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn range(&self) -> SessionRange {
        self.range
    }

    /// Run the session to completion.
    ///
    /// Blocks until the frame loop and the viewer loop have both returned,
    /// then drains and releases every sink, the last engine, and the source.
    pub fn run(self) -> Result<RunSummary> {
        let Self {
            source,
            factory,
            sinks,
            shared,
            range,
            result_path,
        } = self;

        let mut engine = factory.create();
        engine.set_gamma_function(source.photometric_gamma());
        engine.attach_sinks(sinks.view());

        let viewer = sinks.viewer().cloned();
        let frame_loop = FrameLoop {
            source: source.as_ref(),
            factory: factory.as_ref(),
            shared: &shared,
        };

        info!(
            "processing frames [{}, {}) with {} sinks",
            range.start,
            range.end,
            sinks.len()
        );

        let (mut engine, summary) = thread::scope(|scope| -> Result<_> {
            let closer = viewer.clone();
            let result_path = result_path.as_path();
            let handle = thread::Builder::new()
                .name(FRAME_LOOP_THREAD.to_string())
                .spawn_scoped(scope, move || {
                    // Fires on return and on unwind, so the viewer loop always ends.
                    let _finished = FinishGuard {
                        shared: frame_loop.shared,
                        viewer: closer,
                    };
                    frame_loop.run(engine, range, result_path)
                })
                .context("Failed to spawn frame-loop thread")?;

            if let Some(viewer) = &viewer {
                viewer.run();
                if !shared.is_processing_finished() {
                    info!("viewer closed, waiting for the frame loop to finish");
                }
            }

            // Join barrier: teardown never starts before the frame loop ends.
            handle
                .join()
                .map_err(|_| anyhow!("{} thread panicked", FRAME_LOOP_THREAD))
        })?;

        sinks.join_all();
        // The engine borrows the registry, so it has to go before the sinks.
        engine.detach_sinks();
        drop(engine);
        info!("released engine");

        drop(viewer);
        drop(sinks);
        info!("released sinks");

        drop(source);
        info!("released frame source");

        Ok(summary)
    }
}

/// Marks the frame loop finished and closes the viewer when dropped.
struct FinishGuard<'a> {
    shared: &'a SharedState,
    viewer: Option<Arc<dyn Viewer>>,
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.shared.mark_processing_finished();
        if let Some(viewer) = self.viewer.take() {
            viewer.close();
        }
    }
}

/// Borrowed context of the frame-loop thread.
#[derive(Clone, Copy)]
struct FrameLoop<'a> {
    source: &'a dyn FrameSource,
    factory: &'a dyn EngineFactory,
    shared: &'a SharedState,
}

impl<'a> FrameLoop<'a> {
    /// Submit every index of `range` in order until exhausted or lost, then
    /// write the result through whichever engine is active.
    fn run<'s>(
        &self,
        mut engine: Engine<'s>,
        range: SessionRange,
        result_path: &Path,
    ) -> (Engine<'s>, RunSummary) {
        let mut session = Session::new(range);

        for index in range.start..range.end {
            if !engine.status().initialized {
                session.restart_timing();
            }

            let frame = self.source.get_image(index);
            engine.add_active_frame(&frame, index);
            drop(frame);
            session.record_submission(index);

            match EngineState::observe(engine.status(), self.shared.is_reset_requested()) {
                EngineState::ResetPending => {
                    engine = self.reset(engine);
                    session.resets += 1;
                }
                state if state.is_terminal() => {
                    warn!("LOST at frame {}", index);
                    session.lost = true;
                    break;
                }
                _ => {}
            }
        }
        session.stop_timing();

        if let Err(e) = engine.print_result(result_path) {
            error!("Failed to write result: {:#}", e);
        }

        let seconds_processed = if range.is_empty() {
            0.0
        } else {
            self.source.timestamp(range.end - 1) - self.source.timestamp(range.start)
        };
        let summary = session.summary(seconds_processed);
        info!("\n{}", summary);
        (engine, summary)
    }

    /// Replace the engine, keeping the same sinks in the same order.
    fn reset<'s>(&self, mut retiring: Engine<'s>) -> Engine<'s> {
        info!("RESETTING!");

        // Step 1: Take the sinks away from the retiring engine
        let sinks = retiring.detach_sinks();

        // Step 2: Let every sink drop engine-specific state
        for sink in sinks {
            sink.reset();
        }

        // Step 3: Destroy the old engine
        drop(retiring);

        // Step 4: Fresh engine, same gamma, same sinks
        let mut engine = self.factory.create();
        engine.set_gamma_function(self.source.photometric_gamma());
        engine.set_linearize_operation(true);
        engine.attach_sinks(sinks);

        // Step 5: The request is satisfied
        self.shared.clear_reset_request();
        engine
    }
}
