use std::io::{self, BufReader};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use rust_dso::config::RunConfig;
use rust_dso::engine::{AlignerConfig, DirectAlignerFactory};
use rust_dso::io::{FrameSource, ImageFolderReader, ReaderOptions};
use rust_dso::logging;
use rust_dso::output::{ImageDump, SampleOutput, SinkRegistry};
use rust_dso::system::{
    InterruptWatcher, Orchestrator, RunSummary, check_photometric_calibration, spawn_command_reader,
};
use rust_dso::viz::RerunViewer;

const APP_NAME: &str = "rust-dso";

fn main() -> ExitCode {
    let (config, arg_errors) = RunConfig::from_args(std::env::args().skip(1));

    let _log_guard = match logging::init_logging(config.quiet, config.log_to_file()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to set up {}: {}", logging::LOG_DIR, e);
            return ExitCode::FAILURE;
        }
    };

    for e in &arg_errors {
        warn!("could not parse argument: {}", e);
    }
    config.log_summary();

    if let Err(e) = InterruptWatcher::install() {
        warn!("Failed to install SIGINT handler: {}", e);
    }

    match run(&config) {
        Ok(summary) => {
            if summary.lost {
                info!("tracking lost after frame {:?}", summary.last_index);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: &RunConfig) -> Result<RunSummary> {
    let options =
        ReaderOptions::from_config(config).context("No image source given, use files=<path>")?;
    let reader = ImageFolderReader::new(&options).context("Failed to open frame source")?;
    info!("loaded {} images from {}", reader.num_images(), options.source.display());

    let calibration = reader.set_global_calibration();
    check_photometric_calibration(config.mode, reader.photometric_gamma())?;

    let factory = DirectAlignerFactory::new(AlignerConfig::new(config, calibration));
    let sinks = build_sinks(config);

    let orchestrator = Orchestrator::new(config, Box::new(reader), Box::new(factory), sinks);
    if let Err(e) = spawn_command_reader(BufReader::new(io::stdin()), orchestrator.shared_state().clone()) {
        warn!("Failed to start operator input: {}, resets only on tracking failure", e);
    } else {
        info!("type 'r' and Enter to reset the engine");
    }
    orchestrator.run()
}

/// Viewer first, then the sample printer, then the image dump.
fn build_sinks(config: &RunConfig) -> SinkRegistry {
    let mut sinks = SinkRegistry::new();

    if config.display {
        match RerunViewer::new(APP_NAME) {
            Ok(viewer) => sinks.register_viewer(Arc::new(viewer)),
            Err(e) => warn!("{:#}, continuing without viewer", e),
        }
    }

    if config.sample_output {
        sinks.register(Arc::new(SampleOutput::new()));
    }

    if config.save_images {
        match ImageDump::create(&config.image_dump_dir, config.multi_threading) {
            Ok(dump) => sinks.register(Arc::new(dump)),
            Err(e) => warn!("{:#}, not saving images", e),
        }
    }

    sinks
}
