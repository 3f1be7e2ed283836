//! Sink that dumps every published frame to disk as an 8-bit PNG.
//!
//! Encoding runs on a dedicated worker thread fed through a channel, unless
//! multi-threading is disabled, in which case frames are written inline on
//! the publishing thread. Each engine reset starts a new file-name segment so
//! frames from consecutive engines never overwrite each other.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::engine::FrameOutput;
use crate::io::Frame;

use super::OutputSink;

/// One queued write.
struct DumpJob {
    path: PathBuf,
    width: u32,
    height: u32,
    image: Arc<[f32]>,
}

/// Worker thread and the sender that keeps it alive.
struct Worker {
    tx: Sender<DumpJob>,
    handle: JoinHandle<()>,
}

pub struct ImageDump {
    dir: PathBuf,
    segment: AtomicUsize,
    /// Files written so far, shared with the worker.
    written: Arc<AtomicUsize>,
    /// `None` when writing inline or after `join()`.
    worker: Mutex<Option<Worker>>,
}

impl ImageDump {
    /// Recreate `dir` empty and start the writer.
    pub fn create(dir: &Path, multi_threading: bool) -> Result<Self> {
        if dir.exists() {
            fs::remove_dir_all(dir)
                .with_context(|| format!("Failed to clear {}", dir.display()))?;
        }
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        let written = Arc::new(AtomicUsize::new(0));
        let worker = if multi_threading {
            Some(Self::spawn_worker(written.clone())?)
        } else {
            None
        };
        info!(
            "dumping frames to {} ({})",
            dir.display(),
            if multi_threading { "worker thread" } else { "inline" }
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            segment: AtomicUsize::new(0),
            written,
            worker: Mutex::new(worker),
        })
    }

    fn spawn_worker(written: Arc<AtomicUsize>) -> Result<Worker> {
        let (tx, rx) = unbounded::<DumpJob>();
        let handle = thread::Builder::new()
            .name("image-dump".to_string())
            .spawn(move || {
                // Ends once every sender is gone and the queue is empty.
                for job in rx {
                    write_job(&job, &written);
                }
                debug!("image dump worker exiting");
            })
            .context("Failed to spawn image dump thread")?;
        Ok(Worker { tx, handle })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }

    fn path_for(&self, index: usize) -> PathBuf {
        let segment = self.segment.load(Ordering::SeqCst);
        self.dir.join(format!("{:02}_{:05}.png", segment, index))
    }
}

impl OutputSink for ImageDump {
    fn name(&self) -> &str {
        "image-dump"
    }

    fn publish(&self, output: &FrameOutput) {
        let job = DumpJob {
            path: self.path_for(output.index),
            width: output.width,
            height: output.height,
            image: output.image.clone(),
        };

        let job = match self.worker.lock().as_ref() {
            Some(worker) => match worker.tx.send(job) {
                Ok(()) => return,
                Err(e) => e.into_inner(),
            },
            None => job,
        };
        write_job(&job, &self.written);
    }

    fn reset(&self) {
        let segment = self.segment.fetch_add(1, Ordering::SeqCst) + 1;
        info!("image dump: starting segment {}", segment);
    }

    fn join(&self) {
        let Some(Worker { tx, handle }) = self.worker.lock().take() else {
            return;
        };
        drop(tx);
        if handle.join().is_err() {
            warn!("image dump worker panicked");
        }
        info!("image dump: {} frames written", self.written());
    }
}

fn write_job(job: &DumpJob, written: &AtomicUsize) {
    match write_png(&job.path, job.width, job.height, &job.image) {
        Ok(()) => {
            written.fetch_add(1, Ordering::SeqCst);
        }
        Err(e) => warn!("{:#}", e),
    }
}

fn write_png(path: &Path, width: u32, height: u32, image: &[f32]) -> Result<()> {
    let buffer = image::GrayImage::from_raw(width, height, Frame::to_luma8(image))
        .ok_or_else(|| anyhow!("Frame buffer does not match {}x{}", width, height))?;
    buffer
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))
}
