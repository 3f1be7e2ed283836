//! Frame sources: image folders plus their calibration files.

pub mod calibration;
pub mod frame;
pub mod image_folder;

use std::path::PathBuf;

use thiserror::Error;

pub use calibration::{CameraCalibration, GammaTable, Vignette};
pub use frame::Frame;
pub use image_folder::{ImageFolderReader, ReaderOptions};

/// Errors raised while opening a frame source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {}: {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("bad timestamps file: {0}")]
    Timestamps(#[from] csv::Error),

    #[error("{0}")]
    Calibration(String),

    #[error("no images found in {}", .0.display())]
    NoImages(PathBuf),

    #[error("no image at index {0}")]
    IndexOutOfRange(usize),
}

/// Produces frames by index.
///
/// Implementations are shared with the frame-loop thread by reference, so
/// they must be `Sync`. Fetching never fails at this level: a frame that
/// cannot be decoded comes back black.
pub trait FrameSource: Send + Sync {
    fn num_images(&self) -> usize;

    /// Timestamp of frame `index` in seconds.
    fn timestamp(&self, index: usize) -> f64;

    fn get_image(&self, index: usize) -> Frame;

    /// Inverse response table, if the source has one.
    fn photometric_gamma(&self) -> Option<&GammaTable>;

    /// Resolve the calibration all engines will use. Called once before the
    /// frame loop starts.
    fn set_global_calibration(&self) -> CameraCalibration;
}
