//! Image-folder frame source.
//!
//! Layout:
//! ```text
//! sequence/
//!     images/        - one image per frame, ordered by file name
//!     times.txt      - optional: `id timestamp [exposure_ms]` per line
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use image::imageops::{self, FilterType};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::RunConfig;

use super::calibration::{CameraCalibration, GammaTable, Vignette};
use super::{Frame, FrameSource, SourceError};

/// Frame spacing assumed when no timestamps file exists.
const DEFAULT_FRAME_INTERVAL_S: f64 = 0.1;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "pgm"];

/// Where to read from and how to resample.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderOptions {
    pub source: PathBuf,
    pub calib: Option<PathBuf>,
    pub gamma: Option<PathBuf>,
    pub vignette: Option<PathBuf>,
    pub rescale: f64,
    /// Forced output resolution, overriding `rescale`.
    pub resolution: Option<(u32, u32)>,
    pub prefetch: bool,
}

impl ReaderOptions {
    /// `None` when no `files=` argument was given.
    pub fn from_config(config: &RunConfig) -> Option<Self> {
        Some(Self {
            source: config.source.clone()?,
            calib: config.calib.clone(),
            gamma: config.gamma.clone(),
            vignette: config.vignette.clone(),
            rescale: config.rescale,
            resolution: config.settings.benchmark_resolution,
            prefetch: config.prefetch,
        })
    }
}

#[derive(Debug)]
pub struct ImageFolderReader {
    files: Vec<PathBuf>,
    timestamps: Vec<f64>,
    exposures: Vec<f32>,
    calibration: CameraCalibration,
    gamma: Option<GammaTable>,
    vignette: Option<Vignette>,
    /// Decoded frames when prefetching.
    cache: Vec<Frame>,
}

impl ImageFolderReader {
    pub fn new(options: &ReaderOptions) -> Result<Self, SourceError> {
        let files = list_images(&options.source)?;
        if files.is_empty() {
            return Err(SourceError::NoImages(options.source.clone()));
        }

        let times_path = options
            .source
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("times.txt");
        let (timestamps, exposures) = match load_times(&times_path)? {
            Some((ts, exp)) if ts.len() == files.len() => (ts, exp),
            Some((ts, _)) => {
                warn!(
                    "{} has {} entries for {} images, ignoring timestamps",
                    times_path.display(),
                    ts.len(),
                    files.len()
                );
                (Vec::new(), Vec::new())
            }
            None => (Vec::new(), Vec::new()),
        };

        let calibration = match &options.calib {
            Some(path) => CameraCalibration::load(path)?,
            None => {
                let (w, h) = image::image_dimensions(&files[0]).map_err(|source| {
                    SourceError::Image {
                        path: files[0].clone(),
                        source,
                    }
                })?;
                warn!("no camera calibration given, assuming default intrinsics for {}x{}", w, h);
                CameraCalibration::from_image_size(w, h)
            }
        };
        let calibration = match options.resolution {
            Some((w, h)) => calibration.resized(w, h),
            None if options.rescale != 1.0 => calibration.rescaled(options.rescale),
            None => calibration,
        };

        let gamma = options.gamma.as_deref().and_then(|path| {
            GammaTable::load(path)
                .inspect_err(|e| warn!("could not load photometric gamma: {}", e))
                .ok()
        });
        let vignette = options.vignette.as_deref().and_then(|path| {
            Vignette::load(path, calibration.width, calibration.height)
                .inspect_err(|e| warn!("could not load vignette: {}", e))
                .ok()
        });

        let mut reader = Self {
            files,
            timestamps,
            exposures,
            calibration,
            gamma,
            vignette,
            cache: Vec::new(),
        };

        info!(
            "image folder {}: {} images, output {}x{}, gamma: {}, vignette: {}",
            options.source.display(),
            reader.files.len(),
            reader.calibration.width,
            reader.calibration.height,
            reader.gamma.is_some(),
            reader.vignette.is_some()
        );

        if options.prefetch {
            reader.cache = (0..reader.files.len()).map(|i| reader.load_frame(i)).collect();
            info!("prefetched {} frames", reader.cache.len());
        }

        Ok(reader)
    }

    fn exposure(&self, index: usize) -> f32 {
        self.exposures.get(index).copied().unwrap_or(0.0)
    }

    fn load_frame(&self, index: usize) -> Frame {
        match self.decode(index) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("frame {}: {}", index, e);
                Frame::empty(
                    index,
                    self.timestamp(index),
                    self.calibration.width,
                    self.calibration.height,
                )
            }
        }
    }

    fn decode(&self, index: usize) -> Result<Frame, SourceError> {
        let path = self
            .files
            .get(index)
            .ok_or(SourceError::IndexOutOfRange(index))?;
        let mut luma = image::open(path)
            .map_err(|source| SourceError::Image {
                path: path.clone(),
                source,
            })?
            .to_luma8();

        let (w, h) = (self.calibration.width, self.calibration.height);
        if luma.dimensions() != (w, h) {
            luma = imageops::resize(&luma, w, h, FilterType::Triangle);
        }

        let image = luma
            .into_raw()
            .into_iter()
            .enumerate()
            .map(|(i, px)| {
                let irradiance = match &self.gamma {
                    Some(gamma) => gamma.apply(px),
                    None => px as f32,
                };
                match &self.vignette {
                    Some(v) => irradiance / v.at(i),
                    None => irradiance,
                }
            })
            .collect();

        Ok(Frame {
            index,
            timestamp: self.timestamp(index),
            exposure: self.exposure(index),
            width: w,
            height: h,
            image,
        })
    }
}

impl FrameSource for ImageFolderReader {
    fn num_images(&self) -> usize {
        self.files.len()
    }

    fn timestamp(&self, index: usize) -> f64 {
        self.timestamps
            .get(index)
            .copied()
            .unwrap_or(index as f64 * DEFAULT_FRAME_INTERVAL_S)
    }

    fn get_image(&self, index: usize) -> Frame {
        match self.cache.get(index) {
            Some(frame) => frame.clone(),
            None => self.load_frame(index),
        }
    }

    fn photometric_gamma(&self) -> Option<&GammaTable> {
        self.gamma.as_ref()
    }

    fn set_global_calibration(&self) -> CameraCalibration {
        let c = self.calibration;
        info!(
            "global calibration: fx={:.2} fy={:.2} cx={:.2} cy={:.2} ({}x{})",
            c.fx, c.fy, c.cx, c.cy, c.width, c.height
        );
        c
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let entries = fs::read_dir(dir).map_err(|source| SourceError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// One `times.txt` line: `id timestamp [exposure_ms]`.
#[derive(Debug, Deserialize)]
struct TimesRow {
    _id: String,
    timestamp: f64,
    exposure: Option<f32>,
}

/// Returns `None` if the file does not exist.
fn load_times(path: &Path) -> Result<Option<(Vec<f64>, Vec<f32>)>, SourceError> {
    if !path.exists() {
        return Ok(None);
    }

    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b' ')
        .flexible(true)
        .comment(Some(b'#'))
        .from_path(path)?;

    let mut timestamps = Vec::new();
    let mut exposures = Vec::new();
    for rec in rdr.records() {
        // Runs of spaces produce empty fields.
        let rec: StringRecord = rec?.iter().filter(|f| !f.trim().is_empty()).collect();
        if rec.is_empty() {
            continue;
        }
        match rec.deserialize::<TimesRow>(None) {
            Ok(row) => {
                timestamps.push(row.timestamp);
                exposures.push(row.exposure.unwrap_or(0.0));
            }
            Err(e) => warn!("skipping timestamp line {:?}: {}", rec, e),
        }
    }
    Ok(Some((timestamps, exposures)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn write_sequence(root: &Path, n: usize, with_times: bool) -> PathBuf {
        let images = root.join("images");
        fs::create_dir_all(&images).unwrap();
        for i in 0..n {
            let img = GrayImage::from_fn(8, 6, |x, _| Luma([(x * 20 + i as u32) as u8]));
            img.save(images.join(format!("{:05}.png", i))).unwrap();
        }
        if with_times {
            let mut text = String::from("# id timestamp exposure\n");
            for i in 0..n {
                text.push_str(&format!("{:05} {} 12.5\n", i, 100.0 + i as f64 * 0.05));
            }
            fs::write(root.join("times.txt"), text).unwrap();
        }
        images
    }

    fn options(source: PathBuf) -> ReaderOptions {
        ReaderOptions {
            source,
            calib: None,
            gamma: None,
            vignette: None,
            rescale: 1.0,
            resolution: None,
            prefetch: false,
        }
    }

    #[test]
    fn test_reads_frames_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let images = write_sequence(dir.path(), 3, true);
        let reader = ImageFolderReader::new(&options(images)).unwrap();

        assert_eq!(reader.num_images(), 3);
        assert!((reader.timestamp(2) - 100.1).abs() < 1e-9);

        let frame = reader.get_image(1);
        assert_eq!((frame.width, frame.height), (8, 6));
        assert_eq!(frame.exposure, 12.5);
        assert_eq!(frame.pixel(2, 0), Some(41.0));
        assert!(reader.photometric_gamma().is_none());
    }

    #[test]
    fn test_missing_times_falls_back_to_fixed_interval() {
        let dir = tempfile::tempdir().unwrap();
        let images = write_sequence(dir.path(), 2, false);
        let reader = ImageFolderReader::new(&options(images)).unwrap();
        assert!((reader.timestamp(1) - DEFAULT_FRAME_INTERVAL_S).abs() < 1e-12);
        assert_eq!(reader.get_image(0).exposure, 0.0);
    }

    #[test]
    fn test_resolution_override_and_prefetch() {
        let dir = tempfile::tempdir().unwrap();
        let images = write_sequence(dir.path(), 2, true);
        let mut opts = options(images);
        opts.resolution = Some((4, 3));
        opts.prefetch = true;
        let reader = ImageFolderReader::new(&opts).unwrap();

        let calib = reader.set_global_calibration();
        assert_eq!((calib.width, calib.height), (4, 3));
        let frame = reader.get_image(0);
        assert_eq!(frame.image.len(), 12);
    }

    #[test]
    fn test_gamma_applied_to_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let images = write_sequence(dir.path(), 1, false);
        let gamma_path = dir.path().join("pcalib.txt");
        let values: Vec<String> = (0..256).map(|i| (i * i).to_string()).collect();
        fs::write(&gamma_path, values.join(" ")).unwrap();

        let mut opts = options(images);
        opts.gamma = Some(gamma_path);
        let reader = ImageFolderReader::new(&opts).unwrap();
        assert!(reader.photometric_gamma().is_some());

        // pixel 20 maps to 255 * 400 / 65025
        let frame = reader.get_image(0);
        let expected = 255.0 * 400.0 / 65025.0;
        assert!((frame.pixel(1, 0).unwrap() - expected).abs() < 1e-3);
    }

    #[test]
    fn test_empty_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ImageFolderReader::new(&options(dir.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, SourceError::NoImages(_)));
    }

    #[test]
    fn test_out_of_range_index_yields_black_frame() {
        let dir = tempfile::tempdir().unwrap();
        let images = write_sequence(dir.path(), 1, false);
        let reader = ImageFolderReader::new(&options(images)).unwrap();
        let frame = reader.get_image(5);
        assert!(frame.image.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_decode_reports_out_of_range_index() {
        let dir = tempfile::tempdir().unwrap();
        let images = write_sequence(dir.path(), 2, false);
        let reader = ImageFolderReader::new(&options(images)).unwrap();
        assert!(matches!(reader.decode(5), Err(SourceError::IndexOutOfRange(5))));
        assert!(reader.decode(1).is_ok());
    }
}
