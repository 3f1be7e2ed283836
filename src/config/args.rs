//! `key=value` argument parsing into an immutable [`RunConfig`].
//!
//! Tokens are applied in order; the last occurrence of a key wins. Tokens that
//! cannot be parsed are collected as [`ConfigError`]s and the rest of the
//! configuration is still built.

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

use super::preset::{Preset, PresetSettings};

/// Default location of the result trajectory.
pub const DEFAULT_RESULT_PATH: &str = "result.txt";

/// Directory recreated on each run when `save=1`.
pub const IMAGE_DUMP_DIR: &str = "images_out";

/// A command-line token that was not applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("could not parse argument \"{0}\"")]
    Unrecognized(String),

    #[error("invalid value \"{value}\" for `{key}`")]
    InvalidValue { key: String, value: String },

    #[error("unknown preset {0}")]
    UnknownPreset(i32),
}

/// How brightness parameters are handled during alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffineMode {
    /// Parameter stays at its neutral value.
    Fixed,
    /// Parameter is estimated per frame.
    Optimize,
}

/// Photometric handling selected with `mode=<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhotometricMode {
    /// `mode=0`: photometric calibration is required.
    #[default]
    WithCalibration,
    /// `mode=1`: no calibration, brightness changes are estimated.
    WithoutCalibration,
    /// `mode=2`: images are assumed photometrically perfect.
    PerfectImages,
}

impl PhotometricMode {
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(Self::WithCalibration),
            1 => Some(Self::WithoutCalibration),
            2 => Some(Self::PerfectImages),
            _ => None,
        }
    }

    /// Whether the frame source must provide a gamma table.
    pub fn requires_gamma(self) -> bool {
        matches!(self, Self::WithCalibration)
    }

    /// Handling of the multiplicative (a) and additive (b) brightness terms.
    pub fn affine_modes(self) -> (AffineMode, AffineMode) {
        match self {
            Self::WithCalibration | Self::WithoutCalibration => {
                (AffineMode::Optimize, AffineMode::Optimize)
            }
            Self::PerfectImages => (AffineMode::Fixed, AffineMode::Fixed),
        }
    }

    /// Extra gradient added to the point-selection threshold.
    pub fn min_gradient_add(self) -> f32 {
        match self {
            Self::PerfectImages => 3.0,
            _ => 7.0,
        }
    }
}

/// Immutable run configuration built once from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Image folder.
    pub source: Option<PathBuf>,
    /// Geometric camera calibration file.
    pub calib: Option<PathBuf>,
    pub vignette: Option<PathBuf>,
    /// Inverse response (gamma) file.
    pub gamma: Option<PathBuf>,
    pub rescale: f64,

    /// First frame index (inclusive).
    pub start: usize,
    /// Last frame index (exclusive); clamped to the frame count at run time.
    pub end: usize,

    pub prefetch: bool,
    pub sample_output: bool,
    pub quiet: bool,
    pub display: bool,
    pub multi_threading: bool,
    pub save_images: bool,
    pub reconfigure: bool,
    pub ros: bool,
    /// Cleared by `nolog=1`.
    pub log_enabled: bool,

    pub preset: Option<Preset>,
    pub settings: PresetSettings,
    pub mode: PhotometricMode,

    pub result_path: PathBuf,
    pub image_dump_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            source: None,
            calib: None,
            vignette: None,
            gamma: None,
            rescale: 1.0,
            start: 0,
            end: 100_000,
            prefetch: false,
            sample_output: false,
            quiet: false,
            display: true,
            multi_threading: true,
            save_images: false,
            reconfigure: true,
            ros: true,
            log_enabled: true,
            preset: None,
            settings: PresetSettings::default(),
            mode: PhotometricMode::default(),
            result_path: PathBuf::from(DEFAULT_RESULT_PATH),
            image_dump_dir: PathBuf::from(IMAGE_DUMP_DIR),
        }
    }
}

impl RunConfig {
    /// Build a configuration from `key=value` tokens.
    ///
    /// Returns the configuration together with every token that could not be
    /// applied; those are non-fatal and the caller is expected to log them.
    pub fn from_args<I, S>(args: I) -> (Self, Vec<ConfigError>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default();
        let errors = args
            .into_iter()
            .filter_map(|arg| config.apply(arg.as_ref()).err())
            .collect();
        (config, errors)
    }

    /// Whether the log file layer should be installed.
    pub fn log_to_file(&self) -> bool {
        self.log_enabled && self.settings.log_to_file
    }

    fn apply(&mut self, arg: &str) -> Result<(), ConfigError> {
        let Some((key, value)) = arg.split_once('=') else {
            return Err(ConfigError::Unrecognized(arg.to_string()));
        };

        match key {
            "sampleoutput" => self.sample_output |= parse_flag(key, value)?,
            "quiet" => self.quiet |= parse_flag(key, value)?,
            "preset" => {
                let id = parse_int(key, value)?;
                let preset = Preset::from_id(id).ok_or(ConfigError::UnknownPreset(id))?;
                self.preset = Some(preset);
                self.settings = preset.settings();
            }
            "rec" => {
                if parse_int(key, value)? == 0 {
                    self.reconfigure = false;
                }
            }
            "noros" => {
                if parse_flag(key, value)? {
                    self.ros = false;
                    self.reconfigure = false;
                }
            }
            "nolog" => {
                if parse_flag(key, value)? {
                    self.log_enabled = false;
                }
            }
            "nogui" => {
                if parse_flag(key, value)? {
                    self.display = false;
                }
            }
            "nomt" => {
                if parse_flag(key, value)? {
                    self.multi_threading = false;
                }
            }
            "prefetch" => self.prefetch |= parse_flag(key, value)?,
            "start" => self.start = parse_index(key, value)?,
            "end" => self.end = parse_index(key, value)?,
            "files" => self.source = Some(parse_path(key, value)?),
            "calib" => self.calib = Some(parse_path(key, value)?),
            "vignette" => self.vignette = Some(parse_path(key, value)?),
            "gamma" => self.gamma = Some(parse_path(key, value)?),
            "rescale" => {
                self.rescale = value
                    .parse::<f64>()
                    .ok()
                    .filter(|s| s.is_finite() && *s > 0.0)
                    .ok_or_else(|| invalid(key, value))?;
            }
            "save" => self.save_images |= parse_flag(key, value)?,
            "mode" => {
                let id = parse_int(key, value)?;
                self.mode = PhotometricMode::from_id(id).ok_or_else(|| invalid(key, value))?;
            }
            _ => return Err(ConfigError::Unrecognized(arg.to_string())),
        }
        Ok(())
    }

    /// Log the effective configuration once logging is up.
    pub fn log_summary(&self) {
        if let Some(preset) = self.preset {
            let s = &self.settings;
            info!(
                "{} settings: {} active points, {}-{} active frames, {}-{} LM iterations, {}",
                preset,
                s.desired_point_density,
                s.min_frames,
                s.max_frames,
                s.min_opt_iterations,
                s.max_opt_iterations,
                match s.benchmark_resolution {
                    Some((w, h)) => format!("{} x {} image resolution", w, h),
                    None => "original image resolution".to_string(),
                }
            );
        }
        match self.mode {
            PhotometricMode::WithCalibration => info!("PHOTOMETRIC MODE WITH CALIBRATION"),
            PhotometricMode::WithoutCalibration => info!("PHOTOMETRIC MODE WITHOUT CALIBRATION"),
            PhotometricMode::PerfectImages => info!("PHOTOMETRIC MODE WITH PERFECT IMAGES"),
        }
        if let Some(source) = &self.source {
            info!("loading data from {}", source.display());
        }
        if let Some(calib) = &self.calib {
            info!("loading calibration from {}", calib.display());
        }
        if let Some(vignette) = &self.vignette {
            info!("loading vignette from {}", vignette.display());
        }
        if let Some(gamma) = &self.gamma {
            info!("loading gammaCalib from {}", gamma.display());
        }
        if self.rescale != 1.0 {
            info!("rescale {}", self.rescale);
        }
        if self.start != 0 {
            info!("start at {}", self.start);
        }
        if self.end != Self::default().end {
            info!("end at {}", self.end);
        }
        if self.sample_output {
            info!("using sample output sink");
        }
        if self.prefetch {
            info!("prefetch enabled");
        }
        if !self.ros {
            info!("ROS disabled (and reconfigure)");
        } else if !self.reconfigure {
            info!("reconfigure disabled");
        }
        if !self.log_enabled {
            info!("file logging disabled");
        }
        if !self.display {
            info!("no GUI");
        }
        if !self.multi_threading {
            info!("no multithreading");
        }
        if self.save_images {
            info!("saving images to {}", self.image_dump_dir.display());
        }
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_int(key: &str, value: &str) -> Result<i32, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn parse_index(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

/// Only `1` switches a flag on; any other integer leaves it untouched.
fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    Ok(parse_int(key, value)? == 1)
}

fn parse_path(key: &str, value: &str) -> Result<PathBuf, ConfigError> {
    if value.is_empty() {
        return Err(invalid(key, value));
    }
    Ok(PathBuf::from(value))
}
