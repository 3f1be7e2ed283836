//! Geometric and photometric calibration inputs.
//!
//! File formats:
//! - camera file: `[Model] fx fy cx cy [dist...]`, then `in_w in_h`, a crop
//!   line, then `out_w out_h`. Intrinsics below 1 are relative to the input size.
//! - gamma file: 256 whitespace separated values, the inverse camera response
//!   mapping pixel intensity to irradiance.
//! - vignette: a grayscale image, normalised so its maximum is 1.

use std::fs;
use std::path::Path;

use image::imageops::{self, FilterType};
use tracing::{debug, warn};

use super::SourceError;

/// Number of entries in the inverse response table.
pub const GAMMA_TABLE_SIZE: usize = 256;

/// Inverse camera response, normalised to 0..255.
#[derive(Debug, Clone, PartialEq)]
pub struct GammaTable {
    values: Vec<f32>,
}

impl GammaTable {
    /// Build a table from raw values; they must be 256 and strictly increasing.
    pub fn from_values(values: Vec<f32>) -> Result<Self, SourceError> {
        if values.len() != GAMMA_TABLE_SIZE {
            return Err(SourceError::Calibration(format!(
                "gamma table needs {} values, got {}",
                GAMMA_TABLE_SIZE,
                values.len()
            )));
        }
        if values.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SourceError::Calibration(
                "gamma table is not monotonically increasing".to_string(),
            ));
        }

        let min = values[0];
        let max = values[GAMMA_TABLE_SIZE - 1];
        let values = values
            .into_iter()
            .map(|v| 255.0 * (v - min) / (max - min))
            .collect();
        Ok(Self { values })
    }

    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let text = fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let values = text
            .split_whitespace()
            .map(|tok| {
                tok.parse::<f32>().map_err(|_| {
                    SourceError::Calibration(format!("bad gamma value \"{}\" in {}", tok, path.display()))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_values(values)
    }

    /// Irradiance for an 8-bit intensity.
    #[inline]
    pub fn apply(&self, intensity: u8) -> f32 {
        self.values[intensity as usize]
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Irradiance range outside of which pixels are treated as saturated.
    pub fn saturation_bounds(&self) -> (f32, f32) {
        (self.values[2], self.values[GAMMA_TABLE_SIZE - 3])
    }
}

/// Per-pixel attenuation at the output resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Vignette {
    pub width: u32,
    pub height: u32,
    attenuation: Vec<f32>,
}

impl Vignette {
    /// Load and resample to the output resolution.
    pub fn load(path: &Path, width: u32, height: u32) -> Result<Self, SourceError> {
        let img = image::open(path).map_err(|source| SourceError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        let mut luma = img.to_luma16();
        if luma.dimensions() != (width, height) {
            luma = imageops::resize(&luma, width, height, FilterType::Triangle);
        }
        Self::from_raw(
            width,
            height,
            luma.into_raw().into_iter().map(f32::from).collect(),
        )
    }

    pub fn from_raw(width: u32, height: u32, raw: Vec<f32>) -> Result<Self, SourceError> {
        let max = raw.iter().copied().fold(0.0f32, f32::max);
        if max <= 0.0 || raw.len() != width as usize * height as usize {
            return Err(SourceError::Calibration("vignette image is empty".to_string()));
        }
        let attenuation = raw.into_iter().map(|v| (v / max).max(1e-3)).collect();
        Ok(Self {
            width,
            height,
            attenuation,
        })
    }

    #[inline]
    pub fn at(&self, i: usize) -> f32 {
        self.attenuation[i]
    }
}

/// Pinhole intrinsics at the output resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraCalibration {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
}

impl CameraCalibration {
    /// Default intrinsics for a given image size (90 degree horizontal FOV).
    pub fn from_image_size(width: u32, height: u32) -> Self {
        let f = width as f64 / 2.0;
        Self {
            fx: f,
            fy: f,
            cx: width as f64 / 2.0 - 0.5,
            cy: height as f64 / 2.0 - 0.5,
            width,
            height,
        }
    }

    /// Parse a camera file. Lens distortion parameters are read and ignored.
    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let text = fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, SourceError> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        let bad = |what: &str| SourceError::Calibration(format!("camera file: {}", what));

        let intrinsics_line = lines.next().ok_or_else(|| bad("missing intrinsics"))?;
        let mut tokens = intrinsics_line.split_whitespace().peekable();
        if let Some(model) = tokens.peek().filter(|t| t.parse::<f64>().is_err()) {
            debug!("camera model {}", model);
            tokens.next();
        }
        let params: Vec<f64> = tokens
            .map(|t| t.parse::<f64>().map_err(|_| bad("bad intrinsic value")))
            .collect::<Result<_, _>>()?;
        if params.len() < 4 {
            return Err(bad("expected fx fy cx cy"));
        }

        let (in_w, in_h) = parse_size(lines.next().ok_or_else(|| bad("missing input size"))?)
            .ok_or_else(|| bad("bad input size"))?;
        let _crop = lines.next();
        let (out_w, out_h) = match lines.next() {
            Some(line) => parse_size(line).ok_or_else(|| bad("bad output size"))?,
            None => (in_w, in_h),
        };

        let (mut fx, mut fy, mut cx, mut cy) = (params[0], params[1], params[2], params[3]);
        if cx < 1.0 && cy < 1.0 {
            // relative intrinsics
            fx *= in_w as f64;
            fy *= in_h as f64;
            cx = cx * in_w as f64 - 0.5;
            cy = cy * in_h as f64 - 0.5;
        }

        let input = Self {
            fx,
            fy,
            cx,
            cy,
            width: in_w,
            height: in_h,
        };
        Ok(input.resized(out_w, out_h))
    }

    /// Scale intrinsics to another resolution.
    pub fn resized(&self, width: u32, height: u32) -> Self {
        if width == 0 || height == 0 {
            warn!("ignoring resize to {}x{}", width, height);
            return *self;
        }
        let sx = width as f64 / self.width as f64;
        let sy = height as f64 / self.height as f64;
        Self {
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: (self.cx + 0.5) * sx - 0.5,
            cy: (self.cy + 0.5) * sy - 0.5,
            width,
            height,
        }
    }

    pub fn rescaled(&self, factor: f64) -> Self {
        let w = (self.width as f64 * factor).round() as u32;
        let h = (self.height as f64 * factor).round() as u32;
        self.resized(w, h)
    }
}

fn parse_size(line: &str) -> Option<(u32, u32)> {
    let mut it = line.split_whitespace().map(|t| t.parse::<u32>().ok());
    match (it.next()??, it.next()??) {
        (w, h) if w > 0 && h > 0 => Some((w, h)),
        _ => None,
    }
}
