//! Run configuration: command-line parsing and settings presets.

pub mod args;
pub mod preset;

pub use args::{AffineMode, ConfigError, PhotometricMode, RunConfig};
pub use preset::{Preset, PresetSettings};
