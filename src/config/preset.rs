//! Preset table: one selector mapped to a fully specified settings record.

use std::fmt;

/// Named settings presets selectable with `preset=<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// `preset=0`: original resolution, 2000 active points.
    Default,
    /// `preset=2`: 424x320, 800 active points.
    Fast,
}

impl Preset {
    /// Look up a preset by its command-line number.
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(Self::Default),
            2 => Some(Self::Fast),
            _ => None,
        }
    }

    /// The settings record this preset applies.
    pub fn settings(self) -> PresetSettings {
        match self {
            Self::Default => PresetSettings {
                desired_immature_density: 1500,
                desired_point_density: 2000,
                min_frames: 5,
                max_frames: 7,
                min_opt_iterations: 1,
                max_opt_iterations: 6,
                benchmark_resolution: None,
                log_to_file: false,
            },
            Self::Fast => PresetSettings {
                desired_immature_density: 600,
                desired_point_density: 800,
                min_frames: 4,
                max_frames: 6,
                min_opt_iterations: 1,
                max_opt_iterations: 4,
                benchmark_resolution: Some((424, 320)),
                log_to_file: false,
            },
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "DEFAULT"),
            Self::Fast => write!(f, "FAST"),
        }
    }
}

/// Density, window and iteration settings consumed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresetSettings {
    /// Candidate points kept per frame before selection.
    pub desired_immature_density: usize,
    /// Active points used for alignment.
    pub desired_point_density: usize,
    /// Minimum number of frames kept in the active window.
    pub min_frames: usize,
    /// Maximum number of frames kept in the active window.
    pub max_frames: usize,
    pub min_opt_iterations: usize,
    pub max_opt_iterations: usize,
    /// Forced output resolution (width, height), if any.
    pub benchmark_resolution: Option<(u32, u32)>,
    /// Whether the run log is also written to a file.
    pub log_to_file: bool,
}

impl Default for PresetSettings {
    /// Settings in effect when no `preset=` token is given.
    fn default() -> Self {
        Self {
            log_to_file: true,
            ..Preset::Default.settings()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_lookup() {
        assert_eq!(Preset::from_id(0), Some(Preset::Default));
        assert_eq!(Preset::from_id(2), Some(Preset::Fast));
        assert_eq!(Preset::from_id(1), None);
    }

    #[test]
    fn test_fast_preset_forces_resolution() {
        let fast = Preset::Fast.settings();
        assert_eq!(fast.benchmark_resolution, Some((424, 320)));
        assert_eq!(fast.desired_point_density, 800);
        assert_eq!(fast.max_opt_iterations, 4);
        assert!(!fast.log_to_file);
    }

    #[test]
    fn test_unset_preset_keeps_file_logging() {
        let settings = PresetSettings::default();
        assert!(settings.log_to_file);
        assert_eq!(settings.desired_point_density, 2000);
        assert_eq!(settings.benchmark_resolution, None);
    }
}
