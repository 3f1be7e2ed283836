//! Checks run before the frame loop starts.

use thiserror::Error;

use crate::config::PhotometricMode;
use crate::io::GammaTable;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreflightError {
    #[error("don't have photometric calibration; use mode=1 or mode=2")]
    MissingGamma,
}

/// Fails when the mode demands a gamma table the source does not have.
pub fn check_photometric_calibration(
    mode: PhotometricMode,
    gamma: Option<&GammaTable>,
) -> Result<(), PreflightError> {
    if mode.requires_gamma() && gamma.is_none() {
        return Err(PreflightError::MissingGamma);
    }
    Ok(())
}
