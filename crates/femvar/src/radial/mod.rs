//! Radial reduction of calibrated patterns.
//!
//! Pixels are mapped through the ellipticity correction, converted to k and
//! binned on an equal-width k grid. The bin assignment depends only on the
//! calibration and pattern geometry, so it is computed once per dataset
//! ([`RadialBinner`], [`PolarBinner`]) and reused for every probe position.
//!
//! Empty bins are reported as NaN in both the 1D and the 2D reductions.

mod polar;
mod profile;

pub use polar::{polar_unwrap, PolarBinner, PolarImage};
pub use profile::{azimuthal_profile, azimuthal_profiles, RadialBinner, RadialProfile};

use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;
use crate::error::{FemError, Result};

/// Radial / azimuthal binning parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadialConfig {
    /// Number of k bins.
    pub npt: usize,
    /// Number of azimuthal sectors in polar reductions.
    pub npt_azim: usize,
    /// `[k_min, k_max]`; the full addressable range when absent.
    pub radial_range: Option<[f64; 2]>,
}

impl Default for RadialConfig {
    fn default() -> Self {
        Self {
            npt: 100,
            npt_azim: 360,
            radial_range: None,
        }
    }
}

/// Equal-width k bins over `[k_min, k_max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct KBins {
    pub k_min: f64,
    pub k_max: f64,
    pub npt: usize,
}

impl KBins {
    /// Validate `radial_range` against what the calibration can address in a
    /// `width × height` pattern.
    pub fn resolve(
        calibration: &Calibration,
        (width, height): (u32, u32),
        npt: usize,
        radial_range: Option<[f64; 2]>,
    ) -> Result<Self> {
        if npt == 0 {
            return Err(FemError::InvalidParameter("npt must be positive".into()));
        }
        calibration.geometry.validate()?;
        let k_limit = calibration.k_max(width, height);

        let [k_min, k_max] = radial_range.unwrap_or([0.0, k_limit]);
        if !(k_min < k_max) {
            return Err(FemError::InvalidParameter(format!(
                "radial range [{}, {}] must satisfy min < max",
                k_min, k_max
            )));
        }
        if k_min < 0.0 || k_max > k_limit {
            return Err(FemError::RadialRangeOutOfBounds {
                min: k_min,
                max: k_max,
                k_max: k_limit,
            });
        }
        Ok(Self { k_min, k_max, npt })
    }

    pub fn width(&self) -> f64 {
        (self.k_max - self.k_min) / self.npt as f64
    }

    /// Bin centers, strictly increasing.
    pub fn centers(&self) -> Vec<f64> {
        let w = self.width();
        (0..self.npt)
            .map(|i| self.k_min + (i as f64 + 0.5) * w)
            .collect()
    }

    pub fn contains(&self, k: f64) -> bool {
        k >= self.k_min && k <= self.k_max
    }
}
