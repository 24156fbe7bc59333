//! Noise-corrected variance of diffracted intensity over probe positions.
//!
//! Three estimators are provided, all with the same shot-noise correction
//! `gain / mean` subtracted from a normalized variance:
//!
//! - [`VarianceMethod::Omega`]: variance of the azimuthal averages across
//!   positions.
//! - [`VarianceMethod::R`]: variance of every polar cell, pooling positions
//!   and azimuths into one population.
//! - [`VarianceMethod::Re`]: normalized variance around each ring of one
//!   pattern, then averaged over positions.
//!
//! A bin whose mean is zero, or that received no samples, is NaN. NaN is a
//! value, not an error; it propagates into ensemble averages.

mod accumulator;
mod ensemble;

pub use accumulator::VarianceAccumulator;
pub use ensemble::{average_curves, AveragedCurve};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;
use crate::error::{FemError, Result};
use crate::pattern::{Mask, PatternStack};
use crate::radial::{PolarBinner, PolarImage, RadialBinner, RadialConfig, RadialProfile};

/// Variance estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarianceMethod {
    #[default]
    Omega,
    R,
    Re,
}

impl fmt::Display for VarianceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Omega => "omega",
            Self::R => "r",
            Self::Re => "re",
        })
    }
}

/// Parameters of [`compute_variance`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VarianceConfig {
    /// Detector counts per electron.
    pub gain: f64,
    pub method: VarianceMethod,
    pub radial: RadialConfig,
}

impl Default for VarianceConfig {
    fn default() -> Self {
        Self {
            gain: 1.0,
            method: VarianceMethod::Omega,
            radial: RadialConfig::default(),
        }
    }
}

/// Variance as a function of k.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceCurve {
    pub k: Vec<f64>,
    /// One value per k bin; NaN where undefined (`null` in JSON).
    #[serde(with = "crate::nan_serde")]
    pub variance: Vec<f64>,
    pub method: VarianceMethod,
    pub gain: f64,
    /// Probe positions that entered the statistic.
    pub n_positions: usize,
}

pub(crate) fn validate_gain(gain: f64) -> Result<()> {
    if gain.is_finite() && gain > 0.0 {
        Ok(())
    } else {
        Err(FemError::InvalidParameter(format!(
            "gain must be positive and finite, got {}",
            gain
        )))
    }
}

/// Variance of a pattern stack, reducing one pattern at a time.
///
/// Only per-bin moments are kept, so memory does not grow with the scan.
pub fn compute_variance(
    stack: &PatternStack,
    calibration: &Calibration,
    config: &VarianceConfig,
) -> Result<VarianceCurve> {
    compute_variance_masked(stack, calibration, config, None)
}

/// [`compute_variance`] with pixels excluded by `mask`.
pub fn compute_variance_masked(
    stack: &PatternStack,
    calibration: &Calibration,
    config: &VarianceConfig,
    mask: Option<&Mask>,
) -> Result<VarianceCurve> {
    validate_gain(config.gain)?;
    let Some(dims) = stack.pattern_dimensions() else {
        return Err(FemError::InvalidParameter(
            "variance over an empty pattern stack".into(),
        ));
    };
    let radial = &config.radial;

    let curve = match config.method {
        VarianceMethod::Omega => {
            let binner = RadialBinner::from_config(calibration, dims, radial, mask)?;
            let mut acc = VarianceAccumulator::new(binner.k().to_vec(), config.method, config.gain)?;
            for pattern in stack.iter() {
                acc.push_profile(&binner.profile(pattern)?)?;
            }
            acc.finish()?
        }
        VarianceMethod::R | VarianceMethod::Re => {
            let binner = PolarBinner::new(
                calibration,
                dims,
                radial.npt,
                radial.npt_azim,
                radial.radial_range,
                mask,
            )?;
            let mut acc = VarianceAccumulator::new(binner.k().to_vec(), config.method, config.gain)?;
            for pattern in stack.iter() {
                acc.push_polar(&binner.polar(pattern)?)?;
            }
            acc.finish()?
        }
    };

    let undefined = curve.variance.iter().filter(|v| v.is_nan()).count();
    tracing::info!(
        method = %curve.method,
        positions = curve.n_positions,
        bins = curve.k.len(),
        undefined,
        "variance computed"
    );
    Ok(curve)
}

/// Ω variance of precomputed radial profiles.
pub fn variance_from_profiles(profiles: &[RadialProfile], gain: f64) -> Result<VarianceCurve> {
    validate_gain(gain)?;
    let first = profiles.first().ok_or_else(|| {
        FemError::InvalidParameter("variance over an empty set of profiles".into())
    })?;
    let mut acc = VarianceAccumulator::new(first.k.clone(), VarianceMethod::Omega, gain)?;
    for p in profiles {
        acc.push_profile(p)?;
    }
    acc.finish()
}

/// r or re variance of precomputed polar images.
pub fn variance_from_polar(
    images: &[PolarImage],
    gain: f64,
    method: VarianceMethod,
) -> Result<VarianceCurve> {
    validate_gain(gain)?;
    let first = images.first().ok_or_else(|| {
        FemError::InvalidParameter("variance over an empty set of polar images".into())
    })?;
    let mut acc = VarianceAccumulator::new(first.k.clone(), method, gain)?;
    for img in images {
        acc.push_polar(img)?;
    }
    acc.finish()
}
