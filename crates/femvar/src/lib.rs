//! femvar — fluctuation electron microscopy variance from 4D-STEM data.
//!
//! A 4D-STEM dataset is a grid of diffraction patterns, one per probe
//! position. The pipeline stages are:
//!
//! 1. **Center** – fit an ellipse through the brightest pixels of the summed
//!    pattern; derive the pattern center and the affine correction that makes
//!    the diffraction rings circular.
//! 2. **Radial** – map every pixel to the scattering-vector magnitude k and
//!    reduce each pattern to an azimuthal average or a k × azimuth polar image.
//! 3. **Variance** – normalized variance across probe positions with the
//!    shot-noise term removed (Ω, r and re estimators), plus ensemble averaging
//!    over independent datasets.
//! 4. **Thickness** – optional partition of probe positions into
//!    thickness-homogeneous subsets before step 3.
//!
//! # Public API
//! - [`estimate_center_and_affine`] and [`Calibration`] for step 1
//! - [`azimuthal_profile`], [`polar_unwrap`] and their precomputed binners for step 2
//! - [`compute_variance`], [`VarianceAccumulator`] and [`average_curves`] for step 3
//! - [`ThicknessMap`] and [`partition_by_thickness`] for step 4

mod affine;
mod calibration;
mod center;
pub mod conic;
mod config;
mod error;
mod nan_serde;
mod pattern;
mod radial;
mod thickness;
mod variance;

#[cfg(test)]
mod test_utils;

pub use affine::AffineCorrection;
pub use calibration::{electron_wavelength_m, Calibration, DetectorGeometry, KUnit};
pub use center::{
    estimate_center_and_affine, estimate_center_or_default, select_brightest, CenterConfig,
    CenterEstimate,
};
pub use conic::{Ellipse, RansacConfig};
pub use config::FemConfig;
pub use error::{FemError, Result};
pub use pattern::{sum_patterns, Mask, Pattern, PatternStack};
pub use radial::{
    azimuthal_profile, azimuthal_profiles, polar_unwrap, PolarBinner, PolarImage, RadialBinner,
    RadialConfig, RadialProfile,
};
pub use thickness::{partition_by_thickness, ThicknessBin, ThicknessMap};
pub use variance::{
    average_curves, compute_variance, compute_variance_masked, variance_from_polar,
    variance_from_profiles, AveragedCurve, VarianceAccumulator, VarianceConfig, VarianceCurve,
    VarianceMethod,
};
