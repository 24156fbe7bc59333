//! Error type shared by every pipeline stage.

use thiserror::Error;

/// Errors reported by the calibration, reduction, and variance stages.
///
/// An undefined variance at a k-bin is not an error: it is reported as NaN
/// in the output curve.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FemError {
    /// The ellipse fit could not find a stable model from the selected pixels.
    ///
    /// Recoverable by the caller: fall back to an uncorrected calibration or
    /// retry with a different mask / point count.
    #[error("ellipse fit did not converge from {points} points (need {min_inliers} inliers)")]
    EllipseFitNotConverged {
        /// Number of pixel coordinates handed to the fitter.
        points: usize,
        /// Minimum inlier count the fit had to reach.
        min_inliers: usize,
    },

    /// Requested k range lies outside what the calibration can address.
    #[error("radial range [{min}, {max}] is outside the addressable range [0, {k_max}]")]
    RadialRangeOutOfBounds {
        /// Requested lower bound.
        min: f64,
        /// Requested upper bound.
        max: f64,
        /// Largest k reachable inside the pattern.
        k_max: f64,
    },

    /// Members of an ensemble do not share the same geometry or k binning.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A scalar parameter is outside its valid domain.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result alias for femvar operations.
pub type Result<T> = std::result::Result<T, FemError>;
