//! Ellipse fitting primitives.
//!
//! - Direct least-squares conic fit (Fitzgibbon et al., "Direct Least Square
//!   Fitting of Ellipses", 1999).
//! - Conic ↔ geometric ellipse conversion with major/minor normalization.
//! - RANSAC wrapper scored by Sampson distance.

mod eigen;
mod fit;
mod ransac;
mod types;

pub use fit::{fit_conic_direct, fit_ellipse_direct, rms_sampson_distance};
pub use ransac::{fit_ellipse_ransac, RansacConfig, RansacResult};
pub use types::{ConicCoeffs, ConicError, Ellipse};
