//! Pattern center and ellipticity from the brightest pixels of an image.
//!
//! The calibration image is usually the sum of every pattern in the dataset,
//! where the amorphous halo is the dominant bright feature. Its top-N pixels
//! form a noisy elliptical annulus; a RANSAC ellipse fit through them gives
//! the center and the correction that makes the rings circular.

use serde::{Deserialize, Serialize};

use crate::affine::AffineCorrection;
use crate::conic::{fit_ellipse_ransac, Ellipse, RansacConfig};
use crate::error::{FemError, Result};
use crate::pattern::{Mask, Pattern};

/// Center estimation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CenterConfig {
    /// Number of brightest unmasked pixels handed to the fit.
    pub num_points: usize,
    pub ransac: RansacConfig,
}

impl Default for CenterConfig {
    fn default() -> Self {
        Self {
            num_points: 1000,
            ransac: RansacConfig::default(),
        }
    }
}

/// Converged center / ellipse fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CenterEstimate {
    /// Normalized ellipse (`a >= b`).
    pub ellipse: Ellipse,
    /// Maps the ellipse onto a circle of radius `ellipse.b`.
    pub affine: AffineCorrection,
    /// Pixels used for the fit.
    pub num_points: usize,
    /// Inliers of the final model.
    pub num_inliers: usize,
    /// RMS Sampson distance of the inliers, in pixels.
    pub rms_sampson_px: f64,
}

impl CenterEstimate {
    /// `[x, y]` center in pixels.
    pub fn center(&self) -> [f64; 2] {
        self.ellipse.center()
    }

    /// Geometric image center with no correction; used when the fit fails.
    pub fn geometric(width: u32, height: u32) -> Self {
        let cx = (width as f64 - 1.0) * 0.5;
        let cy = (height as f64 - 1.0) * 0.5;
        Self {
            ellipse: Ellipse::circle(cx, cy, cx.min(cy).max(1.0)),
            affine: AffineCorrection::identity(),
            num_points: 0,
            num_inliers: 0,
            rms_sampson_px: 0.0,
        }
    }
}

/// `[x, y]` positions of the `num_points` brightest unmasked pixels.
///
/// Masked pixels never qualify. If fewer unmasked pixels exist, all of them
/// are returned. Ties follow the stable sort order and carry no meaning.
pub fn select_brightest(image: &Pattern, mask: Option<&Mask>, num_points: usize) -> Vec<[f64; 2]> {
    let width = image.width() as usize;
    let excluded = |i: usize| mask.is_some_and(|m| m.as_raw().get(i).is_some_and(|&v| v != 0));

    let mut candidates: Vec<(usize, f32)> = image
        .as_raw()
        .iter()
        .copied()
        .enumerate()
        .filter(|&(i, v)| !excluded(i) && v.is_finite())
        .collect();
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    candidates.truncate(num_points);

    candidates
        .into_iter()
        .map(|(i, _)| [(i % width) as f64, (i / width) as f64])
        .collect()
}

/// Fit the pattern center and ellipticity correction.
///
/// Only a non-converging fit is an error; the caller decides on a fallback
/// (see [`estimate_center_or_default`]).
pub fn estimate_center_and_affine(
    image: &Pattern,
    mask: Option<&Mask>,
    config: &CenterConfig,
) -> Result<CenterEstimate> {
    if let Some(m) = mask {
        if m.dimensions() != image.dimensions() {
            tracing::warn!(
                mask = ?m.dimensions(),
                image = ?image.dimensions(),
                "mask geometry differs from image; pixels outside the mask are unmasked"
            );
        }
    }

    let points = select_brightest(image, mask, config.num_points);
    if points.len() < config.num_points {
        tracing::warn!(
            requested = config.num_points,
            available = points.len(),
            "fewer unmasked pixels than requested; using all of them"
        );
    }

    let fit = fit_ellipse_ransac(&points, &config.ransac).map_err(|e| {
        tracing::debug!(error = %e, "ellipse fit failed");
        FemError::EllipseFitNotConverged {
            points: points.len(),
            min_inliers: config.ransac.min_inliers,
        }
    })?;

    let ellipse = fit.ellipse.normalized();
    tracing::debug!(
        cx = ellipse.cx,
        cy = ellipse.cy,
        a = ellipse.a,
        b = ellipse.b,
        angle = ellipse.angle,
        inliers = fit.num_inliers,
        points = points.len(),
        rms_px = fit.rms_residual,
        "center fit"
    );

    Ok(CenterEstimate {
        ellipse,
        affine: AffineCorrection::from_ellipse(&ellipse),
        num_points: points.len(),
        num_inliers: fit.num_inliers,
        rms_sampson_px: fit.rms_residual,
    })
}

/// [`estimate_center_and_affine`], falling back to the uncorrected geometric
/// center when the fit does not converge.
pub fn estimate_center_or_default(
    image: &Pattern,
    mask: Option<&Mask>,
    config: &CenterConfig,
) -> CenterEstimate {
    match estimate_center_and_affine(image, mask, config) {
        Ok(est) => est,
        Err(e) => {
            tracing::warn!("{}; falling back to the geometric image center", e);
            CenterEstimate::geometric(image.width(), image.height())
        }
    }
}
