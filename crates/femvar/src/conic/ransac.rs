//! Outlier-robust ellipse fitting by random sample consensus.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::fit::{fit_conic_direct, rms_sampson_distance, MIN_SAMPLE};
use super::types::{sampson_distance, ConicError, Ellipse};

/// RANSAC tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacConfig {
    /// Maximum number of minimal samples drawn.
    pub max_iters: usize,
    /// Sampson distance (pixels) under which a point counts as an inlier.
    pub inlier_threshold: f64,
    /// Smallest inlier set accepted as a converged fit.
    pub min_inliers: usize,
    /// Stop sampling once this fraction of points are inliers.
    pub early_exit_ratio: f64,
    /// RNG seed; fixed so repeated calibrations agree.
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iters: 1000,
            inlier_threshold: 1.5,
            min_inliers: 50,
            early_exit_ratio: 0.9,
            seed: 42,
        }
    }
}

/// Consensus model refit on its inliers.
#[derive(Debug, Clone)]
pub struct RansacResult {
    /// Normalized ellipse (`a >= b`).
    pub ellipse: Ellipse,
    /// Inliers of the final model.
    pub num_inliers: usize,
    /// RMS Sampson distance over the final inliers, in pixels.
    pub rms_residual: f64,
}

impl RansacResult {
    pub fn inlier_ratio(&self, total: usize) -> f64 {
        self.num_inliers as f64 / total.max(1) as f64
    }
}

/// Fit an ellipse to `points` with RANSAC over six-point direct fits.
///
/// The best consensus set is refit with the direct method; if that refit
/// degenerates, the best minimal-sample model is kept.
pub fn fit_ellipse_ransac(
    points: &[[f64; 2]],
    config: &RansacConfig,
) -> Result<RansacResult, ConicError> {
    let n = points.len();
    if n < MIN_SAMPLE {
        return Err(ConicError::TooFewPoints {
            needed: MIN_SAMPLE,
            got: n,
        });
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut pool: Vec<usize> = (0..n).collect();
    let mut sample = Vec::with_capacity(MIN_SAMPLE);
    let mut best: Option<(Ellipse, Vec<bool>)> = None;
    let mut best_count = 0usize;

    for _ in 0..config.max_iters {
        draw_sample(&mut rng, &mut pool, points, &mut sample);
        let Some(conic) = fit_conic_direct(&sample) else {
            continue;
        };
        let Some(ellipse) = conic.to_ellipse() else {
            continue;
        };

        let mask: Vec<bool> = points
            .iter()
            .map(|&[x, y]| sampson_distance(&conic, x, y) < config.inlier_threshold)
            .collect();
        let count = mask.iter().filter(|&&m| m).count();
        if count > best_count {
            best_count = count;
            best = Some((ellipse, mask));
            if count as f64 >= config.early_exit_ratio * n as f64 {
                break;
            }
        }
    }

    let Some((sample_model, mask)) = best.filter(|_| best_count >= config.min_inliers) else {
        return Err(ConicError::InsufficientInliers {
            needed: config.min_inliers,
            found: best_count,
        });
    };

    let inliers: Vec<[f64; 2]> = points
        .iter()
        .zip(&mask)
        .filter_map(|(&p, &m)| m.then_some(p))
        .collect();
    let ellipse = fit_conic_direct(&inliers)
        .and_then(|c| c.to_ellipse())
        .unwrap_or(sample_model);

    let conic = ellipse.to_conic();
    let final_inliers: Vec<[f64; 2]> = points
        .iter()
        .copied()
        .filter(|&[x, y]| sampson_distance(&conic, x, y) < config.inlier_threshold)
        .collect();

    Ok(RansacResult {
        ellipse,
        num_inliers: final_inliers.len(),
        rms_residual: rms_sampson_distance(&ellipse, &final_inliers),
    })
}

/// Partial Fisher–Yates shuffle of `pool`; the first six entries become the sample.
fn draw_sample(
    rng: &mut StdRng,
    pool: &mut [usize],
    points: &[[f64; 2]],
    sample: &mut Vec<[f64; 2]>,
) {
    sample.clear();
    for i in 0..MIN_SAMPLE {
        let j = rng.gen_range(i..pool.len());
        pool.swap(i, j);
        sample.push(points[pool[i]]);
    }
}
