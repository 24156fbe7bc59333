//! Azimuthal averaging into 1D radial profiles.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{KBins, RadialConfig};
use crate::calibration::Calibration;
use crate::error::{FemError, Result};
use crate::pattern::{Mask, Pattern, PatternStack};

/// Azimuthally averaged intensity of one pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadialProfile {
    /// Bin centers, strictly increasing.
    pub k: Vec<f64>,
    /// Mean intensity per bin; NaN where no pixel contributes.
    #[serde(with = "crate::nan_serde")]
    pub intensity: Vec<f64>,
}

impl RadialProfile {
    pub fn len(&self) -> usize {
        self.k.len()
    }

    pub fn is_empty(&self) -> bool {
        self.k.is_empty()
    }
}

/// One pixel's share of a bin.
#[derive(Debug, Clone, Copy)]
struct Share {
    pixel: u32,
    bin: u32,
    weight: f32,
}

/// Precomputed pixel → k-bin assignment for one calibration and geometry.
///
/// Each pixel is split linearly between the two bins whose centers bracket
/// its k, so a pixel straddling a bin boundary contributes to both.
#[derive(Debug, Clone)]
pub struct RadialBinner {
    dims: (u32, u32),
    k: Vec<f64>,
    shares: Vec<Share>,
}

impl RadialBinner {
    pub fn new(
        calibration: &Calibration,
        dims: (u32, u32),
        npt: usize,
        radial_range: Option<[f64; 2]>,
        mask: Option<&Mask>,
    ) -> Result<Self> {
        let bins = KBins::resolve(calibration, dims, npt, radial_range)?;
        let (w, h) = dims;
        let inv_width = 1.0 / bins.width();

        let mut shares = Vec::with_capacity(2 * (w * h) as usize);
        for y in 0..h {
            for x in 0..w {
                if is_masked(mask, x, y) {
                    continue;
                }
                let k = calibration.k_of_pixel([x as f64, y as f64]);
                if !bins.contains(k) {
                    continue;
                }
                let pixel = y * w + x;
                let pos = (k - bins.k_min) * inv_width - 0.5;
                let lower = pos.floor();
                let frac = pos - lower;
                for (bin, weight) in [(lower, 1.0 - frac), (lower + 1.0, frac)] {
                    if bin >= 0.0 && bin < npt as f64 && weight > 0.0 {
                        shares.push(Share {
                            pixel,
                            bin: bin as u32,
                            weight: weight as f32,
                        });
                    }
                }
            }
        }

        Ok(Self {
            dims,
            k: bins.centers(),
            shares,
        })
    }

    pub fn from_config(
        calibration: &Calibration,
        dims: (u32, u32),
        config: &RadialConfig,
        mask: Option<&Mask>,
    ) -> Result<Self> {
        Self::new(calibration, dims, config.npt, config.radial_range, mask)
    }

    pub fn k(&self) -> &[f64] {
        &self.k
    }

    /// Weighted mean intensity per bin. Non-finite pixels are skipped.
    pub fn profile(&self, pattern: &Pattern) -> Result<RadialProfile> {
        check_dims(self.dims, pattern)?;
        let raw = pattern.as_raw();
        let mut sum = vec![0.0f64; self.k.len()];
        let mut norm = vec![0.0f64; self.k.len()];
        for s in &self.shares {
            let v = raw[s.pixel as usize];
            if !v.is_finite() {
                continue;
            }
            let w = s.weight as f64;
            sum[s.bin as usize] += w * v as f64;
            norm[s.bin as usize] += w;
        }
        let intensity = sum
            .iter()
            .zip(&norm)
            .map(|(&s, &n)| if n > 0.0 { s / n } else { f64::NAN })
            .collect();
        Ok(RadialProfile {
            k: self.k.clone(),
            intensity,
        })
    }
}

/// Azimuthal average of one pattern over `npt` k bins.
pub fn azimuthal_profile(
    pattern: &Pattern,
    calibration: &Calibration,
    npt: usize,
    radial_range: Option<[f64; 2]>,
) -> Result<RadialProfile> {
    RadialBinner::new(calibration, pattern.dimensions(), npt, radial_range, None)?.profile(pattern)
}

/// Radial profiles of every pattern in `stack`, in probe order.
///
/// Patterns are reduced in parallel with one shared binner.
pub fn azimuthal_profiles(
    stack: &PatternStack,
    calibration: &Calibration,
    config: &RadialConfig,
    mask: Option<&Mask>,
) -> Result<Vec<RadialProfile>> {
    let Some(dims) = stack.pattern_dimensions() else {
        return Ok(Vec::new());
    };
    let binner = RadialBinner::from_config(calibration, dims, config, mask)?;
    let profiles = stack
        .patterns()
        .par_iter()
        .map(|p| binner.profile(p))
        .collect::<Result<Vec<_>>>()?;
    tracing::info!(
        positions = profiles.len(),
        npt = config.npt,
        "radial profiles computed"
    );
    Ok(profiles)
}

pub(super) fn is_masked(mask: Option<&Mask>, x: u32, y: u32) -> bool {
    mask.is_some_and(|m| x < m.width() && y < m.height() && m.get_pixel(x, y)[0] != 0)
}

pub(super) fn check_dims(expected: (u32, u32), pattern: &Pattern) -> Result<()> {
    if pattern.dimensions() == expected {
        Ok(())
    } else {
        Err(FemError::ShapeMismatch(format!(
            "pattern is {:?}, binner was built for {:?}",
            pattern.dimensions(),
            expected
        )))
    }
}
