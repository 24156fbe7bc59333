//! Polar unwrapping into a k × azimuth image.

use serde::{Deserialize, Serialize};

use super::profile::{check_dims, is_masked};
use super::KBins;
use crate::calibration::Calibration;
use crate::error::{FemError, Result};
use crate::pattern::{Mask, Pattern};

/// Pattern resampled on a `(k, azimuth)` grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolarImage {
    /// k bin centers, strictly increasing.
    pub k: Vec<f64>,
    /// Sector centers in degrees, covering (−180°, 180°].
    pub azimuth_deg: Vec<f64>,
    /// Row-major `[k_bin][azimuth_bin]`; NaN for cells no pixel falls in.
    #[serde(with = "crate::nan_serde")]
    pub intensity: Vec<f64>,
}

impl PolarImage {
    pub fn npt(&self) -> usize {
        self.k.len()
    }

    pub fn npt_azim(&self) -> usize {
        self.azimuth_deg.len()
    }

    /// Azimuthal cells of k bin `i`.
    pub fn row(&self, i: usize) -> &[f64] {
        let n = self.npt_azim();
        &self.intensity[i * n..(i + 1) * n]
    }

    pub fn rows(&self) -> std::slice::Chunks<'_, f64> {
        self.intensity.chunks(self.npt_azim().max(1))
    }
}

/// Precomputed pixel → polar cell assignment (nearest k bin, one sector).
///
/// Unlike [`RadialBinner`](super::RadialBinner), which splits a pixel linearly
/// between the two bracketing k bins, each pixel here lands in exactly one
/// cell, so pixels near a bin edge are weighted differently by the r / re
/// and Ω estimators.
#[derive(Debug, Clone)]
pub struct PolarBinner {
    dims: (u32, u32),
    k: Vec<f64>,
    azimuth_deg: Vec<f64>,
    /// `(pixel, cell)` pairs.
    cells: Vec<(u32, u32)>,
}

impl PolarBinner {
    pub fn new(
        calibration: &Calibration,
        dims: (u32, u32),
        npt: usize,
        npt_azim: usize,
        radial_range: Option<[f64; 2]>,
        mask: Option<&Mask>,
    ) -> Result<Self> {
        if npt_azim == 0 {
            return Err(FemError::InvalidParameter("npt_azim must be positive".into()));
        }
        let bins = KBins::resolve(calibration, dims, npt, radial_range)?;
        let (w, h) = dims;
        let inv_width = 1.0 / bins.width();
        let sector = 360.0 / npt_azim as f64;

        let mut cells = Vec::with_capacity((w * h) as usize);
        for y in 0..h {
            for x in 0..w {
                if is_masked(mask, x, y) {
                    continue;
                }
                let [dx, dy] = calibration.corrected_offset([x as f64, y as f64]);
                let k = calibration.geometry.k_of_radius(dx.hypot(dy));
                if !bins.contains(k) {
                    continue;
                }
                let kb = (((k - bins.k_min) * inv_width) as usize).min(npt - 1);
                let phi = dy.atan2(dx).to_degrees();
                let ab = (((phi + 180.0) / sector) as usize).min(npt_azim - 1);
                cells.push((y * w + x, (kb * npt_azim + ab) as u32));
            }
        }

        let azimuth_deg = (0..npt_azim)
            .map(|j| -180.0 + (j as f64 + 0.5) * sector)
            .collect();
        Ok(Self {
            dims,
            k: bins.centers(),
            azimuth_deg,
            cells,
        })
    }

    pub fn k(&self) -> &[f64] {
        &self.k
    }

    /// Mean intensity per cell. Non-finite pixels are skipped.
    pub fn polar(&self, pattern: &Pattern) -> Result<PolarImage> {
        check_dims(self.dims, pattern)?;
        let n = self.k.len() * self.azimuth_deg.len();
        let raw = pattern.as_raw();
        let mut sum = vec![0.0f64; n];
        let mut count = vec![0u32; n];
        for &(pixel, cell) in &self.cells {
            let v = raw[pixel as usize];
            if v.is_finite() {
                sum[cell as usize] += v as f64;
                count[cell as usize] += 1;
            }
        }
        let intensity = sum
            .iter()
            .zip(&count)
            .map(|(&s, &c)| if c > 0 { s / c as f64 } else { f64::NAN })
            .collect();
        Ok(PolarImage {
            k: self.k.clone(),
            azimuth_deg: self.azimuth_deg.clone(),
            intensity,
        })
    }
}

/// Polar image of one pattern with `npt` k bins and `npt_azim` sectors.
pub fn polar_unwrap(
    pattern: &Pattern,
    calibration: &Calibration,
    npt: usize,
    npt_azim: usize,
    radial_range: Option<[f64; 2]>,
) -> Result<PolarImage> {
    PolarBinner::new(
        calibration,
        pattern.dimensions(),
        npt,
        npt_azim,
        radial_range,
        None,
    )?
    .polar(pattern)
}
