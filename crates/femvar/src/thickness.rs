//! Probe-position partitioning by local sample thickness.
//!
//! Thickness is estimated linearly from the HAADF signal of each probe
//! position. Positions are then split into thickness bins so that variance
//! is computed over thickness-homogeneous subsets.

use serde::{Deserialize, Serialize};

use crate::error::{FemError, Result};
use crate::pattern::{Pattern, PatternStack};

/// Thickness of every probe position, row-major over the scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThicknessMap {
    pub scan_shape: [usize; 2],
    pub values: Vec<f64>,
}

impl ThicknessMap {
    /// `t = slope · counts + intercept` for each HAADF sample.
    pub fn from_haadf(
        haadf: &[f64],
        scan_shape: [usize; 2],
        slope: f64,
        intercept: f64,
    ) -> Result<Self> {
        let [rows, cols] = scan_shape;
        if haadf.len() != rows * cols {
            return Err(FemError::ShapeMismatch(format!(
                "HAADF has {} samples, scan {}x{} needs {}",
                haadf.len(),
                rows,
                cols,
                rows * cols
            )));
        }
        if !(slope.is_finite() && intercept.is_finite()) {
            return Err(FemError::InvalidParameter(format!(
                "thickness calibration must be finite: slope {}, intercept {}",
                slope, intercept
            )));
        }
        Ok(Self {
            scan_shape,
            values: haadf.iter().map(|&c| slope * c + intercept).collect(),
        })
    }

    /// Same as [`Self::from_haadf`] for a HAADF image whose pixels are the
    /// scan positions.
    pub fn from_haadf_image(haadf: &Pattern, slope: f64, intercept: f64) -> Result<Self> {
        let (w, h) = haadf.dimensions();
        let counts: Vec<f64> = haadf.as_raw().iter().map(|&v| v as f64).collect();
        Self::from_haadf(&counts, [h as usize, w as usize], slope, intercept)
    }

    /// `ShapeMismatch` unless the map covers exactly the scan of `stack`.
    pub fn check_scan(&self, stack: &PatternStack) -> Result<()> {
        if self.scan_shape == stack.scan_shape() {
            Ok(())
        } else {
            Err(FemError::ShapeMismatch(format!(
                "thickness map scan {:?} does not match pattern scan {:?}",
                self.scan_shape,
                stack.scan_shape()
            )))
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `(min, max)` of the finite values.
    pub fn range(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// Half-open thickness interval `[lo, hi)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThicknessBin {
    pub lo: f64,
    pub hi: f64,
}

impl ThicknessBin {
    pub fn contains(&self, t: f64) -> bool {
        t >= self.lo && t < self.hi
    }

    /// `n` equal-width bins tiling `[t_min, t_max)`.
    pub fn linear(t_min: f64, t_max: f64, n: usize) -> Result<Vec<Self>> {
        if n == 0 || !(t_min < t_max) || !t_max.is_finite() || !t_min.is_finite() {
            return Err(FemError::InvalidParameter(format!(
                "cannot split [{}, {}) into {} thickness bins",
                t_min, t_max, n
            )));
        }
        let width = (t_max - t_min) / n as f64;
        Ok((0..n)
            .map(|i| Self {
                lo: t_min + i as f64 * width,
                hi: if i + 1 == n {
                    t_max
                } else {
                    t_min + (i + 1) as f64 * width
                },
            })
            .collect())
    }

    /// Bins between consecutive `edges`.
    pub fn from_edges(edges: &[f64]) -> Result<Vec<Self>> {
        if edges.len() < 2 || edges.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(FemError::InvalidParameter(format!(
                "thickness edges must be at least two strictly increasing values: {:?}",
                edges
            )));
        }
        Ok(edges
            .windows(2)
            .map(|w| Self { lo: w[0], hi: w[1] })
            .collect())
    }
}

/// Probe indices falling into each bin, in scan order.
///
/// A position belongs to the first bin containing it; positions outside all
/// bins (or with non-finite thickness) are dropped.
pub fn partition_by_thickness(map: &ThicknessMap, bins: &[ThicknessBin]) -> Vec<Vec<usize>> {
    let mut groups = vec![Vec::new(); bins.len()];
    let mut dropped = 0usize;
    for (i, &t) in map.values.iter().enumerate() {
        match bins.iter().position(|b| b.contains(t)) {
            Some(j) => groups[j].push(i),
            None => dropped += 1,
        }
    }
    tracing::debug!(
        bins = bins.len(),
        sizes = ?groups.iter().map(Vec::len).collect::<Vec<_>>(),
        dropped,
        "thickness partition"
    );
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Luma;

    #[test]
    fn linear_calibration_of_haadf_counts() {
        let map = ThicknessMap::from_haadf(&[100.0, 200.0, 300.0, 400.0], [2, 2], 0.1, -5.0)
            .expect("map");
        assert_eq!(map.values, vec![5.0, 15.0, 25.0, 35.0]);
        assert_eq!(map.range(), Some((5.0, 35.0)));

        let err = ThicknessMap::from_haadf(&[1.0; 5], [2, 2], 1.0, 0.0).unwrap_err();
        assert!(matches!(err, FemError::ShapeMismatch(_)));
    }

    #[test]
    fn haadf_image_is_row_major_scan() {
        let img = Pattern::from_fn(3, 2, |x, y| Luma([(10 * y + x) as f32]));
        let map = ThicknessMap::from_haadf_image(&img, 1.0, 0.0).expect("map");
        assert_eq!(map.scan_shape, [2, 3]);
        assert_eq!(map.values, vec![0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn scan_shape_must_match_the_stack() {
        let stack = PatternStack::new([2, 3], vec![Pattern::new(4, 4); 6]).expect("stack");
        let same = ThicknessMap::from_haadf(&[0.0; 6], [2, 3], 1.0, 0.0).expect("map");
        assert!(same.check_scan(&stack).is_ok());

        let transposed = ThicknessMap::from_haadf(&[0.0; 6], [3, 2], 1.0, 0.0).expect("map");
        let err = transposed.check_scan(&stack).unwrap_err();
        assert!(matches!(err, FemError::ShapeMismatch(_)));
    }

    #[test]
    fn linear_bins_tile_the_range() {
        let bins = ThicknessBin::linear(10.0, 40.0, 3).expect("bins");
        assert_eq!(bins.len(), 3);
        assert_relative_eq!(bins[1].lo, 20.0);
        assert_eq!(bins[2].hi, 40.0);
        assert!(bins.windows(2).all(|w| w[0].hi == w[1].lo));
        assert!(ThicknessBin::linear(1.0, 1.0, 2).is_err());
        assert!(ThicknessBin::linear(0.0, 1.0, 0).is_err());
        assert!(ThicknessBin::from_edges(&[0.0, 2.0, 1.0]).is_err());
    }

    #[test]
    fn partition_is_disjoint_and_half_open() {
        let map = ThicknessMap {
            scan_shape: [2, 3],
            values: vec![10.0, 19.999, 20.0, 30.0, f64::NAN, 5.0],
        };
        let bins = ThicknessBin::from_edges(&[10.0, 20.0, 30.0]).expect("bins");
        let groups = partition_by_thickness(&map, &bins);
        assert_eq!(groups, vec![vec![0, 1], vec![2]]);

        let mut seen: Vec<usize> = groups.concat();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 3);
    }
}
