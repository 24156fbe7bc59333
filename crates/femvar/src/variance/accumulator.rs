//! Streaming per-bin moments.

use crate::error::{FemError, Result};
use crate::radial::{PolarImage, RadialProfile};

use super::{validate_gain, VarianceCurve, VarianceMethod};

/// Running sum, sum of squares and sample count of one bin.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Moments {
    pub sum: f64,
    pub sum_sq: f64,
    pub count: u64,
}

impl Moments {
    #[inline]
    pub fn push(&mut self, v: f64) {
        self.sum += v;
        self.sum_sq += v * v;
        self.count += 1;
    }

    /// `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Population variance (ddof = 0); `None` when empty.
    pub fn variance(&self) -> Option<f64> {
        let mean = self.mean()?;
        Some((self.sum_sq / self.count as f64 - mean * mean).max(0.0))
    }

    /// `Var / Mean² − gain / Mean`; NaN when empty or the mean is zero.
    pub fn normalized_variance(&self, gain: f64) -> f64 {
        match (self.mean(), self.variance()) {
            (Some(mean), Some(var)) if mean != 0.0 => var / (mean * mean) - gain / mean,
            _ => f64::NAN,
        }
    }
}

/// Incremental variance over probe positions.
///
/// Feed one reduced pattern per position ([`RadialProfile`] for
/// [`VarianceMethod::Omega`], [`PolarImage`] for the others), then call
/// [`finish`](Self::finish). Only per-bin moments are retained.
#[derive(Debug, Clone)]
pub struct VarianceAccumulator {
    k: Vec<f64>,
    method: VarianceMethod,
    gain: f64,
    bins: Vec<Moments>,
    n_positions: usize,
}

impl VarianceAccumulator {
    pub fn new(k: Vec<f64>, method: VarianceMethod, gain: f64) -> Result<Self> {
        validate_gain(gain)?;
        let bins = vec![Moments::default(); k.len()];
        Ok(Self {
            k,
            method,
            gain,
            bins,
            n_positions: 0,
        })
    }

    pub fn method(&self) -> VarianceMethod {
        self.method
    }

    pub fn n_positions(&self) -> usize {
        self.n_positions
    }

    /// Add the azimuthal average of one position.
    pub fn push_profile(&mut self, profile: &RadialProfile) -> Result<()> {
        if self.method != VarianceMethod::Omega {
            return Err(FemError::InvalidParameter(format!(
                "{} variance needs polar images, not radial profiles",
                self.method
            )));
        }
        self.check_axis(&profile.k)?;
        if profile.intensity.len() != profile.k.len() {
            return Err(FemError::ShapeMismatch(format!(
                "profile holds {} values for {} k bins",
                profile.intensity.len(),
                profile.k.len()
            )));
        }
        for (m, &v) in self.bins.iter_mut().zip(&profile.intensity) {
            m.push(v);
        }
        self.n_positions += 1;
        Ok(())
    }

    /// Add the polar image of one position. Non-finite cells are ignored.
    pub fn push_polar(&mut self, image: &PolarImage) -> Result<()> {
        if self.method == VarianceMethod::Omega {
            return Err(FemError::InvalidParameter(
                "omega variance needs radial profiles, not polar images".into(),
            ));
        }
        self.check_axis(&image.k)?;
        if image.intensity.len() != image.npt() * image.npt_azim() {
            return Err(FemError::ShapeMismatch(format!(
                "polar image holds {} cells, expected {} x {}",
                image.intensity.len(),
                image.npt(),
                image.npt_azim()
            )));
        }

        for (m, row) in self.bins.iter_mut().zip(image.rows()) {
            let finite = row.iter().copied().filter(|v| v.is_finite());
            if self.method == VarianceMethod::R {
                finite.for_each(|v| m.push(v));
            } else {
                // re: positions whose ring has no usable mean are left out.
                let mut ring = Moments::default();
                finite.for_each(|v| ring.push(v));
                let v = ring.normalized_variance(self.gain);
                if v.is_finite() {
                    m.push(v);
                }
            }
        }
        self.n_positions += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<VarianceCurve> {
        if self.n_positions == 0 {
            return Err(FemError::InvalidParameter(
                "variance over an empty set of probe positions".into(),
            ));
        }
        let variance = match self.method {
            VarianceMethod::Omega | VarianceMethod::R => self
                .bins
                .iter()
                .map(|m| m.normalized_variance(self.gain))
                .collect(),
            VarianceMethod::Re => self
                .bins
                .iter()
                .map(|m| m.mean().unwrap_or(f64::NAN))
                .collect(),
        };
        Ok(VarianceCurve {
            k: self.k,
            variance,
            method: self.method,
            gain: self.gain,
            n_positions: self.n_positions,
        })
    }

    fn check_axis(&self, k: &[f64]) -> Result<()> {
        if same_axis(&self.k, k) {
            Ok(())
        } else {
            Err(FemError::ShapeMismatch(format!(
                "k axis of {} bins does not match the accumulator's {} bins",
                k.len(),
                self.k.len()
            )))
        }
    }
}

/// Equal length and bin centers equal up to rounding.
pub(crate) fn same_axis(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| (x - y).abs() <= 1e-9 * x.abs().max(y.abs()).max(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn polar(k: Vec<f64>, npt_azim: usize, intensity: Vec<f64>) -> PolarImage {
        let azimuth_deg = (0..npt_azim)
            .map(|j| -180.0 + (j as f64 + 0.5) * 360.0 / npt_azim as f64)
            .collect();
        PolarImage {
            k,
            azimuth_deg,
            intensity,
        }
    }

    #[test]
    fn moments_are_population_statistics() {
        let mut m = Moments::default();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            m.push(v);
        }
        assert_eq!(m.mean(), Some(5.0));
        assert_relative_eq!(m.variance().expect("non-empty"), 4.0, epsilon = 1e-12);
        assert_relative_eq!(m.normalized_variance(1.0), 4.0 / 25.0 - 0.2, epsilon = 1e-12);
        assert!(Moments::default().normalized_variance(1.0).is_nan());
    }

    #[test]
    fn pooled_r_matches_closed_form() {
        // Two positions, one k bin, two sectors: cells {1, 3} and {5, 7}.
        let mut acc = VarianceAccumulator::new(vec![1.0], VarianceMethod::R, 0.5).expect("acc");
        acc.push_polar(&polar(vec![1.0], 2, vec![1.0, 3.0])).expect("push");
        acc.push_polar(&polar(vec![1.0], 2, vec![5.0, 7.0])).expect("push");
        let curve = acc.finish().expect("curve");
        // mean 4, population variance 5.
        assert_relative_eq!(curve.variance[0], 5.0 / 16.0 - 0.5 / 4.0, epsilon = 1e-12);
        assert_eq!(curve.n_positions, 2);
    }

    #[test]
    fn re_averages_per_position_ring_variance() {
        let mut acc = VarianceAccumulator::new(vec![1.0], VarianceMethod::Re, 0.5).expect("acc");
        acc.push_polar(&polar(vec![1.0], 2, vec![1.0, 3.0])).expect("push");
        acc.push_polar(&polar(vec![1.0], 2, vec![5.0, 7.0])).expect("push");
        let curve = acc.finish().expect("curve");
        let first = 1.0 / 4.0 - 0.5 / 2.0;
        let second = 1.0 / 36.0 - 0.5 / 6.0;
        assert_relative_eq!(curve.variance[0], 0.5 * (first + second), epsilon = 1e-12);
    }

    #[test]
    fn empty_sectors_are_excluded() {
        let mut acc = VarianceAccumulator::new(vec![1.0], VarianceMethod::R, 1.0).expect("acc");
        acc.push_polar(&polar(vec![1.0], 3, vec![2.0, f64::NAN, 2.0]))
            .expect("push");
        let curve = acc.finish().expect("curve");
        assert_relative_eq!(curve.variance[0], -0.5, epsilon = 1e-12);
    }

    #[test]
    fn zero_mean_bin_is_nan_in_every_method() {
        let mut omega =
            VarianceAccumulator::new(vec![1.0, 2.0], VarianceMethod::Omega, 1.0).expect("acc");
        let mut re = VarianceAccumulator::new(vec![1.0, 2.0], VarianceMethod::Re, 1.0).expect("acc");
        for _ in 0..3 {
            omega
                .push_profile(&RadialProfile {
                    k: vec![1.0, 2.0],
                    intensity: vec![0.0, 3.0],
                })
                .expect("push");
            re.push_polar(&polar(vec![1.0, 2.0], 2, vec![0.0, 0.0, 3.0, 3.0]))
                .expect("push");
        }
        let omega = omega.finish().expect("curve");
        let re = re.finish().expect("curve");
        assert!(omega.variance[0].is_nan());
        assert!(re.variance[0].is_nan());
        assert_relative_eq!(omega.variance[1], -1.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(re.variance[1], -1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn nan_profile_bin_propagates() {
        let mut acc = VarianceAccumulator::new(vec![1.0, 2.0], VarianceMethod::Omega, 1.0)
            .expect("acc");
        acc.push_profile(&RadialProfile {
            k: vec![1.0, 2.0],
            intensity: vec![f64::NAN, 2.0],
        })
        .expect("push");
        acc.push_profile(&RadialProfile {
            k: vec![1.0, 2.0],
            intensity: vec![1.0, 4.0],
        })
        .expect("push");
        let curve = acc.finish().expect("curve");
        assert!(curve.variance[0].is_nan());
        assert!(curve.variance[1].is_finite());
    }

    #[test]
    fn short_profile_is_rejected_before_accumulating() {
        let mut acc = VarianceAccumulator::new(vec![1.0, 2.0, 3.0], VarianceMethod::Omega, 1.0)
            .expect("acc");
        acc.push_profile(&RadialProfile {
            k: vec![1.0, 2.0, 3.0],
            intensity: vec![1.0, 2.0, 3.0],
        })
        .expect("push");
        let err = acc
            .push_profile(&RadialProfile {
                k: vec![1.0, 2.0, 3.0],
                intensity: vec![1.0, 2.0],
            })
            .unwrap_err();
        assert!(matches!(err, FemError::ShapeMismatch(_)));
        assert_eq!(acc.n_positions(), 1);
        assert!(acc.bins.iter().all(|m| m.count == 1));
    }

    #[test]
    fn mismatched_input_is_rejected() {
        let mut acc = VarianceAccumulator::new(vec![1.0, 2.0], VarianceMethod::Omega, 1.0)
            .expect("acc");
        let err = acc
            .push_profile(&RadialProfile {
                k: vec![1.0, 2.0, 3.0],
                intensity: vec![1.0; 3],
            })
            .unwrap_err();
        assert!(matches!(err, FemError::ShapeMismatch(_)));

        let err = acc
            .push_polar(&polar(vec![1.0, 2.0], 1, vec![1.0, 1.0]))
            .unwrap_err();
        assert!(matches!(err, FemError::InvalidParameter(_)));

        assert!(matches!(
            acc.finish().unwrap_err(),
            FemError::InvalidParameter(_)
        ));
        assert!(VarianceAccumulator::new(vec![1.0], VarianceMethod::R, 0.0).is_err());
        assert!(VarianceAccumulator::new(vec![1.0], VarianceMethod::R, f64::NAN).is_err());
    }
}
