//! Averaging variance curves of independent datasets.

use serde::{Deserialize, Serialize};

use super::accumulator::{same_axis, Moments};
use super::VarianceCurve;
use crate::error::{FemError, Result};

/// Elementwise mean of several curves with a standard-error band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AveragedCurve {
    pub k: Vec<f64>,
    #[serde(with = "crate::nan_serde")]
    pub mean: Vec<f64>,
    /// Population standard deviation over `sqrt(count)`.
    #[serde(with = "crate::nan_serde")]
    pub std_err: Vec<f64>,
    /// Finite values that entered each bin.
    pub count: Vec<usize>,
    /// Curves supplied.
    pub n_curves: usize,
}

/// Average `curves` bin by bin, skipping NaN entries.
///
/// A bin with no finite value is NaN in both `mean` and `std_err`. A single
/// curve yields a zero band.
pub fn average_curves(curves: &[VarianceCurve]) -> Result<AveragedCurve> {
    let first = curves
        .first()
        .ok_or_else(|| FemError::InvalidParameter("no curves to average".into()))?;
    if let Some((i, c)) = curves
        .iter()
        .enumerate()
        .find(|(_, c)| !same_axis(&first.k, &c.k) || c.variance.len() != c.k.len())
    {
        return Err(FemError::ShapeMismatch(format!(
            "curve {} has {} k bins / {} values, expected {}",
            i,
            c.k.len(),
            c.variance.len(),
            first.k.len()
        )));
    }

    let mut bins = vec![Moments::default(); first.k.len()];
    for c in curves {
        for (m, &v) in bins.iter_mut().zip(&c.variance) {
            if v.is_finite() {
                m.push(v);
            }
        }
    }

    let mean = bins.iter().map(|m| m.mean().unwrap_or(f64::NAN)).collect();
    let std_err = bins
        .iter()
        .map(|m| match m.variance() {
            Some(var) => (var / m.count as f64).sqrt(),
            None => f64::NAN,
        })
        .collect();
    Ok(AveragedCurve {
        k: first.k.clone(),
        mean,
        std_err,
        count: bins.iter().map(|m| m.count as usize).collect(),
        n_curves: curves.len(),
    })
}
