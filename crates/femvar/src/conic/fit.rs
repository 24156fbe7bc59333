//! Direct least-squares ellipse fit (Fitzgibbon, Pilu & Fisher, 1999).

use nalgebra::{DMatrix, Matrix3, Vector3};

use super::eigen::ellipse_eigenvector;
use super::types::{ConicCoeffs, Ellipse};

/// Smallest point count that determines a conic.
pub const MIN_SAMPLE: usize = 6;

/// Fit a conic constrained to be an ellipse.
///
/// Points are shifted to their centroid and scaled to mean radius √2 before
/// building the scatter matrix; the solution is mapped back to pixel
/// coordinates. Returns `None` for fewer than six points or when no valid
/// ellipse results (collinear or clustered input).
pub fn fit_conic_direct(points: &[[f64; 2]]) -> Option<ConicCoeffs> {
    if points.len() < MIN_SAMPLE {
        return None;
    }
    let frame = NormalizedFrame::from_points(points);

    let mut design = DMatrix::<f64>::zeros(points.len(), 6);
    for (row, &p) in points.iter().enumerate() {
        let [x, y] = frame.apply(p);
        design[(row, 0)] = x * x;
        design[(row, 1)] = x * y;
        design[(row, 2)] = y * y;
        design[(row, 3)] = x;
        design[(row, 4)] = y;
        design[(row, 5)] = 1.0;
    }
    let scatter = design.transpose() * &design;

    let s_quad = scatter.fixed_view::<3, 3>(0, 0).into_owned();
    let s_mixed = scatter.fixed_view::<3, 3>(0, 3).into_owned();
    let s_lin = scatter.fixed_view::<3, 3>(3, 3).into_owned();

    // Eliminate the linear block, then solve M a = λ C a with C the ellipse
    // constraint matrix (aᵀ C a = 4AC − B²).
    let s_lin_inv = s_lin.try_inverse()?;
    let reduced = s_quad - s_mixed * s_lin_inv * s_mixed.transpose();
    let constraint = Matrix3::new(0.0, 0.0, 2.0, 0.0, -1.0, 0.0, 2.0, 0.0, 0.0);
    let quad = ellipse_eigenvector(&(constraint.try_inverse()? * reduced))?;
    let lin: Vector3<f64> = -s_lin_inv * s_mixed.transpose() * quad;

    let conic = frame.restore([quad[0], quad[1], quad[2], lin[0], lin[1], lin[2]]);
    if !conic.is_ellipse() {
        return None;
    }
    conic.to_ellipse()?;
    Some(conic)
}

/// Geometric form of [`fit_conic_direct`].
pub fn fit_ellipse_direct(points: &[[f64; 2]]) -> Option<Ellipse> {
    fit_conic_direct(points)?.to_ellipse()
}

/// Root-mean-square Sampson distance of `points` to `ellipse`, in pixels.
pub fn rms_sampson_distance(ellipse: &Ellipse, points: &[[f64; 2]]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let conic = ellipse.to_conic();
    let sum_sq: f64 = points
        .iter()
        .map(|&[x, y]| super::types::sampson_distance(&conic, x, y).powi(2))
        .sum();
    (sum_sq / points.len() as f64).sqrt()
}

/// Similarity `p' = s (p − m)` used to condition the scatter matrix.
struct NormalizedFrame {
    mx: f64,
    my: f64,
    s: f64,
}

impl NormalizedFrame {
    fn from_points(points: &[[f64; 2]]) -> Self {
        let n = points.len() as f64;
        let mx = points.iter().map(|p| p[0]).sum::<f64>() / n;
        let my = points.iter().map(|p| p[1]).sum::<f64>() / n;
        let mean_r = points
            .iter()
            .map(|p| (p[0] - mx).hypot(p[1] - my))
            .sum::<f64>()
            / n;
        let s = if mean_r > 1e-15 {
            std::f64::consts::SQRT_2 / mean_r
        } else {
            1.0
        };
        Self { mx, my, s }
    }

    fn apply(&self, [x, y]: [f64; 2]) -> [f64; 2] {
        [(x - self.mx) * self.s, (y - self.my) * self.s]
    }

    /// Substitute `x' = s(x − mx)`, `y' = s(y − my)` back into the conic.
    fn restore(&self, [a, b, c, d, e, f]: [f64; 6]) -> ConicCoeffs {
        let (mx, my, s) = (self.mx, self.my, self.s);
        let s2 = s * s;
        ConicCoeffs([
            a * s2,
            b * s2,
            c * s2,
            -2.0 * a * s2 * mx - b * s2 * my + d * s,
            -b * s2 * mx - 2.0 * c * s2 * my + e * s,
            a * s2 * mx * mx + b * s2 * mx * my + c * s2 * my * my - d * s * mx - e * s * my + f,
        ])
    }
}
