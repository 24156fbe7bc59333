//! Conic coefficients, geometric ellipses and the conversions between them.

use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};

/// Failure modes of the conic layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ConicError {
    /// Fewer points than a minimal sample.
    TooFewPoints { needed: usize, got: usize },
    /// The best model did not reach the inlier floor.
    InsufficientInliers { needed: usize, found: usize },
}

impl std::fmt::Display for ConicError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewPoints { needed, got } => {
                write!(f, "too few points: need {}, got {}", needed, got)
            }
            Self::InsufficientInliers { needed, found } => {
                write!(f, "insufficient inliers: need {}, found {}", needed, found)
            }
        }
    }
}

impl std::error::Error for ConicError {}

/// General conic `A x² + B xy + C y² + D x + E y + F = 0`, stored as `[A..F]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConicCoeffs(pub [f64; 6]);

impl ConicCoeffs {
    /// Value of the conic polynomial at `(x, y)`.
    pub fn algebraic_distance(&self, x: f64, y: f64) -> f64 {
        let [a, b, c, d, e, f] = self.0;
        a * x * x + b * x * y + c * y * y + d * x + e * y + f
    }

    /// `B² − 4AC < 0`.
    pub fn is_ellipse(&self) -> bool {
        let [a, b, c, ..] = self.0;
        b * b - 4.0 * a * c < 0.0
    }

    /// Geometric parameters exactly as the eigen-decomposition reports them,
    /// before the major/minor ordering is enforced.
    pub fn to_raw_ellipse(&self) -> Option<Ellipse> {
        let [a, b, c, d, e, f] = self.0;
        let denom = 4.0 * a * c - b * b;
        if denom <= 0.0 {
            return None;
        }

        let cx = (b * e - 2.0 * c * d) / denom;
        let cy = (b * d - 2.0 * a * e) / denom;
        let f_center = a * cx * cx + b * cx * cy + c * cy * cy + d * cx + e * cy + f;
        if f_center.abs() < 1e-15 {
            return None;
        }

        // Eigenvalues of [[A, B/2], [B/2, C]]; the first belongs to the axis at `angle`.
        let half_sum = 0.5 * (a + c);
        let half_diff = 0.5 * ((a - c).powi(2) + b * b).sqrt();
        let (l1, l2) = (half_sum + half_diff, half_sum - half_diff);
        let (a_sq, b_sq) = (-f_center / l1, -f_center / l2);
        if !(a_sq > 0.0 && b_sq > 0.0) {
            return None;
        }

        Some(Ellipse {
            cx,
            cy,
            a: a_sq.sqrt(),
            b: b_sq.sqrt(),
            angle: 0.5 * b.atan2(a - c),
        })
    }

    /// Geometric ellipse with `a >= b`; `None` for non-elliptic conics.
    pub fn to_ellipse(&self) -> Option<Ellipse> {
        let e = self.to_raw_ellipse()?.normalized();
        e.is_valid().then_some(e)
    }
}

/// Geometric ellipse in pixel coordinates (x = column, y = row).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    /// Center x (column).
    pub cx: f64,
    /// Center y (row).
    pub cy: f64,
    /// Semi-axis along `angle`. Semi-major once normalized.
    pub a: f64,
    /// Semi-axis perpendicular to `angle`. Semi-minor once normalized.
    pub b: f64,
    /// Direction of the `a` axis from +x, in radians.
    pub angle: f64,
}

impl Ellipse {
    /// Circle of radius `r` centered at `(cx, cy)`.
    pub fn circle(cx: f64, cy: f64, r: f64) -> Self {
        Self {
            cx,
            cy,
            a: r,
            b: r,
            angle: 0.0,
        }
    }

    /// Positive, finite parameters.
    pub fn is_valid(&self) -> bool {
        self.a > 0.0
            && self.b > 0.0
            && [self.cx, self.cy, self.a, self.b, self.angle]
                .iter()
                .all(|v| v.is_finite())
    }

    /// Enforce `a >= b`.
    ///
    /// When the axes are swapped the rotation is shifted by π/2 so the
    /// geometric ellipse is unchanged; the angle is then wrapped to (−π/2, π/2].
    pub fn normalized(&self) -> Self {
        let (a, b, angle) = if self.a >= self.b {
            (self.a, self.b, self.angle)
        } else {
            (self.b, self.a, self.angle + FRAC_PI_2)
        };
        Self {
            a,
            b,
            angle: wrap_half_turn(angle),
            ..*self
        }
    }

    /// `a / b` for a normalized ellipse.
    pub fn aspect_ratio(&self) -> f64 {
        self.a.max(self.b) / self.a.min(self.b)
    }

    pub fn center(&self) -> [f64; 2] {
        [self.cx, self.cy]
    }

    /// General conic coefficients scaled so that `F' = −1` at the center.
    pub fn to_conic(&self) -> ConicCoeffs {
        let (sin_t, cos_t) = self.angle.sin_cos();
        let inv_a2 = 1.0 / (self.a * self.a);
        let inv_b2 = 1.0 / (self.b * self.b);

        let qa = cos_t * cos_t * inv_a2 + sin_t * sin_t * inv_b2;
        let qb = 2.0 * cos_t * sin_t * (inv_a2 - inv_b2);
        let qc = sin_t * sin_t * inv_a2 + cos_t * cos_t * inv_b2;
        let (x0, y0) = (self.cx, self.cy);

        ConicCoeffs([
            qa,
            qb,
            qc,
            -2.0 * qa * x0 - qb * y0,
            -qb * x0 - 2.0 * qc * y0,
            qa * x0 * x0 + qb * x0 * y0 + qc * y0 * y0 - 1.0,
        ])
    }

    /// `n` points evenly spaced in the parametric angle.
    pub fn sample_points(&self, n: usize) -> Vec<[f64; 2]> {
        let (sin_t, cos_t) = self.angle.sin_cos();
        (0..n)
            .map(|i| {
                let t = 2.0 * PI * i as f64 / n as f64;
                let (u, v) = (self.a * t.cos(), self.b * t.sin());
                [self.cx + cos_t * u - sin_t * v, self.cy + sin_t * u + cos_t * v]
            })
            .collect()
    }

    /// First-order geometric distance: |Q(x, y)| / |∇Q(x, y)|.
    pub fn sampson_distance(&self, x: f64, y: f64) -> f64 {
        sampson_distance(&self.to_conic(), x, y)
    }
}

pub(crate) fn sampson_distance(conic: &ConicCoeffs, x: f64, y: f64) -> f64 {
    let [a, b, c, d, e, _] = conic.0;
    let q = conic.algebraic_distance(x, y).abs();
    let gx = 2.0 * a * x + b * y + d;
    let gy = b * x + 2.0 * c * y + e;
    let grad_sq = gx * gx + gy * gy;
    if grad_sq < 1e-30 {
        q
    } else {
        q / grad_sq.sqrt()
    }
}

fn wrap_half_turn(mut angle: f64) -> f64 {
    while angle > FRAC_PI_2 {
        angle -= PI;
    }
    while angle <= -FRAC_PI_2 {
        angle += PI;
    }
    angle
}
