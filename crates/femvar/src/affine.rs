//! Ellipticity correction as a 3×3 homogeneous affine map.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::conic::Ellipse;

/// Affine map that turns the fitted ellipse into a circle of the minor-axis
/// radius about the same center.
///
/// Built as `T(c) · R(θ) · diag(b/a, 1) · R(−θ) · T(−c)`: the major axis is
/// compressed onto the minor one and the center is a fixed point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[[f64; 3]; 3]", into = "[[f64; 3]; 3]")]
pub struct AffineCorrection {
    pub mat: Matrix3<f64>,
}

impl AffineCorrection {
    /// No correction.
    pub fn identity() -> Self {
        Self {
            mat: Matrix3::identity(),
        }
    }

    /// Correction for `ellipse`; the ellipse is normalized first.
    pub fn from_ellipse(ellipse: &Ellipse) -> Self {
        let e = ellipse.normalized();
        let (sin_t, cos_t) = e.angle.sin_cos();
        let rot = Matrix3::new(cos_t, -sin_t, 0.0, sin_t, cos_t, 0.0, 0.0, 0.0, 1.0);
        let squeeze = Matrix3::new(e.b / e.a, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        let to_origin = Matrix3::new(1.0, 0.0, -e.cx, 0.0, 1.0, -e.cy, 0.0, 0.0, 1.0);
        let back = Matrix3::new(1.0, 0.0, e.cx, 0.0, 1.0, e.cy, 0.0, 0.0, 1.0);
        Self {
            mat: back * rot * squeeze * rot.transpose() * to_origin,
        }
    }

    /// Map a pixel position `[x, y]`.
    #[inline]
    pub fn apply(&self, [x, y]: [f64; 2]) -> [f64; 2] {
        let p = self.mat * Vector3::new(x, y, 1.0);
        [p.x / p.z, p.y / p.z]
    }

    pub fn is_identity(&self) -> bool {
        self.mat == Matrix3::identity()
    }

    /// Row-major copy, for serialization and plotting layers.
    pub fn to_rows(&self) -> [[f64; 3]; 3] {
        let m = &self.mat;
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
        ]
    }
}

impl Default for AffineCorrection {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<[[f64; 3]; 3]> for AffineCorrection {
    fn from(r: [[f64; 3]; 3]) -> Self {
        Self {
            mat: Matrix3::new(
                r[0][0], r[0][1], r[0][2], r[1][0], r[1][1], r[1][2], r[2][0], r[2][1], r[2][2],
            ),
        }
    }
}

impl From<AffineCorrection> for [[f64; 3]; 3] {
    fn from(a: AffineCorrection) -> Self {
        a.to_rows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ellipse_points_land_on_minor_axis_circle() {
        let e = Ellipse {
            cx: 130.2,
            cy: 121.7,
            a: 58.0,
            b: 51.0,
            angle: 1.1,
        };
        let corr = AffineCorrection::from_ellipse(&e);
        for p in e.sample_points(90) {
            let [x, y] = corr.apply(p);
            assert_relative_eq!((x - e.cx).hypot(y - e.cy), e.b, epsilon = 1e-9);
        }
        let c = corr.apply(e.center());
        assert_relative_eq!(c[0], e.cx, epsilon = 1e-12);
        assert_relative_eq!(c[1], e.cy, epsilon = 1e-12);
    }

    #[test]
    fn unnormalized_ellipse_gives_same_correction() {
        let raw = Ellipse {
            cx: 50.0,
            cy: 40.0,
            a: 20.0,
            b: 25.0,
            angle: 0.2,
        };
        let a = AffineCorrection::from_ellipse(&raw);
        let b = AffineCorrection::from_ellipse(&raw.normalized());
        assert_relative_eq!(a.mat, b.mat, epsilon = 1e-12);
        for p in raw.sample_points(16) {
            let [x, y] = a.apply(p);
            assert_relative_eq!((x - 50.0).hypot(y - 40.0), 20.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn circle_gives_identity() {
        let corr = AffineCorrection::from_ellipse(&Ellipse::circle(10.0, 20.0, 5.0));
        assert_relative_eq!(corr.mat, Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn serializes_as_rows() {
        let corr = AffineCorrection::from_ellipse(&Ellipse {
            cx: 3.0,
            cy: 4.0,
            a: 2.0,
            b: 1.0,
            angle: 0.0,
        });
        let json = serde_json::to_string(&corr).expect("serialize");
        let rows: [[f64; 3]; 3] = serde_json::from_str(&json).expect("row-major array");
        assert_relative_eq!(rows[0][0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(rows[0][2], 1.5, epsilon = 1e-12);
        assert_relative_eq!(rows[1][1], 1.0, epsilon = 1e-12);
        let back: AffineCorrection = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, corr);
    }
}
