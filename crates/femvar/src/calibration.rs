//! Pixel → scattering-vector calibration.
//!
//! A [`Calibration`] bundles the pattern center, the ellipticity correction
//! and the detector geometry needed to turn a pixel position into k.

use serde::{Deserialize, Serialize};

use crate::affine::AffineCorrection;
use crate::center::CenterEstimate;
use crate::error::{FemError, Result};

const PLANCK: f64 = 6.626_070_15e-34;
const ELECTRON_MASS: f64 = 9.109_383_701_5e-31;
const ELEMENTARY_CHARGE: f64 = 1.602_176_634e-19;
const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Relativistic electron wavelength in metres for a beam energy in keV.
pub fn electron_wavelength_m(beam_energy_kev: f64) -> f64 {
    let ev = beam_energy_kev * 1e3 * ELEMENTARY_CHARGE;
    let rest = ELECTRON_MASS * SPEED_OF_LIGHT * SPEED_OF_LIGHT;
    PLANCK / (2.0 * ELECTRON_MASS * ev * (1.0 + ev / (2.0 * rest))).sqrt()
}

/// Convention for the scattering-vector magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KUnit {
    /// `q = 4π sin θ / λ`, in nm⁻¹.
    #[default]
    QInvNm,
    /// `s = 2 sin θ / λ`, in nm⁻¹.
    SInvNm,
}

impl KUnit {
    /// Multiplier of `sin θ / λ`.
    fn prefactor(self) -> f64 {
        match self {
            Self::QInvNm => 4.0 * std::f64::consts::PI,
            Self::SInvNm => 2.0,
        }
    }
}

/// Detector and beam parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorGeometry {
    /// Physical pixel pitch, in metres.
    pub pixel_size_m: f64,
    /// Effective camera length, in metres.
    pub camera_length_m: f64,
    /// Beam energy, in keV.
    pub beam_energy_kev: f64,
    #[serde(default)]
    pub unit: KUnit,
}

impl DetectorGeometry {
    /// Geometry whose first pixel off-center sits exactly at `k_per_pixel`.
    pub fn from_k_per_pixel(
        beam_energy_kev: f64,
        pixel_size_m: f64,
        k_per_pixel: f64,
        unit: KUnit,
    ) -> Result<Self> {
        let lambda_nm = electron_wavelength_m(beam_energy_kev) * 1e9;
        let sin_theta = k_per_pixel * lambda_nm / unit.prefactor();
        if !(sin_theta > 0.0 && sin_theta < 1.0) || !(pixel_size_m > 0.0) {
            return Err(FemError::InvalidParameter(format!(
                "no camera length maps one pixel to k = {}",
                k_per_pixel
            )));
        }
        let two_theta = 2.0 * sin_theta.asin();
        Ok(Self {
            pixel_size_m,
            camera_length_m: pixel_size_m / two_theta.tan(),
            beam_energy_kev,
            unit,
        })
    }

    pub fn validate(&self) -> Result<()> {
        let ok = [self.pixel_size_m, self.camera_length_m, self.beam_energy_kev]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0);
        if ok {
            Ok(())
        } else {
            Err(FemError::InvalidParameter(format!(
                "detector geometry must be positive and finite: {:?}",
                self
            )))
        }
    }

    /// Scattering-vector magnitude of a pixel radius (in pixels).
    pub fn k_of_radius(&self, r_px: f64) -> f64 {
        let two_theta = (r_px * self.pixel_size_m / self.camera_length_m).atan();
        let lambda_nm = electron_wavelength_m(self.beam_energy_kev) * 1e9;
        self.unit.prefactor() * (0.5 * two_theta).sin() / lambda_nm
    }

    /// Pixel radius of a scattering-vector magnitude; inverse of [`Self::k_of_radius`].
    pub fn radius_of_k(&self, k: f64) -> f64 {
        let lambda_nm = electron_wavelength_m(self.beam_energy_kev) * 1e9;
        let theta = (k * lambda_nm / self.unit.prefactor()).clamp(-1.0, 1.0).asin();
        (2.0 * theta).tan() * self.camera_length_m / self.pixel_size_m
    }
}

/// Everything needed to map a pattern pixel to k.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Pattern center `[x, y]` in pixels.
    pub center: [f64; 2],
    /// Ellipticity correction; identity when uncorrected.
    #[serde(default)]
    pub affine: AffineCorrection,
    pub geometry: DetectorGeometry,
}

impl Calibration {
    /// Geometric image center, no ellipticity correction.
    pub fn uncorrected(width: u32, height: u32, geometry: DetectorGeometry) -> Self {
        Self {
            center: [
                (width as f64 - 1.0) * 0.5,
                (height as f64 - 1.0) * 0.5,
            ],
            affine: AffineCorrection::identity(),
            geometry,
        }
    }

    /// Calibration from a fitted center/ellipse.
    pub fn from_estimate(estimate: &CenterEstimate, geometry: DetectorGeometry) -> Self {
        Self {
            center: estimate.center(),
            affine: estimate.affine,
            geometry,
        }
    }

    /// Corrected position of pixel `[x, y]` relative to the center.
    #[inline]
    pub fn corrected_offset(&self, xy: [f64; 2]) -> [f64; 2] {
        let [x, y] = self.affine.apply(xy);
        [x - self.center[0], y - self.center[1]]
    }

    /// Corrected radius of pixel `[x, y]`, in pixels.
    #[inline]
    pub fn radius_px(&self, xy: [f64; 2]) -> f64 {
        let [dx, dy] = self.corrected_offset(xy);
        dx.hypot(dy)
    }

    /// k of pixel `[x, y]`.
    #[inline]
    pub fn k_of_pixel(&self, xy: [f64; 2]) -> f64 {
        self.geometry.k_of_radius(self.radius_px(xy))
    }

    /// Largest k addressable in a `width × height` pattern (farthest corner).
    pub fn k_max(&self, width: u32, height: u32) -> f64 {
        let (xm, ym) = (width as f64 - 1.0, height as f64 - 1.0);
        [[0.0, 0.0], [xm, 0.0], [0.0, ym], [xm, ym]]
            .into_iter()
            .map(|c| self.k_of_pixel(c))
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn wavelength_matches_tabulated_values() {
        // 200 kV: 2.5079 pm, 300 kV: 1.9687 pm.
        assert_relative_eq!(electron_wavelength_m(200.0), 2.5079e-12, max_relative = 1e-4);
        assert_relative_eq!(electron_wavelength_m(300.0), 1.9687e-12, max_relative = 1e-4);
    }

    #[test]
    fn k_per_pixel_geometry_roundtrips() {
        let g = DetectorGeometry::from_k_per_pixel(200.0, 55e-6, 0.2, KUnit::QInvNm)
            .expect("geometry");
        assert_relative_eq!(g.k_of_radius(1.0), 0.2, epsilon = 1e-12);
        // Small angles: nearly linear in radius.
        assert_relative_eq!(g.k_of_radius(25.0), 5.0, max_relative = 1e-5);
        assert_relative_eq!(g.radius_of_k(g.k_of_radius(31.7)), 31.7, epsilon = 1e-9);
    }

    #[test]
    fn s_is_q_over_two_pi() {
        let q = DetectorGeometry {
            pixel_size_m: 55e-6,
            camera_length_m: 0.3,
            beam_energy_kev: 300.0,
            unit: KUnit::QInvNm,
        };
        let s = DetectorGeometry {
            unit: KUnit::SInvNm,
            ..q
        };
        assert_relative_eq!(
            q.k_of_radius(40.0) / s.k_of_radius(40.0),
            2.0 * std::f64::consts::PI,
            epsilon = 1e-12
        );
    }

    #[test]
    fn impossible_k_per_pixel_is_rejected() {
        assert!(DetectorGeometry::from_k_per_pixel(200.0, 55e-6, 1e6, KUnit::QInvNm).is_err());
        assert!(DetectorGeometry::from_k_per_pixel(200.0, 0.0, 0.1, KUnit::QInvNm).is_err());
    }

    #[test]
    fn k_max_uses_farthest_corner() {
        let g = DetectorGeometry::from_k_per_pixel(200.0, 55e-6, 0.1, KUnit::QInvNm)
            .expect("geometry");
        let mut cal = Calibration::uncorrected(64, 64, g);
        cal.center = [10.0, 10.0];
        let expected = g.k_of_radius(53.0f64.hypot(53.0));
        assert_relative_eq!(cal.k_max(64, 64), expected, epsilon = 1e-12);
    }
}
