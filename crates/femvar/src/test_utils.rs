//! Synthetic diffraction patterns shared by unit tests.

use image::Luma;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Poisson};

use crate::conic::Ellipse;
use crate::pattern::Pattern;

/// Gaussian halo following `ring`, on a flat background.
///
/// The radial coordinate is elliptical, `ρ = |(u/a, v/b)|` in the ring frame,
/// so the brightest pixels trace the ellipse exactly.
pub(crate) fn render_halo(
    w: u32,
    h: u32,
    ring: &Ellipse,
    sigma: f64,
    peak: f64,
    background: f64,
) -> Pattern {
    let (sin_t, cos_t) = ring.angle.sin_cos();
    let scale = (ring.a * ring.b).sqrt();
    Pattern::from_fn(w, h, |x, y| {
        let (dx, dy) = (x as f64 - ring.cx, y as f64 - ring.cy);
        let u = cos_t * dx + sin_t * dy;
        let v = -sin_t * dx + cos_t * dy;
        let rho = (u / ring.a).hypot(v / ring.b);
        let d = (rho - 1.0) * scale;
        Luma([(background + peak * (-0.5 * d * d / (sigma * sigma)).exp()) as f32])
    })
}

/// Replace each pixel by `gain · Poisson(value / gain)`: counts in detector
/// units with electron shot noise.
pub(crate) fn apply_shot_noise(pattern: &Pattern, gain: f64, rng: &mut StdRng) -> Pattern {
    Pattern::from_fn(pattern.width(), pattern.height(), |x, y| {
        let electrons = pattern.get_pixel(x, y)[0] as f64 / gain;
        let n = if electrons > 0.0 {
            Poisson::new(electrons).map_or(0.0, |p| p.sample(rng))
        } else {
            0.0
        };
        Luma([(gain * n) as f32])
    })
}
