use femvar::{
    average_curves, compute_variance, estimate_center_and_affine, partition_by_thickness,
    sum_patterns, Calibration, CenterConfig, DetectorGeometry, KUnit, Pattern, PatternStack,
    RadialConfig, ThicknessBin, ThicknessMap, VarianceConfig, VarianceMethod,
};
use image::Luma;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};

const SIZE: u32 = 96;
const CENTER: f64 = 47.5;
const RING_RADIUS_PX: f64 = 42.0;
const RING_SIGMA_PX: f64 = 1.5;
const BACKGROUND: f64 = 200.0;
const RING_PEAK: f64 = 400.0;
const GAIN: f64 = 4.2;

fn geometry() -> DetectorGeometry {
    DetectorGeometry::from_k_per_pixel(200.0, 55e-6, 0.1, KUnit::QInvNm).expect("geometry")
}

/// Circular ring whose amplitude varies by `±30 %` between positions, with
/// shot noise at `GAIN` counts per electron.
fn ring_pattern(rng: &mut StdRng) -> Pattern {
    let amplitude = RING_PEAK * (1.0 + 0.3 * rng.gen_range(-1.0..1.0));
    Pattern::from_fn(SIZE, SIZE, |x, y| {
        let r = (x as f64 - CENTER).hypot(y as f64 - CENTER);
        let d = (r - RING_RADIUS_PX) / RING_SIGMA_PX;
        let expected = BACKGROUND + amplitude * (-0.5 * d * d).exp();
        let electrons = Poisson::new(expected / GAIN)
            .map(|p| p.sample(rng))
            .unwrap_or(0.0);
        Luma([(GAIN * electrons) as f32])
    })
}

fn ring_stack(rows: usize, cols: usize, seed: u64) -> PatternStack {
    let mut rng = StdRng::seed_from_u64(seed);
    let patterns = (0..rows * cols).map(|_| ring_pattern(&mut rng)).collect();
    PatternStack::new([rows, cols], patterns).expect("stack")
}

fn omega_config() -> VarianceConfig {
    VarianceConfig {
        gain: GAIN,
        method: VarianceMethod::Omega,
        radial: RadialConfig {
            npt: 50,
            radial_range: Some([3.0, 5.7]),
            ..Default::default()
        },
    }
}

#[test]
fn ring_grid_variance_settles_on_the_noise_floor() {
    let stack = ring_stack(10, 10, 2024);

    let summed = sum_patterns(&stack).expect("non-empty stack");
    let center_cfg = CenterConfig {
        num_points: 400,
        ..Default::default()
    };
    let estimate = estimate_center_and_affine(&summed, None, &center_cfg).expect("center fit");
    let [cx, cy] = estimate.center();
    assert!((cx - CENTER).abs() < 0.3, "cx = {}", cx);
    assert!((cy - CENTER).abs() < 0.3, "cy = {}", cy);
    assert!(estimate.ellipse.aspect_ratio() < 1.02);

    let calibration = Calibration::from_estimate(&estimate, geometry());
    let curve = compute_variance(&stack, &calibration, &omega_config()).expect("variance");

    assert_eq!(curve.k.len(), 50);
    assert_eq!(curve.variance.len(), 50);
    assert_eq!(curve.n_positions, 100);
    assert!(curve.k.windows(2).all(|w| w[1] > w[0]));
    assert!(curve.k[0] > 3.0 && curve.k[49] < 5.7);

    // Away from the ring the profiles are flat background: averaging many
    // pixels leaves almost no shot noise, so Ω sits at -gain / mean.
    let floor = -GAIN / BACKGROUND;
    let ring_k = geometry().k_of_radius(RING_RADIUS_PX);
    for (k, v) in curve.k.iter().zip(&curve.variance) {
        if (k - ring_k).abs() > 0.6 {
            assert!((v - floor).abs() < 0.002, "V({:.3}) = {} vs floor {}", k, v, floor);
        }
    }

    let ring_peak = curve
        .k
        .iter()
        .zip(&curve.variance)
        .filter(|(k, _)| (*k - ring_k).abs() < 0.1)
        .map(|(_, v)| *v)
        .fold(f64::MIN, f64::max);
    assert!(ring_peak > 0.003, "ring variance {}", ring_peak);
}

#[test]
fn thickness_bins_are_independent_datasets() {
    let stack = ring_stack(4, 6, 99);
    let calibration = Calibration::uncorrected(SIZE, SIZE, geometry());

    // HAADF ramp along the scan columns: counts 0..5 map to 10..35 nm.
    let haadf: Vec<f64> = (0..24).map(|i| (i % 6) as f64).collect();
    let map = ThicknessMap::from_haadf(&haadf, stack.scan_shape(), 5.0, 10.0).expect("map");
    let bins = ThicknessBin::linear(10.0, 40.0, 2).expect("bins");
    let groups = partition_by_thickness(&map, &bins);
    assert_eq!(groups.iter().map(Vec::len).collect::<Vec<_>>(), vec![12, 12]);

    let curves = groups
        .iter()
        .map(|idx| {
            let sub = stack.select(idx).expect("subset");
            compute_variance(&sub, &calibration, &omega_config()).expect("variance")
        })
        .collect::<Vec<_>>();
    assert!(curves.iter().all(|c| c.n_positions == 12));

    let avg = average_curves(&curves).expect("average");
    assert_eq!(avg.n_curves, 2);
    assert_eq!(avg.k, curves[0].k);
    assert!(avg.count.iter().all(|&n| n == 2));
    assert!(avg.std_err.iter().all(|s| s.is_finite() && *s >= 0.0));
}

#[test]
fn polar_methods_share_the_k_axis_of_omega() {
    let stack = ring_stack(3, 3, 5);
    let calibration = Calibration::uncorrected(SIZE, SIZE, geometry());
    let omega = compute_variance(&stack, &calibration, &omega_config()).expect("omega");

    for method in [VarianceMethod::R, VarianceMethod::Re] {
        let cfg = VarianceConfig {
            method,
            radial: RadialConfig {
                npt_azim: 36,
                ..omega_config().radial
            },
            ..omega_config()
        };
        let curve = compute_variance(&stack, &calibration, &cfg).expect("polar variance");
        assert_eq!(curve.k, omega.k);
        assert_eq!(curve.method, method);
        assert!(curve.variance.iter().all(|v| v.is_finite()));
    }
}
