//! femvar CLI — FEM variance from a directory of diffraction patterns.

use clap::{Args, Parser, Subcommand};
use image::{DynamicImage, ImageBuffer, Luma, Pixel, Primitive};
use serde::Serialize;
use std::path::{Path, PathBuf};

use femvar::{
    average_curves, compute_variance_masked, estimate_center_and_affine,
    estimate_center_or_default, partition_by_thickness, sum_patterns, Calibration, CenterConfig,
    CenterEstimate, FemConfig, Mask, Pattern, PatternStack, ThicknessBin, ThicknessMap,
    VarianceCurve,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "femvar")]
#[command(about = "Fluctuation electron microscopy variance from 4D-STEM diffraction patterns")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the pattern center and ellipticity correction of one image.
    Center(CliCenterArgs),

    /// Compute a variance curve over a scan of diffraction patterns.
    Variance(CliVarianceArgs),

    /// Average variance curves of independent datasets.
    Average(CliAverageArgs),
}

#[derive(Debug, Clone, Args)]
struct CliCenterArgs {
    /// Calibration image, usually the sum of all patterns.
    #[arg(long)]
    image: PathBuf,

    /// Exclusion mask; nonzero pixels are ignored.
    #[arg(long)]
    mask: Option<PathBuf>,

    /// Number of brightest pixels handed to the ellipse fit.
    #[arg(long, default_value = "1000")]
    num_points: usize,

    /// RANSAC seed.
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Write the geometric image center instead of failing when the fit does not converge.
    #[arg(long)]
    fallback: bool,

    /// Path to write the center estimate (JSON).
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct CliVarianceArgs {
    /// Directory of patterns, row-major over the scan in file-name order.
    #[arg(long)]
    patterns: PathBuf,

    /// Number of scan columns.
    #[arg(long)]
    scan_cols: usize,

    /// Pipeline configuration (JSON); only `geometry` is required.
    #[arg(long)]
    config: PathBuf,

    /// Center estimate from `femvar center`; fitted on the summed patterns when omitted.
    #[arg(long)]
    center: Option<PathBuf>,

    /// Exclusion mask; nonzero pixels are ignored.
    #[arg(long)]
    mask: Option<PathBuf>,

    /// HAADF image with one pixel per scan position, enables thickness binning.
    #[arg(long, requires = "thickness_bins")]
    haadf: Option<PathBuf>,

    /// Thickness per HAADF count.
    #[arg(long, default_value = "1.0")]
    thickness_slope: f64,

    /// Thickness at zero HAADF counts.
    #[arg(long, default_value = "0.0")]
    thickness_intercept: f64,

    /// Thickness bin edges, e.g. `10,20,30`.
    #[arg(long, value_delimiter = ',', requires = "haadf")]
    thickness_bins: Vec<f64>,

    /// Path to write the variance curve(s) (JSON).
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct CliAverageArgs {
    /// Variance curves (JSON) sharing one k axis.
    #[arg(long, num_args = 1.., required = true)]
    curves: Vec<PathBuf>,

    /// Path to write the averaged curve (JSON).
    #[arg(long)]
    out: PathBuf,
}

/// Variance of one thickness bin.
#[derive(Serialize)]
struct ThicknessCurve {
    bin: ThicknessBin,
    positions: usize,
    curve: Option<VarianceCurve>,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Center(args) => run_center(&args),
        Commands::Variance(args) => run_variance(&args),
        Commands::Average(args) => run_average(&args),
    }
}

// ── center ─────────────────────────────────────────────────────────────

fn run_center(args: &CliCenterArgs) -> CliResult<()> {
    let image = load_counts(&args.image)?;
    let mask = args.mask.as_deref().map(load_mask).transpose()?;
    tracing::info!("Image size: {}x{}", image.width(), image.height());

    let mut config = CenterConfig {
        num_points: args.num_points,
        ..Default::default()
    };
    config.ransac.seed = args.seed;

    let estimate = if args.fallback {
        estimate_center_or_default(&image, mask.as_ref(), &config)
    } else {
        estimate_center_and_affine(&image, mask.as_ref(), &config)?
    };
    log_estimate(&estimate);

    write_json(&args.out, &estimate)
}

// ── variance ───────────────────────────────────────────────────────────

fn run_variance(args: &CliVarianceArgs) -> CliResult<()> {
    let config: FemConfig = read_json(&args.config)?;
    config.validate()?;

    let stack = load_stack(&args.patterns, args.scan_cols)?;
    let mask = args.mask.as_deref().map(load_mask).transpose()?;

    let estimate = match &args.center {
        Some(path) => read_json::<CenterEstimate>(path)?,
        None => {
            let summed = sum_patterns(&stack).ok_or("no patterns to calibrate on")?;
            let est = estimate_center_or_default(&summed, mask.as_ref(), &config.center);
            log_estimate(&est);
            est
        }
    };
    let calibration = Calibration::from_estimate(&estimate, config.geometry);

    let Some(haadf_path) = &args.haadf else {
        let curve = compute_variance_masked(&stack, &calibration, &config.variance, mask.as_ref())?;
        return write_json(&args.out, &curve);
    };

    let haadf = load_counts(haadf_path)?;
    let map = ThicknessMap::from_haadf_image(&haadf, args.thickness_slope, args.thickness_intercept)?;
    map.check_scan(&stack)?;
    let bins = ThicknessBin::from_edges(&args.thickness_bins)?;
    let groups = partition_by_thickness(&map, &bins);

    let mut results = Vec::with_capacity(bins.len());
    for (bin, indices) in bins.iter().zip(&groups) {
        let curve = if indices.is_empty() {
            tracing::warn!("No scan positions in thickness bin [{}, {})", bin.lo, bin.hi);
            None
        } else {
            let sub = stack.select(indices)?;
            tracing::info!(
                "Thickness bin [{}, {}): {} positions",
                bin.lo,
                bin.hi,
                indices.len()
            );
            Some(compute_variance_masked(
                &sub,
                &calibration,
                &config.variance,
                mask.as_ref(),
            )?)
        };
        results.push(ThicknessCurve {
            bin: *bin,
            positions: indices.len(),
            curve,
        });
    }
    write_json(&args.out, &results)
}

// ── average ────────────────────────────────────────────────────────────

fn run_average(args: &CliAverageArgs) -> CliResult<()> {
    let curves = args
        .curves
        .iter()
        .map(|p| read_json::<VarianceCurve>(p))
        .collect::<CliResult<Vec<_>>>()?;
    let avg = average_curves(&curves)?;
    tracing::info!("Averaged {} curves over {} k bins", avg.n_curves, avg.k.len());
    write_json(&args.out, &avg)
}

// ── io ─────────────────────────────────────────────────────────────────

fn log_estimate(est: &CenterEstimate) {
    let e = &est.ellipse;
    tracing::info!(
        "Center ({:.2}, {:.2}), axes {:.2}/{:.2} px, angle {:.3} rad, {}/{} inliers",
        e.cx,
        e.cy,
        e.a,
        e.b,
        e.angle,
        est.num_inliers,
        est.num_points
    );
}

/// Grayscale image as raw detector counts (integer formats are not rescaled).
fn load_counts(path: &Path) -> CliResult<Pattern> {
    let img = image::open(path).map_err(|e| -> CliError {
        format!("Failed to open image {}: {}", path.display(), e).into()
    })?;
    match img {
        DynamicImage::ImageLuma8(g) => Ok(to_pattern(&g)),
        DynamicImage::ImageLuma16(g) => Ok(to_pattern(&g)),
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => Ok(img.to_luma32f()),
        other => Err(format!(
            "{} is not a grayscale image ({:?})",
            path.display(),
            other.color()
        )
        .into()),
    }
}

fn to_pattern<T>(g: &ImageBuffer<Luma<T>, Vec<T>>) -> Pattern
where
    T: Primitive + Into<f32>,
    Luma<T>: Pixel<Subpixel = T>,
{
    Pattern::from_fn(g.width(), g.height(), |x, y| {
        Luma([g.get_pixel(x, y)[0].into()])
    })
}

fn load_mask(path: &Path) -> CliResult<Mask> {
    let img = image::open(path).map_err(|e| -> CliError {
        format!("Failed to open mask {}: {}", path.display(), e).into()
    })?;
    Ok(img.to_luma8())
}

fn load_stack(dir: &Path, scan_cols: usize) -> CliResult<PatternStack> {
    if scan_cols == 0 {
        return Err("--scan-cols must be positive".into());
    }
    let mut files = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect::<Vec<_>>();
    files.sort();
    if files.len() % scan_cols != 0 {
        return Err(format!(
            "{} patterns do not fill rows of {} columns",
            files.len(),
            scan_cols
        )
        .into());
    }

    let patterns = files
        .iter()
        .map(|p| load_counts(p))
        .collect::<CliResult<Vec<_>>>()?;
    let rows = patterns.len() / scan_cols;
    let stack = PatternStack::new([rows, scan_cols], patterns)?;
    if let Some((w, h)) = stack.pattern_dimensions() {
        tracing::info!(
            "Loaded {} patterns ({}x{} scan, {}x{} px)",
            stack.len(),
            rows,
            scan_cols,
            w,
            h
        );
    }
    Ok(stack)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> CliResult<T> {
    let text = std::fs::read_to_string(path).map_err(|e| -> CliError {
        format!("Failed to read {}: {}", path.display(), e).into()
    })?;
    Ok(serde_json::from_str(&text)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> CliResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, &json)?;
    tracing::info!("Results written to {}", path.display());
    Ok(())
}
