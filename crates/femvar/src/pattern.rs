//! In-memory diffraction data: single patterns and probe-position stacks.

use image::{GrayImage, ImageBuffer, Luma};

use crate::error::{FemError, Result};

/// One diffraction pattern (or any intensity image); x = column, y = row.
pub type Pattern = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Pixel exclusion mask; any nonzero value excludes the pixel.
pub type Mask = GrayImage;

/// Diffraction patterns of a probe scan, stored row-major over the scan grid.
///
/// All patterns share one pixel geometry.
#[derive(Debug, Clone)]
pub struct PatternStack {
    scan_shape: [usize; 2],
    patterns: Vec<Pattern>,
}

impl PatternStack {
    /// Build a stack over a `[rows, cols]` scan.
    pub fn new(scan_shape: [usize; 2], patterns: Vec<Pattern>) -> Result<Self> {
        let [rows, cols] = scan_shape;
        if rows * cols != patterns.len() {
            return Err(FemError::ShapeMismatch(format!(
                "scan {}x{} needs {} patterns, got {}",
                rows,
                cols,
                rows * cols,
                patterns.len()
            )));
        }
        if let Some(first) = patterns.first() {
            let dims = first.dimensions();
            if let Some((i, p)) = patterns
                .iter()
                .enumerate()
                .find(|(_, p)| p.dimensions() != dims)
            {
                return Err(FemError::ShapeMismatch(format!(
                    "pattern {} is {:?}, expected {:?}",
                    i,
                    p.dimensions(),
                    dims
                )));
            }
        }
        Ok(Self {
            scan_shape,
            patterns,
        })
    }

    /// Stack with a single scan row, for subsets that no longer form a grid.
    pub fn from_patterns(patterns: Vec<Pattern>) -> Result<Self> {
        Self::new([1, patterns.len()], patterns)
    }

    pub fn scan_shape(&self) -> [usize; 2] {
        self.scan_shape
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Pixel `(width, height)` shared by every pattern, if any.
    pub fn pattern_dimensions(&self) -> Option<(u32, u32)> {
        self.patterns.first().map(|p| p.dimensions())
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Pattern> {
        self.patterns.iter()
    }

    /// Pattern at scan position `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> Option<&Pattern> {
        let [rows, cols] = self.scan_shape;
        (row < rows && col < cols).then(|| &self.patterns[row * cols + col])
    }

    /// Sub-stack of the given row-major probe indices (a flat single-row scan).
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        let picked = indices
            .iter()
            .map(|&i| {
                self.patterns.get(i).cloned().ok_or_else(|| {
                    FemError::ShapeMismatch(format!(
                        "probe index {} outside stack of {}",
                        i,
                        self.len()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_patterns(picked)
    }
}

/// Pixelwise sum over the stack, the usual calibration image.
pub fn sum_patterns(stack: &PatternStack) -> Option<Pattern> {
    let (w, h) = stack.pattern_dimensions()?;
    let mut acc = vec![0.0f64; (w * h) as usize];
    for p in stack.iter() {
        for (a, v) in acc.iter_mut().zip(p.as_raw()) {
            *a += *v as f64;
        }
    }
    Pattern::from_raw(w, h, acc.into_iter().map(|v| v as f32).collect())
}
