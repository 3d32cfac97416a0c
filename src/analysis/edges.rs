use image::RgbImage;
use imageproc::gradients::sobel_gradients;
use ndarray::Array2;
use statrs::statistics::Statistics;

use crate::{
    AnalysisResult, DecodedImage, Overlay, Signal,
    analysis::SignalAnalyzer,
    error::Result,
    image_utils::{BlockGrid, block_mean, block_view, normalize_min_max, paint_blocks},
};

/// Spread of per-block edge strength. Regions pasted from a sharper or
/// softer source show up as blocks far from the rest.
pub struct EdgeAnalyzer {
    block_size: u32,
}

impl EdgeAnalyzer {
    pub fn new(block_size: u32) -> Self {
        Self { block_size }
    }
}

impl SignalAnalyzer for EdgeAnalyzer {
    fn signal(&self) -> Signal {
        Signal::Edges
    }

    fn analyze(&self, image: &DecodedImage) -> Result<AnalysisResult> {
        let gray = image.gray();
        let (width, height) = gray.dimensions();
        let grid = BlockGrid::new(width, height, self.block_size)?;

        if grid.is_empty() {
            return Ok(AnalysisResult {
                score: 0.0,
                overlay: Overlay::InMemory(RgbImage::new(width, height)),
            });
        }

        let gradients = sobel_gradients(&gray);
        let mut magnitudes = Array2::zeros((height as usize, width as usize));
        for (x, y, pixel) in gradients.enumerate_pixels() {
            magnitudes[[y as usize, x as usize]] = pixel[0] as f64;
        }

        let means = grid
            .blocks()
            .map(|block| block_mean(&block_view(&magnitudes, &block)))
            .collect::<Vec<_>>();

        let normalized = normalize_min_max(&means);
        let spread = normalized.iter().population_std_dev();
        let score = if spread.is_finite() { spread } else { 0.0 };

        log::debug!("edges: blocks={} score={score:.4}", grid.len());

        Ok(AnalysisResult {
            score,
            overlay: Overlay::InMemory(paint_blocks(&grid, &normalized, width, height)),
        })
    }
}
