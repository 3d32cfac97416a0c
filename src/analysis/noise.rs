use image::RgbImage;

use crate::{
    AnalysisResult, DecodedImage, Overlay, Signal,
    analysis::SignalAnalyzer,
    error::Result,
    image_utils::{BlockGrid, block_variance, block_view, gray_to_array, normalize_min_max, paint_blocks},
};

/// Block-wise intensity variance, summarised by the noisiest quartile of
/// blocks.
pub struct NoiseAnalyzer {
    block_size: u32,
}

impl NoiseAnalyzer {
    pub fn new(block_size: u32) -> Self {
        Self { block_size }
    }
}

/// Mean of the largest quarter of `values` (at least one). Equal values keep
/// block order.
pub(crate) fn top_quartile_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut ranked = values.to_vec();
    ranked.sort_by(|a, b| b.total_cmp(a));

    let take = (values.len() / 4).max(1);
    ranked.iter().take(take).sum::<f64>() / take as f64
}

impl SignalAnalyzer for NoiseAnalyzer {
    fn signal(&self) -> Signal {
        Signal::Noise
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

        let arr = gray_to_array(&gray);
        let variances = grid
            .blocks()
            .map(|block| block_variance(&block_view(&arr, &block)))
            .collect::<Vec<_>>();

        let normalized = normalize_min_max(&variances);
        let score = top_quartile_mean(&normalized);

        log::debug!("noise: blocks={} score={score:.4}", grid.len());

        Ok(AnalysisResult {
            score,
            overlay: Overlay::InMemory(paint_blocks(&grid, &normalized, width, height)),
        })
    }
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    #[test]
    fn test_uniform_image_scores_zero() {
        let image = DecodedImage::from_rgb(RgbImage::from_pixel(48, 40, Rgb([90, 90, 90])));
        let result = NoiseAnalyzer::new(16).analyze(&image).unwrap();
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_single_pixel() {
        let image = DecodedImage::from_rgb(RgbImage::from_pixel(1, 1, Rgb([3, 200, 17])));
        let result = NoiseAnalyzer::new(16).analyze(&image).unwrap();
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_empty_image_gets_zero_overlay() {
        let image = DecodedImage::from_rgb(RgbImage::new(0, 0));
        let result = NoiseAnalyzer::new(8).analyze(&image).unwrap();
        assert_eq!(result.score, 0.0);
        assert!(matches!(result.overlay, Overlay::InMemory(ref img) if img.dimensions() == (0, 0)));
    }

    #[test]
    fn test_noisy_block_dominates_quartile() {
        // 2x2 blocks, only the bottom-right one textured
        let rgb = RgbImage::from_fn(32, 32, |x, y| {
            if x >= 16 && y >= 16 && (x + y) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let result = NoiseAnalyzer::new(16).analyze(&DecodedImage::from_rgb(rgb)).unwrap();
        assert!(result.score > 0.99 && result.score <= 1.0);

        let overlay = result.overlay.load().unwrap();
        assert_eq!(overlay.dimensions(), (32, 32));
        assert_eq!(overlay.get_pixel(0, 0)[0], 0);
        assert!(overlay.get_pixel(31, 31)[0] >= 254);
    }

    #[test]
    fn test_clipped_blocks_cover_whole_overlay() {
        let rgb = RgbImage::from_fn(37, 21, |x, y| Rgb([((x * 7 + y * 13) % 256) as u8, 0, 0]));
        let result = NoiseAnalyzer::new(16).analyze(&DecodedImage::from_rgb(rgb)).unwrap();
        assert!((0.0..=1.0).contains(&result.score));
        assert_eq!(result.overlay.load().unwrap().dimensions(), (37, 21));
    }

    #[test]
    fn test_top_quartile_mean_keeps_at_least_one() {
        assert_eq!(top_quartile_mean(&[0.2, 0.9, 0.1]), 0.9);
        let mean = top_quartile_mean(&[0.0, 1.0, 0.5, 0.25, 0.75, 0.5, 0.1, 0.9]);
        assert!((mean - 0.95).abs() < 1e-12);
        assert_eq!(top_quartile_mean(&[]), 0.0);
    }

    #[test]
    fn test_zero_block_size_is_rejected() {
        let image = DecodedImage::from_rgb(RgbImage::new(4, 4));
        assert!(NoiseAnalyzer::new(0).analyze(&image).is_err());
    }
}
