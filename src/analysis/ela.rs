use std::io::Cursor;

use image::{DynamicImage, GrayImage, Rgb, RgbImage};

use crate::{
    AnalysisResult, DecodedImage, Overlay, Signal, analysis::SignalAnalyzer, error::Result,
    image_utils::rgb_to_gray,
};

/// Brightness gain applied to the difference image before thresholding.
const AMPLIFICATION: f64 = 20.0;

/// Error level analysis: re-encodes the image as JPEG and measures how much
/// of it changes by more than a brightness threshold.
pub struct ElaAnalyzer {
    quality: u8,
    threshold: u8,
}

impl ElaAnalyzer {
    pub fn new(quality: u8) -> Self {
        Self {
            quality,
            threshold: 30,
        }
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    fn recompress_jpeg(&self, rgb: &RgbImage) -> Result<RgbImage> {
        let mut buffer = Cursor::new(Vec::new());

        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, self.quality);
        DynamicImage::ImageRgb8(rgb.clone()).write_with_encoder(encoder)?;

        let recompressed = image::load_from_memory(&buffer.into_inner())?;

        Ok(recompressed.to_rgb8())
    }

    fn amplified_difference(&self, original: &RgbImage, recompressed: &RgbImage) -> RgbImage {
        let (width, height) = original.dimensions();
        let mut ela_image = RgbImage::new(width, height);

        for (x, y, orig) in original.enumerate_pixels() {
            let recomp = recompressed.get_pixel(x, y);
            let mut out = [0u8; 3];

            for c in 0..3 {
                let diff = (orig[c] as i32 - recomp[c] as i32).abs() as f64;
                out[c] = (diff * AMPLIFICATION).min(255.0) as u8;
            }

            ela_image.put_pixel(x, y, Rgb(out));
        }

        ela_image
    }
}

/// Fraction of pixels strictly brighter than `threshold`.
fn hot_fraction(intensity: &GrayImage, threshold: u8) -> f64 {
    let total = intensity.width() as usize * intensity.height() as usize;
    if total == 0 {
        return 0.0;
    }
    let hot = intensity.pixels().filter(|p| p[0] > threshold).count();
    hot as f64 / total as f64
}

impl SignalAnalyzer for ElaAnalyzer {
    fn signal(&self) -> Signal {
        Signal::Ela
    }

    fn analyze(&self, image: &DecodedImage) -> Result<AnalysisResult> {
        if image.is_empty() {
            return Ok(AnalysisResult {
                score: 0.0,
                overlay: Overlay::blank(),
            });
        }

        let rgb = image.rgb();
        let recompressed = self.recompress_jpeg(rgb)?;
        let ela_image = self.amplified_difference(rgb, &recompressed);

        let score = hot_fraction(&rgb_to_gray(&ela_image), self.threshold);

        log::debug!(
            "ela: quality={} threshold={} score={score:.4}",
            self.quality,
            self.threshold
        );

        Ok(AnalysisResult {
            score,
            overlay: Overlay::InMemory(ela_image),
        })
    }
}
