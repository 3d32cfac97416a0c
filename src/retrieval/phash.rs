use std::{fmt, num::ParseIntError, str::FromStr};

use image::{RgbImage, imageops::FilterType};
use ndarray::Array2;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::{
    error::{ForensicsError, Result},
    image_utils::{gray_to_array, rgb_to_gray},
};

const HASH_SIZE: usize = 8;
const HIGHFREQ_FACTOR: usize = 4;
const SAMPLE_SIZE: usize = HASH_SIZE * HIGHFREQ_FACTOR;

/// 64-bit DCT perceptual fingerprint. Only comparable with fingerprints from
/// this same algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PerceptualHash(u64);

impl PerceptualHash {
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn hamming(&self, other: &PerceptualHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// Luma, Lanczos3 down to 32x32, 2-D DCT-II, then one bit per low
    /// frequency coefficient above the median. The first coefficient is the
    /// most significant bit.
    pub fn of_image(rgb: &RgbImage) -> Result<Self> {
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return Err(ForensicsError::AnalysisFailed(
                "Cannot fingerprint an empty image".into(),
            ));
        }

        let gray = rgb_to_gray(rgb);
        let small = image::imageops::resize(
            &gray,
            SAMPLE_SIZE as u32,
            SAMPLE_SIZE as u32,
            FilterType::Lanczos3,
        );
        let pixels = gray_to_array(&small);

        let basis = dct_matrix(SAMPLE_SIZE);
        let coefficients = basis.dot(&pixels).dot(&basis.t());

        let low = coefficients
            .slice(ndarray::s![..HASH_SIZE, ..HASH_SIZE])
            .iter()
            .cloned()
            .collect::<Vec<_>>();
        let median = median(&low);

        let bits = low
            .iter()
            .fold(0u64, |acc, &c| (acc << 1) | u64::from(c > median));

        Ok(Self(bits))
    }
}

/// Unnormalised DCT-II basis: `X[k] = 2 * sum(x[n] * cos(pi * k * (2n + 1) / 2N))`.
fn dct_matrix(n: usize) -> Array2<f64> {
    Array2::from_shape_fn((n, n), |(k, i)| {
        2.0 * (std::f64::consts::PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n as f64)).cos()
    })
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;

    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PerceptualHash {
    type Err = ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

// Stored as a decimal string so JSON readers without 64-bit integers keep
// every bit.
impl Serialize for PerceptualHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PerceptualHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
