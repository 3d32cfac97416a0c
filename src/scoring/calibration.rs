//! Offline fitting of signal weights from labelled images.
//!
//! A logistic model is fitted on the four raw signal scores; its
//! coefficients, min-max scaled into `[0, 1]`, become the new weights. The
//! online aggregator never depends on this module.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};
use rayon::prelude::*;
use statrs::function::logistic::logistic;

use crate::{
    AnalysisConfig, DecodedImage,
    analysis::{SignalAnalyzer, edges::EdgeAnalyzer, ela::ElaAnalyzer, noise::NoiseAnalyzer},
    error::{ForensicsError, Result},
    image_utils::NORMALIZE_EPSILON,
    metadata::exif::MetadataInspector,
    scoring::SignalWeights,
};

/// Raw scores in `[ela, noise, edges, exif]` order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelledSample {
    pub features: [f64; 4],
    pub manipulated: bool,
}

#[derive(Debug, Clone)]
pub struct CalibrationReport {
    pub weights: SignalWeights,
    pub coefficients: [f64; 4],
    pub intercept: f64,
    /// In-sample ROC AUC of the fitted model.
    pub auc: f64,
    pub samples: usize,
    pub skipped: usize,
}

/// Batch gradient descent on class-balanced log-loss with an L2 penalty.
/// Starts from zero, so fitting is deterministic.
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    learning_rate: f64,
    iterations: usize,
    l2: f64,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self {
            learning_rate: 0.5,
            iterations: 5000,
            l2: 1e-3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FittedModel {
    pub coefficients: Array1<f64>,
    pub intercept: f64,
}

impl FittedModel {
    pub fn predict_proba(&self, features: &[f64]) -> f64 {
        let z = self
            .coefficients
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.intercept;
        logistic(z)
    }
}

impl LogisticRegression {
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn fit(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<FittedModel> {
        let (n, d) = x.dim();
        let positives = y.iter().filter(|&&v| v > 0.5).count();
        let negatives = n - positives;

        if positives == 0 || negatives == 0 {
            return Err(ForensicsError::Calibration(format!(
                "need both classes, got {positives} manipulated and {negatives} authentic"
            )));
        }

        // balanced class weights: n / (2 * class_count)
        let pos_weight = n as f64 / (2.0 * positives as f64);
        let neg_weight = n as f64 / (2.0 * negatives as f64);
        let sample_weights = y.mapv(|v| if v > 0.5 { pos_weight } else { neg_weight });

        let mut w = Array1::<f64>::zeros(d);
        let mut b = 0.0;

        for _ in 0..self.iterations {
            let z = x.dot(&w) + b;
            let p = z.mapv(logistic);
            let residual = (&p - y) * &sample_weights;

            let grad_w = x.t().dot(&residual) / n as f64 + &w * self.l2;
            let grad_b = residual.sum() / n as f64;

            w = w - grad_w * self.learning_rate;
            b -= grad_b * self.learning_rate;
        }

        Ok(FittedModel {
            coefficients: w,
            intercept: b,
        })
    }
}

/// Min-max scales coefficients into `[0, 1]`, keyed in signal order.
pub fn derive_weights(coefficients: &[f64; 4]) -> SignalWeights {
    let min = coefficients.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = coefficients.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min + NORMALIZE_EPSILON;
    let scaled = coefficients.map(|c| (c - min) / range);

    SignalWeights {
        ela: scaled[0],
        noise: scaled[1],
        edges: scaled[2],
        exif: scaled[3],
    }
}

/// Rank-based ROC AUC; tied pairs count one half.
pub fn roc_auc(scores: &[f64], labels: &[bool]) -> f64 {
    let positives = scores
        .iter()
        .zip(labels)
        .filter(|(_, l)| **l)
        .map(|(s, _)| *s)
        .collect::<Vec<_>>();
    let negatives = scores
        .iter()
        .zip(labels)
        .filter(|(_, l)| !**l)
        .map(|(s, _)| *s)
        .collect::<Vec<_>>();

    if positives.is_empty() || negatives.is_empty() {
        return 0.5;
    }

    let mut wins = 0.0;
    for p in &positives {
        for n in &negatives {
            if p > n {
                wins += 1.0;
            } else if p == n {
                wins += 0.5;
            }
        }
    }

    wins / (positives.len() * negatives.len()) as f64
}

/// Computes the four raw signal scores for one image.
pub fn feature_vector<P: AsRef<Path>>(path: P, config: &AnalysisConfig) -> Result<[f64; 4]> {
    let path = path.as_ref();
    let image = DecodedImage::open(path)?;
    let section = &config.analysis;

    let ela = ElaAnalyzer::new(section.ela_quality)
        .with_threshold(section.ela_threshold)
        .analyze(&image)?;
    let noise = NoiseAnalyzer::new(section.block_size).analyze(&image)?;
    let edges = EdgeAnalyzer::new(section.block_size).analyze(&image)?;
    let exif = MetadataInspector::new(&config.scoring.suspicious_software).inspect(path);

    Ok([ela.score, noise.score, edges.score, exif.score])
}

pub fn calibrate(samples: &[LabelledSample]) -> Result<CalibrationReport> {
    calibrate_with(samples, &LogisticRegression::default())
}

pub fn calibrate_with(
    samples: &[LabelledSample],
    model: &LogisticRegression,
) -> Result<CalibrationReport> {
    let mut x = Array2::zeros((samples.len(), 4));
    for (row, sample) in samples.iter().enumerate() {
        for (col, value) in sample.features.iter().enumerate() {
            x[[row, col]] = *value;
        }
    }
    let y = samples
        .iter()
        .map(|s| if s.manipulated { 1.0 } else { 0.0 })
        .collect::<Array1<f64>>();

    let fitted = model.fit(&x, &y)?;

    let coefficients = [
        fitted.coefficients[0],
        fitted.coefficients[1],
        fitted.coefficients[2],
        fitted.coefficients[3],
    ];

    let probabilities = samples
        .iter()
        .map(|s| fitted.predict_proba(&s.features))
        .collect::<Vec<_>>();
    let labels = samples.iter().map(|s| s.manipulated).collect::<Vec<_>>();
    let auc = roc_auc(&probabilities, &labels);

    let weights = derive_weights(&coefficients);
    log::info!(
        "calibration: samples={} auc={auc:.3} weights={weights:?}",
        samples.len()
    );

    Ok(CalibrationReport {
        weights,
        coefficients,
        intercept: fitted.intercept,
        auc,
        samples: samples.len(),
        skipped: 0,
    })
}

/// Scores every labelled image and fits weights. Images that fail to decode
/// are skipped.
pub fn calibrate_paths(
    labelled: &[(PathBuf, bool)],
    config: &AnalysisConfig,
) -> Result<CalibrationReport> {
    let scored = labelled
        .par_iter()
        .map(|(path, manipulated)| match feature_vector(path, config) {
            Ok(features) => Some(LabelledSample {
                features,
                manipulated: *manipulated,
            }),
            Err(e) => {
                log::warn!("calibration: skipping {}: {e}", path.display());
                None
            }
        })
        .collect::<Vec<_>>();

    let skipped = scored.iter().filter(|s| s.is_none()).count();
    let samples = scored.into_iter().flatten().collect::<Vec<_>>();

    let mut report = calibrate(&samples)?;
    report.skipped = skipped;
    Ok(report)
}
