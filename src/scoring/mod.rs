pub mod calibration;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{AggregateResult, AnalysisResult, MetadataInfo, Overlay, Signal};

/// Per-signal multipliers. They are not required to sum to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalWeights {
    pub ela: f64,
    pub noise: f64,
    pub edges: f64,
    pub exif: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            ela: 0.4,
            noise: 0.3,
            edges: 0.2,
            exif: 0.1,
        }
    }
}

impl SignalWeights {
    pub fn get(&self, signal: Signal) -> f64 {
        match signal {
            Signal::Ela => self.ela,
            Signal::Noise => self.noise,
            Signal::Edges => self.edges,
            Signal::Exif => self.exif,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    None,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s < 0.2 => ConfidenceLevel::None,
            s if s < 0.4 => ConfidenceLevel::Low,
            s if s < 0.6 => ConfidenceLevel::Medium,
            s if s < 0.8 => ConfidenceLevel::High,
            _ => ConfidenceLevel::VeryHigh,
        }
    }
}

/// Weighted sum of the four signals plus a line-per-signal explanation.
pub struct SignalAggregator {
    weights: SignalWeights,
}

impl SignalAggregator {
    pub fn new(weights: SignalWeights) -> Self {
        Self { weights }
    }

    pub fn aggregate(
        &self,
        ela: AnalysisResult,
        noise: AnalysisResult,
        edges: AnalysisResult,
        metadata: MetadataInfo,
    ) -> AggregateResult {
        let breakdown = BTreeMap::from([
            (Signal::Ela, ela.score),
            (Signal::Noise, noise.score),
            (Signal::Edges, edges.score),
            (Signal::Exif, metadata.score),
        ]);

        let final_score = Signal::ALL
            .iter()
            .map(|&signal| self.weights.get(signal) * breakdown[&signal])
            .sum::<f64>();

        let explanation = Self::explain(&breakdown, &metadata);

        log::debug!("aggregate: final_score={final_score:.4}");

        AggregateResult {
            final_score,
            explanation,
            breakdown,
            overlays: BTreeMap::from([
                (Signal::Ela, ela.overlay),
                (Signal::Noise, noise.overlay),
                (Signal::Edges, edges.overlay),
                (Signal::Exif, Overlay::blank()),
            ]),
            metadata,
        }
    }

    fn explain(breakdown: &BTreeMap<Signal, f64>, metadata: &MetadataInfo) -> Vec<String> {
        let mut lines = vec![
            format!("ELA score={:.2} (manipulation hotspots)", breakdown[&Signal::Ela]),
            format!("Noise score={:.2} (block variance)", breakdown[&Signal::Noise]),
            format!("Edges score={:.2} (edge magnitude std)", breakdown[&Signal::Edges]),
        ];

        match metadata.software_tag {
            Some(ref software) => {
                let flags = if metadata.flags.is_empty() {
                    "none".to_string()
                } else {
                    metadata.flags.join(",")
                };
                lines.push(format!("EXIF software={software} - flags={flags}"));
            }
            None => lines.push(format!("EXIF present={}", metadata.has_metadata)),
        }

        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(score: f64) -> AnalysisResult {
        AnalysisResult {
            score,
            overlay: Overlay::blank(),
        }
    }

    fn flagged_metadata() -> MetadataInfo {
        MetadataInfo {
            has_metadata: true,
            software_tag: Some("GIMP 2.10".into()),
            flags: vec!["Software mentions gimp".into()],
            score: 1.0,
        }
    }

    #[test]
    fn test_final_score_is_weighted_sum() {
        let aggregator = SignalAggregator::new(SignalWeights::default());
        let aggregate = aggregator.aggregate(result(0.5), result(0.2), result(0.1), flagged_metadata());
        assert!((aggregate.final_score - 0.38).abs() < 1e-12);
    }

    #[test]
    fn test_weights_need_not_sum_to_one() {
        let weights = SignalWeights {
            ela: 1.0,
            noise: 1.0,
            edges: 1.0,
            exif: 1.0,
        };
        let aggregate = SignalAggregator::new(weights).aggregate(
            result(0.5),
            result(0.5),
            result(0.5),
            flagged_metadata(),
        );
        assert!((aggregate.final_score - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_explanation_with_software_tag() {
        let aggregate = SignalAggregator::new(SignalWeights::default()).aggregate(
            result(0.5),
            result(0.2),
            result(0.123),
            flagged_metadata(),
        );
        assert_eq!(
            aggregate.explanation,
            vec![
                "ELA score=0.50 (manipulation hotspots)",
                "Noise score=0.20 (block variance)",
                "Edges score=0.12 (edge magnitude std)",
                "EXIF software=GIMP 2.10 - flags=Software mentions gimp",
            ]
        );
    }

    #[test]
    fn test_explanation_without_software_tag() {
        let aggregate = SignalAggregator::new(SignalWeights::default()).aggregate(
            result(0.0),
            result(0.0),
            result(0.0),
            MetadataInfo::default(),
        );
        assert_eq!(aggregate.explanation.last().unwrap(), "EXIF present=false");
        assert_eq!(aggregate.explanation_text().lines().count(), 4);
    }

    #[test]
    fn test_every_signal_is_present() {
        let aggregate = SignalAggregator::new(SignalWeights::default()).aggregate(
            result(0.3),
            result(0.0),
            result(0.0),
            MetadataInfo::default(),
        );
        for signal in Signal::ALL {
            assert!(aggregate.breakdown.contains_key(&signal));
        }
        assert_eq!(aggregate.score(Signal::Ela), 0.3);
    }

    #[test]
    fn test_every_signal_has_an_overlay() {
        let aggregate = SignalAggregator::new(SignalWeights::default()).aggregate(
            AnalysisResult::default(),
            AnalysisResult::default(),
            AnalysisResult::default(),
            MetadataInfo::default(),
        );
        for signal in Signal::ALL {
            assert!(aggregate.overlays.contains_key(&signal), "{signal} has no overlay");
        }
        let exif = aggregate.overlay(Signal::Exif).load().unwrap();
        assert_eq!(exif.dimensions(), (0, 0));
    }

    #[test]
    fn test_confidence_bands() {
        assert_eq!(ConfidenceLevel::from_score(0.05), ConfidenceLevel::None);
        assert_eq!(ConfidenceLevel::from_score(0.38), ConfidenceLevel::Low);
        assert_eq!(ConfidenceLevel::from_score(0.95), ConfidenceLevel::VeryHigh);
    }
}
