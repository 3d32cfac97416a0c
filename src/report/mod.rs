use std::collections::BTreeMap;

use serde::Serialize;

use crate::{ClaimAnalysis, Signal, retrieval::SimilarityMatch, scoring::ConfidenceLevel};

/// Flat, serialisable view of a [`ClaimAnalysis`] for UI and PDF renderers.
/// Every signal key is always present.
#[derive(Debug, Serialize)]
pub struct JsonReport {
    pub final_score: f64,
    pub confidence: ConfidenceLevel,
    pub explanation: String,
    pub signals: BTreeMap<Signal, f64>,
    pub metadata: MetadataReportSection,
    pub similar: Vec<SimilarityMatch>,
}

#[derive(Debug, Serialize)]
pub struct MetadataReportSection {
    pub has_metadata: bool,
    pub software: Option<String>,
    pub flags: Vec<String>,
}

impl From<&ClaimAnalysis> for JsonReport {
    fn from(analysis: &ClaimAnalysis) -> Self {
        let aggregate = &analysis.aggregate;

        Self {
            final_score: aggregate.final_score,
            confidence: ConfidenceLevel::from_score(aggregate.final_score),
            explanation: aggregate.explanation_text(),
            signals: Signal::ALL
                .iter()
                .map(|&signal| (signal, aggregate.score(signal)))
                .collect(),
            metadata: MetadataReportSection {
                has_metadata: aggregate.metadata.has_metadata,
                software: aggregate.metadata.software_tag.clone(),
                flags: aggregate.metadata.flags.clone(),
            },
            similar: analysis.similar.clone(),
        }
    }
}

impl JsonReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
