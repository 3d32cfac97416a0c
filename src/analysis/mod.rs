pub mod edges;
pub mod ela;
pub mod noise;

use crate::{AnalysisResult, DecodedImage, Signal, error::Result};

/// A pixel-level signal computed from a decoded image alone.
pub trait SignalAnalyzer: Sync {
    fn signal(&self) -> Signal;

    fn analyze(&self, image: &DecodedImage) -> Result<AnalysisResult>;
}
