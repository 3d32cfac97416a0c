use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use image::{DynamicImage, GrayImage, ImageReader, RgbImage};
use serde::{Deserialize, Serialize};

use crate::{
    analysis::{SignalAnalyzer, edges::EdgeAnalyzer, ela::ElaAnalyzer, noise::NoiseAnalyzer},
    error::{ForensicsError, Result},
    image_utils::rgb_to_gray,
    metadata::exif::MetadataInspector,
    report::JsonReport,
    retrieval::{SimilarityMatch, index::HashIndex},
    scoring::{SignalAggregator, SignalWeights},
};

pub mod analysis;
pub mod error;
pub mod image_utils;
pub mod metadata;
pub mod report;
pub mod retrieval;
pub mod scoring;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSection {
    pub ela_quality: u8,
    pub ela_threshold: u8,
    pub block_size: u32,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            ela_quality: 95,
            ela_threshold: 30,
            block_size: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSection {
    pub weights: SignalWeights,
    pub suspicious_software: Vec<String>,
}

impl Default for ScoringSection {
    fn default() -> Self {
        Self {
            weights: SignalWeights::default(),
            suspicious_software: ["photoshop", "gimp", "lightroom", "snapseed", "picsart", "canva"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub hash_index_path: PathBuf,
    pub top_k: usize,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            hash_index_path: PathBuf::from("data/index/hash_index.json"),
            top_k: 4,
        }
    }
}

/// Immutable settings handed to every analyzer and to the aggregator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub analysis: AnalysisSection,
    pub scoring: ScoringSection,
    pub retrieval: RetrievalSection,
}

impl AnalysisConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ForensicsError::InvalidParameter(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.analysis.block_size == 0 {
            return Err(ForensicsError::InvalidParameter(
                "analysis.block_size must be greater than zero".into(),
            ));
        }

        if !(1..=100).contains(&self.analysis.ela_quality) {
            return Err(ForensicsError::InvalidParameter(format!(
                "analysis.ela_quality must be within 1..=100, got {}",
                self.analysis.ela_quality
            )));
        }

        Ok(())
    }
}

/// Names of the four scored signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Ela,
    Noise,
    Edges,
    Exif,
}

impl Signal {
    pub const ALL: [Signal; 4] = [Signal::Ela, Signal::Noise, Signal::Edges, Signal::Exif];

    pub fn name(&self) -> &'static str {
        match self {
            Signal::Ela => "ela",
            Signal::Noise => "noise",
            Signal::Edges => "edges",
            Signal::Exif => "exif",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pixels decoded once per request and shared read-only by the analyzers.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    rgb: RgbImage,
}

impl DecodedImage {
    /// Decodes by content, falling back to the extension only when the
    /// bytes do not identify a format.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        Ok(Self::from_dynamic(&image))
    }

    pub fn from_dynamic(image: &DynamicImage) -> Self {
        Self { rgb: image.to_rgb8() }
    }

    pub fn from_rgb(rgb: RgbImage) -> Self {
        Self { rgb }
    }

    pub fn rgb(&self) -> &RgbImage {
        &self.rgb
    }

    pub fn gray(&self) -> GrayImage {
        rgb_to_gray(&self.rgb)
    }

    /// `(width, height)`
    pub fn dimensions(&self) -> (u32, u32) {
        self.rgb.dimensions()
    }

    pub fn is_empty(&self) -> bool {
        let (width, height) = self.dimensions();
        width == 0 || height == 0
    }
}

/// Visualisation attached to a signal, either still in memory or already
/// written somewhere by a presentation layer.
#[derive(Debug, Clone)]
pub enum Overlay {
    InMemory(RgbImage),
    Stored(PathBuf),
}

impl Overlay {
    pub fn blank() -> Self {
        Overlay::InMemory(RgbImage::new(0, 0))
    }

    /// Writes the overlay to `path` and returns the stored form.
    pub fn persist<P: AsRef<Path>>(&self, path: P) -> Result<Overlay> {
        let path = path.as_ref();
        match self {
            Overlay::InMemory(image) => {
                image.save(path)?;
                Ok(Overlay::Stored(path.to_path_buf()))
            }
            Overlay::Stored(existing) => {
                std::fs::copy(existing, path)?;
                Ok(Overlay::Stored(path.to_path_buf()))
            }
        }
    }

    pub fn load(&self) -> Result<RgbImage> {
        match self {
            Overlay::InMemory(image) => Ok(image.clone()),
            Overlay::Stored(path) => Ok(image::open(path)?.to_rgb8()),
        }
    }
}

impl Default for Overlay {
    fn default() -> Self {
        Self::blank()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisResult {
    pub score: f64,
    pub overlay: Overlay,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataInfo {
    pub has_metadata: bool,
    pub software_tag: Option<String>,
    pub flags: Vec<String>,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct AggregateResult {
    pub final_score: f64,
    pub explanation: Vec<String>,
    pub breakdown: BTreeMap<Signal, f64>,
    pub overlays: BTreeMap<Signal, Overlay>,
    pub metadata: MetadataInfo,
}

impl AggregateResult {
    pub fn score(&self, signal: Signal) -> f64 {
        self.breakdown.get(&signal).copied().unwrap_or(0.0)
    }

    /// Every signal has an overlay; the metadata signal only ever carries a
    /// blank one.
    pub fn overlay(&self, signal: Signal) -> &Overlay {
        static BLANK: LazyLock<Overlay> = LazyLock::new(Overlay::blank);
        self.overlays.get(&signal).unwrap_or(&BLANK)
    }

    pub fn explanation_text(&self) -> String {
        self.explanation.join("\n")
    }
}

/// Everything the presentation layer needs for one uploaded image.
#[derive(Debug, Clone)]
pub struct ClaimAnalysis {
    pub aggregate: AggregateResult,
    pub similar: Vec<SimilarityMatch>,
}

impl ClaimAnalysis {
    pub fn to_report(&self) -> JsonReport {
        JsonReport::from(self)
    }
}

pub struct ForensicsAnalyzer {
    config: AnalysisConfig,
}

impl ForensicsAnalyzer {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Scores the image and looks up similar reference images in parallel.
    /// Fails as a whole if the image cannot be decoded or the index is
    /// unavailable.
    pub fn analyze<P: AsRef<Path>>(&self, path: P) -> Result<ClaimAnalysis> {
        let path = path.as_ref();
        let image = DecodedImage::open(path)?;

        let (aggregate, similar) = rayon::join(
            || self.score_image(&image, path),
            || self.find_similar(&image),
        );

        Ok(ClaimAnalysis {
            aggregate: aggregate?,
            similar: similar?,
        })
    }

    /// Runs only the scoring branch.
    pub fn score<P: AsRef<Path>>(&self, path: P) -> Result<AggregateResult> {
        let path = path.as_ref();
        let image = DecodedImage::open(path)?;
        self.score_image(&image, path)
    }

    /// Runs the four signals concurrently over `image`. Metadata is read
    /// from the raw bytes at `source`.
    pub fn score_image(&self, image: &DecodedImage, source: &Path) -> Result<AggregateResult> {
        let section = &self.config.analysis;
        let ela = ElaAnalyzer::new(section.ela_quality).with_threshold(section.ela_threshold);
        let noise = NoiseAnalyzer::new(section.block_size);
        let edges = EdgeAnalyzer::new(section.block_size);
        let inspector = MetadataInspector::new(&self.config.scoring.suspicious_software);

        let ((ela_result, noise_result), (edges_result, metadata)) = rayon::join(
            || rayon::join(|| run_signal(&ela, image), || run_signal(&noise, image)),
            || rayon::join(|| run_signal(&edges, image), || inspector.inspect(source)),
        );

        let aggregator = SignalAggregator::new(self.config.scoring.weights.clone());
        Ok(aggregator.aggregate(ela_result?, noise_result?, edges_result?, metadata))
    }

    pub fn find_similar(&self, image: &DecodedImage) -> Result<Vec<SimilarityMatch>> {
        let index = HashIndex::load(&self.config.retrieval.hash_index_path)?;
        index.query_decoded(image, self.config.retrieval.top_k)
    }
}

fn run_signal(analyzer: &dyn SignalAnalyzer, image: &DecodedImage) -> Result<AnalysisResult> {
    let result = analyzer.analyze(image)?;
    log::debug!("{} finished with score {:.4}", analyzer.signal(), result.score);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::exif::tests::jpeg_with_software;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AnalysisConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_from_json_fills_defaults() {
        let config = AnalysisConfig::from_json_str(
            r#"{"analysis": {"block_size": 8}, "retrieval": {"top_k": 2}}"#,
        )
        .unwrap();
        assert_eq!(config.analysis.block_size, 8);
        assert_eq!(config.analysis.ela_quality, 95);
        assert_eq!(config.retrieval.top_k, 2);
        assert_eq!(config.scoring.weights.ela, 0.4);
    }

    #[test]
    fn test_config_rejects_zero_block_size() {
        let result = AnalysisConfig::from_json_str(r#"{"analysis": {"block_size": 0}}"#);
        assert!(matches!(result, Err(ForensicsError::InvalidParameter(_))));
    }

    #[test]
    fn test_signal_names_serialize_lowercase() {
        let json = serde_json::to_string(&Signal::Edges).unwrap();
        assert_eq!(json, "\"edges\"");
        assert_eq!(Signal::Exif.to_string(), "exif");
    }

    #[test]
    fn test_overlay_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let overlay = Overlay::InMemory(RgbImage::from_pixel(4, 3, image::Rgb([10, 20, 30])));
        let stored = overlay.persist(dir.path().join("overlay.png")).unwrap();
        assert!(matches!(stored, Overlay::Stored(_)));

        let pixels = stored.load().unwrap();
        assert_eq!(pixels.dimensions(), (4, 3));
        assert_eq!(pixels.get_pixel(1, 1), &image::Rgb([10, 20, 30]));
    }

    #[test]
    fn test_score_image_reads_metadata_from_source_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claim.jpg");
        std::fs::write(&path, jpeg_with_software("Adobe Photoshop 2024")).unwrap();

        let analyzer = ForensicsAnalyzer::new(AnalysisConfig::default()).unwrap();
        let aggregate = analyzer.score(&path).unwrap();

        assert_eq!(aggregate.score(Signal::Exif), 1.0);
        assert_eq!(
            aggregate.explanation[3],
            "EXIF software=Adobe Photoshop 2024 - flags=Software mentions photoshop"
        );
        let expected = Signal::ALL
            .iter()
            .map(|&s| analyzer.config().scoring.weights.get(s) * aggregate.score(s))
            .sum::<f64>();
        assert!((aggregate.final_score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_decode_failure_fails_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let analyzer = ForensicsAnalyzer::new(AnalysisConfig::default()).unwrap();
        assert!(matches!(analyzer.score(&path), Err(ForensicsError::ImageLoad(_))));
    }

    #[test]
    fn test_open_sniffs_format_from_content() {
        let dir = tempfile::tempdir().unwrap();
        let png_path = dir.path().join("photo.png");
        let rgb = RgbImage::from_pixel(6, 4, image::Rgb([10, 200, 30]));
        rgb.save(&png_path).unwrap();
        let misnamed = dir.path().join("photo.jpg");
        std::fs::rename(&png_path, &misnamed).unwrap();

        let decoded = DecodedImage::open(&misnamed).unwrap();
        assert_eq!(decoded.dimensions(), (6, 4));
        assert_eq!(decoded.rgb().get_pixel(0, 0), &image::Rgb([10, 200, 30]));
    }
}
