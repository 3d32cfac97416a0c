use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::{
    DecodedImage,
    error::{ForensicsError, Result},
    retrieval::{SimilarityMatch, phash::PerceptualHash},
};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub path: String,
    pub label: String,
    #[serde(rename = "phash")]
    pub fingerprint: PerceptualHash,
}

/// Reference fingerprints, persisted as one JSON snapshot and rebuilt in
/// full each time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HashIndex {
    #[serde(default)]
    entries: Vec<IndexEntry>,
}

impl HashIndex {
    pub fn new(entries: Vec<IndexEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fails with `IndexUnavailable` when the file is missing or does not
    /// parse; a valid file with no entries loads as an empty index.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let unavailable = |reason: String| ForensicsError::IndexUnavailable {
            path: path.to_path_buf(),
            reason,
        };

        let raw = fs::read_to_string(path).map_err(|e| unavailable(e.to_string()))?;
        let index: Self = serde_json::from_str(&raw).map_err(|e| unavailable(e.to_string()))?;

        log::debug!("loaded hash index {} ({} entries)", path.display(), index.len());
        Ok(index)
    }

    /// Writes to a temporary file next to `path` and renames it into place,
    /// so readers see either the old snapshot or the new one.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let parent = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let mut file = NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut file, self).map_err(std::io::Error::from)?;
        file.flush()?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| e.error)?;

        Ok(())
    }

    /// Up to `k` entries closest to `query`. Equal distances keep index order.
    pub fn query(&self, query: &PerceptualHash, k: usize) -> Vec<SimilarityMatch> {
        let mut scored = self
            .entries
            .iter()
            .map(|entry| SimilarityMatch {
                path: entry.path.clone(),
                label: entry.label.clone(),
                distance: query.hamming(&entry.fingerprint),
            })
            .collect::<Vec<_>>();

        scored.sort_by_key(|m| m.distance);
        scored.truncate(k);
        scored
    }

    pub fn query_decoded(&self, image: &DecodedImage, k: usize) -> Result<Vec<SimilarityMatch>> {
        let fingerprint = PerceptualHash::of_image(image.rgb())?;
        Ok(self.query(&fingerprint, k))
    }

    pub fn query_image<P: AsRef<Path>>(&self, path: P, k: usize) -> Result<Vec<SimilarityMatch>> {
        let image = DecodedImage::open(path)?;
        self.query_decoded(&image, k)
    }
}

/// Text before the first underscore of the file stem, or the whole stem.
pub fn label_for(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    match stem.split_once('_') {
        Some((label, _)) => label.to_string(),
        None => stem,
    }
}

pub fn is_indexable(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    pub entries: usize,
    pub skipped: usize,
    pub index_path: PathBuf,
}

pub struct IndexBuilder {
    images_dir: PathBuf,
    cancel: Option<Arc<AtomicBool>>,
}

impl IndexBuilder {
    pub fn new<P: AsRef<Path>>(images_dir: P) -> Self {
        Self {
            images_dir: images_dir.as_ref().to_path_buf(),
            cancel: None,
        }
    }

    /// Once the flag is set, the build stops and nothing is written.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Image files directly inside the directory, in path order.
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();

        for entry in fs::read_dir(&self.images_dir)? {
            let path = entry?.path();
            if path.is_file() && is_indexable(&path) {
                paths.push(path);
            }
        }

        paths.sort();
        Ok(paths)
    }

    /// Fingerprints every scanned image. Returns the index and the number of
    /// files that could not be hashed.
    pub fn build_in_memory(&self) -> Result<(HashIndex, usize)> {
        let paths = self.scan()?;

        let hashed = paths
            .par_iter()
            .map(|path| {
                if self.cancelled() {
                    return None;
                }

                let fingerprint = DecodedImage::open(path)
                    .and_then(|image| PerceptualHash::of_image(image.rgb()));

                match fingerprint {
                    Ok(fingerprint) => Some(IndexEntry {
                        path: path.to_string_lossy().to_string(),
                        label: label_for(path),
                        fingerprint,
                    }),
                    Err(e) => {
                        log::warn!("skipping {}: {e}", path.display());
                        None
                    }
                }
            })
            .collect::<Vec<_>>();

        if self.cancelled() {
            return Err(ForensicsError::Cancelled);
        }

        let skipped = hashed.iter().filter(|e| e.is_none()).count();
        let entries = hashed.into_iter().flatten().collect::<Vec<_>>();

        Ok((HashIndex::new(entries), skipped))
    }

    /// Full rebuild: replaces any snapshot at `index_path`.
    pub fn build<P: AsRef<Path>>(&self, index_path: P) -> Result<BuildSummary> {
        let index_path = index_path.as_ref();
        let (index, skipped) = self.build_in_memory()?;
        index.save(index_path)?;

        log::info!(
            "built hash index with {} entries ({} skipped) at {}",
            index.len(),
            skipped,
            index_path.display()
        );

        Ok(BuildSummary {
            entries: index.len(),
            skipped,
            index_path: index_path.to_path_buf(),
        })
    }
}
