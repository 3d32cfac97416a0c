pub mod index;
pub mod phash;

use serde::{Deserialize, Serialize};

/// One ranked hit from a similarity query. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimilarityMatch {
    pub path: String,
    pub label: String,
    pub distance: u32,
}
