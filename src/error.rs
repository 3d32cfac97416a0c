use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForensicsError {
    #[error("Image loading error: {0}")]
    ImageLoad(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("Hash index unavailable at {path}: {reason}")]
    IndexUnavailable { path: PathBuf, reason: String },

    #[error("Index build cancelled")]
    Cancelled,

    #[error("Calibration error: {0}")]
    Calibration(String),
}

pub type Result<T> = std::result::Result<T, ForensicsError>;
