//! Error types for slide processing
//!
//! Detection failure is not an error here: it is reported through
//! [`crate::detect::DetectionResult`] and handled by the fallback crop.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading, saving or configuring the pipeline
#[derive(Debug, Error)]
pub enum SlideError {
    #[error("could not read input image {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("could not write output image {path:?}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SlideError>;
