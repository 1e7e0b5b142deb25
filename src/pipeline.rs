//! Single-image pipeline: decode, detect, rectify, enhance, encode

use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::Config;
use crate::detect::QuadDetector;
use crate::enhance::Enhancer;
use crate::error::{Result, SlideError};
use crate::rectify::{RectifyMethod, Rectifier};

/// A processed slide and how it was rectified
#[derive(Debug, Clone)]
pub struct ProcessedSlide {
    pub image: RgbImage,
    pub method: RectifyMethod,
}

/// Result of processing one file
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub output: PathBuf,
    pub method: RectifyMethod,
    pub width: u32,
    pub height: u32,
}

/// Detector, rectifier and optional enhancer wired together.
/// Holds no per-image state, so one instance serves a whole batch.
#[derive(Debug, Clone)]
pub struct SlidePipeline {
    detector: QuadDetector,
    rectifier: Rectifier,
    enhancer: Option<Enhancer>,
}

impl SlidePipeline {
    /// Build from configuration; `enhance = false` skips the enhancement
    /// stage regardless of `config.enhance.enabled`
    pub fn new(config: &Config, enhance: bool) -> Self {
        let enhancer = (enhance && config.enhance.enabled)
            .then(|| Enhancer::new(config.enhance.clone()));
        Self {
            detector: QuadDetector::new(config.detector.clone()),
            rectifier: Rectifier::new(config.rectifier.clone()),
            enhancer,
        }
    }

    /// Run the in-memory pipeline on a decoded image
    pub fn process(&self, image: &RgbImage) -> ProcessedSlide {
        let detection = self.detector.detect(image);
        let rectified = self.rectifier.rectify(image, &detection);

        let image = match &self.enhancer {
            Some(enhancer) => enhancer.enhance(&rectified.image),
            None => {
                debug!("Enhancement disabled");
                rectified.image
            }
        };

        ProcessedSlide {
            image,
            method: rectified.method,
        }
    }

    /// Read `input`, process it and write the result to `output`. The output
    /// format follows the output file extension.
    pub fn process_file(&self, input: &Path, output: &Path) -> Result<ProcessOutcome> {
        let image = load_image(input)?;
        info!("Processing {:?} ({}x{})", input, image.width(), image.height());

        let slide = self.process(&image);
        save_image(&slide.image, output)?;

        Ok(ProcessOutcome {
            output: output.to_path_buf(),
            width: slide.image.width(),
            height: slide.image.height(),
            method: slide.method,
        })
    }
}

/// Decode an image file as 8-bit RGB
pub fn load_image(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).map_err(|source| SlideError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.to_rgb8())
}

/// Encode an image, choosing the format from the path's extension
pub fn save_image(image: &RgbImage, path: &Path) -> Result<()> {
    image.save(path).map_err(|source| SlideError::Encode {
        path: path.to_path_buf(),
        source,
    })
}
