//! Configuration for the slide pipeline
//!
//! Every value has a default matching the tuned pipeline, so a TOML file passed
//! with `--config` only has to list the keys it overrides. Configuration is
//! read-only; nothing is ever written back to disk.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::color::WhiteBalanceMode;
use crate::error::SlideError;

/// Quadrilateral detection parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    /// Height (px) of the downscaled working image
    pub working_height: u32,
    /// Gaussian kernel size used to derive the blur sigma (odd)
    pub blur_kernel: u32,
    /// Canny hysteresis thresholds
    pub canny_low: f32,
    pub canny_high: f32,
    /// 3x3 dilations applied to the edge map before erosion
    pub dilate_iterations: u32,
    pub erode_iterations: u32,
    /// How many of the largest contours are examined
    pub max_candidates: usize,
    /// Polygon approximation tolerance as a fraction of the perimeter
    pub approx_epsilon: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            working_height: 1000,
            blur_kernel: 5,
            canny_low: 50.0,
            canny_high: 150.0,
            dilate_iterations: 2,
            erode_iterations: 1,
            max_candidates: 10,
            approx_epsilon: 0.02,
        }
    }
}

/// Rectification parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RectifierConfig {
    /// Fraction of each dimension trimmed from every side after warping
    pub trim_fraction: f64,
    /// Margin (fraction of the shorter side) stripped when no screen is found
    pub fallback_margin_fraction: f64,
    /// Rotate portrait results so that width >= height
    pub landscape: bool,
}

impl Default for RectifierConfig {
    fn default() -> Self {
        Self {
            trim_fraction: 0.01,
            fallback_margin_fraction: 0.05,
            landscape: true,
        }
    }
}

/// Cosmetic enhancement parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnhanceConfig {
    pub enabled: bool,

    pub white_balance: WhiteBalanceMode,
    /// Percentile clipped at each end of a channel by the simple balancer
    pub white_balance_percent: f32,

    /// Contrast-limited adaptive histogram equalization on lightness
    pub clahe: bool,
    pub clahe_clip_limit: f32,
    /// Tiles per axis
    pub clahe_tiles: u32,

    /// Edge-preserving bilateral smoothing
    pub denoise: bool,
    pub bilateral_diameter: u32,
    pub bilateral_sigma_color: f32,
    pub bilateral_sigma_space: f32,

    pub sharpen: bool,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            white_balance: WhiteBalanceMode::default(),
            white_balance_percent: 0.5,
            clahe: true,
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            denoise: true,
            bilateral_diameter: 7,
            bilateral_sigma_color: 50.0,
            bilateral_sigma_space: 50.0,
            sharpen: true,
        }
    }
}

/// File naming used by the batch driver
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    pub prefix: String,
    pub input_ext: String,
    pub output_ext: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            prefix: "IMG_".to_string(),
            input_ext: "JPG".to_string(),
            output_ext: "PNG".to_string(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub rectifier: RectifierConfig,

    #[serde(default)]
    pub enhance: EnhanceConfig,

    #[serde(default)]
    pub batch: BatchConfig,
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to load config from {:?}", path))?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot honour
    pub fn validate(&self) -> std::result::Result<(), SlideError> {
        let d = &self.detector;
        if d.working_height == 0 {
            return Err(SlideError::Config("detector.working_height must be > 0".into()));
        }
        if d.blur_kernel == 0 || d.blur_kernel % 2 == 0 {
            return Err(SlideError::Config(format!(
                "detector.blur_kernel must be odd, got {}",
                d.blur_kernel
            )));
        }
        if d.canny_low < 0.0 || d.canny_low > d.canny_high {
            return Err(SlideError::Config(format!(
                "detector canny thresholds must satisfy 0 <= low <= high, got {}/{}",
                d.canny_low, d.canny_high
            )));
        }
        if !(d.approx_epsilon > 0.0 && d.approx_epsilon < 1.0) {
            return Err(SlideError::Config(format!(
                "detector.approx_epsilon must be in (0, 1), got {}",
                d.approx_epsilon
            )));
        }

        let r = &self.rectifier;
        check_fraction("rectifier.trim_fraction", r.trim_fraction)?;
        check_fraction("rectifier.fallback_margin_fraction", r.fallback_margin_fraction)?;

        let e = &self.enhance;
        if !(0.0..50.0).contains(&e.white_balance_percent) {
            return Err(SlideError::Config(format!(
                "enhance.white_balance_percent must be in [0, 50), got {}",
                e.white_balance_percent
            )));
        }
        if e.clahe_tiles == 0 || e.clahe_clip_limit <= 0.0 {
            return Err(SlideError::Config(
                "enhance.clahe_tiles and enhance.clahe_clip_limit must be positive".into(),
            ));
        }
        if e.bilateral_diameter == 0 {
            return Err(SlideError::Config("enhance.bilateral_diameter must be > 0".into()));
        }
        if !(e.bilateral_sigma_color > 0.0 && e.bilateral_sigma_space > 0.0) {
            return Err(SlideError::Config(format!(
                "enhance bilateral sigmas must be > 0, got color {} space {}",
                e.bilateral_sigma_color, e.bilateral_sigma_space
            )));
        }

        Ok(())
    }
}

fn check_fraction(name: &str, value: f64) -> std::result::Result<(), SlideError> {
    if (0.0..0.5).contains(&value) {
        Ok(())
    } else {
        Err(SlideError::Config(format!(
            "{} must be in [0, 0.5), got {}",
            name, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detector.working_height, 1000);
        assert_eq!(config.rectifier.trim_fraction, 0.01);
        assert_eq!(config.batch.prefix, "IMG_");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [detector]
            canny_low = 30.0

            [enhance]
            white_balance = "gray-world"
            sharpen = false
            "#,
        )
        .unwrap();

        assert_eq!(config.detector.canny_low, 30.0);
        assert_eq!(config.detector.canny_high, 150.0);
        assert_eq!(config.enhance.white_balance, WhiteBalanceMode::GrayWorld);
        assert!(!config.enhance.sharpen);
        assert!(config.enhance.clahe);
        assert_eq!(config.rectifier, RectifierConfig::default());
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::from_toml_str("[rectifier]\ntrim_fraction = 0.5").is_err());
        assert!(Config::from_toml_str("[detector]\nblur_kernel = 4").is_err());
        assert!(Config::from_toml_str("[detector]\ncanny_low = 200.0").is_err());
        assert!(Config::from_toml_str("[detector]\nworking_height = 0").is_err());
    }

    #[test]
    fn test_rejects_non_positive_bilateral_sigmas() {
        assert!(Config::from_toml_str("[enhance]\nbilateral_sigma_color = 0.0").is_err());
        assert!(Config::from_toml_str("[enhance]\nbilateral_sigma_space = -1.0").is_err());

        let mut config = Config::default();
        config.enhance.bilateral_sigma_color = 0.0;
        assert!(matches!(config.validate(), Err(SlideError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slidewarp.toml");
        std::fs::write(&path, "[batch]\noutput_ext = \"jpg\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.batch.output_ext, "jpg");
        assert_eq!(config.batch.input_ext, "JPG");

        assert!(Config::load(&dir.path().join("missing.toml")).is_err());
    }
}
