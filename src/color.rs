//! Color space conversion and white balance
//!
//! This module provides:
//! - sRGB <-> CIE L*a*b* conversion (D65 white point), used so contrast
//!   equalization can touch lightness without shifting hue
//! - Two automatic white balance algorithms exposed as an optional
//!   capability: a balancer may decline an image, in which case the caller
//!   keeps the unbalanced pixels

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

/// Automatic white balance algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WhiteBalanceMode {
    /// Per-channel percentile stretch
    #[default]
    Simple,
    /// Gray World: scale red and blue so the scene averages to neutral
    GrayWorld,
    /// Leave colors untouched
    Off,
}

impl WhiteBalanceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WhiteBalanceMode::Simple => "simple",
            WhiteBalanceMode::GrayWorld => "gray-world",
            WhiteBalanceMode::Off => "off",
        }
    }

    /// Balance `image`, or return `None` when the algorithm cannot be applied
    /// to this input (disabled, empty, or no usable color information).
    ///
    /// `percent` is only used by [`WhiteBalanceMode::Simple`].
    pub fn balance(&self, image: &RgbImage, percent: f32) -> Option<RgbImage> {
        if image.width() == 0 || image.height() == 0 {
            return None;
        }
        match self {
            WhiteBalanceMode::Simple => simple_white_balance(image, percent),
            WhiteBalanceMode::GrayWorld => {
                let result = calculate_gray_world(image.as_raw(), 1)?;
                debug!(
                    "Gray world gains R={:.3} B={:.3} (confidence {:.2})",
                    result.red_gain, result.blue_gain, result.confidence
                );
                let mut out = image.clone();
                apply_rgb_gain(&mut out, result.red_gain, result.green_gain, result.blue_gain);
                Some(out)
            }
            WhiteBalanceMode::Off => None,
        }
    }
}

/// Stretch each channel so its `percent` and `100 - percent` percentiles map
/// to 0 and 255.
///
/// Channels whose clipped range collapses are left as they are; if that
/// happens to all three the balancer declines.
pub fn simple_white_balance(image: &RgbImage, percent: f32) -> Option<RgbImage> {
    let mut histograms = [[0u64; 256]; 3];
    for pixel in image.pixels() {
        for c in 0..3 {
            histograms[c][pixel.0[c] as usize] += 1;
        }
    }

    let total = image.width() as u64 * image.height() as u64;
    let clip = (total as f64 * percent as f64 / 100.0) as u64;

    let mut luts: [Option<[u8; 256]>; 3] = [None; 3];
    for c in 0..3 {
        let (low, high) = percentile_bounds(&histograms[c], clip);
        if high > low {
            luts[c] = Some(stretch_lut(low, high));
        }
    }

    if luts.iter().all(Option::is_none) {
        return None;
    }

    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        for c in 0..3 {
            if let Some(lut) = &luts[c] {
                pixel.0[c] = lut[pixel.0[c] as usize];
            }
        }
    }
    Some(out)
}

/// Smallest and largest values left after discarding `clip` samples from
/// each end of the histogram
fn percentile_bounds(histogram: &[u64; 256], clip: u64) -> (u8, u8) {
    let mut seen = 0u64;
    let mut low = 0u8;
    for (value, &count) in histogram.iter().enumerate() {
        seen += count;
        if seen > clip {
            low = value as u8;
            break;
        }
    }

    seen = 0;
    let mut high = 255u8;
    for (value, &count) in histogram.iter().enumerate().rev() {
        seen += count;
        if seen > clip {
            high = value as u8;
            break;
        }
    }

    (low, high)
}

fn stretch_lut(low: u8, high: u8) -> [u8; 256] {
    let mut lut = [0u8; 256];
    let range = (high - low) as f32;
    for (i, entry) in lut.iter_mut().enumerate() {
        let v = (i as f32 - low as f32) * 255.0 / range;
        *entry = v.round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Gains computed by the Gray World algorithm
#[derive(Debug, Clone, Copy)]
pub struct WhiteBalanceResult {
    pub red_gain: f32,
    pub green_gain: f32,
    pub blue_gain: f32,
    pub confidence: f32,
}

/// Calculate white balance gains using the Gray World algorithm
///
/// Assumes the average color of the scene is neutral gray and uses green as
/// the reference channel. Samples every `step`-th pixel of a packed RGB buffer.
/// Returns `None` for an empty or black buffer.
pub fn calculate_gray_world(rgb: &[u8], step: usize) -> Option<WhiteBalanceResult> {
    let step = step.max(1);
    let mut sums = [0u64; 3];
    let mut count = 0u64;

    for chunk in rgb.chunks_exact(3).step_by(step) {
        sums[0] += chunk[0] as u64;
        sums[1] += chunk[1] as u64;
        sums[2] += chunk[2] as u64;
        count += 1;
    }

    if count == 0 {
        return None;
    }

    let r_avg = sums[0] as f32 / count as f32;
    let g_avg = sums[1] as f32 / count as f32;
    let b_avg = sums[2] as f32 / count as f32;

    if g_avg <= 1.0 && r_avg <= 1.0 && b_avg <= 1.0 {
        return None;
    }

    let target = g_avg.max(1.0);
    let red_gain = if r_avg > 1.0 { target / r_avg } else { 1.0 };
    let blue_gain = if b_avg > 1.0 { target / b_avg } else { 1.0 };

    // Strong casts are more likely intentional than a lighting error
    let max_deviation = (r_avg - g_avg).abs().max((b_avg - g_avg).abs()) / target;
    let confidence = (1.0 - max_deviation.min(1.0)).max(0.0);

    Some(WhiteBalanceResult {
        red_gain: red_gain.clamp(0.5, 2.0),
        green_gain: 1.0,
        blue_gain: blue_gain.clamp(0.5, 2.0),
        confidence,
    })
}

/// Apply per-channel gains in place
pub fn apply_rgb_gain(image: &mut RgbImage, red_gain: f32, green_gain: f32, blue_gain: f32) {
    if (red_gain - 1.0).abs() < 0.001
        && (green_gain - 1.0).abs() < 0.001
        && (blue_gain - 1.0).abs() < 0.001
    {
        return;
    }

    for pixel in image.pixels_mut() {
        let [r, g, b] = pixel.0;
        pixel.0 = [
            (r as f32 * red_gain).round().clamp(0.0, 255.0) as u8,
            (g as f32 * green_gain).round().clamp(0.0, 255.0) as u8,
            (b as f32 * blue_gain).round().clamp(0.0, 255.0) as u8,
        ];
    }
}

// D65 reference white
const XN: f32 = 0.950_456;
const ZN: f32 = 1.088_754;
const LAB_EPSILON: f32 = 0.008_856;

/// sRGB gamma decode table
fn srgb_to_linear_lut() -> &'static [f32; 256] {
    static LUT: OnceLock<[f32; 256]> = OnceLock::new();
    LUT.get_or_init(|| {
        let mut table = [0f32; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let c = i as f32 / 255.0;
            *entry = if c <= 0.040_45 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            };
        }
        table
    })
}

#[inline]
fn linear_to_srgb(c: f32) -> u8 {
    let c = c.clamp(0.0, 1.0);
    let v = if c <= 0.003_130_8 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

#[inline]
fn lab_f(t: f32) -> f32 {
    if t > LAB_EPSILON {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

#[inline]
fn lab_f_inv(f: f32) -> f32 {
    let t = f * f * f;
    if t > LAB_EPSILON {
        t
    } else {
        (f - 16.0 / 116.0) / 7.787
    }
}

/// Convert an sRGB pixel to `[L, a, b]` with L in 0..=100
pub fn rgb_to_lab(rgb: [u8; 3]) -> [f32; 3] {
    let lut = srgb_to_linear_lut();
    let r = lut[rgb[0] as usize];
    let g = lut[rgb[1] as usize];
    let b = lut[rgb[2] as usize];

    let x = (0.412_453 * r + 0.357_580 * g + 0.180_423 * b) / XN;
    let y = 0.212_671 * r + 0.715_160 * g + 0.072_169 * b;
    let z = (0.019_334 * r + 0.119_193 * g + 0.950_227 * b) / ZN;

    let fx = lab_f(x);
    let fy = lab_f(y);
    let fz = lab_f(z);

    let l = if y > LAB_EPSILON {
        116.0 * fy - 16.0
    } else {
        903.3 * y
    };

    [l, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

/// Convert `[L, a, b]` back to an sRGB pixel, clamping out-of-gamut values
pub fn lab_to_rgb(lab: [f32; 3]) -> [u8; 3] {
    let [l, a, b] = lab;
    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;

    let y = if l > 903.3 * LAB_EPSILON {
        fy * fy * fy
    } else {
        l / 903.3
    };
    let x = lab_f_inv(fx) * XN;
    let z = lab_f_inv(fz) * ZN;

    let r = 3.240_479 * x - 1.537_150 * y - 0.498_535 * z;
    let g = -0.969_256 * x + 1.875_991 * y + 0.041_556 * z;
    let b = 0.055_648 * x - 0.204_043 * y + 1.057_311 * z;

    [linear_to_srgb(r), linear_to_srgb(g), linear_to_srgb(b)]
}
