//! Cosmetic enhancement applied after rectification
//!
//! Fixed sequence, identical for detected and fallback results:
//! 1. Automatic white balance (skipped when the balancer declines)
//! 2. CLAHE on the L* channel only, so hue is untouched
//! 3. Bilateral smoothing
//! 4. 3x3 sharpening

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::filter::filter3x3;
use tracing::debug;

use crate::color::{lab_to_rgb, rgb_to_lab};
use crate::config::EnhanceConfig;

/// Sharpening kernel, row-major
const SHARPEN_KERNEL: [i32; 9] = [0, -1, 0, -1, 5, -1, 0, -1, 0];

/// Applies the enhancement sequence configured in [`EnhanceConfig`]
#[derive(Debug, Clone, Default)]
pub struct Enhancer {
    config: EnhanceConfig,
}

impl Enhancer {
    pub fn new(config: EnhanceConfig) -> Self {
        Self { config }
    }

    pub fn enhance(&self, image: &RgbImage) -> RgbImage {
        let cfg = &self.config;

        let mut img = match cfg.white_balance.balance(image, cfg.white_balance_percent) {
            Some(balanced) => {
                debug!("White balance '{}' applied", cfg.white_balance.as_str());
                balanced
            }
            None => {
                debug!(
                    "White balance '{}' not applicable; keeping input colors",
                    cfg.white_balance.as_str()
                );
                image.clone()
            }
        };

        if cfg.clahe {
            img = equalize_lightness(&img, cfg.clahe_clip_limit, cfg.clahe_tiles);
            debug!(
                "CLAHE on lightness (clip {}, {}x{} tiles)",
                cfg.clahe_clip_limit, cfg.clahe_tiles, cfg.clahe_tiles
            );
        }

        if cfg.denoise {
            img = bilateral_filter(
                &img,
                cfg.bilateral_diameter,
                cfg.bilateral_sigma_color,
                cfg.bilateral_sigma_space,
            );
            debug!("Bilateral filter d={}", cfg.bilateral_diameter);
        }

        if cfg.sharpen {
            img = sharpen(&img);
            debug!("Sharpened");
        }

        img
    }
}

/// Run CLAHE on the L* channel of the image's Lab representation
pub fn equalize_lightness(image: &RgbImage, clip_limit: f32, tiles: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let lab: Vec<[f32; 3]> = image.pixels().map(|p| rgb_to_lab(p.0)).collect();

    let lightness = GrayImage::from_fn(width, height, |x, y| {
        let l = lab[(y * width + x) as usize][0];
        Luma([(l * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8])
    });
    let equalized = clahe(&lightness, clip_limit, tiles);

    RgbImage::from_fn(width, height, |x, y| {
        let [_, a, b] = lab[(y * width + x) as usize];
        let l = equalized.get_pixel(x, y).0[0] as f32 * 100.0 / 255.0;
        Rgb(lab_to_rgb([l, a, b]))
    })
}

/// Contrast-limited adaptive histogram equalization.
///
/// The image is split into a grid of at most `tiles` x `tiles` blocks; each
/// block gets an equalization table built from its clipped histogram, and
/// every pixel blends the tables of the four nearest block centres.
pub fn clahe(image: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let tiles = tiles.max(1);
    let tile_w = width.div_ceil(tiles);
    let tile_h = height.div_ceil(tiles);
    let nx = width.div_ceil(tile_w);
    let ny = height.div_ceil(tile_h);

    let mut luts = Vec::with_capacity((nx * ny) as usize);
    for ty in 0..ny {
        for tx in 0..nx {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);
            luts.push(tile_lut(image, x0, y0, x1, y1, clip_limit));
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        let (tx1, tx2, xa) = blend_position(x, tile_w, nx);
        let (ty1, ty2, ya) = blend_position(y, tile_h, ny);
        let v = image.get_pixel(x, y).0[0] as usize;

        let lut = |tx: u32, ty: u32| luts[(ty * nx + tx) as usize][v] as f32;
        let top = lut(tx1, ty1) * (1.0 - xa) + lut(tx2, ty1) * xa;
        let bottom = lut(tx1, ty2) * (1.0 - xa) + lut(tx2, ty2) * xa;
        let value = top * (1.0 - ya) + bottom * ya;
        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

/// Neighbouring tile indices and blend weight for a pixel coordinate
fn blend_position(pos: u32, tile_size: u32, count: u32) -> (u32, u32, f32) {
    let t = pos as f32 / tile_size as f32 - 0.5;
    let first = t.floor();
    let weight = t - first;
    let last_tile = count as i64 - 1;
    let t1 = (first as i64).clamp(0, last_tile) as u32;
    let t2 = (first as i64 + 1).clamp(0, last_tile) as u32;
    (t1, t2, weight)
}

/// Equalization table for one tile, with the histogram clipped at
/// `clip_limit` times the mean bin height and the excess spread evenly
fn tile_lut(image: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, clip_limit: f32) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[image.get_pixel(x, y).0[0] as usize] += 1;
        }
    }

    let total = (x1 - x0) * (y1 - y0);
    let clip = ((clip_limit * total as f32 / 256.0) as u32).max(1);

    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }

    let per_bin = excess / 256;
    let residual = excess % 256;
    for bin in hist.iter_mut() {
        *bin += per_bin;
    }
    if residual > 0 {
        let step = (256 / residual).max(1) as usize;
        for bin in hist.iter_mut().step_by(step).take(residual as usize) {
            *bin += 1;
        }
    }

    let scale = 255.0 / total as f32;
    let mut lut = [0u8; 256];
    let mut cumulative = 0u32;
    for (entry, &count) in lut.iter_mut().zip(hist.iter()) {
        cumulative += count;
        *entry = (cumulative as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Edge-preserving smoothing over a circular window of the given diameter.
///
/// Neighbour weights combine spatial distance and the summed absolute
/// channel difference, both under a Gaussian. Borders replicate edge pixels.
pub fn bilateral_filter(
    image: &RgbImage,
    diameter: u32,
    sigma_color: f32,
    sigma_space: f32,
) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let radius = (diameter / 2).max(1) as i64;
    let color_coeff = -0.5 / (sigma_color * sigma_color);
    let space_coeff = -0.5 / (sigma_space * sigma_space);

    // Summed channel difference ranges over 0..=765
    let color_weights: Vec<f32> = (0..=765)
        .map(|d| (d as f32 * d as f32 * color_coeff).exp())
        .collect();

    let mut offsets = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let r2 = (dx * dx + dy * dy) as f32;
            if r2.sqrt() <= radius as f32 {
                offsets.push((dx, dy, (r2 * space_coeff).exp()));
            }
        }
    }

    let max_x = width as i64 - 1;
    let max_y = height as i64 - 1;

    RgbImage::from_fn(width, height, |x, y| {
        let center = image.get_pixel(x, y).0;
        let mut acc = [0.0f32; 3];
        let mut weight_sum = 0.0f32;

        for &(dx, dy, space_weight) in &offsets {
            let sx = (x as i64 + dx).clamp(0, max_x) as u32;
            let sy = (y as i64 + dy).clamp(0, max_y) as u32;
            let p = image.get_pixel(sx, sy).0;

            let diff = (0..3)
                .map(|c| (p[c] as i32 - center[c] as i32).unsigned_abs())
                .sum::<u32>() as usize;
            let weight = space_weight * color_weights[diff];

            for c in 0..3 {
                acc[c] += weight * p[c] as f32;
            }
            weight_sum += weight;
        }

        Rgb(acc.map(|v| (v / weight_sum).round().clamp(0.0, 255.0) as u8))
    })
}

/// Sharpen with [`SHARPEN_KERNEL`]; borders are padded by continuity
pub fn sharpen(image: &RgbImage) -> RgbImage {
    filter3x3::<_, i32, u8>(image, &SHARPEN_KERNEL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::WhiteBalanceMode;

    fn all_off() -> EnhanceConfig {
        EnhanceConfig {
            white_balance: WhiteBalanceMode::Off,
            clahe: false,
            denoise: false,
            sharpen: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_enhance_keeps_dimensions() {
        let img = RgbImage::from_fn(37, 23, |x, y| Rgb([(x * 6) as u8, (y * 9) as u8, 90]));
        let out = Enhancer::default().enhance(&img);
        assert_eq!(out.dimensions(), (37, 23));
    }

    #[test]
    fn test_all_steps_disabled_is_identity() {
        let img = RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 15) as u8, (y * 15) as u8, 42]));
        let out = Enhancer::new(all_off()).enhance(&img);
        assert_eq!(out, img);
    }

    #[test]
    fn test_flat_image_survives_white_balance_skip() {
        // Simple balance declines a flat image; the rest of the chain still runs
        let img = RgbImage::from_pixel(20, 20, Rgb([120, 120, 120]));
        let config = EnhanceConfig {
            clahe: false,
            denoise: false,
            sharpen: false,
            ..Default::default()
        };
        assert_eq!(Enhancer::new(config).enhance(&img), img);
    }

    #[test]
    fn test_clahe_uniform_input_stays_uniform() {
        let img = GrayImage::from_pixel(64, 64, Luma([100]));
        let out = clahe(&img, 2.0, 8);
        let first = out.get_pixel(0, 0).0[0];
        assert!(out.pixels().all(|p| p.0[0] == first));
    }

    #[test]
    fn test_clahe_stretches_low_contrast() {
        let img = GrayImage::from_fn(64, 64, |x, _| Luma([100 + (x / 8) as u8]));
        let out = clahe(&img, 40.0, 2);

        let range = |g: &GrayImage| {
            let min = g.pixels().map(|p| p.0[0]).min().unwrap();
            let max = g.pixels().map(|p| p.0[0]).max().unwrap();
            max - min
        };
        assert!(range(&out) > range(&img) * 4, "range {} -> {}", range(&img), range(&out));
    }

    #[test]
    fn test_clahe_more_tiles_than_pixels() {
        let img = GrayImage::from_fn(5, 3, |x, y| Luma([(x * 40 + y * 10) as u8]));
        let out = clahe(&img, 2.0, 8);
        assert_eq!(out.dimensions(), (5, 3));
    }

    #[test]
    fn test_bilateral_preserves_edges() {
        let img = RgbImage::from_fn(20, 10, |x, _| {
            if x < 10 {
                Rgb([50, 50, 50])
            } else {
                Rgb([200, 200, 200])
            }
        });
        let out = bilateral_filter(&img, 7, 50.0, 50.0);
        assert_eq!(out.get_pixel(9, 5).0, [50, 50, 50]);
        assert_eq!(out.get_pixel(10, 5).0, [200, 200, 200]);
    }

    #[test]
    fn test_bilateral_smooths_small_noise() {
        let img = RgbImage::from_fn(15, 15, |x, y| {
            if x == 7 && y == 7 {
                Rgb([110, 110, 110])
            } else {
                Rgb([100, 100, 100])
            }
        });
        let out = bilateral_filter(&img, 7, 50.0, 50.0);
        let center = out.get_pixel(7, 7).0[0];
        assert!(center < 105, "noise spike kept at {}", center);
    }

    #[test]
    fn test_sharpen_kernel() {
        let flat = RgbImage::from_pixel(5, 5, Rgb([80, 80, 80]));
        assert_eq!(sharpen(&flat), flat);

        let mut dot = flat.clone();
        dot.put_pixel(2, 2, Rgb([100, 100, 100]));
        let out = sharpen(&dot);
        assert_eq!(out.get_pixel(2, 2).0, [180, 180, 180]);
        assert_eq!(out.get_pixel(2, 1).0, [60, 60, 60]);
    }
}
