//! Slide rectification
//!
//! Turns a photo plus an optional detected quadrilateral into a flat slide
//! image. With corners the screen is perspective-warped to a rectangle,
//! trimmed and rotated to landscape. Without corners a uniform margin is
//! cropped instead.

use image::imageops;
use image::RgbImage;
use tracing::{info, warn};

use crate::config::RectifierConfig;
use crate::detect::DetectionResult;
use crate::geometry::CornerSet;
use crate::transform::PerspectiveTransform;

/// How a [`Rectified`] image was produced
#[derive(Debug, Clone, PartialEq)]
pub enum RectifyMethod {
    /// Perspective warp of the detected screen (canonical corner order)
    Perspective { corners: CornerSet },
    /// No usable screen; `margin` pixels were cut from every side
    FallbackCrop { margin: u32 },
}

impl RectifyMethod {
    pub fn is_fallback(&self) -> bool {
        matches!(self, RectifyMethod::FallbackCrop { .. })
    }
}

/// Rectified slide plus a record of the path taken
#[derive(Debug, Clone)]
pub struct Rectified {
    pub image: RgbImage,
    pub method: RectifyMethod,
}

/// Produces flat slide images from detection results
#[derive(Debug, Clone, Default)]
pub struct Rectifier {
    config: RectifierConfig,
}

impl Rectifier {
    pub fn new(config: RectifierConfig) -> Self {
        Self { config }
    }

    /// Rectify `image` using the detected corners, or fall back to a
    /// centered crop. Always returns an image with non-zero dimensions when
    /// the input has them.
    pub fn rectify(&self, image: &RgbImage, detection: &DetectionResult) -> Rectified {
        match detection {
            DetectionResult::Found(corners) => match self.perspective(image, corners) {
                Some(rectified) => rectified,
                None => {
                    warn!("Detected quadrilateral {} is degenerate; using centered crop fallback", corners);
                    self.fallback(image)
                }
            },
            DetectionResult::NotFound(reason) => {
                warn!("Auto-detect failed ({}); using centered crop fallback", reason);
                self.fallback(image)
            }
        }
    }

    fn perspective(&self, image: &RgbImage, corners: &CornerSet) -> Option<Rectified> {
        let ordered = corners.ordered();
        let warped = four_point_warp(image, &ordered)?;
        let (warped_w, warped_h) = warped.dimensions();

        let trimmed = trim_border(&warped, self.config.trim_fraction);
        let output = if self.config.landscape {
            orient_landscape(trimmed)
        } else {
            trimmed
        };

        info!(
            "Perspective-corrected screen {} -> {}x{} (warped {}x{})",
            ordered,
            output.width(),
            output.height(),
            warped_w,
            warped_h
        );

        Some(Rectified {
            image: output,
            method: RectifyMethod::Perspective { corners: ordered },
        })
    }

    fn fallback(&self, image: &RgbImage) -> Rectified {
        let (cropped, margin) = fallback_crop(image, self.config.fallback_margin_fraction);
        info!(
            "Fallback crop removed {} px per side -> {}x{}",
            margin,
            cropped.width(),
            cropped.height()
        );
        Rectified {
            image: cropped,
            method: RectifyMethod::FallbackCrop { margin },
        }
    }
}

/// Output size for canonically ordered corners: the longer of each pair of
/// opposing edges, floored, at least 1
pub fn output_size(ordered: &CornerSet) -> (u32, u32) {
    let [tl, tr, br, bl] = ordered.points();
    let width = br.distance(bl).max(tr.distance(tl));
    let height = tr.distance(br).max(tl.distance(bl));
    ((width as u32).max(1), (height as u32).max(1))
}

/// Warp the quadrilateral given by canonically ordered corners onto an
/// axis-aligned rectangle. Returns `None` if the corners are degenerate.
pub fn four_point_warp(image: &RgbImage, ordered: &CornerSet) -> Option<RgbImage> {
    if ordered.area() < 1.0 {
        return None;
    }

    let (width, height) = output_size(ordered);
    let far_x = (width - 1) as f64;
    let far_y = (height - 1) as f64;
    let dst = [(0.0, 0.0), (far_x, 0.0), (far_x, far_y), (0.0, far_y)];

    let transform = PerspectiveTransform::compute(ordered.to_tuples(), dst)?;
    Some(transform.warp_rgb(image, width, height))
}

/// Remove `fraction` of the height from top and bottom and of the width from
/// left and right. At least one row and column always remain.
pub fn trim_border(image: &RgbImage, fraction: f64) -> RgbImage {
    let (width, height) = image.dimensions();
    let fraction = fraction.max(0.0);
    let dy = (height as f64 * fraction) as u32;
    let dx = (width as f64 * fraction) as u32;
    crop_margins(image, dx, dy)
}

/// Strip a uniform margin of `fraction * min(height, width)` from all four
/// sides. Returns the cropped image and the margin used.
pub fn fallback_crop(image: &RgbImage, fraction: f64) -> (RgbImage, u32) {
    let (width, height) = image.dimensions();
    let margin = (width.min(height) as f64 * fraction.max(0.0)) as u32;
    (crop_margins(image, margin, margin), margin)
}

/// Rotate 90 degrees clockwise if the image is taller than it is wide
pub fn orient_landscape(image: RgbImage) -> RgbImage {
    if image.height() > image.width() {
        imageops::rotate90(&image)
    } else {
        image
    }
}

/// Crop `dx` columns from each side and `dy` rows from top and bottom,
/// shrinking the margins when they would leave nothing
fn crop_margins(image: &RgbImage, dx: u32, dy: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }
    let dx = dx.min((width - 1) / 2);
    let dy = dy.min((height - 1) / 2);
    imageops::crop_imm(image, dx, dy, width - 2 * dx, height - 2 * dy).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::NotFoundReason;
    use crate::geometry::Point;
    use image::Rgb;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x * 2 % 256) as u8, (y * 2 % 256) as u8, 100]))
    }

    fn corners(pts: [(f64, f64); 4]) -> CornerSet {
        CornerSet::new(pts.map(|(x, y)| Point::new(x, y)))
    }

    #[test]
    fn test_axis_aligned_warp_matches_crop() {
        let img = gradient(120, 100);
        let quad = corners([(20.0, 30.0), (119.0, 30.0), (119.0, 89.0), (20.0, 89.0)]);

        let warped = four_point_warp(&img, &quad.ordered()).unwrap();
        assert_eq!(warped.dimensions(), (99, 59));

        let crop = imageops::crop_imm(&img, 20, 30, 99, 59).to_image();
        for (a, b) in warped.pixels().zip(crop.pixels()) {
            for c in 0..3 {
                assert!(
                    (a.0[c] as i32 - b.0[c] as i32).abs() <= 3,
                    "warped {:?} vs crop {:?}",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_output_size_uses_longer_edges() {
        let quad = corners([(10.0, 10.0), (210.0, 20.0), (200.5, 120.0), (15.0, 110.0)]);
        let (w, h) = output_size(&quad.ordered());
        // Top edge is the longer horizontal, left/right are close
        assert_eq!(w, 200);
        assert_eq!(h, 100);
    }

    #[test]
    fn test_portrait_quad_rotated_to_landscape() {
        let img = gradient(200, 300);
        let quad = corners([(40.0, 20.0), (140.0, 30.0), (150.0, 280.0), (30.0, 270.0)]);
        let rectified = Rectifier::default().rectify(&img, &DetectionResult::Found(quad));

        assert!(!rectified.method.is_fallback());
        assert!(rectified.image.width() >= rectified.image.height());
    }

    #[test]
    fn test_landscape_disabled_keeps_portrait() {
        let img = gradient(200, 300);
        let quad = corners([(40.0, 20.0), (140.0, 20.0), (140.0, 280.0), (40.0, 280.0)]);
        let rectifier = Rectifier::new(RectifierConfig {
            landscape: false,
            ..Default::default()
        });
        let rectified = rectifier.rectify(&img, &DetectionResult::Found(quad));
        assert!(rectified.image.height() > rectified.image.width());
    }

    #[test]
    fn test_fallback_dimensions() {
        let img = gradient(200, 120);
        let rectified = Rectifier::default().rectify(
            &img,
            &DetectionResult::NotFound(NotFoundReason::NoQuadrilateral { examined: 10 }),
        );

        // 5% of min(120, 200) = 6 px per side
        assert!(rectified.method.is_fallback());
        assert_eq!(rectified.method, RectifyMethod::FallbackCrop { margin: 6 });
        assert_eq!(rectified.image.dimensions(), (188, 108));
        assert_eq!(rectified.image.get_pixel(0, 0), img.get_pixel(6, 6));
    }

    #[test]
    fn test_degenerate_quad_falls_back() {
        let img = gradient(100, 100);
        let collinear = corners([(10.0, 10.0), (50.0, 10.0), (90.0, 10.0), (70.0, 10.0)]);
        let rectified = Rectifier::default().rectify(&img, &DetectionResult::Found(collinear));
        assert!(rectified.method.is_fallback());
    }

    #[test]
    fn test_trim_border() {
        let img = gradient(200, 100);
        let trimmed = trim_border(&img, 0.02);
        assert_eq!(trimmed.dimensions(), (192, 96));
        assert_eq!(trimmed.get_pixel(0, 0), img.get_pixel(4, 2));

        assert_eq!(trim_border(&img, 0.0).dimensions(), (200, 100));
    }

    #[test]
    fn test_never_empty() {
        let trims = [0.0, 0.01, 0.2, 0.49];
        let sizes = [(4u32, 4u32), (5, 9), (17, 4), (64, 48)];
        for &(w, h) in &sizes {
            let img = gradient(w, h);
            for &trim in &trims {
                let rectifier = Rectifier::new(RectifierConfig {
                    trim_fraction: trim,
                    fallback_margin_fraction: trim,
                    landscape: true,
                });
                let cases = [
                    DetectionResult::NotFound(NotFoundReason::NoContours),
                    DetectionResult::Found(corners([
                        (0.0, 0.0),
                        (w as f64 - 1.0, 0.0),
                        (w as f64 - 1.0, h as f64 - 1.0),
                        (0.0, h as f64 - 1.0),
                    ])),
                    // Tiny but valid quad, smaller than a pixel edge
                    DetectionResult::Found(corners([(1.0, 1.0), (2.2, 1.0), (2.2, 2.2), (1.0, 2.2)])),
                ];
                for detection in &cases {
                    let out = rectifier.rectify(&img, detection).image;
                    assert!(
                        out.width() >= 1 && out.height() >= 1,
                        "{}x{} trim {} produced {:?}",
                        w,
                        h,
                        trim,
                        out.dimensions()
                    );
                }
            }
        }
    }

    #[test]
    fn test_trim_guard_with_excessive_fraction() {
        let img = gradient(3, 3);
        assert_eq!(trim_border(&img, 0.9).dimensions(), (1, 1));
        assert_eq!(fallback_crop(&img, 2.0).0.dimensions(), (1, 1));
    }
}
