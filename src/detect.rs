//! Screen quadrilateral detection
//!
//! Finds the four corners of the projected screen in a photo:
//! downscale, blur, Canny, close gaps with dilate/erode, take the largest
//! external contours and keep the first whose polygon approximation has
//! exactly four vertices.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometry::{approximate_polygon_dp, arc_length, contour_area};
use imageproc::morphology::{dilate, erode};
use imageproc::point::Point as PixelPoint;
use std::fmt;
use tracing::debug;

use crate::config::DetectorConfig;
use crate::geometry::{CornerSet, Point};

/// Why no quadrilateral was returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundReason {
    /// Image has a zero dimension
    EmptyImage,
    /// The edge map produced no external contours
    NoContours,
    /// None of the examined contours simplified to four vertices
    NoQuadrilateral { examined: usize },
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundReason::EmptyImage => write!(f, "image is empty"),
            NotFoundReason::NoContours => write!(f, "no contours found"),
            NotFoundReason::NoQuadrilateral { examined } => {
                write!(f, "none of the {} largest contours is a quadrilateral", examined)
            }
        }
    }
}

/// Outcome of screen detection: a full corner set or an explicit miss
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionResult {
    /// Corners in source-image pixels, in approximation order (not canonical)
    Found(CornerSet),
    NotFound(NotFoundReason),
}

/// Locates the screen boundary in a photo
#[derive(Debug, Clone, Default)]
pub struct QuadDetector {
    config: DetectorConfig,
}

impl QuadDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Detect the screen quadrilateral. Pure function of the image and the
    /// detector configuration.
    pub fn detect(&self, image: &RgbImage) -> DetectionResult {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return DetectionResult::NotFound(NotFoundReason::EmptyImage);
        }

        let scale = self.config.working_height as f64 / height as f64;
        let small_w = ((width as f64 * scale) as u32).max(1);
        let small_h = self.config.working_height;
        let small = imageops::resize(image, small_w, small_h, FilterType::Triangle);
        debug!(
            "Working image {}x{} (scale {:.4}) from {}x{}",
            small_w, small_h, scale, width, height
        );

        let gray = imageops::grayscale(&small);
        let edges = self.edge_map(&gray);

        let mut candidates: Vec<(f64, Vec<PixelPoint<i32>>)> = find_contours::<i32>(&edges)
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .map(|c| (contour_area(&c.points), c.points))
            .collect();

        if candidates.is_empty() {
            return DetectionResult::NotFound(NotFoundReason::NoContours);
        }

        // Stable sort keeps discovery order for equal areas
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
        candidates.truncate(self.config.max_candidates);
        debug!(
            "Examining {} external contours, largest area {:.0}",
            candidates.len(),
            candidates[0].0
        );

        for (rank, (area, points)) in candidates.iter().enumerate() {
            let Some(approx) = approximate_closed(points, self.config.approx_epsilon) else {
                continue;
            };
            debug!(
                "Contour #{} area {:.0}: {} vertices after approximation",
                rank,
                area,
                approx.len()
            );

            if let [a, b, c, d] = approx.as_slice() {
                let corners = CornerSet::new([*a, *b, *c, *d]).scaled(1.0 / scale);
                debug!("Screen quadrilateral found: {}", corners);
                return DetectionResult::Found(corners);
            }
        }

        DetectionResult::NotFound(NotFoundReason::NoQuadrilateral {
            examined: candidates.len(),
        })
    }

    /// Blur, Canny and morphological gap closing on a grayscale image
    pub fn edge_map(&self, gray: &GrayImage) -> GrayImage {
        let sigma = kernel_sigma(self.config.blur_kernel);
        let blurred = gaussian_blur_f32(gray, sigma);
        let mut edges = canny(&blurred, self.config.canny_low, self.config.canny_high);

        for _ in 0..self.config.dilate_iterations {
            edges = dilate(&edges, Norm::LInf, 1);
        }
        for _ in 0..self.config.erode_iterations {
            edges = erode(&edges, Norm::LInf, 1);
        }
        edges
    }
}

/// Gaussian sigma implied by an odd kernel size (OpenCV's rule when sigma is 0)
fn kernel_sigma(kernel: u32) -> f32 {
    0.3 * ((kernel as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

fn to_point(p: &PixelPoint<i32>) -> Point {
    Point::new(p.x as f64, p.y as f64)
}

/// Douglas-Peucker approximation of a closed contour with tolerance
/// `epsilon_fraction * perimeter`.
///
/// The contour is cut at the point farthest from its start and at the point
/// farthest from that one. Both open arcs are simplified separately, so the
/// split points land on corners rather than on wherever the trace began.
/// A split point that ends up within tolerance of the line through its
/// neighbours is dropped. Returns `None` for contours too small to
/// approximate.
fn approximate_closed(points: &[PixelPoint<i32>], epsilon_fraction: f64) -> Option<Vec<Point>> {
    if points.len() < 3 {
        return None;
    }
    let perimeter = arc_length(points, true);
    let epsilon = epsilon_fraction * perimeter;
    if !(epsilon > 0.0) {
        return None;
    }

    let a = farthest_from(points, 0);
    let b = farthest_from(points, a);
    if a == b || points[a] == points[b] {
        return None;
    }
    let (lo, hi) = (a.min(b), a.max(b));

    // Wrap-around arc: hi .. end, then 0 ..= lo
    let wrapped: Vec<PixelPoint<i32>> = points[hi..]
        .iter()
        .chain(points[..=lo].iter())
        .copied()
        .collect();

    let mut joined = approximate_polygon_dp(&points[lo..=hi], epsilon, false);
    joined.pop();
    let junction = joined.len();
    let mut second = approximate_polygon_dp(&wrapped, epsilon, false);
    second.pop();
    joined.extend(second);

    let mut approx: Vec<Point> = joined.iter().map(to_point).collect();
    approx.dedup();
    if approx.len() > 1 && approx.first() == approx.last() {
        approx.pop();
    }

    // Higher index first so the lower one stays valid
    for index in [junction, 0] {
        if approx.len() > 3 && index < approx.len() {
            let prev = approx[(index + approx.len() - 1) % approx.len()];
            let next = approx[(index + 1) % approx.len()];
            if line_distance(&approx[index], &prev, &next) <= epsilon {
                approx.remove(index);
            }
        }
    }

    Some(approx)
}

/// Index of the contour point farthest from `points[from]`; the first one on ties
fn farthest_from(points: &[PixelPoint<i32>], from: usize) -> usize {
    let origin = points[from];
    let mut best = from;
    let mut best_dist = 0i64;
    for (i, p) in points.iter().enumerate() {
        let dx = (p.x - origin.x) as i64;
        let dy = (p.y - origin.y) as i64;
        let dist = dx * dx + dy * dy;
        if dist > best_dist {
            best = i;
            best_dist = dist;
        }
    }
    best
}

/// Distance from `p` to the infinite line through `a` and `b`
fn line_distance(p: &Point, a: &Point, b: &Point) -> f64 {
    let len = a.distance(b);
    if len < f64::EPSILON {
        return p.distance(a);
    }
    ((b.x - a.x) * (a.y - p.y) - (a.x - p.x) * (b.y - a.y)).abs() / len
}
