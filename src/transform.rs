//! Perspective transformation for slide rectification
//!
//! This module implements the perspective (homography) transformation that
//! maps the photographed, keystoned screen onto an axis-aligned rectangle.

use image::{Rgb, RgbImage};
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

/// Bicubic kernel coefficient (same as OpenCV's INTER_CUBIC)
const CUBIC_A: f64 = -0.75;

/// Perspective transformation matrix (3x3 homography)
#[derive(Debug, Clone)]
pub struct PerspectiveTransform {
    /// Destination -> source, used for warping
    inverse: Matrix3<f64>,
}

impl PerspectiveTransform {
    /// Compute the perspective transform from 4 source points to 4 destination points.
    ///
    /// Returns `None` when the correspondences are degenerate (three or more
    /// collinear points), since no invertible homography exists.
    pub fn compute(src: [(f64, f64); 4], dst: [(f64, f64); 4]) -> Option<Self> {
        let matrix = compute_homography(src, dst)?;
        let inverse = matrix.try_inverse()?;
        if !inverse.iter().all(|v| v.is_finite()) {
            return None;
        }
        Some(Self { inverse })
    }

    /// Transform a point from destination to source coordinates
    #[inline]
    pub fn inverse_transform_point(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        apply_homography(&self.inverse, x, y)
    }

    /// Render a `width` x `height` destination image by inverse-mapping every
    /// pixel into `src` with bicubic interpolation. Pixels that map outside
    /// the source are black.
    pub fn warp_rgb(&self, src: &RgbImage, width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            match self.inverse_transform_point(x as f64, y as f64) {
                Some((sx, sy)) => bicubic_sample(src, sx, sy),
                None => Rgb([0, 0, 0]),
            }
        })
    }
}

/// Compute a 3x3 homography from 4 point correspondences (DLT with h33 = 1)
fn compute_homography(src: [(f64, f64); 4], dst: [(f64, f64); 4]) -> Option<Matrix3<f64>> {
    // For each correspondence (x,y) -> (x',y'):
    //   x*h1 + y*h2 + h3 - x'*x*h7 - x'*y*h8 = x'
    //   x*h4 + y*h5 + h6 - y'*x*h7 - y'*y*h8 = y'
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for i in 0..4 {
        let (x, y) = src[i];
        let (xp, yp) = dst[i];
        let row1 = i * 2;
        let row2 = row1 + 1;

        a[(row1, 0)] = x;
        a[(row1, 1)] = y;
        a[(row1, 2)] = 1.0;
        a[(row1, 6)] = -xp * x;
        a[(row1, 7)] = -xp * y;
        b[row1] = xp;

        a[(row2, 3)] = x;
        a[(row2, 4)] = y;
        a[(row2, 5)] = 1.0;
        a[(row2, 6)] = -yp * x;
        a[(row2, 7)] = -yp * y;
        b[row2] = yp;
    }

    let h = a.lu().solve(&b)?;
    if !h.iter().all(|v| v.is_finite()) {
        return None;
    }

    Some(Matrix3::new(
        h[0], h[1], h[2], //
        h[3], h[4], h[5], //
        h[6], h[7], 1.0,
    ))
}

/// Apply a homography to a point; `None` if it maps to infinity
#[inline]
fn apply_homography(h: &Matrix3<f64>, x: f64, y: f64) -> Option<(f64, f64)> {
    let p = h * Vector3::new(x, y, 1.0);
    if p.z.abs() < 1e-12 {
        return None;
    }
    Some((p.x / p.z, p.y / p.z))
}

/// Cubic convolution kernel
#[inline]
fn cubic_kernel(t: f64) -> f64 {
    let t = t.abs();
    if t <= 1.0 {
        ((CUBIC_A + 2.0) * t - (CUBIC_A + 3.0)) * t * t + 1.0
    } else if t < 2.0 {
        ((CUBIC_A * t - 5.0 * CUBIC_A) * t + 8.0 * CUBIC_A) * t - 4.0 * CUBIC_A
    } else {
        0.0
    }
}

/// Weights for the taps at offsets -1, 0, 1, 2 around the floor position
#[inline]
fn cubic_weights(frac: f64) -> [f64; 4] {
    [
        cubic_kernel(1.0 + frac),
        cubic_kernel(frac),
        cubic_kernel(1.0 - frac),
        cubic_kernel(2.0 - frac),
    ]
}

/// Bicubic interpolation over a 4x4 neighbourhood. Taps outside the image
/// contribute black (constant border).
#[inline]
fn bicubic_sample(src: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let (width, height) = src.dimensions();
    if !(x > -1.0 && y > -1.0 && x < width as f64 && y < height as f64) {
        return Rgb([0, 0, 0]);
    }

    let x0 = x.floor();
    let y0 = y.floor();
    let wx = cubic_weights(x - x0);
    let wy = cubic_weights(y - y0);
    let (x0, y0) = (x0 as i64, y0 as i64);

    let mut acc = [0.0f64; 3];
    for (j, weight_y) in wy.iter().enumerate() {
        let sy = y0 - 1 + j as i64;
        if sy < 0 || sy >= height as i64 {
            continue;
        }
        for (i, weight_x) in wx.iter().enumerate() {
            let sx = x0 - 1 + i as i64;
            if sx < 0 || sx >= width as i64 {
                continue;
            }
            let weight = weight_x * weight_y;
            let pixel = src.get_pixel(sx as u32, sy as u32);
            for c in 0..3 {
                acc[c] += weight * pixel.0[c] as f64;
            }
        }
    }

    Rgb(acc.map(|v| v.round().clamp(0.0, 255.0) as u8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let src = [(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)];
        let transform = PerspectiveTransform::compute(src, src).unwrap();

        let (x, y) = transform.inverse_transform_point(50.0, 50.0).unwrap();
        assert!((x - 50.0).abs() < 0.01);
        assert!((y - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_keystone_maps_corners() {
        let src = [(12.0, 20.0), (95.0, 8.0), (90.0, 92.0), (4.0, 80.0)];
        let dst = [(0.0, 0.0), (99.0, 0.0), (99.0, 79.0), (0.0, 79.0)];
        let transform = PerspectiveTransform::compute(src, dst).unwrap();

        for (s, d) in src.iter().zip(dst.iter()) {
            let (bx, by) = transform.inverse_transform_point(d.0, d.1).unwrap();
            assert!((bx - s.0).abs() < 1e-6 && (by - s.1).abs() < 1e-6);
        }
    }

    #[test]
    fn test_forward_matrix_maps_source_corners() {
        let src = [(12.0, 20.0), (95.0, 8.0), (90.0, 92.0), (4.0, 80.0)];
        let dst = [(0.0, 0.0), (99.0, 0.0), (99.0, 79.0), (0.0, 79.0)];
        let matrix = compute_homography(src, dst).unwrap();

        for (s, d) in src.iter().zip(dst.iter()) {
            let (x, y) = apply_homography(&matrix, s.0, s.1).unwrap();
            assert!((x - d.0).abs() < 1e-6 && (y - d.1).abs() < 1e-6);
        }
    }

    #[test]
    fn test_degenerate_points_rejected() {
        // All four source points on one line
        let src = [(0.0, 0.0), (10.0, 0.0), (20.0, 0.0), (30.0, 0.0)];
        let dst = [(0.0, 0.0), (9.0, 0.0), (9.0, 9.0), (0.0, 9.0)];
        assert!(PerspectiveTransform::compute(src, dst).is_none());
    }

    #[test]
    fn test_cubic_weights_partition_unity() {
        for frac in [0.0, 0.25, 0.5, 0.9] {
            let sum: f64 = cubic_weights(frac).iter().sum();
            assert!((sum - 1.0).abs() < 1e-12);
        }
        assert_eq!(cubic_weights(0.0), [0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_sample_outside_is_black() {
        let img = RgbImage::from_pixel(8, 8, Rgb([200, 200, 200]));
        assert_eq!(bicubic_sample(&img, -5.0, 3.0), Rgb([0, 0, 0]));
        assert_eq!(bicubic_sample(&img, 3.0, 8.5), Rgb([0, 0, 0]));
        assert_eq!(bicubic_sample(&img, 3.0, 3.0), Rgb([200, 200, 200]));
    }
}
