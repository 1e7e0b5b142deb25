//! Points and quadrilateral corner sets in image pixel space

use std::fmt;

/// A 2D point in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    #[inline]
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Multiply both coordinates by `factor`
    #[inline]
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1})", self.x, self.y)
    }
}

/// Exactly four corners of a quadrilateral.
///
/// A freshly detected set is in whatever order the polygon approximation
/// produced. [`CornerSet::ordered`] returns the canonical
/// top-left, top-right, bottom-right, bottom-left order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CornerSet {
    points: [Point; 4],
}

impl CornerSet {
    pub fn new(points: [Point; 4]) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Point; 4] {
        &self.points
    }

    /// Scale every corner, e.g. to map from a downscaled working image back
    /// to source pixels
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            points: self.points.map(|p| p.scaled(factor)),
        }
    }

    /// Canonical order: TL has the smallest `x + y`, BR the largest,
    /// TR the smallest `y - x` and BL the largest.
    ///
    /// Only meaningful for a roughly upright convex quadrilateral; strongly
    /// rotated inputs can map two slots to the same point.
    pub fn ordered(&self) -> Self {
        let sum = |p: &Point| p.x + p.y;
        let diff = |p: &Point| p.y - p.x;

        Self {
            points: [
                extreme(&self.points, sum, false),
                extreme(&self.points, diff, false),
                extreme(&self.points, sum, true),
                extreme(&self.points, diff, true),
            ],
        }
    }

    /// Corners as `(x, y)` tuples in the current order
    pub fn to_tuples(&self) -> [(f64, f64); 4] {
        self.points.map(|p| (p.x, p.y))
    }

    /// Enclosed area (shoelace), independent of winding
    pub fn area(&self) -> f64 {
        polygon_area(&self.points)
    }
}

impl fmt::Display for CornerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = &self.points;
        write!(f, "[{} {} {} {}]", a, b, c, d)
    }
}

/// Point with the smallest (or largest) key; the first one wins ties
fn extreme(points: &[Point; 4], key: impl Fn(&Point) -> f64, largest: bool) -> Point {
    let mut best = points[0];
    let mut best_key = key(&best);
    for p in &points[1..] {
        let k = key(p);
        let better = if largest { k > best_key } else { k < best_key };
        if better {
            best = *p;
            best_key = k;
        }
    }
    best
}

/// Area of a closed polygon using the shoelace formula.
/// Vertices may wind either way.
pub fn polygon_area(points: &[Point]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut twice_area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        twice_area += points[i].x * points[j].y - points[j].x * points[i].y;
    }
    twice_area.abs() / 2.0
}
