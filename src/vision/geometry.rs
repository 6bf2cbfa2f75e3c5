//! Planar geometry for card outlines
//!
//! Points, quadrilaterals and the polygon helpers used to turn traced
//! contours into four-corner candidates.

use serde::{Deserialize, Serialize};

/// A pixel coordinate in source-frame space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance(&self, other: &Point) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Four corners of a detected card outline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quadrilateral {
    pub tl: Point,
    pub tr: Point,
    pub br: Point,
    pub bl: Point,
}

impl Quadrilateral {
    pub fn new(tl: Point, tr: Point, br: Point, bl: Point) -> Self {
        Self { tl, tr, br, bl }
    }

    /// Build from four vertices, optionally reordering them to tl/tr/br/bl
    pub fn from_vertices(vertices: [Point; 4], canonical: bool) -> Self {
        let [tl, tr, br, bl] = if canonical {
            order_corners(vertices)
        } else {
            vertices
        };
        Self { tl, tr, br, bl }
    }

    /// Corners in tl, tr, br, bl order
    pub fn corners(&self) -> [Point; 4] {
        [self.tl, self.tr, self.br, self.bl]
    }

    /// Corners as float pairs, for projective transforms
    pub fn corners_f32(&self) -> [(f32, f32); 4] {
        self.corners().map(|p| (p.x as f32, p.y as f32))
    }

    /// Enclosed area (absolute shoelace area)
    pub fn area(&self) -> f64 {
        polygon_area(&self.corners())
    }

    /// True when no two non-adjacent edges touch and no corner repeats
    pub fn is_simple(&self) -> bool {
        let c = self.corners();
        for i in 0..4 {
            for j in (i + 1)..4 {
                if c[i] == c[j] {
                    return false;
                }
            }
        }

        !segments_intersect(c[0], c[1], c[2], c[3]) && !segments_intersect(c[1], c[2], c[3], c[0])
    }
}

/// Absolute polygon area via the shoelace formula
pub fn polygon_area(points: &[Point]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }

    let mut twice = 0i64;
    for i in 0..n {
        let p = points[i];
        let q = points[(i + 1) % n];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }

    (twice as f64 / 2.0).abs()
}

/// Perimeter of a polyline, closing it back to the first point if `closed`
pub fn arc_length(points: &[Point], closed: bool) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    let open: f64 = points.windows(2).map(|w| w[0].distance(&w[1])).sum();
    if closed {
        open + points[points.len() - 1].distance(&points[0])
    } else {
        open
    }
}

/// Douglas-Peucker simplification of a closed contour
///
/// Two far-apart anchor points split the contour into two arcs which are
/// simplified independently. The output keeps the contour's winding and
/// starts at the first anchor.
pub fn approx_poly_dp(contour: &[Point], epsilon: f64) -> Vec<Point> {
    let n = contour.len();
    if n < 3 {
        return contour.to_vec();
    }

    let b = farthest_from(contour, 0);
    let a = farthest_from(contour, b);
    if contour[a] == contour[b] {
        return vec![contour[a]];
    }

    let mut keep = vec![false; n];
    keep[a] = true;
    keep[b] = true;
    simplify_arc(contour, a, b, epsilon, &mut keep);
    simplify_arc(contour, b, a, epsilon, &mut keep);

    (0..n)
        .map(|k| (a + k) % n)
        .filter(|&i| keep[i])
        .map(|i| contour[i])
        .collect()
}

fn farthest_from(contour: &[Point], from: usize) -> usize {
    let origin = contour[from];
    let mut best = from;
    let mut best_dist = -1.0;
    for (i, p) in contour.iter().enumerate() {
        let d = origin.distance(p);
        if d > best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}

/// Mark the vertices to keep on the arc running from `start` to `end`
/// (following contour order, wrapping around)
fn simplify_arc(contour: &[Point], start: usize, end: usize, epsilon: f64, keep: &mut [bool]) {
    let n = contour.len();
    let at = |offset: usize| (start + offset) % n;
    let span = (end + n - start) % n;

    let mut stack = vec![(0usize, span)];
    while let Some((lo, hi)) = stack.pop() {
        if hi <= lo + 1 {
            continue;
        }

        let p0 = contour[at(lo)];
        let p1 = contour[at(hi)];
        let mut max_dist = -1.0;
        let mut split = lo;
        for k in (lo + 1)..hi {
            let d = distance_to_segment(contour[at(k)], p0, p1);
            if d > max_dist {
                max_dist = d;
                split = k;
            }
        }

        if max_dist > epsilon {
            keep[at(split)] = true;
            stack.push((lo, split));
            stack.push((split, hi));
        }
    }
}

/// Perpendicular distance from `p` to the line through `a` and `b`
fn distance_to_segment(p: Point, a: Point, b: Point) -> f64 {
    let dx = (b.x - a.x) as f64;
    let dy = (b.y - a.y) as f64;
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        return p.distance(&a);
    }
    let cross = dx * (p.y - a.y) as f64 - dy * (p.x - a.x) as f64;
    cross.abs() / len
}

/// Order four vertices as top-left, top-right, bottom-right, bottom-left
///
/// Vertices are sorted clockwise (in image coordinates, y pointing down)
/// around their centroid and rotated so the vertex with the smallest
/// `x + y` comes first.
pub fn order_corners(vertices: [Point; 4]) -> [Point; 4] {
    let cx = vertices.iter().map(|p| p.x as f64).sum::<f64>() / 4.0;
    let cy = vertices.iter().map(|p| p.y as f64).sum::<f64>() / 4.0;

    let mut sorted = vertices;
    sorted.sort_by(|a, b| {
        let ta = (a.y as f64 - cy).atan2(a.x as f64 - cx);
        let tb = (b.y as f64 - cy).atan2(b.x as f64 - cx);
        ta.total_cmp(&tb)
    });

    let start = (0..4)
        .min_by_key(|&i| (sorted[i].x + sorted[i].y, sorted[i].y))
        .unwrap_or(0);
    sorted.rotate_left(start);
    sorted
}

fn orientation(a: Point, b: Point, c: Point) -> i64 {
    let v = (b.x - a.x) as i64 * (c.y - a.y) as i64 - (b.y - a.y) as i64 * (c.x - a.x) as i64;
    v.signum()
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

/// Segment p1-p2 intersects (or touches) segment q1-q2
fn segments_intersect(p1: Point, p2: Point, q1: Point, q2: Point) -> bool {
    let o1 = orientation(p1, p2, q1);
    let o2 = orientation(p1, p2, q2);
    let o3 = orientation(q1, q2, p1);
    let o4 = orientation(q1, q2, p2);

    if o1 != o2 && o3 != o4 {
        return true;
    }

    (o1 == 0 && on_segment(p1, p2, q1))
        || (o2 == 0 && on_segment(p1, p2, q2))
        || (o3 == 0 && on_segment(q1, q2, p1))
        || (o4 == 0 && on_segment(q1, q2, p2))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every boundary pixel of an axis-aligned rectangle, clockwise from top-left
    fn rect_contour(x0: i32, y0: i32, x1: i32, y1: i32) -> Vec<Point> {
        let mut pts = Vec::new();
        for x in x0..x1 {
            pts.push(Point::new(x, y0));
        }
        for y in y0..y1 {
            pts.push(Point::new(x1, y));
        }
        for x in (x0 + 1..=x1).rev() {
            pts.push(Point::new(x, y1));
        }
        for y in (y0 + 1..=y1).rev() {
            pts.push(Point::new(x0, y));
        }
        pts
    }

    #[test]
    fn test_polygon_area() {
        let square = [
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
        ];
        assert_eq!(polygon_area(&square), 100.0);

        // Winding does not matter
        let mut reversed = square;
        reversed.reverse();
        assert_eq!(polygon_area(&reversed), 100.0);
    }

    #[test]
    fn test_arc_length() {
        let pts = [Point::new(0, 0), Point::new(3, 0), Point::new(3, 4)];
        assert_eq!(arc_length(&pts, false), 7.0);
        assert_eq!(arc_length(&pts, true), 12.0);
    }

    #[test]
    fn test_approx_rectangle_contour_to_four_corners() {
        let contour = rect_contour(50, 50, 250, 400);
        let eps = 0.04 * arc_length(&contour, true);
        let poly = approx_poly_dp(&contour, eps);

        assert_eq!(poly.len(), 4, "got {:?}", poly);
        let ordered = order_corners([poly[0], poly[1], poly[2], poly[3]]);
        assert_eq!(ordered[0], Point::new(50, 50));
        assert_eq!(ordered[1], Point::new(250, 50));
        assert_eq!(ordered[2], Point::new(250, 400));
        assert_eq!(ordered[3], Point::new(50, 400));
    }

    #[test]
    fn test_approx_keeps_triangle() {
        let contour = vec![
            Point::new(0, 0),
            Point::new(50, 0),
            Point::new(100, 0),
            Point::new(75, 50),
            Point::new(50, 100),
            Point::new(25, 50),
        ];
        let poly = approx_poly_dp(&contour, 2.0);
        assert_eq!(poly.len(), 3);
    }

    #[test]
    fn test_order_corners_from_any_permutation() {
        let expected = [
            Point::new(10, 12),
            Point::new(200, 5),
            Point::new(210, 300),
            Point::new(5, 290),
        ];
        let shuffled = [expected[2], expected[0], expected[3], expected[1]];

        assert_eq!(order_corners(shuffled), expected);

        let reversed = [expected[3], expected[2], expected[1], expected[0]];
        assert_eq!(order_corners(reversed), expected);
    }

    #[test]
    fn test_bowtie_is_not_simple() {
        let bowtie = Quadrilateral::new(
            Point::new(0, 0),
            Point::new(100, 100),
            Point::new(100, 0),
            Point::new(0, 100),
        );
        assert!(!bowtie.is_simple());

        let fixed = Quadrilateral::from_vertices(bowtie.corners(), true);
        assert!(fixed.is_simple());
        assert_eq!(fixed.area(), 10_000.0);
    }

    #[test]
    fn test_collinear_quad_is_not_simple() {
        let flat = Quadrilateral::new(
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(20, 0),
            Point::new(30, 0),
        );
        assert!(!flat.is_simple());
        assert_eq!(flat.area(), 0.0);
    }
}
