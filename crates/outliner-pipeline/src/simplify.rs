//! Contour simplification using the Ramer-Douglas-Peucker algorithm,
//! and the rank-cap-simplify reduction applied when tracing returns too
//! many contours.
//!
//! Reduces point count by removing points that are within a given
//! tolerance of the segment between their kept neighbors. Implemented
//! from scratch to avoid pulling in the `geo` crate dependency tree.

use crate::types::{Contour, Dimensions, Point};

/// Simplify a single contour using the Ramer-Douglas-Peucker algorithm.
///
/// Points within `epsilon` pixels of the segment between their endpoints
/// are removed. An epsilon of 0.0 removes only points lying exactly on
/// that segment.
///
/// Contours with fewer than 3 points are returned unchanged. The kind is
/// preserved; a closed contour keeps both copies of its start point.
#[must_use = "returns the simplified contour"]
pub fn simplify(contour: &Contour, epsilon: f64) -> Contour {
    let points = contour.points();
    if points.len() < 3 {
        return contour.clone();
    }

    let mut kept = vec![false; points.len()];
    kept[0] = true;
    kept[points.len() - 1] = true;

    rdp_recurse(points, 0, points.len() - 1, epsilon, &mut kept);

    let simplified: Vec<Point> = points
        .iter()
        .zip(&kept)
        .filter(|&(_, k)| *k)
        .map(|(&p, _)| p)
        .collect();

    Contour::new(simplified, contour.kind())
}

/// Recursive step of the Ramer-Douglas-Peucker algorithm.
///
/// Finds the point between `start` and `end` that is farthest from the
/// segment between them. If that distance exceeds `epsilon`, the point
/// is kept and both sub-ranges are processed recursively.
fn rdp_recurse(points: &[Point], start: usize, end: usize, epsilon: f64, kept: &mut [bool]) {
    if end <= start + 1 {
        return;
    }

    let mut max_dist = 0.0;
    let mut max_idx = start;

    for i in (start + 1)..end {
        let d = segment_distance(points[i], points[start], points[end]);
        if d > max_dist {
            max_dist = d;
            max_idx = i;
        }
    }

    if max_dist > epsilon {
        kept[max_idx] = true;
        rdp_recurse(points, start, max_idx, epsilon, kept);
        rdp_recurse(points, max_idx, end, epsilon, kept);
    }
}

/// Distance from `p` to the closed segment `a`-`b`.
///
/// The projection of `p` onto the line is clamped to the segment, so
/// points beyond either end measure to that endpoint. When `a` and `b`
/// coincide this is the distance from `p` to `a`.
fn segment_distance(p: Point, a: Point, b: Point) -> f64 {
    let (px, py) = (f64::from(p.x), f64::from(p.y));
    let (ax, ay) = (f64::from(a.x), f64::from(a.y));
    let dx = f64::from(b.x) - ax;
    let dy = f64::from(b.y) - ay;
    let length_sq = dx.mul_add(dx, dy * dy);

    let t = if length_sq == 0.0 {
        0.0
    } else {
        ((px - ax).mul_add(dx, (py - ay) * dy) / length_sq).clamp(0.0, 1.0)
    };

    let ex = t.mul_add(dx, ax) - px;
    let ey = t.mul_add(dy, ay) - py;
    ex.hypot(ey)
}

/// Simplification tolerance for an image: `max(2, floor(min(w, h) / 500))`.
#[must_use]
pub fn epsilon_for(dimensions: Dimensions) -> f64 {
    f64::from((dimensions.width.min(dimensions.height) / 500).max(2))
}

/// Outcome of [`reduce_contours`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reduction {
    /// Surviving, simplified contours, longest first.
    pub contours: Vec<Contour>,
    /// Tolerance used.
    pub epsilon: f64,
    /// Contours before capping.
    pub contours_before: usize,
    /// Points before capping and simplification.
    pub points_before: usize,
    /// Points after.
    pub points_after: usize,
}

/// Rank contours by length (longest first, ties in discovery order),
/// keep the top `max_count`, then simplify each with `epsilon`.
#[must_use = "returns the reduced contours"]
pub fn reduce_contours(mut contours: Vec<Contour>, max_count: usize, epsilon: f64) -> Reduction {
    let contours_before = contours.len();
    let points_before = total_points(&contours);

    contours.sort_by_key(|c| std::cmp::Reverse(c.len()));
    contours.truncate(max_count);
    let contours: Vec<Contour> = contours.iter().map(|c| simplify(c, epsilon)).collect();

    Reduction {
        points_after: total_points(&contours),
        contours,
        epsilon,
        contours_before,
        points_before,
    }
}

/// Total points across a slice of contours.
pub(crate) fn total_points(contours: &[Contour]) -> usize {
    contours.iter().map(Contour::len).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContourKind;

    fn open(points: &[(i32, i32)]) -> Contour {
        Contour::new(
            points.iter().map(|&(x, y)| Point::new(x, y)).collect(),
            ContourKind::Open,
        )
    }

    /// Distance from `p` to the polyline through `points`.
    fn polyline_distance(p: Point, points: &[Point]) -> f64 {
        points
            .windows(2)
            .map(|w| segment_distance(p, w[0], w[1]))
            .fold(f64::INFINITY, f64::min)
    }

    #[test]
    fn empty_contour_unchanged() {
        let result = simplify(&open(&[]), 1.0);
        assert!(result.is_empty());
    }

    #[test]
    fn single_point_unchanged() {
        let c = Contour::new(vec![Point::new(1, 2)], ContourKind::Sampled);
        let result = simplify(&c, 1.0);
        assert_eq!(result, c);
    }

    #[test]
    fn two_points_unchanged() {
        let result = simplify(&open(&[(0, 0), (10, 0)]), 1.0);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn zero_epsilon_drops_only_collinear_points() {
        let result = simplify(&open(&[(0, 0), (1, 1), (2, 0), (3, 0), (4, 0)]), 0.0);
        assert_eq!(result.points(), open(&[(0, 0), (1, 1), (2, 0), (4, 0)]).points());
    }

    #[test]
    fn collinear_points_collapse_to_endpoints() {
        let result = simplify(&open(&[(0, 0), (1, 1), (2, 2), (3, 3), (4, 4)]), 0.1);
        assert_eq!(result.points(), &[Point::new(0, 0), Point::new(4, 4)]);
    }

    #[test]
    fn zigzag_retains_peaks() {
        let zigzag = open(&[(0, 0), (2, 5), (4, 0), (6, 5), (8, 0)]);
        assert_eq!(simplify(&zigzag, 1.0).len(), 5);
        assert_eq!(simplify(&zigzag, 10.0).len(), 2);
    }

    #[test]
    fn closed_contour_keeps_start_twice() {
        let square = Contour::new(
            [(0, 0), (5, 0), (10, 0), (10, 5), (10, 10), (5, 10), (0, 10), (0, 5), (0, 0)]
                .iter()
                .map(|&(x, y)| Point::new(x, y))
                .collect(),
            ContourKind::Closed,
        );
        let result = simplify(&square, 1.0);
        assert!(result.is_closed());
        assert_eq!(result.points().first(), result.points().last());
        // The four corners survive; edge midpoints go.
        assert_eq!(result.len(), 5);
    }

    #[test]
    fn simplification_stays_within_epsilon() {
        // A noisy spiral, deterministic.
        let points: Vec<Point> = (0..200)
            .map(|i| {
                let r = 10 + i / 4;
                let x = (i * 7919 % 13) - 6;
                match (i / 10) % 4 {
                    0 => Point::new(r + x, i),
                    1 => Point::new(i, r - x),
                    2 => Point::new(-r + x, -i),
                    _ => Point::new(-i, -r - x),
                }
            })
            .collect();
        let contour = Contour::new(points.clone(), ContourKind::Open);
        for epsilon in [0.0, 0.5, 2.0, 5.0, 40.0] {
            let result = simplify(&contour, epsilon);
            assert!(result.len() <= contour.len());
            for &p in &points {
                let d = polyline_distance(p, result.points());
                assert!(d <= epsilon + 1e-9, "point {p:?} is {d} from result at {epsilon}");
            }
        }
    }

    #[test]
    fn segment_distance_on_axis() {
        let d = segment_distance(Point::new(1, 3), Point::new(0, 0), Point::new(2, 0));
        assert!((d - 3.0).abs() < 1e-10);
    }

    #[test]
    fn segment_distance_diagonal_segment() {
        // |4*(-1) - 2*(-2)| / sqrt(20) = 8 / sqrt(20)
        let d = segment_distance(Point::new(2, -1), Point::new(0, 0), Point::new(4, 2));
        let expected = 8.0 / 20.0_f64.sqrt();
        assert!((d - expected).abs() < 1e-10, "got {d}, expected {expected}");
    }

    #[test]
    fn segment_distance_beyond_endpoint() {
        // Past the end of the segment: measured to the endpoint, not the line.
        let d = segment_distance(Point::new(7, 4), Point::new(0, 0), Point::new(4, 0));
        assert!((d - 5.0).abs() < 1e-10);
    }

    #[test]
    fn segment_distance_coincident_endpoints() {
        let d = segment_distance(Point::new(3, 4), Point::new(0, 0), Point::new(0, 0));
        assert!((d - 5.0).abs() < 1e-10);
    }

    #[test]
    fn epsilon_scales_with_short_side() {
        let dims = |width, height| Dimensions { width, height };
        assert!((epsilon_for(dims(100, 100)) - 2.0).abs() < f64::EPSILON);
        assert!((epsilon_for(dims(1499, 4000)) - 2.0).abs() < f64::EPSILON);
        assert!((epsilon_for(dims(2500, 4000)) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn reduce_keeps_longest_first() {
        let contours = vec![
            open(&[(0, 0), (1, 0)]),
            open(&[(0, 0), (1, 0), (2, 0), (3, 0)]),
            open(&[(0, 0), (0, 1), (0, 2)]),
            open(&[(5, 5), (6, 6), (7, 7)]),
        ];
        let reduction = reduce_contours(contours, 3, 0.5);
        assert_eq!(reduction.contours_before, 4);
        assert_eq!(reduction.points_before, 12);
        assert_eq!(reduction.contours.len(), 3);
        // Straight runs collapse to their endpoints.
        assert_eq!(reduction.contours[0].points(), &[Point::new(0, 0), Point::new(3, 0)]);
        // Equal lengths keep discovery order.
        assert_eq!(reduction.contours[1].points()[0], Point::new(0, 0));
        assert_eq!(reduction.contours[2].points()[0], Point::new(5, 5));
        assert_eq!(reduction.points_after, 6);
    }
}
