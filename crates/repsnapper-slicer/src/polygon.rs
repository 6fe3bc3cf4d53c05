//! Closed 2D rings.

use repsnapper_math::{point_line_distance, point_segment_distance, Point2};

use crate::error::{Result, SlicerError};
use crate::offset;

/// A closed polygon ring. The edge from the last vertex back to the first
/// is implicit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Polygon2f {
    /// Vertices of the ring in order.
    pub points: Vec<Point2>,
}

impl Polygon2f {
    /// Create a new polygon from points.
    pub fn new(points: Vec<Point2>) -> Self {
        Self { points }
    }

    /// Check if the polygon is empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Iterate over the edges as `(start, end)` pairs, closing edge included.
    pub fn edges(&self) -> impl Iterator<Item = (&Point2, &Point2)> + '_ {
        let n = self.points.len();
        (0..n).map(move |i| (&self.points[i], &self.points[(i + 1) % n]))
    }

    /// Signed area of the polygon.
    /// Positive for counter-clockwise, negative for clockwise.
    pub fn signed_area(&self) -> f64 {
        if self.points.len() < 3 {
            return 0.0;
        }
        self.edges().map(|(a, b)| a.x * b.y - b.x * a.y).sum::<f64>() / 2.0
    }

    /// Unsigned area.
    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    /// Is the polygon counter-clockwise?
    pub fn is_ccw(&self) -> bool {
        self.signed_area() > 0.0
    }

    /// Reverse the winding order.
    pub fn reverse(&mut self) {
        self.points.reverse();
    }

    /// Ensure counter-clockwise winding.
    pub fn ensure_ccw(&mut self) {
        if !self.is_ccw() {
            self.reverse();
        }
    }

    /// Ensure clockwise winding.
    pub fn ensure_cw(&mut self) {
        if self.is_ccw() {
            self.reverse();
        }
    }

    /// Perimeter length.
    pub fn perimeter(&self) -> f64 {
        if self.points.len() < 2 {
            return 0.0;
        }
        self.edges().map(|(a, b)| (b - a).norm()).sum()
    }

    /// Vertex average.
    pub fn centroid(&self) -> Point2 {
        if self.points.is_empty() {
            return Point2::origin();
        }
        let n = self.points.len() as f64;
        let (sx, sy) = self
            .points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Point2::new(sx / n, sy / n)
    }

    /// Axis-aligned bounds as `(min, max)`, or `None` when empty.
    pub fn bounds(&self) -> Option<(Point2, Point2)> {
        let first = self.points.first()?;
        let mut min = *first;
        let mut max = *first;
        for p in &self.points[1..] {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        Some((min, max))
    }

    /// Even-odd point containment test.
    pub fn contains_point(&self, point: &Point2) -> bool {
        let n = self.points.len();
        if n < 3 {
            return false;
        }

        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let pi = &self.points[i];
            let pj = &self.points[j];
            if ((pi.y > point.y) != (pj.y > point.y))
                && (point.x < (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x)
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// Shortest distance from `point` to any edge of the ring.
    pub fn distance_to_boundary(&self, point: &Point2) -> f64 {
        match self.points.len() {
            0 => f64::INFINITY,
            1 => (point - self.points[0]).norm(),
            _ => self
                .edges()
                .map(|(a, b)| point_segment_distance(point, a, b))
                .fold(f64::INFINITY, f64::min),
        }
    }

    /// Copy of the ring with near-duplicate, collinear and spike vertices
    /// removed.
    ///
    /// A vertex is dropped when it lies within `tolerance` of its successor,
    /// within `tolerance` of the line through its neighbours, or when its
    /// neighbours coincide. Removal repeats until nothing changes or fewer
    /// than three vertices remain.
    pub fn cleaned(&self, tolerance: f64) -> Polygon2f {
        let mut pts = self.points.clone();
        loop {
            let n = pts.len();
            if n < 3 {
                break;
            }
            let hit = (0..n).find(|&i| {
                let prev = &pts[(i + n - 1) % n];
                let cur = &pts[i];
                let next = &pts[(i + 1) % n];
                (cur - next).norm() <= tolerance
                    || (next - prev).norm() <= tolerance
                    || point_line_distance(cur, prev, next) <= tolerance
            });
            match hit {
                Some(i) => {
                    pts.remove(i);
                }
                None => break,
            }
        }
        if pts.len() == 2 && (pts[0] - pts[1]).norm() <= tolerance {
            pts.pop();
        }
        Polygon2f::new(pts)
    }

    /// Offset the ring toward its own interior by `distance`.
    ///
    /// Positive distances shrink regardless of winding, negative distances
    /// expand. The source is not modified. Regions that collapse are left
    /// out, so the result may be empty, and a ring that pinches is returned
    /// as several simple rings keeping the source winding.
    ///
    /// # Errors
    ///
    /// [`SlicerError::DegeneratePolygon`] for fewer than three vertices and
    /// [`SlicerError::InvalidSettings`] for a non-finite distance.
    pub fn shrink(&self, distance: f64) -> Result<Vec<Polygon2f>> {
        if self.points.len() < 3 {
            return Err(SlicerError::DegeneratePolygon(self.points.len()));
        }
        if !distance.is_finite() {
            return Err(SlicerError::InvalidSettings(format!(
                "shrink distance must be finite, got {distance}"
            )));
        }
        if distance == 0.0 {
            return Ok(vec![self.clone()]);
        }
        Ok(offset::offset_ring(&self.points, distance))
    }
}

impl From<Vec<Point2>> for Polygon2f {
    fn from(points: Vec<Point2>) -> Self {
        Self::new(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn square(x0: f64, y0: f64, size: f64) -> Polygon2f {
        Polygon2f::new(vec![
            Point2::new(x0, y0),
            Point2::new(x0 + size, y0),
            Point2::new(x0 + size, y0 + size),
            Point2::new(x0, y0 + size),
        ])
    }

    #[test]
    fn test_polygon_area() {
        let sq = square(0.0, 0.0, 1.0);
        assert_abs_diff_eq!(sq.signed_area(), 1.0, epsilon = 1e-12);
        assert!(sq.is_ccw());

        let mut cw = sq.clone();
        cw.ensure_cw();
        assert_abs_diff_eq!(cw.signed_area(), -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cw.area(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_perimeter_centroid_bounds() {
        let sq = square(10.0, 20.0, 10.0);
        assert_abs_diff_eq!(sq.perimeter(), 40.0, epsilon = 1e-12);
        let c = sq.centroid();
        assert_abs_diff_eq!(c.x, 15.0);
        assert_abs_diff_eq!(c.y, 25.0);
        let (min, max) = sq.bounds().unwrap();
        assert_eq!(min, Point2::new(10.0, 20.0));
        assert_eq!(max, Point2::new(20.0, 30.0));
        assert!(Polygon2f::default().bounds().is_none());
    }

    #[test]
    fn test_contains_point() {
        let sq = square(0.0, 0.0, 10.0);
        assert!(sq.contains_point(&Point2::new(5.0, 5.0)));
        assert!(!sq.contains_point(&Point2::new(15.0, 5.0)));
        assert!(!sq.contains_point(&Point2::new(-1.0, 5.0)));
    }

    #[test]
    fn test_distance_to_boundary() {
        let sq = square(0.0, 0.0, 10.0);
        assert_abs_diff_eq!(sq.distance_to_boundary(&Point2::new(3.0, 5.0)), 3.0);
        assert_abs_diff_eq!(sq.distance_to_boundary(&Point2::new(13.0, 14.0)), 5.0);
    }

    #[test]
    fn test_cleaned_drops_collinear_and_duplicates() {
        let p = Polygon2f::new(vec![
            Point2::new(0.0, 0.0),
            Point2::new(5.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(10.0, 10.0 + 1e-6),
            Point2::new(0.0, 10.0),
        ]);
        let c = p.cleaned(1e-3);
        assert_eq!(c.len(), 4);
        assert_abs_diff_eq!(c.area(), 100.0, epsilon = 1e-3);
    }

    #[test]
    fn test_cleaned_removes_spike() {
        let p = Polygon2f::new(vec![
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(15.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(0.0, 10.0),
        ]);
        let c = p.cleaned(1e-9);
        assert_eq!(c.len(), 4);
        assert_abs_diff_eq!(c.area(), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_shrink_rejects_degenerate_input() {
        let line = Polygon2f::new(vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)]);
        assert!(matches!(line.shrink(1.0), Err(SlicerError::DegeneratePolygon(2))));
        assert!(matches!(
            square(0.0, 0.0, 1.0).shrink(f64::NAN),
            Err(SlicerError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_shrink_zero_is_identity() {
        let sq = square(0.0, 0.0, 10.0);
        assert_eq!(sq.shrink(0.0).unwrap(), vec![sq]);
    }
}
