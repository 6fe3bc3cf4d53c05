//! Per-layer cut geometry: registered points, raw segments and linked loops.

use repsnapper_math::Point2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Result, SlicerError};
use crate::link::{link_loops, LinkParams};
use crate::point_hash::{PointRegistry, DEFAULT_POINT_EPSILON};
use crate::polygon::Polygon2f;

/// A cut segment between two registered points.
///
/// The direction is a hint: loops are walked start to end where possible and
/// opposite copies of the same edge cancel during linking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Segment {
    /// Index of the first endpoint.
    pub start: usize,
    /// Index of the second endpoint.
    pub end: usize,
}

impl Segment {
    /// Create a segment between two point indices.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// The same edge walked the other way.
    pub fn reversed(self) -> Self {
        Self {
            start: self.end,
            end: self.start,
        }
    }

    /// Whether both ends are the same point.
    pub fn is_degenerate(&self) -> bool {
        self.start == self.end
    }
}

/// Tolerances used while collecting and linking one plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaneSettings {
    /// Points closer than this (mm) share one index.
    pub point_epsilon: f64,
    /// Dangling endpoints are merged into points within this distance (mm).
    pub join_tolerance: f64,
    /// Loop vertices closer than this to their neighbours' line are dropped (mm).
    pub degenerate_tolerance: f64,
    /// Open chains are closed across gaps up to this length (mm). Zero disables.
    pub bridge_distance: f64,
}

impl Default for PlaneSettings {
    fn default() -> Self {
        Self {
            point_epsilon: DEFAULT_POINT_EPSILON,
            join_tolerance: 0.1,
            degenerate_tolerance: 0.001,
            bridge_distance: 10.0,
        }
    }
}

impl PlaneSettings {
    /// Check every tolerance is usable.
    pub fn validate(&self) -> Result<()> {
        if !(self.point_epsilon.is_finite() && self.point_epsilon > 0.0) {
            return Err(SlicerError::InvalidSettings(
                "point_epsilon must be positive".into(),
            ));
        }
        for (name, value) in [
            ("join_tolerance", self.join_tolerance),
            ("degenerate_tolerance", self.degenerate_tolerance),
            ("bridge_distance", self.bridge_distance),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(SlicerError::InvalidSettings(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Why a linking pass could not close every segment into a loop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkFailure {
    /// A chain ended at a vertex with no unused segment to continue.
    #[error("open chain ends at vertex {vertex} ({x:.4}, {y:.4})")]
    DanglingChain {
        /// Registry index of the dead end.
        vertex: usize,
        /// X coordinate of the dead end.
        x: f64,
        /// Y coordinate of the dead end.
        y: f64,
    },
}

/// Result of [`CuttingPlane::link_segments`].
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub enum LinkOutcome {
    /// Every segment was consumed; `loops` polygons are now available.
    Linked {
        /// Number of loops produced.
        loops: usize,
    },
    /// Linking failed; the polygon list was left untouched.
    Unlinked(LinkFailure),
}

impl LinkOutcome {
    /// Whether linking succeeded.
    pub fn is_linked(&self) -> bool {
        matches!(self, Self::Linked { .. })
    }

    /// Convert into a `Result` carrying the loop count.
    pub fn into_result(self) -> std::result::Result<usize, LinkFailure> {
        match self {
            Self::Linked { loops } => Ok(loops),
            Self::Unlinked(failure) => Err(failure),
        }
    }
}

/// Geometry gathered for a single Z slice.
#[derive(Debug, Clone)]
pub struct CuttingPlane {
    z: f64,
    layer_index: usize,
    settings: PlaneSettings,
    registry: PointRegistry,
    segments: Vec<Segment>,
    polygons: Vec<Polygon2f>,
}

impl CuttingPlane {
    /// Create an empty plane at height `z`.
    pub fn new(z: f64, layer_index: usize, settings: PlaneSettings) -> Self {
        Self {
            z,
            layer_index,
            settings,
            registry: PointRegistry::new(settings.point_epsilon),
            segments: Vec::new(),
            polygons: Vec::new(),
        }
    }

    /// Height of the plane.
    pub fn z(&self) -> f64 {
        self.z
    }

    /// Layer this plane belongs to.
    pub fn layer_index(&self) -> usize {
        self.layer_index
    }

    /// Settings the plane was created with.
    pub fn settings(&self) -> &PlaneSettings {
        &self.settings
    }

    /// Index of `point`, registering it if no known point is within tolerance.
    pub fn register_point(&mut self, point: Point2) -> usize {
        self.registry.register_point(point)
    }

    /// Index of a known point within tolerance.
    pub fn index_of_point(&self, point: &Point2) -> Option<usize> {
        self.registry.index_of_point(point)
    }

    /// Append a segment. Duplicates are allowed.
    ///
    /// # Panics
    ///
    /// Panics if either index was not returned by [`register_point`](Self::register_point).
    pub fn add_line(&mut self, segment: Segment) {
        let known = self.registry.len();
        assert!(
            segment.start < known && segment.end < known,
            "segment {segment:?} references an unregistered point ({known} registered)"
        );
        self.segments.push(segment);
    }

    /// Register both endpoints and append the segment between them.
    ///
    /// Returns `None` when both ends collapse onto the same point.
    pub fn add_segment_points(&mut self, start: Point2, end: Point2) -> Option<Segment> {
        let a = self.register_point(start);
        let b = self.register_point(end);
        if a == b {
            return None;
        }
        let segment = Segment::new(a, b);
        self.segments.push(segment);
        Some(segment)
    }

    /// Registered vertices in index order.
    pub fn vertices(&self) -> &[Point2] {
        self.registry.points()
    }

    /// Segments in insertion order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Loops produced by the last successful link.
    pub fn polygons(&self) -> &[Polygon2f] {
        &self.polygons
    }

    /// Consume the plane and keep its loops.
    pub fn into_polygons(self) -> Vec<Polygon2f> {
        self.polygons
    }

    /// Link the collected segments into closed loops.
    ///
    /// On success the polygon list is replaced; on failure it is left as it
    /// was. No retry happens here: a caller that wants another attempt builds
    /// a fresh plane at a nearby height.
    pub fn link_segments(&mut self, join_tolerance: f64, degenerate_tolerance: f64) -> LinkOutcome {
        let params = LinkParams {
            join_tolerance,
            degenerate_tolerance,
            bridge_distance: self.settings.bridge_distance,
        };
        match link_loops(self.registry.points(), &self.segments, &params) {
            Ok(loops) => {
                let count = loops.len();
                self.polygons = loops;
                LinkOutcome::Linked { loops: count }
            }
            Err(failure) => LinkOutcome::Unlinked(failure),
        }
    }

    /// [`link_segments`](Self::link_segments) with the plane's own tolerances.
    pub fn link(&mut self) -> LinkOutcome {
        self.link_segments(self.settings.join_tolerance, self.settings.degenerate_tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane() -> CuttingPlane {
        CuttingPlane::new(0.0, 0, PlaneSettings::default())
    }

    #[test]
    fn test_empty_plane_links() {
        let mut cp = plane();
        assert_eq!(cp.link_segments(0.1, 0.001), LinkOutcome::Linked { loops: 0 });
        assert!(cp.polygons().is_empty());
    }

    #[test]
    fn test_simple_square() {
        let mut cp = plane();
        assert!(cp.link_segments(0.1, 0.001).is_linked());

        let tl = cp.register_point(Point2::new(10.0, 20.0));
        let tr = cp.register_point(Point2::new(20.0, 20.0));
        let bl = cp.register_point(Point2::new(10.0, 10.0));
        let br = cp.register_point(Point2::new(20.0, 10.0));

        cp.add_line(Segment::new(tl, tr));
        cp.add_line(Segment::new(bl, tl));
        cp.add_line(Segment::new(tr, br));
        cp.add_line(Segment::new(br, bl));

        assert!(cp.link_segments(0.1, 0.001).is_linked());
        assert_eq!(cp.polygons().len(), 1);
        assert_eq!(cp.polygons()[0].len(), 4);
    }

    #[test]
    fn test_nastier_square() {
        let mut cp = plane();
        let d = DEFAULT_POINT_EPSILON / 2.0;
        let tl = cp.register_point(Point2::new(10.0, 20.0));
        let tln = cp.register_point(Point2::new(10.0, 20.0 + 0.01));
        let tr = cp.register_point(Point2::new(20.0, 20.0));
        let trn = cp.register_point(Point2::new(20.0 + d, 20.0));
        let bl = cp.register_point(Point2::new(10.0, 10.0));
        let bln = cp.register_point(Point2::new(10.0 + 0.5, 10.0 + 0.5));
        let br = cp.register_point(Point2::new(20.0, 10.0));
        let brn = cp.register_point(Point2::new(20.0 + 0.5, 10.0 + d));
        assert_eq!(tr, trn);

        cp.add_line(Segment::new(tl, trn));
        cp.add_line(Segment::new(bl, tln));
        cp.add_line(Segment::new(tr, brn));
        cp.add_line(Segment::new(br, bln));

        assert!(cp.link_segments(0.1, 0.001).is_linked());
        assert_eq!(cp.polygons().len(), 1);
    }

    #[test]
    fn test_near_coincident_square() {
        let mut cp = plane();
        let d = DEFAULT_POINT_EPSILON / 4.0;
        let corners = [(10.0, 20.0), (20.0, 20.0), (20.0, 10.0), (10.0, 10.0)];
        for i in 0..4 {
            let (x0, y0) = corners[i];
            let (x1, y1) = corners[(i + 1) % 4];
            cp.add_segment_points(Point2::new(x0 + d, y0 - d), Point2::new(x1 - d, y1 + d));
        }
        assert_eq!(cp.vertices().len(), 4);
        assert!(cp.link_segments(0.1, 0.001).is_linked());
        assert_eq!(cp.polygons().len(), 1);
        assert_eq!(cp.polygons()[0].len(), 4);
    }

    // a---b
    // |   |
    // c---d---e
    //     |   |
    //     f---g
    #[test]
    fn test_single_co_incident() {
        let mut cp = plane();
        let a = cp.register_point(Point2::new(10.0, 30.0));
        let b = cp.register_point(Point2::new(20.0, 30.0));
        let c = cp.register_point(Point2::new(10.0, 20.0));
        let d = cp.register_point(Point2::new(20.0, 20.0));
        let e = cp.register_point(Point2::new(30.0, 20.0));
        let f = cp.register_point(Point2::new(20.0, 10.0));
        let g = cp.register_point(Point2::new(30.0, 10.0));

        for (s, t) in [(a, b), (b, d), (d, c), (c, a), (d, e), (e, g), (g, f), (f, d)] {
            cp.add_line(Segment::new(s, t));
        }

        assert!(cp.link_segments(0.1, 0.001).is_linked());
        assert_eq!(cp.polygons().len(), 2);
    }

    // a---b
    // |   |
    // c---d
    // |   |
    // e---f
    #[test]
    fn test_boundary_co_incident() {
        let mut cp = plane();
        let a = cp.register_point(Point2::new(10.0, 30.0));
        let b = cp.register_point(Point2::new(20.0, 30.0));
        let c = cp.register_point(Point2::new(10.0, 20.0));
        let d = cp.register_point(Point2::new(20.0, 20.0));
        let e = cp.register_point(Point2::new(10.0, 10.0));
        let f = cp.register_point(Point2::new(20.0, 10.0));

        for (s, t) in [(a, b), (b, d), (d, c), (c, a), (d, f), (f, e), (e, c), (c, d)] {
            cp.add_line(Segment::new(s, t));
        }

        assert!(cp.link_segments(0.1, 0.001).is_linked());
        assert_eq!(cp.polygons().len(), 1);
        assert_eq!(cp.polygons()[0].len(), 4);
    }

    #[test]
    fn test_duplicate_segments_are_redundant() {
        let mut cp = plane();
        let p: Vec<usize> = [(0.0, 0.0), (5.0, 0.0), (5.0, 5.0), (0.0, 5.0)]
            .iter()
            .map(|&(x, y)| cp.register_point(Point2::new(x, y)))
            .collect();
        for i in 0..4 {
            cp.add_line(Segment::new(p[i], p[(i + 1) % 4]));
            cp.add_line(Segment::new(p[i], p[(i + 1) % 4]));
        }
        assert_eq!(cp.link().into_result(), Ok(1));
        assert_eq!(cp.polygons()[0].len(), 4);
    }

    #[test]
    fn test_failure_leaves_polygons_untouched() {
        let settings = PlaneSettings {
            bridge_distance: 0.0,
            ..PlaneSettings::default()
        };
        let mut cp = CuttingPlane::new(1.0, 3, settings);
        let p: Vec<usize> = [(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]
            .iter()
            .map(|&(x, y)| cp.register_point(Point2::new(x, y)))
            .collect();
        for i in 0..4 {
            cp.add_line(Segment::new(p[i], p[(i + 1) % 4]));
        }
        assert_eq!(cp.link().into_result(), Ok(1));
        let before = cp.polygons().to_vec();

        // A spur off one corner leaves an open chain.
        cp.add_segment_points(Point2::new(10.0, 0.0), Point2::new(15.0, -5.0));
        match cp.link() {
            LinkOutcome::Unlinked(LinkFailure::DanglingChain { .. }) => {}
            other => panic!("expected dangling chain, got {other:?}"),
        }
        assert_eq!(cp.polygons(), before.as_slice());
        assert_eq!(cp.polygons()[0].len(), 4);
        assert_eq!(cp.layer_index(), 3);
    }

    #[test]
    fn test_reversed_duplicate_edge_still_links() {
        let mut cp = plane();
        let p: Vec<usize> = [(0.0, 0.0), (20.0, 0.0), (20.0, 20.0), (0.0, 20.0)]
            .iter()
            .map(|&(x, y)| cp.register_point(Point2::new(x, y)))
            .collect();
        for i in 0..4 {
            cp.add_line(Segment::new(p[i], p[(i + 1) % 4]));
        }
        cp.add_line(Segment::new(p[1], p[0]));
        assert_eq!(cp.link(), LinkOutcome::Linked { loops: 1 });
        assert_eq!(cp.polygons()[0].len(), 4);
        assert!((cp.polygons()[0].area() - 400.0).abs() < 1e-9);
    }

    #[test]
    #[should_panic(expected = "unregistered point")]
    fn test_add_line_rejects_unknown_index() {
        let mut cp = plane();
        let a = cp.register_point(Point2::new(0.0, 0.0));
        cp.add_line(Segment::new(a, 7));
    }

    #[test]
    fn test_settings_validation() {
        assert!(PlaneSettings::default().validate().is_ok());
        let bad = PlaneSettings {
            point_epsilon: 0.0,
            ..PlaneSettings::default()
        };
        assert!(bad.validate().is_err());
        let bad = PlaneSettings {
            join_tolerance: -1.0,
            ..PlaneSettings::default()
        };
        assert!(bad.validate().is_err());
    }
}
