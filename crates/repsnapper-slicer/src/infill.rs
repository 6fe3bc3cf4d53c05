//! Scan-line infill inside the innermost shell.

use repsnapper_math::{Point2, Vec2};
use serde::{Deserialize, Serialize};

use crate::path::{optimize_polyline_order, Polyline};
use crate::polygon::Polygon2f;

/// Infill pattern types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfillPattern {
    /// One direction per layer, turned by `angle_per_layer` each layer.
    #[default]
    Parallel,
    /// Rectilinear grid: alternating 0°/90° on top of `angle`.
    Grid,
}

/// Settings for infill generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfillSettings {
    /// Infill pattern.
    pub pattern: InfillPattern,
    /// Infill density (0.0 to 1.0). Line spacing is `line_width / density`.
    pub density: f64,
    /// Base line angle (degrees).
    pub angle: f64,
    /// Extra rotation per layer for [`InfillPattern::Parallel`] (degrees).
    pub angle_per_layer: f64,
}

impl Default for InfillSettings {
    fn default() -> Self {
        Self {
            pattern: InfillPattern::Parallel,
            density: 0.2,
            angle: 45.0,
            angle_per_layer: 90.0,
        }
    }
}

impl InfillSettings {
    /// Line direction for `layer_index`, in radians.
    pub fn angle_for_layer(&self, layer_index: usize) -> f64 {
        let degrees = match self.pattern {
            InfillPattern::Parallel => self.angle + layer_index as f64 * self.angle_per_layer,
            InfillPattern::Grid if layer_index.is_multiple_of(2) => self.angle,
            InfillPattern::Grid => self.angle + 90.0,
        };
        degrees.rem_euclid(360.0).to_radians()
    }
}

/// Result of infill generation.
#[derive(Debug, Clone, Default)]
pub struct InfillResult {
    /// Infill paths (open polylines).
    pub paths: Vec<Polyline>,
}

impl InfillResult {
    /// Total extrusion length.
    pub fn length(&self) -> f64 {
        self.paths.iter().map(Polyline::length).sum()
    }
}

/// Generate infill for a region bounded by polygons.
///
/// Boundaries follow the shell convention: CCW rings bound material, CW
/// rings are holes.
pub fn generate_infill(
    boundaries: &[Polygon2f],
    settings: &InfillSettings,
    line_width: f64,
    layer_index: usize,
) -> InfillResult {
    if boundaries.is_empty() || settings.density <= 0.0 || line_width <= 0.0 {
        return InfillResult::default();
    }
    let spacing = line_width / settings.density.min(1.0);
    generate_parallel_lines(boundaries, spacing, settings.angle_for_layer(layer_index))
}

/// Generate parallel lines at specified angle within boundaries.
fn generate_parallel_lines(boundaries: &[Polygon2f], spacing: f64, angle: f64) -> InfillResult {
    let Some((min, max)) = compute_bounds(boundaries) else {
        return InfillResult::default();
    };

    // Direction along lines and across them.
    let dir = Vec2::new(angle.cos(), angle.sin());
    let perp = Vec2::new(-dir.y, dir.x);

    let corners = [
        Point2::new(min.x, min.y),
        Point2::new(max.x, min.y),
        Point2::new(max.x, max.y),
        Point2::new(min.x, max.y),
    ];
    let (perp_min, perp_max) = corners.iter().fold((f64::MAX, f64::MIN), |(lo, hi), c| {
        let proj = c.coords.dot(&perp);
        (lo.min(proj), hi.max(proj))
    });

    let mut paths: Vec<Polyline> = Vec::new();
    let mut offset = perp_min + spacing / 2.0;

    while offset < perp_max {
        let origin = Point2::from(perp * offset);

        let mut hits = find_line_boundary_intersections(&origin, &dir, boundaries);
        hits.sort_by(f64::total_cmp);

        for pair in hits.chunks_exact(2) {
            let p0 = origin + dir * pair[0];
            let p1 = origin + dir * pair[1];
            if (p1 - p0).norm() <= f64::EPSILON {
                continue;
            }
            let mid = Point2::from((p0.coords + p1.coords) / 2.0);
            if is_point_inside_boundaries(&mid, boundaries) {
                paths.push(Polyline::new(vec![p0, p1]));
            }
        }

        offset += spacing;
    }

    optimize_polyline_order(&mut paths);

    InfillResult { paths }
}

/// Compute bounding box of polygons.
fn compute_bounds(polygons: &[Polygon2f]) -> Option<(Point2, Point2)> {
    polygons
        .iter()
        .filter_map(Polygon2f::bounds)
        .reduce(|(lo, hi), (a, b)| {
            (
                Point2::new(lo.x.min(a.x), lo.y.min(a.y)),
                Point2::new(hi.x.max(b.x), hi.y.max(b.y)),
            )
        })
}

/// Parameters along `origin + t * dir` where the line crosses any boundary
/// edge.
///
/// Each edge is treated as half-open so a line through a shared vertex is
/// counted once.
fn find_line_boundary_intersections(origin: &Point2, dir: &Vec2, boundaries: &[Polygon2f]) -> Vec<f64> {
    let mut intersections = Vec::new();
    let eps = 1e-12;

    for poly in boundaries {
        for (a, b) in poly.edges() {
            let seg_dir = b - a;
            let cross = dir.x * seg_dir.y - dir.y * seg_dir.x;
            if cross.abs() < eps {
                continue;
            }

            let diff = a - origin;
            let t = (diff.x * seg_dir.y - diff.y * seg_dir.x) / cross;
            let s = (diff.x * dir.y - diff.y * dir.x) / cross;

            if (0.0..1.0).contains(&s) {
                intersections.push(t);
            }
        }
    }

    intersections
}

/// Check if a point is inside the boundary region.
/// Point must be inside an outer (CCW) contour and outside all holes (CW).
fn is_point_inside_boundaries(point: &Point2, boundaries: &[Polygon2f]) -> bool {
    let mut inside_outer = false;

    for poly in boundaries {
        if !poly.contains_point(point) {
            continue;
        }
        if poly.is_ccw() {
            inside_outer = true;
        } else {
            return false;
        }
    }

    inside_outer
}
