//! Mesh slicing - intersect triangle mesh with horizontal planes.

use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use repsnapper_math::{Point2, Point3, Tolerance, Vec3};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cutting_plane::{CuttingPlane, LinkOutcome, PlaneSettings};
use crate::error::{Result, SlicerError};
use crate::mesh::TriangleMesh;
use crate::polygon::Polygon2f;

/// What to do with a layer whose segments never link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkFailurePolicy {
    /// Log a warning and emit the layer without geometry.
    #[default]
    Skip,
    /// Stop slicing with [`SlicerError::LinkFailed`].
    Abort,
}

/// Retry policy for layers that fail to link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Extra attempts after the first, each one `z_nudge` higher.
    pub max_link_retries: usize,
    /// Height step between attempts (mm).
    pub z_nudge: f64,
    /// Behaviour once every attempt has failed.
    pub on_failure: LinkFailurePolicy,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_link_retries: 3,
            z_nudge: 0.1,
            on_failure: LinkFailurePolicy::Skip,
        }
    }
}

impl RetrySettings {
    /// Validate settings.
    pub fn validate(&self) -> Result<()> {
        if !(self.z_nudge.is_finite() && self.z_nudge > 0.0) {
            return Err(SlicerError::InvalidSettings(
                "z_nudge must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// A single layer from slicing.
#[derive(Debug, Clone)]
pub struct SliceLayer {
    /// Requested Z height of this layer (mm).
    pub z: f64,
    /// Height the contours were actually cut at (differs after a retry).
    pub cut_z: f64,
    /// Layer index (0 = first layer).
    pub index: usize,
    /// Linked contours at this layer, in no particular winding.
    pub contours: Vec<Polygon2f>,
    /// Cutting planes built for this layer.
    pub link_attempts: usize,
    /// Whether linking failed and the layer was left empty.
    pub skipped: bool,
}

impl SliceLayer {
    /// Create a new empty layer.
    pub fn new(z: f64, index: usize) -> Self {
        Self {
            z,
            cut_z: z,
            index,
            contours: Vec::new(),
            link_attempts: 0,
            skipped: false,
        }
    }
}

/// A plane whose segments linked, and how many planes it took.
#[derive(Debug, Clone)]
pub struct LinkedPlane {
    /// The successfully linked plane.
    pub plane: CuttingPlane,
    /// Number of planes built, including the successful one.
    pub attempts: usize,
}

/// Build and link planes at `z`, `z + nudge`, `z + 2 * nudge`, ... until one
/// links or the retries run out.
///
/// `build` produces a fresh plane with its segments collected for the given
/// height. Linking uses each plane's own tolerances.
pub fn link_with_retry<F>(z: f64, retry: &RetrySettings, mut build: F) -> Result<LinkedPlane>
where
    F: FnMut(f64) -> CuttingPlane,
{
    let mut attempt = 0;
    loop {
        let cut_z = z + attempt as f64 * retry.z_nudge;
        let mut plane = build(cut_z);
        attempt += 1;
        match plane.link() {
            LinkOutcome::Linked { loops } => {
                if attempt > 1 {
                    debug!(z, cut_z, attempts = attempt, loops, "linked after retry");
                }
                return Ok(LinkedPlane {
                    plane,
                    attempts: attempt,
                });
            }
            LinkOutcome::Unlinked(failure) => {
                if attempt > retry.max_link_retries {
                    return Err(SlicerError::LinkFailed {
                        z,
                        attempts: attempt,
                        source: failure,
                    });
                }
                warn!(z, cut_z, attempt, %failure, "segment linking failed, retrying higher");
            }
        }
    }
}

/// Slice a triangle mesh at multiple Z heights.
///
/// Returns layers sorted by Z height from bottom to top.
pub fn slice_mesh(
    mesh: &TriangleMesh,
    layer_heights: &[f64],
    plane: &PlaneSettings,
    retry: &RetrySettings,
) -> Result<Vec<SliceLayer>> {
    slice_mesh_with_cancel(mesh, layer_heights, plane, retry, &AtomicBool::new(false))
}

/// [`slice_mesh`] that stops with [`SlicerError::Cancelled`] once `cancel`
/// is set. Layers not yet started are skipped; finished ones are discarded.
pub fn slice_mesh_with_cancel(
    mesh: &TriangleMesh,
    layer_heights: &[f64],
    plane: &PlaneSettings,
    retry: &RetrySettings,
    cancel: &AtomicBool,
) -> Result<Vec<SliceLayer>> {
    if mesh.vertices.is_empty() || mesh.indices.is_empty() {
        return Err(SlicerError::EmptyMesh);
    }
    plane.validate()?;
    retry.validate()?;

    let triangles = extract_triangles(mesh)?;

    // Slice in parallel; collect keeps index order.
    let layers: Vec<SliceLayer> = layer_heights
        .par_iter()
        .enumerate()
        .map(|(idx, &z)| {
            if cancel.load(Ordering::Relaxed) {
                return Err(SlicerError::Cancelled);
            }
            slice_at_z(&triangles, z, idx, plane, retry)
        })
        .collect::<Result<_>>()?;

    if cancel.load(Ordering::Relaxed) {
        return Err(SlicerError::Cancelled);
    }
    Ok(layers)
}

/// A triangle with its vertices, facing and bounding Z range.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Triangle {
    v0: Point3,
    v1: Point3,
    v2: Point3,
    normal: Vec3,
    z_min: f64,
    z_max: f64,
}

impl Triangle {
    fn new(v0: Point3, v1: Point3, v2: Point3, normal: Option<Vec3>) -> Self {
        let normal = normal
            .filter(|n| n.iter().any(|c| *c != 0.0))
            .unwrap_or_else(|| (v1 - v0).cross(&(v2 - v0)));
        Self {
            v0,
            v1,
            v2,
            normal,
            z_min: v0.z.min(v1.z).min(v2.z),
            z_max: v0.z.max(v1.z).max(v2.z),
        }
    }
}

/// Extract triangles from mesh for slicing.
pub(crate) fn extract_triangles(mesh: &TriangleMesh) -> Result<Vec<Triangle>> {
    if mesh.indices.len() % 3 != 0 {
        return Err(SlicerError::DegenerateMesh(format!(
            "index count {} is not a multiple of 3",
            mesh.indices.len()
        )));
    }
    let num_triangles = mesh.num_triangles();
    let has_normals = mesh.normals.len() == num_triangles * 3;

    let vertex = |i: u32| -> Result<Point3> {
        let base = i as usize * 3;
        mesh.vertices
            .get(base..base + 3)
            .map(|v| Point3::new(v[0] as f64, v[1] as f64, v[2] as f64))
            .ok_or_else(|| {
                SlicerError::DegenerateMesh(format!(
                    "index {i} out of range for {} vertices",
                    mesh.num_vertices()
                ))
            })
    };

    (0..num_triangles)
        .map(|t| {
            let v0 = vertex(mesh.indices[t * 3])?;
            let v1 = vertex(mesh.indices[t * 3 + 1])?;
            let v2 = vertex(mesh.indices[t * 3 + 2])?;
            let normal = has_normals.then(|| {
                Vec3::new(
                    mesh.normals[t * 3] as f64,
                    mesh.normals[t * 3 + 1] as f64,
                    mesh.normals[t * 3 + 2] as f64,
                )
            });
            Ok(Triangle::new(v0, v1, v2, normal))
        })
        .collect()
}

/// Collect the cut segments of every triangle crossing `z` into a new plane.
pub(crate) fn build_cutting_plane(
    triangles: &[Triangle],
    z: f64,
    index: usize,
    settings: &PlaneSettings,
) -> CuttingPlane {
    let mut plane = CuttingPlane::new(z, index, *settings);
    for tri in triangles {
        // Skip triangles that don't cross this Z plane
        if tri.z_max < z || tri.z_min > z {
            continue;
        }
        if let Some((a, b)) = triangle_plane_intersection(tri, z) {
            plane.add_segment_points(a, b);
        }
    }
    plane
}

/// Slice mesh at a single Z height, retrying higher when linking fails.
fn slice_at_z(
    triangles: &[Triangle],
    z: f64,
    index: usize,
    plane: &PlaneSettings,
    retry: &RetrySettings,
) -> Result<SliceLayer> {
    let linked = link_with_retry(z, retry, |cut_z| {
        build_cutting_plane(triangles, cut_z, index, plane)
    });

    match linked {
        Ok(LinkedPlane { plane, attempts }) => Ok(SliceLayer {
            z,
            cut_z: plane.z(),
            index,
            contours: plane.into_polygons(),
            link_attempts: attempts,
            skipped: false,
        }),
        Err(SlicerError::LinkFailed {
            attempts, source, ..
        }) if retry.on_failure == LinkFailurePolicy::Skip => {
            warn!(z, index, attempts, error = %source, "skipping layer that would not link");
            Ok(SliceLayer {
                link_attempts: attempts,
                skipped: true,
                ..SliceLayer::new(z, index)
            })
        }
        Err(e) => Err(e),
    }
}

/// Intersect a triangle with a horizontal plane at Z.
///
/// Returns the segment projected to XY, directed so that the triangle's
/// outward normal lies on its right. Closed outer boundaries therefore come
/// out counter-clockwise and holes clockwise.
fn triangle_plane_intersection(tri: &Triangle, z: f64) -> Option<(Point2, Point2)> {
    let tol = Tolerance::DEFAULT;
    let eps = tol.linear;

    // Classify vertices relative to plane
    let d0 = tri.v0.z - z;
    let d1 = tri.v1.z - z;
    let d2 = tri.v2.z - z;

    // All on same side - no intersection
    if (d0 > eps && d1 > eps && d2 > eps) || (d0 < -eps && d1 < -eps && d2 < -eps) {
        return None;
    }

    let mut points: Vec<Point2> = Vec::with_capacity(3);
    let edges = [
        (tri.v0, tri.v1, d0, d1),
        (tri.v1, tri.v2, d1, d2),
        (tri.v2, tri.v0, d2, d0),
    ];

    for (va, vb, da, db) in edges {
        if (da > eps && db < -eps) || (da < -eps && db > eps) {
            // Edge crosses the plane
            let t = da / (da - db);
            let p = va + (vb - va) * t;
            points.push(Point2::new(p.x, p.y));
        } else if da.abs() <= eps && db.abs() > eps {
            points.push(Point2::new(va.x, va.y));
        } else if db.abs() <= eps && da.abs() > eps {
            points.push(Point2::new(vb.x, vb.y));
        }
    }

    points.dedup_by(|a, b| tol.points_equal(a, b));
    if points.len() > 2 && tol.points_equal(&points[0], &points[points.len() - 1]) {
        points.pop();
    }
    if points.len() < 2 {
        return None;
    }

    let (a, b) = (points[0], points[1]);
    let d = b - a;
    // Right-hand normal of the segment against the face normal's XY part.
    if d.y * tri.normal.x - d.x * tri.normal.y < 0.0 {
        Some((b, a))
    } else {
        Some((a, b))
    }
}

/// Compute the bounding box of a mesh.
/// Returns (min, max) as ([x, y, z], [x, y, z]).
pub fn mesh_bounds(mesh: &TriangleMesh) -> Option<([f64; 3], [f64; 3])> {
    if mesh.vertices.len() < 3 {
        return None;
    }

    let mut min = [f64::MAX; 3];
    let mut max = [f64::MIN; 3];

    for v in mesh.vertices.chunks_exact(3) {
        for axis in 0..3 {
            let c = v[axis] as f64;
            min[axis] = min[axis].min(c);
            max[axis] = max[axis].max(c);
        }
    }

    Some((min, max))
}

/// Generate layer heights for slicing.
///
/// Each height sits in the middle of its layer: the first at half the first
/// layer height, the rest every `layer_height` above that layer.
pub fn generate_layer_heights(
    z_min: f64,
    z_max: f64,
    first_layer_height: f64,
    layer_height: f64,
) -> Vec<f64> {
    let mut heights = Vec::new();

    if z_max <= z_min || first_layer_height <= 0.0 || layer_height <= 0.0 {
        return heights;
    }

    let first_z = z_min + first_layer_height / 2.0;
    if first_z <= z_max {
        heights.push(first_z);
    }

    let base = z_min + first_layer_height + layer_height / 2.0;
    let mut n = 0usize;
    loop {
        let z = base + n as f64 * layer_height;
        if z > z_max {
            break;
        }
        heights.push(z);
        n += 1;
    }

    heights
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cutting_plane::Segment;
    use approx::assert_abs_diff_eq;

    pub(crate) fn make_cube_mesh(size: f32) -> TriangleMesh {
        let vertices = vec![
            // Bottom face (z=0)
            0.0, 0.0, 0.0, size, 0.0, 0.0, size, size, 0.0, 0.0, size, 0.0,
            // Top face (z=size)
            0.0, 0.0, size, size, 0.0, size, size, size, size, 0.0, size, size,
        ];
        let indices = vec![
            // Bottom
            0, 2, 1, 0, 3, 2, // Top
            4, 5, 6, 4, 6, 7, // Front
            0, 1, 5, 0, 5, 4, // Back
            2, 3, 7, 2, 7, 6, // Left
            0, 4, 7, 0, 7, 3, // Right
            1, 2, 6, 1, 6, 5,
        ];
        TriangleMesh {
            vertices,
            indices,
            normals: Vec::new(),
        }
    }

    #[test]
    fn test_mesh_bounds() {
        let mesh = make_cube_mesh(10.0);
        let (min, max) = mesh_bounds(&mesh).unwrap();
        for axis in 0..3 {
            assert_abs_diff_eq!(min[axis], 0.0);
            assert_abs_diff_eq!(max[axis], 10.0);
        }
        assert!(mesh_bounds(&TriangleMesh::new()).is_none());
    }

    #[test]
    fn test_generate_layer_heights() {
        let heights = generate_layer_heights(0.0, 10.0, 0.3, 0.2);
        assert_abs_diff_eq!(heights[0], 0.15);
        assert_abs_diff_eq!(heights[1], 0.4, epsilon = 1e-12);
        assert!(*heights.last().unwrap() <= 10.0);
        assert!(heights.windows(2).all(|w| w[0] < w[1]));
        assert!(generate_layer_heights(5.0, 5.0, 0.3, 0.2).is_empty());
    }

    #[test]
    fn test_slice_cube() {
        let mesh = make_cube_mesh(10.0);
        let heights = generate_layer_heights(0.0, 10.0, 0.3, 0.2);
        let layers = slice_mesh(
            &mesh,
            &heights,
            &PlaneSettings::default(),
            &RetrySettings::default(),
        )
        .unwrap();

        assert_eq!(layers.len(), heights.len());
        for (layer, z) in layers.iter().zip(&heights) {
            assert_abs_diff_eq!(layer.z, *z);
            assert!(!layer.skipped);
            assert_eq!(layer.link_attempts, 1);
            // Each layer has exactly one square contour, wound CCW.
            assert_eq!(layer.contours.len(), 1);
            let square = &layer.contours[0];
            assert_eq!(square.len(), 4);
            assert!(square.is_ccw());
            assert_abs_diff_eq!(square.area(), 100.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_segment_direction_follows_normal() {
        // Wall facing -Y, cut at z=0.5: outward normal on the right means +X.
        let tri = Triangle::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 1.0),
            None,
        );
        assert!(tri.normal.y < 0.0);
        let (a, b) = triangle_plane_intersection(&tri, 0.5).unwrap();
        assert!(b.x > a.x);
    }

    #[test]
    fn test_vertex_touch_gives_no_segment() {
        let tri = Triangle::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 1.0),
            Point3::new(0.0, 1.0, 1.0),
            None,
        );
        assert!(triangle_plane_intersection(&tri, 0.0).is_none());
    }

    #[test]
    fn test_bad_index_is_rejected() {
        let mut mesh = make_cube_mesh(1.0);
        mesh.indices[4] = 99;
        assert!(matches!(
            extract_triangles(&mesh),
            Err(SlicerError::DegenerateMesh(_))
        ));
    }

    #[test]
    fn test_retry_links_at_nudged_height() {
        let retry = RetrySettings::default();
        let mut heights = Vec::new();
        let linked = link_with_retry(1.0, &retry, |z| {
            heights.push(z);
            let settings = PlaneSettings {
                bridge_distance: 0.0,
                ..PlaneSettings::default()
            };
            let mut plane = CuttingPlane::new(z, 0, settings);
            let a = plane.register_point(Point2::new(0.0, 0.0));
            let b = plane.register_point(Point2::new(5.0, 0.0));
            let c = plane.register_point(Point2::new(0.0, 5.0));
            plane.add_line(Segment::new(a, b));
            plane.add_line(Segment::new(b, c));
            // Only the third height produces a closed triangle.
            if heights.len() == 3 {
                plane.add_line(Segment::new(c, a));
            }
            plane
        })
        .unwrap();

        assert_eq!(linked.attempts, 3);
        assert_abs_diff_eq!(linked.plane.z(), 1.2, epsilon = 1e-12);
        assert_eq!(linked.plane.polygons().len(), 1);
        assert_abs_diff_eq!(heights[1], 1.1, epsilon = 1e-12);
    }

    #[test]
    fn test_retry_exhaustion_reports_failure() {
        let retry = RetrySettings {
            max_link_retries: 2,
            ..RetrySettings::default()
        };
        let mut calls = 0;
        let err = link_with_retry(2.0, &retry, |z| {
            calls += 1;
            let settings = PlaneSettings {
                bridge_distance: 0.0,
                ..PlaneSettings::default()
            };
            let mut plane = CuttingPlane::new(z, 0, settings);
            plane.add_segment_points(Point2::new(0.0, 0.0), Point2::new(1.0, 0.0));
            plane
        })
        .unwrap_err();

        assert_eq!(calls, 3);
        match err {
            SlicerError::LinkFailed { z, attempts, .. } => {
                assert_abs_diff_eq!(z, 2.0);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_cancelled_before_start() {
        let mesh = make_cube_mesh(10.0);
        let heights = generate_layer_heights(0.0, 10.0, 0.3, 0.2);
        let cancel = AtomicBool::new(true);
        let result = slice_mesh_with_cancel(
            &mesh,
            &heights,
            &PlaneSettings::default(),
            &RetrySettings::default(),
            &cancel,
        );
        assert!(matches!(result, Err(SlicerError::Cancelled)));
    }
}
