#![warn(missing_docs)]

//! Math types for the RepSnapper slicer.
//!
//! Thin wrappers around nalgebra providing the point and vector types used
//! by the slicing pipeline, tolerance constants, and the handful of planar
//! segment routines that cutting-plane and offset code share.

use nalgebra::{Vector2, Vector3};

/// A point in 3D space.
pub type Point3 = nalgebra::Point3<f64>;

/// A vector in 3D space.
pub type Vec3 = Vector3<f64>;

/// A point in the slicing plane.
pub type Point2 = nalgebra::Point2<f64>;

/// A vector in the slicing plane.
pub type Vec2 = Vector2<f64>;

/// Tolerance constants for geometric comparisons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    /// Linear distance tolerance in mm.
    pub linear: f64,
    /// Parametric tolerance along a segment (unitless).
    pub parametric: f64,
}

impl Tolerance {
    /// Default slicing tolerances (1e-9 mm linear, 1e-9 parametric).
    pub const DEFAULT: Self = Self {
        linear: 1e-9,
        parametric: 1e-9,
    };

    /// Check if two points are coincident within tolerance.
    pub fn points_equal(&self, a: &Point2, b: &Point2) -> bool {
        (a - b).norm() <= self.linear
    }

    /// Check if a scalar distance is effectively zero.
    pub fn is_zero(&self, d: f64) -> bool {
        d.abs() <= self.linear
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Z component of the 3D cross product of two planar vectors.
///
/// Positive when `b` turns counter-clockwise from `a`.
#[inline]
pub fn cross2(a: &Vec2, b: &Vec2) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Left-hand unit normal of a planar direction (rotated 90° CCW).
///
/// Returns `None` for a zero-length direction.
pub fn left_normal(dir: &Vec2) -> Option<Vec2> {
    let len = dir.norm();
    if len <= 0.0 || !len.is_finite() {
        return None;
    }
    Some(Vec2::new(-dir.y / len, dir.x / len))
}

/// Intersection of the infinite lines through `a0 → a1` and `b0 → b1`.
///
/// Returns `(t, u)` such that the intersection is `a0 + t (a1 - a0)` and
/// `b0 + u (b1 - b0)`, or `None` when the lines are parallel.
pub fn line_intersection(a0: &Point2, a1: &Point2, b0: &Point2, b1: &Point2) -> Option<(f64, f64)> {
    let r = a1 - a0;
    let q = b1 - b0;
    let denom = cross2(&r, &q);
    let scale = r.norm() * q.norm();
    if scale <= 0.0 || denom.abs() <= 1e-12 * scale {
        return None;
    }
    let d = b0 - a0;
    let t = cross2(&d, &q) / denom;
    let u = cross2(&d, &r) / denom;
    Some((t, u))
}

/// Shortest distance from `p` to the closed segment `a → b`.
pub fn point_segment_distance(p: &Point2, a: &Point2, b: &Point2) -> f64 {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 <= 0.0 {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm()
}

/// Distance from `p` to the infinite line through `a` and `b`.
///
/// Falls back to the distance to `a` when `a` and `b` coincide.
pub fn point_line_distance(p: &Point2, a: &Point2, b: &Point2) -> f64 {
    let ab = b - a;
    let len = ab.norm();
    if len <= 0.0 {
        return (p - a).norm();
    }
    cross2(&ab, &(p - a)).abs() / len
}
