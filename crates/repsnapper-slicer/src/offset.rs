//! Edge-offset polygon shrinking with self-intersection splitting.
//!
//! Every edge is moved along its interior normal and consecutive offset edges
//! are rejoined at the intersection of their supporting lines. When the
//! shifted edges overrun each other the raw ring crosses itself; it is then
//! cut at every crossing into simple loops, and only the loops that keep the
//! source orientation and stay a full offset away from the source boundary
//! survive.

use std::collections::HashMap;

use repsnapper_math::{cross2, left_normal, line_intersection, Point2, Tolerance, Vec2};
use tracing::trace;

use crate::polygon::Polygon2f;

/// Reflex miters longer than this multiple of the offset are bevelled.
const MITER_LIMIT: f64 = 4.0;

/// Parametric slack when deciding whether two offset edges still meet.
const PARAM_EPS: f64 = 1e-9;

/// Offset `points` toward the interior by `distance` (negative expands).
///
/// The caller guarantees at least three vertices and a finite, non-zero
/// distance.
pub(crate) fn offset_ring(points: &[Point2], distance: f64) -> Vec<Polygon2f> {
    let tol = Tolerance::DEFAULT;
    let source = Polygon2f::new(points.to_vec()).cleaned(tol.linear);
    if source.len() < 3 {
        trace!(vertices = points.len(), "ring collapsed before offset");
        return Vec::new();
    }

    let area = source.signed_area();
    if tol.is_zero(area) {
        trace!("zero-area ring, nothing to offset");
        return Vec::new();
    }
    let winding = area.signum();

    let Some(raw) = offset_vertices(&source.points, winding, distance) else {
        return Vec::new();
    };
    let raw = Polygon2f::new(raw).cleaned(tol.linear);
    if raw.len() < 3 {
        return Vec::new();
    }

    let min_clearance = distance.abs() - 1e-6 * (1.0 + distance.abs());
    split_self_intersections(&raw.points)
        .into_iter()
        .filter_map(|points| {
            let candidate = Polygon2f::new(points).cleaned(tol.linear);
            if candidate.len() < 3 {
                return None;
            }
            let candidate_area = candidate.signed_area();
            if tol.is_zero(candidate_area) || candidate_area.signum() != winding {
                trace!(area = candidate_area, "dropping inverted or empty offset loop");
                return None;
            }
            let too_close = candidate
                .points
                .iter()
                .any(|p| source.distance_to_boundary(p) < min_clearance);
            if too_close {
                trace!(vertices = candidate.len(), "dropping offset loop inside clearance");
                return None;
            }
            Some(candidate)
        })
        .collect()
}

/// One offset edge: the source edge shifted along its interior normal.
#[derive(Debug, Clone, Copy)]
struct OffsetEdge {
    start: Point2,
    end: Point2,
    dir: Vec2,
}

/// Build the raw (possibly self-intersecting) offset ring.
///
/// The first output vertex is the join at source vertex 0, so the result
/// keeps the source's starting corner.
fn offset_vertices(points: &[Point2], winding: f64, distance: f64) -> Option<Vec<Point2>> {
    let n = points.len();
    let mut edges = Vec::with_capacity(n);
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        let dir = b - a;
        let normal = left_normal(&dir)? * winding;
        edges.push(OffsetEdge {
            start: a + normal * distance,
            end: b + normal * distance,
            dir,
        });
    }

    let mut out = Vec::with_capacity(n + n / 2);
    for j in 0..n {
        let prev = &edges[(j + n - 1) % n];
        let next = &edges[j];
        join(&mut out, points[j], prev, next, winding, distance);
    }
    Some(out)
}

/// Emit the vertex (or vertices) joining `prev` to `next` at `corner`.
fn join(
    out: &mut Vec<Point2>,
    corner: Point2,
    prev: &OffsetEdge,
    next: &OffsetEdge,
    winding: f64,
    distance: f64,
) {
    let Some((t, u)) = line_intersection(&prev.start, &prev.end, &next.start, &next.end) else {
        out.push(prev.end);
        out.push(next.start);
        return;
    };
    let hit = prev.start + (prev.end - prev.start) * t;

    // Positive when the corner pinches the offset edges together.
    let closing = winding * cross2(&prev.dir, &next.dir) * distance.signum() > 0.0;
    if closing {
        let within = (-PARAM_EPS..=1.0 + PARAM_EPS).contains(&t)
            && (-PARAM_EPS..=1.0 + PARAM_EPS).contains(&u);
        if within {
            out.push(hit);
        } else {
            out.push(prev.end);
            out.push(next.start);
        }
    } else if (hit - corner).norm() > MITER_LIMIT * distance.abs() {
        out.push(prev.end);
        out.push(next.start);
    } else {
        out.push(hit);
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    point: Point2,
    node: Option<usize>,
}

/// Cut a ring at every point where two non-adjacent edges cross.
///
/// Crossings become shared nodes in an augmented vertex sequence; the
/// sequence is repeatedly split at the first node it visits twice until no
/// loop revisits a node. The loop holding the original start comes first.
fn split_self_intersections(ring: &[Point2]) -> Vec<Vec<Point2>> {
    let m = ring.len();
    let mut hits: Vec<Vec<(f64, usize)>> = vec![Vec::new(); m];
    let mut nodes: Vec<Point2> = Vec::new();

    for i in 0..m {
        let a0 = ring[i];
        let a1 = ring[(i + 1) % m];
        for k in (i + 2)..m {
            if i == 0 && k == m - 1 {
                continue;
            }
            let b0 = ring[k];
            let b1 = ring[(k + 1) % m];
            if !boxes_overlap(&a0, &a1, &b0, &b1) {
                continue;
            }
            let Some((t, u)) = line_intersection(&a0, &a1, &b0, &b1) else {
                continue;
            };
            if (0.0..1.0).contains(&t) && (0.0..1.0).contains(&u) {
                let node = nodes.len();
                nodes.push(a0 + (a1 - a0) * t);
                hits[i].push((t, node));
                hits[k].push((u, node));
            }
        }
    }

    if nodes.is_empty() {
        return vec![ring.to_vec()];
    }

    let mut sequence = Vec::with_capacity(m + 2 * nodes.len());
    for (i, edge_hits) in hits.iter_mut().enumerate() {
        sequence.push(Entry {
            point: ring[i],
            node: None,
        });
        edge_hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        sequence.extend(edge_hits.iter().map(|&(_, node)| Entry {
            point: nodes[node],
            node: Some(node),
        }));
    }

    let mut loops = Vec::new();
    let mut work = vec![sequence];
    while let Some(seq) = work.pop() {
        match first_repeat(&seq) {
            Some((i, j)) => {
                let inner = seq[i..j].to_vec();
                let mut outer = seq[..i].to_vec();
                outer.extend_from_slice(&seq[j..]);
                work.push(inner);
                work.push(outer);
            }
            None => loops.push(seq.into_iter().map(|e| e.point).collect()),
        }
    }
    loops
}

/// Positions `(first, second)` of the first node visited twice.
fn first_repeat(seq: &[Entry]) -> Option<(usize, usize)> {
    let mut seen: HashMap<usize, usize> = HashMap::new();
    for (pos, entry) in seq.iter().enumerate() {
        if let Some(node) = entry.node {
            if let Some(&first) = seen.get(&node) {
                return Some((first, pos));
            }
            seen.insert(node, pos);
        }
    }
    None
}

fn boxes_overlap(a0: &Point2, a1: &Point2, b0: &Point2, b1: &Point2) -> bool {
    a0.x.min(a1.x) <= b0.x.max(b1.x)
        && b0.x.min(b1.x) <= a0.x.max(a1.x)
        && a0.y.min(a1.y) <= b0.y.max(b1.y)
        && b0.y.min(b1.y) <= a0.y.max(a1.y)
}
