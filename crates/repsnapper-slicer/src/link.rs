//! Assembly of unordered cut segments into closed loops.

use std::collections::HashMap;

use repsnapper_math::Point2;
use tracing::{debug, warn};

use crate::cutting_plane::{LinkFailure, Segment};
use crate::point_hash::PointHash;
use crate::polygon::Polygon2f;

/// Gaps wider than this (mm) are still bridged but reported.
const BRIDGE_WARN_DISTANCE: f64 = 1.0;

/// Tolerances for one linking pass.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LinkParams {
    pub join_tolerance: f64,
    pub degenerate_tolerance: f64,
    pub bridge_distance: f64,
}

/// Link `segments` (indices into `points`) into closed, cleaned loops.
pub(crate) fn link_loops(
    points: &[Point2],
    segments: &[Segment],
    params: &LinkParams,
) -> Result<Vec<Polygon2f>, LinkFailure> {
    if segments.is_empty() {
        return Ok(Vec::new());
    }

    let joined = join_dangling(points, segments, params.join_tolerance);
    let mut normalized = normalize(&joined);
    let bridged = bridge_gaps(points, &mut normalized, params.bridge_distance);

    let chains = walk(points, &normalized)?;
    let total = chains.len();
    let loops: Vec<Polygon2f> = chains
        .into_iter()
        .map(|chain| {
            Polygon2f::new(chain.into_iter().map(|v| points[v]).collect())
                .cleaned(params.degenerate_tolerance)
        })
        .filter(|p| p.len() >= 3)
        .collect();

    debug!(
        segments = segments.len(),
        kept = normalized.len(),
        bridged,
        loops = loops.len(),
        dropped = total - loops.len(),
        "linked segments"
    );
    Ok(loops)
}

fn degrees(vertex_count: usize, segments: &[Segment]) -> Vec<usize> {
    let mut degree = vec![0; vertex_count];
    for s in segments.iter().filter(|s| !s.is_degenerate()) {
        degree[s.start] += 1;
        degree[s.end] += 1;
    }
    degree
}

fn resolve(remap: &[usize], mut v: usize) -> usize {
    while remap[v] != v {
        v = remap[v];
    }
    v
}

/// Merge each odd-degree vertex into the nearest other in-use vertex within
/// `tolerance`, preferring vertices that are themselves dangling.
fn join_dangling(points: &[Point2], segments: &[Segment], tolerance: f64) -> Vec<Segment> {
    let mut degree = degrees(points.len(), segments);
    let mut remap: Vec<usize> = (0..points.len()).collect();

    if tolerance > 0.0 {
        let mut grid = PointHash::new(tolerance);
        for (v, p) in points.iter().enumerate().filter(|&(v, _)| degree[v] > 0) {
            grid.insert_point(v, *p);
        }

        for v in 0..points.len() {
            if degree[v] % 2 == 0 || remap[v] != v {
                continue;
            }
            let mut best_dangling: Option<(f64, usize)> = None;
            let mut best_any: Option<(f64, usize)> = None;
            for (w, dist) in grid.points_within(&points[v]) {
                if w == v || degree[w] == 0 || remap[w] != w {
                    continue;
                }
                let candidate = (dist, w);
                if best_any.is_none_or(|best| candidate < best) {
                    best_any = Some(candidate);
                }
                if degree[w] % 2 == 1 && best_dangling.is_none_or(|best| candidate < best) {
                    best_dangling = Some(candidate);
                }
            }
            if let Some((_, w)) = best_dangling.or(best_any) {
                remap[v] = w;
                degree[w] += degree[v];
                degree[v] = 0;
            }
        }
    }

    segments
        .iter()
        .map(|s| Segment::new(resolve(&remap, s.start), resolve(&remap, s.end)))
        .collect()
}

/// Drop zero-length segments, cancel shared internal edges and collapse
/// duplicates.
///
/// Segments are grouped by unordered vertex pair and each group keeps one
/// segment, in the dominant direction or, when both directions balance, in
/// the direction seen first. A balanced group is removed instead when both
/// its endpoints are left with an even degree of at least two: that is an
/// edge shared by two closed regions. Survivors keep first-occurrence order.
fn normalize(segments: &[Segment]) -> Vec<Segment> {
    struct Group {
        first: Segment,
        net: i64,
    }

    let mut groups: HashMap<(usize, usize), Group> = HashMap::new();
    let mut order: Vec<(usize, usize)> = Vec::new();

    for s in segments.iter().filter(|s| !s.is_degenerate()) {
        let key = (s.start.min(s.end), s.start.max(s.end));
        let step = if s.start < s.end { 1 } else { -1 };
        groups
            .entry(key)
            .or_insert_with(|| {
                order.push(key);
                Group { first: *s, net: 0 }
            })
            .net += step;
    }

    let mut degree: HashMap<usize, usize> = HashMap::new();
    for &(lo, hi) in &order {
        *degree.entry(lo).or_default() += 1;
        *degree.entry(hi).or_default() += 1;
    }

    let mut kept = Vec::with_capacity(order.len());
    for key @ (lo, hi) in order {
        let group = &groups[&key];
        match group.net {
            0 => {
                let shared = [lo, hi].iter().all(|v| {
                    let left = degree[v] - 1;
                    left >= 2 && left % 2 == 0
                });
                if shared {
                    for v in [lo, hi] {
                        if let Some(d) = degree.get_mut(&v) {
                            *d -= 1;
                        }
                    }
                } else {
                    kept.push(group.first);
                }
            }
            n if n > 0 => kept.push(Segment::new(lo, hi)),
            _ => kept.push(Segment::new(hi, lo)),
        }
    }
    kept
}

/// Pair the remaining dangling vertices nearest-first and close each pair
/// with a synthetic segment, if the gap is within `max_distance`.
///
/// Returns the number of bridges added.
fn bridge_gaps(points: &[Point2], segments: &mut Vec<Segment>, max_distance: f64) -> usize {
    if max_distance <= 0.0 {
        return 0;
    }

    let mut out_degree = vec![0usize; points.len()];
    let mut in_degree = vec![0usize; points.len()];
    for s in segments.iter() {
        out_degree[s.start] += 1;
        in_degree[s.end] += 1;
    }
    let dangling: Vec<usize> = (0..points.len())
        .filter(|&v| (out_degree[v] + in_degree[v]) % 2 == 1)
        .collect();
    if dangling.len() < 2 {
        return 0;
    }

    let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
    for (i, &a) in dangling.iter().enumerate() {
        for &b in &dangling[i + 1..] {
            let dist = (points[b] - points[a]).norm();
            if dist <= max_distance {
                candidates.push((dist, a, b));
            }
        }
    }
    candidates.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)).then(x.2.cmp(&y.2)));

    let mut paired = vec![false; points.len()];
    let mut added = 0;
    for (dist, a, b) in candidates {
        if paired[a] || paired[b] {
            continue;
        }
        paired[a] = true;
        paired[b] = true;
        // Run from the vertex where a chain ends into the one where a chain starts.
        let bridge = if out_degree[a] > in_degree[a] {
            Segment::new(b, a)
        } else {
            Segment::new(a, b)
        };
        if dist > BRIDGE_WARN_DISTANCE {
            warn!(
                gap = dist,
                from = ?points[bridge.start],
                to = ?points[bridge.end],
                "bridging wide gap between open chains"
            );
        }
        segments.push(bridge);
        added += 1;
    }
    added
}

/// Walk the segment graph into vertex chains, one per closed loop.
///
/// A walk that revisits a vertex in its own chain closes off the sub-loop
/// from that vertex, so regions touching at one vertex come out separately.
fn walk(points: &[Point2], segments: &[Segment]) -> Result<Vec<Vec<usize>>, LinkFailure> {
    let mut adjacency: HashMap<usize, Vec<usize>> = HashMap::new();
    for (id, s) in segments.iter().enumerate() {
        adjacency.entry(s.start).or_default().push(id);
        adjacency.entry(s.end).or_default().push(id);
    }

    let mut used = vec![false; segments.len()];
    let mut loops = Vec::new();

    for seed in 0..segments.len() {
        if used[seed] {
            continue;
        }
        used[seed] = true;
        let mut chain = vec![segments[seed].start, segments[seed].end];
        let mut position: HashMap<usize, usize> =
            HashMap::from([(segments[seed].start, 0), (segments[seed].end, 1)]);

        loop {
            let Some(&current) = chain.last() else {
                break;
            };
            let touching = adjacency.get(&current).map(Vec::as_slice).unwrap_or(&[]);
            let next = touching
                .iter()
                .copied()
                .find(|&id| !used[id] && segments[id].start == current)
                .or_else(|| touching.iter().copied().find(|&id| !used[id]));
            let Some(id) = next else {
                let p = points[current];
                return Err(LinkFailure::DanglingChain {
                    vertex: current,
                    x: p.x,
                    y: p.y,
                });
            };
            used[id] = true;
            let s = segments[id];
            let other = if s.start == current { s.end } else { s.start };

            match position.get(&other).copied() {
                Some(0) => {
                    loops.push(chain);
                    break;
                }
                Some(k) => {
                    let sub = chain.split_off(k + 1);
                    let mut ring = vec![other];
                    ring.extend(sub);
                    for v in &ring[1..] {
                        position.remove(v);
                    }
                    loops.push(ring);
                }
                None => {
                    position.insert(other, chain.len());
                    chain.push(other);
                }
            }
        }
    }

    Ok(loops)
}
