//! Nested shell (wall) generation from linked layer contours.
//!
//! Every polygon a layer produces lives in a [`PolygonArena`]. Shell polygons
//! remember the id of the polygon they were shrunk from, so the chain from an
//! infill boundary back to the original contour can be walked with plain
//! indices.
//!
//! Offsetting every ring on its own can leave an outer ring and a hole ring
//! of the same level overlapping where the wall between them is thin. Each
//! level is checked for that and, when found, its rings are merged with a
//! positive-winding union so no shell prints over another.

use clipper2::{union, FillRule, Milli};
use repsnapper_math::{left_normal, line_intersection, Point2, Tolerance};
use tracing::{debug, trace};

use crate::error::{Result, SlicerError};
use crate::path::nearest_neighbor_order;
use crate::polygon::Polygon2f;

/// Index of a polygon inside its layer's [`PolygonArena`].
pub type PolygonId = usize;

/// A polygon plus its place in the shell hierarchy.
#[derive(Debug, Clone)]
pub struct ShellPolygon {
    /// The ring itself. Outer boundaries are CCW, holes CW.
    pub polygon: Polygon2f,
    /// Polygon this one was offset from; `None` for raw contours.
    pub parent: Option<PolygonId>,
    /// 0 for contours, 1 for the outermost shell, and so on.
    pub level: usize,
    /// Whether the ring bounds a hole rather than material.
    pub is_hole: bool,
}

/// Layer-local polygon storage with parent links.
#[derive(Debug, Clone, Default)]
pub struct PolygonArena {
    entries: Vec<ShellPolygon>,
}

impl PolygonArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a polygon and return its id.
    pub fn insert(
        &mut self,
        polygon: Polygon2f,
        parent: Option<PolygonId>,
        level: usize,
        is_hole: bool,
    ) -> PolygonId {
        self.entries.push(ShellPolygon {
            polygon,
            parent,
            level,
            is_hole,
        });
        self.entries.len() - 1
    }

    /// Entry for `id`.
    pub fn get(&self, id: PolygonId) -> Option<&ShellPolygon> {
        self.entries.get(id)
    }

    /// Polygon for `id`.
    pub fn polygon(&self, id: PolygonId) -> Option<&Polygon2f> {
        self.entries.get(id).map(|e| &e.polygon)
    }

    /// Parent of `id`, if it has one.
    pub fn parent_of(&self, id: PolygonId) -> Option<PolygonId> {
        self.entries.get(id).and_then(|e| e.parent)
    }

    /// Parents of `id` from the nearest up to the contour.
    pub fn ancestors(&self, id: PolygonId) -> Vec<PolygonId> {
        let mut out = Vec::new();
        let mut cursor = self.parent_of(id);
        while let Some(p) = cursor {
            out.push(p);
            cursor = self.parent_of(p);
        }
        out
    }

    /// Polygons shrunk directly from `id`.
    pub fn children(&self, id: PolygonId) -> impl Iterator<Item = PolygonId> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.parent == Some(id))
            .map(|(child, _)| child)
    }

    /// Number of stored polygons.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (PolygonId, &ShellPolygon)> {
        self.entries.iter().enumerate()
    }

    /// Offset polygon `id` by `distance` toward material and store every
    /// result as its child.
    ///
    /// Outer boundaries shrink and holes grow. Returns the new ids, which is
    /// empty when the region collapses.
    pub fn shrink_into(&mut self, id: PolygonId, distance: f64) -> Result<Vec<PolygonId>> {
        let (level, is_hole) = self.child_kind(id)?;
        Ok(self
            .offset_toward_material(id, distance)?
            .into_iter()
            .map(|polygon| self.insert(polygon, Some(id), level, is_hole))
            .collect())
    }

    /// Offset `id` toward material without storing anything.
    fn offset_toward_material(&self, id: PolygonId, distance: f64) -> Result<Vec<Polygon2f>> {
        let entry = self.entries.get(id).ok_or(SlicerError::UnknownPolygon(id))?;
        let signed = if entry.is_hole { -distance } else { distance };
        let results = entry.polygon.shrink(signed)?;
        if results.is_empty() {
            trace!(id, level = entry.level + 1, "polygon collapsed while shrinking");
        }
        Ok(results)
    }

    /// Level and hole flag a child of `id` gets.
    fn child_kind(&self, id: PolygonId) -> Result<(usize, bool)> {
        let entry = self.entries.get(id).ok_or(SlicerError::UnknownPolygon(id))?;
        Ok((entry.level + 1, entry.is_hole))
    }
}

/// Offset ring not yet stored, with the polygon it came from.
#[derive(Debug)]
struct Candidate {
    polygon: Polygon2f,
    parent: PolygonId,
    is_hole: bool,
}

/// Distance (mm) from an edge midpoint at which the material side is sampled.
const SIDE_SAMPLE_OFFSET: f64 = 1e-6;

/// Merged rings smaller than this (mm²) are rounding debris.
const MIN_MERGED_AREA: f64 = 1e-6;

/// Offset every polygon in `sources` by `distance` and store the results as
/// the next level.
///
/// When the offset rings of the level overlap, they are replaced by their
/// positive-winding union and each merged ring is attached to the nearest
/// source ring of the same kind.
fn shrink_level(
    arena: &mut PolygonArena,
    sources: &[PolygonId],
    distance: f64,
) -> Result<Vec<PolygonId>> {
    let mut candidates = Vec::new();
    for &id in sources {
        let (_, is_hole) = arena.child_kind(id)?;
        for polygon in arena.offset_toward_material(id, distance)? {
            candidates.push(Candidate {
                polygon,
                parent: id,
                is_hole,
            });
        }
    }

    let rings: Vec<&Polygon2f> = candidates.iter().map(|c| &c.polygon).collect();
    if rings_conflict(&rings) {
        let before = candidates.len();
        candidates = merge_rings(arena, sources, &rings)?;
        debug!(before, after = candidates.len(), "merged overlapping offset rings");
    }

    candidates
        .into_iter()
        .map(|c| -> Result<PolygonId> {
            let (level, _) = arena.child_kind(c.parent)?;
            Ok(arena.insert(c.polygon, Some(c.parent), level, c.is_hole))
        })
        .collect()
}

/// Whether any two rings cross, or any ring's material side is not covered
/// exactly once.
fn rings_conflict(rings: &[&Polygon2f]) -> bool {
    let crossing = rings
        .iter()
        .enumerate()
        .any(|(i, a)| rings[i + 1..].iter().any(|b| rings_cross(a, b)));
    crossing
        || rings.iter().any(|ring| {
            material_side_point(ring).is_some_and(|p| winding_number(rings, &p) != 1)
        })
}

fn rings_cross(a: &Polygon2f, b: &Polygon2f) -> bool {
    let (Some((amin, amax)), Some((bmin, bmax))) = (a.bounds(), b.bounds()) else {
        return false;
    };
    if amin.x > bmax.x || bmin.x > amax.x || amin.y > bmax.y || bmin.y > amax.y {
        return false;
    }
    a.edges().any(|(a0, a1)| {
        b.edges().any(|(b0, b1)| {
            line_intersection(a0, a1, b0, b1)
                .is_some_and(|(t, u)| (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u))
        })
    })
}

/// A point just left of the first proper edge. Outer rings are CCW and holes
/// CW, so left is always the material side.
fn material_side_point(ring: &Polygon2f) -> Option<Point2> {
    ring.edges().find_map(|(a, b)| {
        let normal = left_normal(&(b - a))?;
        Some(a + (b - a) * 0.5 + normal * SIDE_SAMPLE_OFFSET)
    })
}

/// CCW rings count +1 around `point`, CW rings -1.
fn winding_number(rings: &[&Polygon2f], point: &Point2) -> i32 {
    rings
        .iter()
        .filter(|r| r.contains_point(point))
        .map(|r| if r.is_ccw() { 1 } else { -1 })
        .sum()
}

fn merge_rings(
    arena: &PolygonArena,
    sources: &[PolygonId],
    rings: &[&Polygon2f],
) -> Result<Vec<Candidate>> {
    let mut paths: Vec<Vec<(f64, f64)>> = rings
        .iter()
        .map(|r| r.points.iter().map(|p| (p.x, p.y)).collect())
        .collect();
    if paths.is_empty() {
        return Ok(Vec::new());
    }
    let subject = vec![paths.remove(0)];
    let merged = union::<Milli>(subject, paths, FillRule::Positive)
        .map_err(|e| SlicerError::Clipping(format!("{:?}", e)))?;
    let merged: Vec<Vec<(f64, f64)>> = merged.into();

    let tol = Tolerance::DEFAULT;
    let polygons: Vec<Polygon2f> = merged
        .into_iter()
        .map(|path| {
            Polygon2f::new(path.into_iter().map(|(x, y)| Point2::new(x, y)).collect())
                .cleaned(tol.linear)
        })
        .filter(|p| p.len() >= 3 && p.area() > MIN_MERGED_AREA)
        .collect();

    let depths = containment_depths(&polygons);
    let mut out = Vec::with_capacity(polygons.len());
    for (mut polygon, depth) in polygons.into_iter().zip(depths) {
        let is_hole = depth % 2 == 1;
        if is_hole {
            polygon.ensure_cw();
        } else {
            polygon.ensure_ccw();
        }
        let Some(parent) = nearest_source(arena, sources, &polygon, is_hole) else {
            continue;
        };
        out.push(Candidate {
            polygon,
            parent,
            is_hole,
        });
    }
    Ok(out)
}

/// Source ring closest to `polygon`, preferring rings of the same kind.
fn nearest_source(
    arena: &PolygonArena,
    sources: &[PolygonId],
    polygon: &Polygon2f,
    is_hole: bool,
) -> Option<PolygonId> {
    let first = polygon.points.first()?;
    let distance = |id: PolygonId| {
        arena
            .polygon(id)
            .map_or(f64::MAX, |p| p.distance_to_boundary(first))
    };
    let closest = |same_kind: bool| {
        sources
            .iter()
            .filter(|&&id| {
                !same_kind || arena.get(id).is_some_and(|e| e.is_hole == is_hole)
            })
            .min_by(|a, b| distance(**a).total_cmp(&distance(**b)))
            .copied()
    };
    closest(true).or_else(|| closest(false))
}

/// Settings for shell generation.
#[derive(Debug, Clone, Copy)]
pub struct ShellSettings {
    /// Number of shells per contour.
    pub wall_count: u32,
    /// Extrusion line width (mm).
    pub line_width: f64,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            wall_count: 3,
            line_width: 0.45,
        }
    }
}

/// Shells generated for one layer.
#[derive(Debug, Clone, Default)]
pub struct LayerShells {
    /// Every polygon of the layer.
    pub arena: PolygonArena,
    /// Normalized input contours (level 0).
    pub contours: Vec<PolygonId>,
    /// `shells[k]` holds the polygons of shell `k + 1`, in print order.
    pub shells: Vec<Vec<PolygonId>>,
    /// Region left for infill inside the innermost shell.
    pub infill_boundary: Vec<PolygonId>,
}

impl LayerShells {
    fn resolve(&self, ids: &[PolygonId]) -> Vec<&Polygon2f> {
        ids.iter().filter_map(|&id| self.arena.polygon(id)).collect()
    }

    /// Contour polygons.
    pub fn contour_polygons(&self) -> Vec<&Polygon2f> {
        self.resolve(&self.contours)
    }

    /// Polygons of shell `index` (0 = outermost).
    pub fn shell(&self, index: usize) -> Vec<&Polygon2f> {
        self.shells.get(index).map(|ids| self.resolve(ids)).unwrap_or_default()
    }

    /// Infill boundary polygons, cloned for the infill generator.
    pub fn infill_polygons(&self) -> Vec<Polygon2f> {
        self.resolve(&self.infill_boundary).into_iter().cloned().collect()
    }

    /// Total length of every shell path.
    pub fn path_length(&self) -> f64 {
        self.shells
            .iter()
            .flat_map(|ids| self.resolve(ids))
            .map(Polygon2f::perimeter)
            .sum()
    }
}

/// Nesting depth of every contour: how many other contours enclose it.
fn containment_depths(contours: &[Polygon2f]) -> Vec<usize> {
    contours
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let Some(first) = c.points.first() else {
                return 0;
            };
            contours
                .iter()
                .enumerate()
                .filter(|&(j, other)| j != i && other.contains_point(first))
                .count()
        })
        .collect()
}

fn order_for_travel(arena: &PolygonArena, ids: &mut Vec<PolygonId>) {
    if ids.len() < 2 {
        return;
    }
    let starts: Vec<Option<Point2>> = ids
        .iter()
        .map(|&id| arena.polygon(id).and_then(|p| p.points.first().copied()))
        .collect();
    let order = nearest_neighbor_order(&starts, |p| *p, |p| *p);
    *ids = order.into_iter().map(|i| ids[i]).collect();
}

/// Generate shells from a layer's contours.
///
/// 1. Contours are classified by nesting depth: even depth bounds material
///    (made CCW), odd depth is a hole (made CW).
/// 2. Shell 1 sits half a line width inside the contour, each further shell
///    one line width inside the previous one.
/// 3. The infill boundary is the innermost shell offset by another half
///    line width.
///
/// Rings of one level that overlap are merged before they are stored, so a
/// wall too thin for the requested shells ends up with fewer of them.
pub fn generate_shells(contours: &[Polygon2f], settings: &ShellSettings) -> Result<LayerShells> {
    if !(settings.line_width.is_finite() && settings.line_width > 0.0) {
        return Err(SlicerError::InvalidSettings(
            "line_width must be positive".into(),
        ));
    }

    let mut result = LayerShells::default();
    let depths = containment_depths(contours);

    for (contour, depth) in contours.iter().zip(depths) {
        if contour.len() < 3 {
            continue;
        }
        let is_hole = depth % 2 == 1;
        let mut polygon = contour.clone();
        if is_hole {
            polygon.ensure_cw();
        } else {
            polygon.ensure_ccw();
        }
        let id = result.arena.insert(polygon, None, 0, is_hole);
        result.contours.push(id);
    }

    if settings.wall_count == 0 {
        result.infill_boundary = result.contours.clone();
        return Ok(result);
    }

    let half = settings.line_width / 2.0;
    let mut current = result.contours.clone();
    for level in 1..=settings.wall_count {
        let distance = if level == 1 { half } else { settings.line_width };
        let mut next = shrink_level(&mut result.arena, &current, distance)?;
        if next.is_empty() {
            break;
        }
        order_for_travel(&result.arena, &mut next);
        result.shells.push(next.clone());
        current = next;
    }

    if result.shells.is_empty() {
        return Ok(result);
    }
    result.infill_boundary = shrink_level(&mut result.arena, &current, half)?;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon2f {
        Polygon2f::new(vec![
            Point2::new(x0, y0),
            Point2::new(x1, y0),
            Point2::new(x1, y1),
            Point2::new(x0, y1),
        ])
    }

    #[test]
    fn test_square_with_hole() {
        // Both given CCW; the hole gets flipped.
        let contours = vec![rect(0.0, 0.0, 20.0, 20.0), rect(8.0, 8.0, 12.0, 12.0)];
        let settings = ShellSettings {
            wall_count: 2,
            line_width: 0.5,
        };
        let shells = generate_shells(&contours, &settings).unwrap();

        assert_eq!(shells.contours.len(), 2);
        let hole = shells.arena.get(shells.contours[1]).unwrap();
        assert!(hole.is_hole);
        assert!(!hole.polygon.is_ccw());

        assert_eq!(shells.shells.len(), 2);
        for &id in &shells.shells[0] {
            let e = shells.arena.get(id).unwrap();
            assert_eq!(e.level, 1);
            let parent = e.parent.unwrap();
            assert!(shells.contours.contains(&parent));
            assert_eq!(shells.arena.get(parent).unwrap().is_hole, e.is_hole);
            // First shell sits half a line width from the contour.
            if e.is_hole {
                assert_abs_diff_eq!(e.polygon.area(), 4.5 * 4.5, epsilon = 1e-9);
            } else {
                assert_abs_diff_eq!(e.polygon.area(), 19.5 * 19.5, epsilon = 1e-9);
            }
        }
        for &id in &shells.shells[1] {
            let parent = shells.arena.parent_of(id).unwrap();
            assert!(shells.shells[0].contains(&parent));
            assert_eq!(shells.arena.ancestors(id).len(), 2);
        }

        // Outer 18 wide, hole 6 wide once the boundary offset is applied.
        let infill = shells.infill_polygons();
        assert_eq!(infill.len(), 2);
        let outer = infill.iter().find(|p| p.is_ccw()).unwrap();
        let inner = infill.iter().find(|p| !p.is_ccw()).unwrap();
        assert_abs_diff_eq!(outer.area(), 18.0 * 18.0, epsilon = 1e-9);
        assert_abs_diff_eq!(inner.area(), 6.0 * 6.0, epsilon = 1e-9);
    }

    /// Every hole ring among `ids` lies inside some outer ring among `ids`.
    fn holes_nested(shells: &LayerShells, ids: &[PolygonId]) -> bool {
        let entries: Vec<&ShellPolygon> = ids.iter().filter_map(|&id| shells.arena.get(id)).collect();
        entries.iter().filter(|e| e.is_hole).all(|hole| {
            entries.iter().filter(|e| !e.is_hole).any(|outer| {
                hole.polygon
                    .points
                    .iter()
                    .all(|p| outer.polygon.contains_point(p))
            })
        })
    }

    #[test]
    fn test_thin_tube_stops_before_walls_overlap() {
        // 1 mm wall all round: only one shell pair fits.
        let contours = vec![rect(0.0, 0.0, 20.0, 20.0), rect(1.0, 1.0, 19.0, 19.0)];
        let settings = ShellSettings {
            wall_count: 3,
            line_width: 0.45,
        };
        let shells = generate_shells(&contours, &settings).unwrap();

        assert_eq!(shells.shells.len(), 1);
        assert_eq!(shells.shells[0].len(), 2);
        for level in &shells.shells {
            assert!(holes_nested(&shells, level));
        }
        assert_eq!(shells.infill_boundary.len(), 2);
        assert!(holes_nested(&shells, &shells.infill_boundary));
    }

    #[test]
    fn test_hole_near_corner_merges_into_outer_shell() {
        // The hole leaves 1 mm of wall on two sides; the second shell of the
        // hole would cross the second outer shell.
        let contours = vec![rect(0.0, 0.0, 20.0, 20.0), rect(1.0, 1.0, 10.0, 10.0)];
        let settings = ShellSettings {
            wall_count: 2,
            line_width: 0.45,
        };
        let shells = generate_shells(&contours, &settings).unwrap();

        assert_eq!(shells.shells.len(), 2);
        assert_eq!(shells.shells[0].len(), 2);
        assert!(holes_nested(&shells, &shells.shells[0]));

        assert_eq!(shells.shells[1].len(), 1);
        let merged = shells.arena.get(shells.shells[1][0]).unwrap();
        assert_eq!(merged.level, 2);
        assert!(!merged.is_hole);
        assert!(merged.polygon.is_ccw());
        // 18.65 square less the 10 x 10 corner the grown hole covers.
        assert_abs_diff_eq!(merged.polygon.area(), 18.65 * 18.65 - 100.0, epsilon = 0.05);

        let parent = merged.parent.unwrap();
        assert!(shells.shells[0].contains(&parent));
        assert!(!shells.arena.get(parent).unwrap().is_hole);
    }

    #[test]
    fn test_zero_walls_use_contours() {
        let contours = vec![rect(0.0, 0.0, 10.0, 10.0)];
        let settings = ShellSettings {
            wall_count: 0,
            line_width: 0.45,
        };
        let shells = generate_shells(&contours, &settings).unwrap();
        assert!(shells.shells.is_empty());
        assert_eq!(shells.infill_boundary, shells.contours);
    }

    #[test]
    fn test_thin_contour_collapses() {
        let contours = vec![rect(0.0, 0.0, 10.0, 0.3)];
        let shells = generate_shells(&contours, &ShellSettings::default()).unwrap();
        assert!(shells.shells.is_empty());
        assert!(shells.infill_boundary.is_empty());
        assert_eq!(shells.arena.len(), 1);
    }

    #[test]
    fn test_children_and_shrink_into() {
        let mut arena = PolygonArena::new();
        let root = arena.insert(rect(0.0, 0.0, 10.0, 10.0), None, 0, false);
        let kids = arena.shrink_into(root, 1.0).unwrap();
        assert_eq!(kids.len(), 1);
        assert_eq!(arena.children(root).collect::<Vec<_>>(), kids);
        assert_abs_diff_eq!(arena.polygon(kids[0]).unwrap().area(), 64.0, epsilon = 1e-9);
        assert!(matches!(
            arena.shrink_into(99, 1.0),
            Err(SlicerError::UnknownPolygon(99))
        ));
    }

    #[test]
    fn test_path_length() {
        let contours = vec![rect(0.0, 0.0, 10.0, 10.0)];
        let settings = ShellSettings {
            wall_count: 1,
            line_width: 1.0,
        };
        let shells = generate_shells(&contours, &settings).unwrap();
        assert_abs_diff_eq!(shells.path_length(), 4.0 * 9.0, epsilon = 1e-9);
        assert_eq!(shells.shell(0).len(), 1);
        assert!(shells.shell(5).is_empty());
    }
}
