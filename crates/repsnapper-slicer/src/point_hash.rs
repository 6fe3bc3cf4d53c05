//! Tolerance-aware deduplication of cut points.
//!
//! Segment endpoints produced by neighbouring triangles are computed
//! independently and rarely agree to the last bit. [`PointHash`] buckets
//! points on a grid whose cell size equals the matching tolerance, so any
//! stored point within tolerance of a query sits in the query's cell or one
//! of its eight neighbours.

use std::collections::HashMap;

use repsnapper_math::Point2;

/// Default matching tolerance for cut points (mm).
pub const DEFAULT_POINT_EPSILON: f64 = 0.001;

type CellKey = (i64, i64);

/// Spatial hash from quantized coordinates to `(index, point)` entries.
#[derive(Debug, Clone)]
pub struct PointHash {
    epsilon: f64,
    cells: HashMap<CellKey, Vec<(usize, Point2)>>,
}

impl PointHash {
    /// Create an empty hash matching points within `epsilon`.
    ///
    /// # Panics
    ///
    /// Panics if `epsilon` is not a positive finite number.
    pub fn new(epsilon: f64) -> Self {
        assert!(
            epsilon.is_finite() && epsilon > 0.0,
            "point epsilon must be positive and finite, got {epsilon}"
        );
        Self {
            epsilon,
            cells: HashMap::new(),
        }
    }

    /// Matching tolerance.
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Store `point` under `index`.
    pub fn insert_point(&mut self, index: usize, point: Point2) {
        let key = self.cell_of(&point);
        self.cells.entry(key).or_default().push((index, point));
    }

    /// Every stored `(index, distance)` within tolerance of `point`, in no
    /// particular order.
    pub fn points_within<'a>(&'a self, point: &'a Point2) -> impl Iterator<Item = (usize, f64)> + 'a {
        let (cx, cy) = self.cell_of(point);
        (-1..=1)
            .flat_map(move |dx| (-1..=1).map(move |dy| (cx + dx, cy + dy)))
            .filter_map(move |key| self.cells.get(&key))
            .flatten()
            .filter_map(move |&(index, stored)| {
                let dist = (stored - point).norm();
                (dist <= self.epsilon).then_some((index, dist))
            })
    }

    /// Index of the stored point closest to `point` within tolerance.
    ///
    /// Exact distance ties resolve to the lowest index.
    pub fn index_of_point(&self, point: &Point2) -> Option<usize> {
        self.points_within(point)
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            .map(|(index, _)| index)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }

    /// Whether nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn cell_of(&self, point: &Point2) -> CellKey {
        (
            (point.x / self.epsilon).floor() as i64,
            (point.y / self.epsilon).floor() as i64,
        )
    }
}

/// Sequentially indexed vertex store backed by a [`PointHash`].
#[derive(Debug, Clone)]
pub struct PointRegistry {
    hash: PointHash,
    points: Vec<Point2>,
}

impl PointRegistry {
    /// Create an empty registry matching points within `epsilon`.
    pub fn new(epsilon: f64) -> Self {
        Self {
            hash: PointHash::new(epsilon),
            points: Vec::new(),
        }
    }

    /// Return the index of a known point within tolerance, or store `point`
    /// under the next sequential index.
    pub fn register_point(&mut self, point: Point2) -> usize {
        if let Some(index) = self.hash.index_of_point(&point) {
            return index;
        }
        let index = self.points.len();
        self.points.push(point);
        self.hash.insert_point(index, point);
        index
    }

    /// Index of a known point within tolerance, without inserting.
    pub fn index_of_point(&self, point: &Point2) -> Option<usize> {
        self.hash.index_of_point(point)
    }

    /// Position of a registered point.
    pub fn point(&self, index: usize) -> Option<&Point2> {
        self.points.get(index)
    }

    /// All registered points in index order.
    pub fn points(&self) -> &[Point2] {
        &self.points
    }

    /// Number of registered points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether no point has been registered.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Matching tolerance.
    pub fn epsilon(&self) -> f64 {
        self.hash.epsilon()
    }
}

impl Default for PointRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_POINT_EPSILON)
    }
}
