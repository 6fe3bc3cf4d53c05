//! Open toolpaths and travel ordering.

use repsnapper_math::Point2;

/// An open polyline (non-closed path).
#[derive(Debug, Clone, PartialEq)]
pub struct Polyline {
    /// Points along the path.
    pub points: Vec<Point2>,
}

impl Polyline {
    /// Create a new polyline.
    pub fn new(points: Vec<Point2>) -> Self {
        Self { points }
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Total length of the polyline.
    pub fn length(&self) -> f64 {
        self.points.windows(2).map(|w| (w[1] - w[0]).norm()).sum()
    }

    /// Starting point.
    pub fn start(&self) -> Option<&Point2> {
        self.points.first()
    }

    /// Ending point.
    pub fn end(&self) -> Option<&Point2> {
        self.points.last()
    }
}

/// Greedy nearest-neighbour visiting order, starting from the origin.
///
/// `entry` gives where the tool arrives on an item and `exit` where it
/// leaves; items without an entry point sort last.
pub(crate) fn nearest_neighbor_order<T>(
    items: &[T],
    entry: impl Fn(&T) -> Option<Point2>,
    exit: impl Fn(&T) -> Option<Point2>,
) -> Vec<usize> {
    let mut current = Point2::origin();
    let mut remaining: Vec<usize> = (0..items.len()).collect();
    let mut order = Vec::with_capacity(items.len());

    while !remaining.is_empty() {
        let dist = |i: usize| entry(&items[i]).map_or(f64::MAX, |p| (p - current).norm());
        let best = remaining
            .iter()
            .enumerate()
            .min_by(|(_, &a), (_, &b)| dist(a).total_cmp(&dist(b)))
            .map_or(0, |(pos, _)| pos);

        let idx = remaining.remove(best);
        if let Some(p) = exit(&items[idx]) {
            current = p;
        }
        order.push(idx);
    }
    order
}

fn apply_order<T: Clone>(items: &mut [T], order: Vec<usize>) {
    let mut sorted: Vec<T> = order.into_iter().map(|i| items[i].clone()).collect();
    items.swap_with_slice(&mut sorted);
}

/// Reorder polylines to shorten travel between them.
pub fn optimize_polyline_order(polylines: &mut [Polyline]) {
    if polylines.len() < 2 {
        return;
    }
    let order = nearest_neighbor_order(polylines, |l| l.start().copied(), |l| l.end().copied());
    apply_order(polylines, order);
}
