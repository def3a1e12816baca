use crate::engine::VertexQuery;
use crate::record::VertexValue;
use crate::types::VertexId;

/// Counts (vertex, world) pairs whose value differs from the unreached
/// marker.
#[derive(Clone, Debug, PartialEq)]
pub struct Reachability<V> {
    unreached: V,
    reached: u64,
    reached_vertices: u64,
    last_counted: Option<VertexId>,
}

impl<V: VertexValue> Reachability<V> {
    /// Empty tally treating `unreached` as "not reached".
    pub fn new(unreached: V) -> Self {
        Self {
            unreached,
            reached: 0,
            reached_vertices: 0,
            last_counted: None,
        }
    }

    /// Reached (vertex, world) pairs.
    pub fn reached(&self) -> u64 {
        self.reached
    }

    /// Vertices reached in at least one world.
    pub fn reached_vertices(&self) -> u64 {
        self.reached_vertices
    }

    /// Expected number of reached vertices per world.
    pub fn expected(&self, num_samples: usize) -> f64 {
        self.reached as f64 / num_samples.max(1) as f64
    }
}

impl<V: VertexValue> VertexQuery<V> for Reachability<V> {
    fn visit(&mut self, vertex: VertexId, value: &V, count: usize) {
        if value.to_bytes() == self.unreached.to_bytes() {
            return;
        }
        self.reached += count as u64;
        // A vertex's values arrive back to back from one worker.
        if self.last_counted != Some(vertex) {
            self.last_counted = Some(vertex);
            self.reached_vertices += 1;
        }
    }

    fn merge(&mut self, other: Self) {
        self.reached += other.reached;
        self.reached_vertices += other.reached_vertices;
    }
}

/// Sums reached values, e.g. hop counts or distances.
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceSum<V> {
    unreached: V,
    sum: f64,
    count: u64,
}

impl<V: VertexValue> DistanceSum<V> {
    /// Empty sum skipping values equal to `unreached`.
    pub fn new(unreached: V) -> Self {
        Self {
            unreached,
            sum: 0.0,
            count: 0,
        }
    }

    /// Sum over reached (vertex, world) pairs.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Number of reached (vertex, world) pairs.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean reached value; zero when nothing was reached.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

impl<V: VertexValue + Into<f64>> VertexQuery<V> for DistanceSum<V> {
    fn visit(&mut self, _vertex: VertexId, value: &V, count: usize) {
        if value.to_bytes() == self.unreached.to_bytes() {
            return;
        }
        let distance: f64 = (*value).into();
        self.sum += distance * count as f64;
        self.count += count as u64;
    }

    fn merge(&mut self, other: Self) {
        self.sum += other.sum;
        self.count += other.count;
    }
}
