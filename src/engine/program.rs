use crate::graph::{Edge, EdgeList};
use crate::record::VertexValue;
use crate::types::VertexId;

/// A vertex program run once per world.
///
/// The engine clones the program for every worker thread, so per-thread
/// scratch state may live in `self`. Values are compared through their
/// encoded bytes: a callback "changed" a value exactly when the encoding
/// differs afterwards.
pub trait VertexProgram: Clone + Send + Sync {
    /// Per-world vertex state.
    type Value: VertexValue;

    /// Value every vertex holds before it is first written.
    fn init(&self) -> Self::Value;

    /// Value written into activated vertices at the start of a run.
    fn start(&self) -> Self::Value;

    /// Called once per active world of a vertex before its out-edges are
    /// traversed. Returning `false` deactivates that world for this
    /// superstep.
    fn scatter(
        &mut self,
        _value: &mut Self::Value,
        _out_edges: EdgeList<'_>,
        _in_edges: EdgeList<'_>,
    ) -> bool {
        true
    }

    /// Folds `src` into `dest` across `edge`, whose attribute is `attr`.
    /// Returning `true` activates the destination for the next superstep in
    /// the worlds involved.
    fn gather(&mut self, src: &Self::Value, dest: &mut Self::Value, edge: &Edge, attr: f32)
        -> bool;
}

/// Read-only pass over every vertex's per-world values.
///
/// Each worker visits a clone of the prototype passed to
/// [`Engine::query`](super::Engine::query); the clones are merged into one
/// result when the pass ends.
pub trait VertexQuery<V: VertexValue>: Clone + Send + Sync {
    /// Called with each distinct value of `vertex` and the number of worlds
    /// holding it. Dense records report every world separately with a count
    /// of one.
    fn visit(&mut self, vertex: VertexId, value: &V, count: usize);

    /// Absorbs another worker's partial result.
    fn merge(&mut self, other: Self);
}
