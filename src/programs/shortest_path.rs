use crate::engine::VertexProgram;
use crate::graph::{Edge, Graph};

/// Single-source shortest path over edge attributes. Unreached vertices hold
/// `f32::INFINITY`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShortestPath {
    unit_weights: bool,
}

impl ShortestPath {
    /// Weighs every edge by its attribute.
    pub fn weighted() -> Self {
        Self {
            unit_weights: false,
        }
    }

    /// Weighs every edge as one.
    pub fn unit() -> Self {
        Self { unit_weights: true }
    }

    /// Uses attribute weights when `graph` carries them, unit weights
    /// otherwise.
    pub fn for_graph(graph: &Graph) -> Self {
        Self {
            unit_weights: !graph.has_edge_attrs(),
        }
    }
}

impl VertexProgram for ShortestPath {
    type Value = f32;

    fn init(&self) -> f32 {
        f32::INFINITY
    }

    fn start(&self) -> f32 {
        0.0
    }

    fn gather(&mut self, src: &f32, dest: &mut f32, _edge: &Edge, attr: f32) -> bool {
        let weight = if self.unit_weights { 1.0 } else { attr };
        let distance = src + weight;
        if distance < *dest {
            *dest = distance;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeInput;

    const EDGE: Edge = Edge {
        neighbor: 0,
        probability: 1.0,
        next_dest: 0,
    };

    #[test]
    fn weights_follow_graph_attributes() {
        let graph = Graph::from_edges(0, &[EdgeInput::certain(0, 1)], true);
        let mut plain = ShortestPath::for_graph(&graph);
        let mut dest = f32::INFINITY;
        assert!(plain.gather(&1.0, &mut dest, &EDGE, 7.5));
        assert_eq!(dest, 2.0);

        let weighted_input = EdgeInput {
            src: 0,
            dest: 1,
            probability: 1.0,
            attr: 2.5,
        };
        let mut weighted = ShortestPath::for_graph(&Graph::from_edges(0, &[weighted_input], true));
        let mut dest = f32::INFINITY;
        assert!(weighted.gather(&1.0, &mut dest, &EDGE, 2.5));
        assert_eq!(dest, 3.5);
        assert!(!weighted.gather(&f32::INFINITY, &mut dest, &EDGE, 2.5));
    }
}
