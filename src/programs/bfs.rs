use crate::engine::VertexProgram;
use crate::graph::Edge;

/// Hop count from the nearest seed. Unreached vertices hold `u32::MAX`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Bfs;

impl Bfs {
    /// Value of a vertex no seed reaches.
    pub const UNREACHED: u32 = u32::MAX;
}

impl VertexProgram for Bfs {
    type Value = u32;

    fn init(&self) -> u32 {
        Self::UNREACHED
    }

    fn start(&self) -> u32 {
        0
    }

    fn gather(&mut self, src: &u32, dest: &mut u32, _edge: &Edge, _attr: f32) -> bool {
        let hops = src.saturating_add(1);
        if hops < *dest {
            *dest = hops;
            return true;
        }
        false
    }
}
