use crate::cache::{Section, SectionHint};
use crate::types::VertexId;

/// Maps scan positions to cache locality sections.
///
/// Sections 0 and 1 are the free and in-use bands. Gather positions take the
/// next `gather` sections in vertex-id order, scatter positions the `scatter`
/// sections after those. Priorities grow with the superstep so a band's
/// members from an older superstep are evicted first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectionMap {
    scatter: u32,
    gather: u32,
    max_vertex_id: u32,
}

impl SectionMap {
    /// Creates a map for `scatter` and `gather` sections over ids up to
    /// `max_vertex_id`.
    pub fn new(scatter: u32, gather: u32, max_vertex_id: VertexId) -> Self {
        Self {
            scatter,
            gather,
            max_vertex_id,
        }
    }

    /// Total sections the cache policy needs.
    pub fn num_sections(&self) -> usize {
        (self.scatter + self.gather) as usize + Section::FIRST_LOCAL as usize
    }

    /// Section index for `vertex` during the given phase. Zero when sections
    /// are disabled.
    pub fn section(&self, is_scatter: bool, vertex: VertexId) -> u32 {
        match self.scatter + self.gather {
            0 => 0,
            1 => Section::FIRST_LOCAL,
            _ if is_scatter => {
                Section::FIRST_LOCAL + self.gather + band(vertex, self.max_vertex_id, self.scatter)
            }
            _ => Section::FIRST_LOCAL + band(vertex, self.max_vertex_id, self.gather),
        }
    }

    /// Hint for a record that will next be touched at `vertex` in the given
    /// phase of superstep `iteration`.
    pub fn hint(&self, is_scatter: bool, vertex: VertexId, iteration: u32) -> SectionHint {
        let section = self.section(is_scatter, vertex);
        if section == 0 {
            return SectionHint::FREE;
        }
        if self.scatter + self.gather == 1 {
            return SectionHint::at(section, 0.0);
        }
        let span = self.max_vertex_id as f64;
        let base = if is_scatter {
            iteration as f64 * 2.0 + 1.0
        } else {
            iteration as f64 * 2.0
        };
        SectionHint::at(section, span * base + vertex as f64)
    }
}

fn band(vertex: VertexId, max_vertex_id: VertexId, count: u32) -> u32 {
    if count == 0 {
        return 0;
    }
    let width = (max_vertex_id as u64 + count as u64) / count as u64;
    (vertex as u64 / width.max(1)) as u32
}
