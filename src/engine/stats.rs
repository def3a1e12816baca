use std::fmt;
use std::ops::AddAssign;

/// Callback and record counters collected by one worker during one phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseCounters {
    /// Vertices processed.
    pub vertices: u64,
    /// Scatter callbacks issued.
    pub scatter_calls: u64,
    /// Gather callbacks issued.
    pub gather_calls: u64,
    /// Sparse records grown by one allocation unit.
    pub expansions: u64,
    /// Sparse records converted to dense.
    pub transforms: u64,
}

impl AddAssign for PhaseCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.vertices += rhs.vertices;
        self.scatter_calls += rhs.scatter_calls;
        self.gather_calls += rhs.gather_calls;
        self.expansions += rhs.expansions;
        self.transforms += rhs.transforms;
    }
}

/// Cumulative engine statistics.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EngineStats {
    /// Completed runs.
    pub runs: u64,
    /// Supersteps across all runs.
    pub supersteps: u64,
    /// Vertices scattered across all supersteps.
    pub scattered_vertices: u64,
    /// Vertices gathered across all supersteps.
    pub gathered_vertices: u64,
    /// Scatter callbacks issued.
    pub scatter_calls: u64,
    /// Gather callbacks issued.
    pub gather_calls: u64,
    /// Sparse records grown by one allocation unit.
    pub expansions: u64,
    /// Sparse records converted to dense.
    pub transforms: u64,
    /// Vertex activations across all supersteps.
    pub activations: u64,
    /// Dense records seen by the last query.
    pub dense_vertices: u64,
    /// Sparse records seen by the last query.
    pub sparse_vertices: u64,
    /// Entries held by those sparse records.
    pub sparse_entries: u64,
}

impl EngineStats {
    pub(crate) fn absorb(&mut self, counters: PhaseCounters) {
        self.scatter_calls += counters.scatter_calls;
        self.gather_calls += counters.gather_calls;
        self.expansions += counters.expansions;
        self.transforms += counters.transforms;
    }

    /// Average entries per sparse record in the last query.
    pub fn mean_sparse_entries(&self) -> f64 {
        if self.sparse_vertices == 0 {
            0.0
        } else {
            self.sparse_entries as f64 / self.sparse_vertices as f64
        }
    }
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Engine Statistics:")?;
        writeln!(f, "  Runs: {}", self.runs)?;
        writeln!(f, "  Supersteps: {}", self.supersteps)?;
        writeln!(f, "  Scattered vertices: {}", self.scattered_vertices)?;
        writeln!(f, "  Gathered vertices: {}", self.gathered_vertices)?;
        writeln!(f, "  Scatter calls: {}", self.scatter_calls)?;
        writeln!(f, "  Gather calls: {}", self.gather_calls)?;
        writeln!(f, "  Activations: {}", self.activations)?;
        writeln!(f, "  Sparse expansions: {}", self.expansions)?;
        writeln!(f, "  Sparse-to-dense transforms: {}", self.transforms)?;
        writeln!(f, "  Dense vertices: {}", self.dense_vertices)?;
        writeln!(
            f,
            "  Sparse vertices: {} ({:.2} entries avg)",
            self.sparse_vertices,
            self.mean_sparse_entries()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let mut total = PhaseCounters::default();
        total += PhaseCounters {
            vertices: 2,
            gather_calls: 5,
            ..Default::default()
        };
        total += PhaseCounters {
            vertices: 1,
            transforms: 1,
            ..Default::default()
        };
        let mut stats = EngineStats::default();
        stats.absorb(total);
        assert_eq!(stats.gather_calls, 5);
        assert_eq!(stats.transforms, 1);
        assert!(stats.to_string().contains("Gather calls: 5"));
    }
}
