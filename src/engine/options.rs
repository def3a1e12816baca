use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{Result, SageError, VertexId, DEFAULT_PAGE_SIZE};

/// How much memory the vertex cache may hold.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBudget {
    /// Absolute byte budget.
    Bytes(usize),
    /// Multiple of the size every vertex would take in the dense encoding.
    DenseMultiple(f64),
}

impl CacheBudget {
    /// Budget in mebibytes.
    pub fn mib(mib: usize) -> Self {
        CacheBudget::Bytes(mib << 20)
    }

    /// Resolves to bytes for `num_vertices` dense records of `dense_size`
    /// bytes each.
    pub fn resolve(&self, dense_size: usize, num_vertices: usize) -> usize {
        match *self {
            CacheBudget::Bytes(bytes) => bytes,
            CacheBudget::DenseMultiple(factor) => {
                (factor * dense_size as f64 * num_vertices as f64) as usize
            }
        }
    }
}

/// Number of locality sections for one phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionCount {
    /// Exactly this many sections.
    Fixed(u32),
    /// One section per this many vertex ids.
    PerVertices(u32),
}

impl SectionCount {
    /// Section count for a graph whose largest id is `max_vertex_id`.
    pub fn resolve(&self, max_vertex_id: VertexId) -> u32 {
        match *self {
            SectionCount::Fixed(n) => n,
            SectionCount::PerVertices(n) => max_vertex_id / n.max(1),
        }
    }
}

/// Which record encodings the engine uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingMode {
    /// Every vertex keeps one slot per world.
    Dense,
    /// Every vertex keeps deduplicated value entries.
    Sparse,
    /// Start sparse; switch a vertex to dense once its sparse record
    /// outgrows the dense one.
    #[default]
    Adaptive,
}

/// Engine configuration. Immutable once the engine is built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Number of Monte-Carlo worlds.
    pub num_samples: usize,
    /// Record page size in bytes.
    pub page_size: usize,
    /// Worker threads per phase.
    pub threads: usize,
    /// Vertices a worker claims at a time.
    pub partition_size: usize,
    /// Disk reads a worker keeps in flight.
    pub io_depth: usize,
    /// Vertex cache budget.
    pub cache_budget: CacheBudget,
    /// Scatter-phase sections; derived from `gather_sections` when unset.
    pub scatter_sections: Option<SectionCount>,
    /// Gather-phase sections.
    pub gather_sections: SectionCount,
    /// Global edge-sampling seed.
    pub seed: u64,
    /// Entries a fresh sparse record reserves; zero means `num_samples + 1`.
    pub initial_sparse_entries: usize,
    /// Record encoding policy.
    pub encoding: EncodingMode,
    /// Write an explicit initial record for every vertex before the first run.
    pub init_all_values: bool,
    /// Treat every edge as present in every world.
    pub certain_graph: bool,
    /// Fraction of edges whose sampling bitmaps are precomputed.
    pub batch_sampling_ratio: f32,
    /// Scratch file holding evicted records.
    pub scratch_path: PathBuf,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            num_samples: 64,
            page_size: DEFAULT_PAGE_SIZE,
            threads: 8,
            partition_size: 1,
            io_depth: 32,
            cache_budget: CacheBudget::mib(4096),
            scatter_sections: None,
            gather_sections: SectionCount::Fixed(1000),
            seed: 0,
            initial_sparse_entries: 2,
            encoding: EncodingMode::Adaptive,
            init_all_values: false,
            certain_graph: false,
            batch_sampling_ratio: 0.0,
            scratch_path: PathBuf::from("sage.tmp"),
        }
    }
}

impl EngineOptions {
    /// Sets the world count.
    pub fn with_num_samples(mut self, num_samples: usize) -> Self {
        self.num_samples = num_samples;
        self
    }

    /// Sets the record page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the worker count.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets the partition size.
    pub fn with_partition_size(mut self, partition_size: usize) -> Self {
        self.partition_size = partition_size;
        self
    }

    /// Sets the per-worker I/O depth.
    pub fn with_io_depth(mut self, io_depth: usize) -> Self {
        self.io_depth = io_depth;
        self
    }

    /// Sets the cache budget.
    pub fn with_cache_budget(mut self, budget: CacheBudget) -> Self {
        self.cache_budget = budget;
        self
    }

    /// Sets the scatter section count.
    pub fn with_scatter_sections(mut self, sections: SectionCount) -> Self {
        self.scatter_sections = Some(sections);
        self
    }

    /// Sets the gather section count.
    pub fn with_gather_sections(mut self, sections: SectionCount) -> Self {
        self.gather_sections = sections;
        self
    }

    /// Sets the sampling seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the initial sparse entry reservation.
    pub fn with_initial_sparse_entries(mut self, entries: usize) -> Self {
        self.initial_sparse_entries = entries;
        self
    }

    /// Sets the encoding policy.
    pub fn with_encoding(mut self, encoding: EncodingMode) -> Self {
        self.encoding = encoding;
        self
    }

    /// Enables the explicit init pass.
    pub fn with_init_all_values(mut self, init: bool) -> Self {
        self.init_all_values = init;
        self
    }

    /// Enables certain-graph mode.
    pub fn with_certain_graph(mut self, certain: bool) -> Self {
        self.certain_graph = certain;
        self
    }

    /// Sets the batch sampling ratio.
    pub fn with_batch_sampling_ratio(mut self, ratio: f32) -> Self {
        self.batch_sampling_ratio = ratio;
        self
    }

    /// Sets the scratch file path.
    pub fn with_scratch_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.scratch_path = path.into();
        self
    }

    /// Scatter and gather section counts for a graph whose largest id is
    /// `max_vertex_id`. Without an explicit scatter count there is one
    /// scatter section whenever gather sections are in use.
    pub fn section_counts(&self, max_vertex_id: VertexId) -> (u32, u32) {
        let gather = self.gather_sections.resolve(max_vertex_id);
        let scatter = match self.scatter_sections {
            Some(count) => count.resolve(max_vertex_id),
            None => u32::from(gather > 0),
        };
        (scatter, gather)
    }

    /// Rejects option combinations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(SageError::Config(msg.to_string()));
        if self.num_samples == 0 {
            return fail("num_samples must be positive");
        }
        if self.threads == 0 {
            return fail("threads must be positive");
        }
        if self.partition_size == 0 {
            return fail("partition_size must be positive");
        }
        if self.io_depth == 0 {
            return fail("io_depth must be positive");
        }
        if self.page_size < 64 || !self.page_size.is_power_of_two() {
            return fail("page_size must be a power of two of at least 64");
        }
        if !self.batch_sampling_ratio.is_finite() || self.batch_sampling_ratio < 0.0 {
            return fail("batch_sampling_ratio must be a non-negative number");
        }
        if let CacheBudget::DenseMultiple(factor) = self.cache_budget {
            if !factor.is_finite() || factor <= 0.0 {
                return fail("cache budget multiple must be positive");
            }
        }
        let per_vertices_zero = |count: Option<SectionCount>| {
            matches!(count, Some(SectionCount::PerVertices(0)))
        };
        if per_vertices_zero(self.scatter_sections) || per_vertices_zero(Some(self.gather_sections))
        {
            return fail("sections per vertex count must be positive");
        }
        Ok(())
    }
}
