//! Superstep driver.
//!
//! An [`Engine`] owns the graph, the vertex cache and the activation set.
//! [`Engine::run`] alternates scatter and gather phases until no vertex is
//! activated in any world. Each phase spawns [`EngineOptions::threads`]
//! scoped workers that share one partition cursor and join before the next
//! phase starts.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{debug, info};

use crate::cache::{CacheConfig, CacheStats, CacheStatsSnapshot, Lookup, SectionHint, VertexCache};
use crate::graph::{EdgeSampler, Graph, SamplingIndex};
use crate::primitives::bitmap::Bitmap;
use crate::primitives::concurrency::{PartitionCursor, RunningSet};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::record::{DenseRecord, RecordLayout, SparseRecord, VertexRecord, VertexValue};
use crate::types::{Result, SageError, VertexId, WorldId};

mod options;
mod program;
mod sections;
mod stats;
mod update;
mod worker;

pub use options::{CacheBudget, EncodingMode, EngineOptions, SectionCount};
pub use program::{VertexProgram, VertexQuery};
pub use sections::SectionMap;
pub use stats::{EngineStats, PhaseCounters};

use worker::{
    gather_worker, init_worker, query_worker, scatter_worker, start_worker, GatherInputs,
    PhaseContext, WorkerOutput,
};

/// Monte-Carlo scatter/gather engine over vertex values of type `V`.
pub struct Engine<V: VertexValue> {
    graph: Graph,
    options: EngineOptions,
    layout: RecordLayout,
    sections: SectionMap,
    io: Arc<dyn FileIo>,
    cache: VertexCache,
    sampler: EdgeSampler,
    activated: Bitmap,
    running: RunningSet,
    init: V,
    initialized: bool,
    stats: EngineStats,
}

impl<V: VertexValue> Engine<V> {
    /// Builds an engine over `graph`. Every vertex starts out holding `init`
    /// in every world.
    pub fn new(graph: Graph, options: EngineOptions, init: V) -> Result<Self> {
        options.validate()?;
        let mut options = options;
        if options.certain_graph {
            options.batch_sampling_ratio = 0.0;
        }
        let layout = RecordLayout::for_value::<V>(
            options.num_samples,
            options.page_size,
            options.initial_sparse_entries,
        );
        let (scatter, gather) = options.section_counts(graph.max_vertex_id());
        let sections = SectionMap::new(scatter, gather, graph.max_vertex_id());
        let num_vertices = graph.num_vertices();

        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open_scratch(&options.scratch_path)?);
        let budget = options
            .cache_budget
            .resolve(layout.dense_size(), num_vertices);
        let cache = VertexCache::new(
            Arc::clone(&io),
            CacheConfig {
                budget_bytes: budget,
                num_vertices,
                num_sections: sections.num_sections(),
            },
            template_record(layout, options.encoding, init).into_bytes(),
            Arc::new(CacheStats::default()),
        );

        let sampler = if options.certain_graph {
            EdgeSampler::Certain(Bitmap::full(options.num_samples))
        } else if options.batch_sampling_ratio > 0.0 {
            EdgeSampler::Indexed {
                index: SamplingIndex::build(
                    &graph,
                    options.batch_sampling_ratio,
                    options.threads,
                    options.partition_size,
                    options.seed,
                    options.num_samples,
                ),
                seed: options.seed,
                num_samples: options.num_samples,
            }
        } else {
            EdgeSampler::OnTheFly {
                seed: options.seed,
                num_samples: options.num_samples,
            }
        };

        info!(
            vertices = num_vertices,
            edges = graph.num_edges(),
            samples = options.num_samples,
            budget_bytes = budget,
            scatter_sections = scatter,
            gather_sections = gather,
            encoding = ?options.encoding,
            "engine.open"
        );
        Ok(Self {
            activated: Bitmap::new(num_vertices),
            graph,
            options,
            layout,
            sections,
            io,
            cache,
            sampler,
            running: RunningSet::new(),
            init,
            initialized: false,
            stats: EngineStats::default(),
        })
    }

    /// Builds an engine whose initial value comes from `program`.
    pub fn for_program<P>(graph: Graph, options: EngineOptions, program: &P) -> Result<Self>
    where
        P: VertexProgram<Value = V>,
    {
        Self::new(graph, options, program.init())
    }

    /// Graph the engine runs on.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Effective options.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Record layout shared by every vertex.
    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    /// Vertices activated for the next run.
    pub fn activated(&self) -> &Bitmap {
        &self.activated
    }

    /// Cumulative engine statistics.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Current cache counters.
    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats().snapshot()
    }

    /// Activates `vertex` for the next run.
    pub fn set_start_vertex(&mut self, vertex: VertexId) -> Result<()> {
        self.check_vertex(vertex)?;
        self.activated.set(vertex as usize);
        Ok(())
    }

    /// Activates every vertex, including ones never written.
    pub fn activate_all(&mut self) {
        self.activated.set_all();
        let mut template = template_record(self.layout, self.options.encoding, self.init);
        template.activation_mut(1).set_all();
        self.cache.set_template(template.into_bytes());
    }

    /// Writes an explicit initial record for every vertex.
    pub fn init_values(&mut self) -> Result<()> {
        let started = Instant::now();
        let all = Bitmap::full(self.graph.num_vertices());
        let init = self.init;
        self.run_phase(0, &all, |ctx, cursor| init_worker(ctx, cursor, init))?;
        self.initialized = true;
        info!(
            vertices = all.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "engine.init_values"
        );
        Ok(())
    }

    /// Runs `program` to convergence, writing its start value into every
    /// activated vertex first. Returns the number of supersteps.
    pub fn run<P>(&mut self, program: &P) -> Result<u32>
    where
        P: VertexProgram<Value = V>,
    {
        self.run_with(program, true)
    }

    /// Runs `program` to convergence. With `call_start` false the activated
    /// vertices keep their current values and only have their worlds
    /// activated.
    pub fn run_with<P>(&mut self, program: &P, call_start: bool) -> Result<u32>
    where
        P: VertexProgram<Value = V>,
    {
        if self.options.init_all_values && !self.initialized {
            self.init_values()?;
        }
        let started = Instant::now();
        let num_vertices = self.graph.num_vertices();
        let mut iteration = 0u32;
        loop {
            iteration += 1;
            if iteration == 1 {
                let start = call_start.then(|| program.start());
                self.run_phase(iteration, &self.activated, |ctx, cursor| {
                    start_worker(ctx, cursor, start)
                })?;
            }

            let scatter = self.run_phase(iteration, &self.activated, |ctx, cursor| {
                let mut program = program.clone();
                scatter_worker(ctx, cursor, &mut program)
            })?;
            let mut scattered = Bitmap::new(num_vertices);
            let mut targets = Bitmap::new(num_vertices);
            let mut counters = PhaseCounters::default();
            for out in scatter {
                scattered.or_assign(&out.scattered);
                targets.or_assign(&out.scattered_out);
                counters += out.counters;
            }

            let inputs = GatherInputs {
                scattered: &scattered,
                targets: &targets,
                active: &self.activated,
                sampler: &self.sampler,
            };
            let gather = self.run_phase(iteration, &targets, |ctx, cursor| {
                let mut program = program.clone();
                gather_worker(ctx, cursor, &inputs, &mut program)
            })?;
            let mut activated = Bitmap::new(num_vertices);
            let mut activated_count = 0;
            let mut gathered = 0;
            for WorkerOutput {
                activated: local,
                activated_count: local_count,
                counters: local_counters,
                ..
            } in gather
            {
                activated.or_assign(&local);
                activated_count += local_count;
                self.stats.activations += local_count as u64;
                gathered += local_counters.vertices;
                counters += local_counters;
            }

            self.stats.scattered_vertices += scattered.count() as u64;
            self.stats.gathered_vertices += gathered;
            self.stats.absorb(counters);
            CacheStats::bump(&self.cache.stats().expansions, counters.expansions);
            CacheStats::bump(&self.cache.stats().transforms, counters.transforms);
            debug!(
                iteration,
                scattered = scattered.count(),
                gathered,
                activated = activated_count,
                scatter_calls = counters.scatter_calls,
                gather_calls = counters.gather_calls,
                "engine.superstep"
            );
            self.activated = activated;
            if activated_count == 0 {
                break;
            }
        }
        self.stats.runs += 1;
        self.stats.supersteps += u64::from(iteration);
        info!(
            run = self.stats.runs,
            supersteps = iteration,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "engine.run"
        );
        Ok(iteration)
    }

    /// Visits every vertex's values with a clone of `prototype` per worker
    /// and returns the merged result.
    pub fn query<Q>(&mut self, prototype: &Q) -> Result<Q>
    where
        Q: VertexQuery<V>,
    {
        let all = Bitmap::full(self.graph.num_vertices());
        let parts = self.run_phase(0, &all, |ctx, cursor| {
            let mut query = prototype.clone();
            let census = query_worker(ctx, cursor, &mut query)?;
            Ok((query, census))
        })?;
        let mut parts = parts.into_iter();
        let (mut merged, mut census) = parts
            .next()
            .ok_or(SageError::Invalid("query ran without workers"))?;
        for (query, part) in parts {
            merged.merge(query);
            census.dense += part.dense;
            census.sparse += part.sparse;
            census.entries += part.entries;
        }
        self.stats.dense_vertices = census.dense;
        self.stats.sparse_vertices = census.sparse;
        self.stats.sparse_entries = census.entries;
        debug!(
            dense = census.dense,
            sparse = census.sparse,
            entries = census.entries,
            "engine.query"
        );
        Ok(merged)
    }

    /// Value of `vertex` in `world`.
    pub fn value(&self, vertex: VertexId, world: WorldId) -> Result<V> {
        self.check_vertex(vertex)?;
        if world.0 as usize >= self.layout.num_samples() {
            return Err(SageError::InvalidOwned(format!(
                "world {world} out of range for {} samples",
                self.layout.num_samples()
            )));
        }
        let bytes = match self.cache.get(vertex) {
            Lookup::Hit(record) => {
                let bytes = record.bytes().to_vec();
                record.release(SectionHint::KEEP);
                bytes
            }
            Lookup::Miss(request) => {
                let mut buf = vec![0u8; request.len];
                self.io.read_at(request.offset, &mut buf)?;
                let record = self.cache.fill(vertex, buf)?;
                let bytes = record.bytes().to_vec();
                record.release(SectionHint::KEEP);
                bytes
            }
        };
        Ok(VertexRecord::from_bytes(bytes, self.layout)?.world_value(world))
    }

    /// Forgets every vertex value and activation. Statistics are kept.
    pub fn reset(&mut self) -> Result<()> {
        self.cache.reset()?;
        let template = template_record(self.layout, self.options.encoding, self.init);
        self.cache.set_template(template.into_bytes());
        self.activated.clear_all();
        self.initialized = false;
        debug!("engine.reset");
        Ok(())
    }

    fn check_vertex(&self, vertex: VertexId) -> Result<()> {
        if vertex as usize >= self.graph.num_vertices() {
            return Err(SageError::InvalidOwned(format!(
                "vertex {vertex} out of range for {} vertices",
                self.graph.num_vertices()
            )));
        }
        Ok(())
    }

    /// Runs `work` on every worker thread over the vertices in `eligible`.
    fn run_phase<T, F>(&self, iteration: u32, eligible: &Bitmap, work: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(&PhaseContext<'_>, &PartitionCursor<'_>) -> Result<T> + Sync,
    {
        let ctx = PhaseContext {
            graph: &self.graph,
            cache: &self.cache,
            io: &self.io,
            layout: self.layout,
            sections: self.sections,
            running: &self.running,
            iteration,
            partition_size: self.options.partition_size,
            io_depth: self.options.io_depth,
            encoding: self.options.encoding,
        };
        let cursor = PartitionCursor::new(eligible);
        let results: Vec<Result<T>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..self.options.threads)
                .map(|_| scope.spawn(|| work(&ctx, &cursor)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        });
        results.into_iter().collect()
    }
}

impl<V: VertexValue> Drop for Engine<V> {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.options.scratch_path) {
            debug!(
                path = %self.options.scratch_path.display(),
                %err,
                "engine.scratch.remove_failed"
            );
        }
    }
}

fn template_record<V: VertexValue>(
    layout: RecordLayout,
    encoding: EncodingMode,
    init: V,
) -> VertexRecord {
    match encoding {
        EncodingMode::Dense => VertexRecord::Dense(DenseRecord::template(layout, init)),
        EncodingMode::Sparse | EncodingMode::Adaptive => {
            VertexRecord::Sparse(SparseRecord::template(layout, init))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, EdgeInput};
    use tempfile::tempdir;

    #[derive(Clone)]
    struct Hops;

    impl VertexProgram for Hops {
        type Value = u32;

        fn init(&self) -> u32 {
            u32::MAX
        }

        fn start(&self) -> u32 {
            0
        }

        fn gather(&mut self, src: &u32, dest: &mut u32, _: &Edge, _: f32) -> bool {
            let candidate = src.saturating_add(1);
            if candidate < *dest {
                *dest = candidate;
                true
            } else {
                false
            }
        }
    }

    fn chain(n: u32) -> Graph {
        let edges: Vec<_> = (0..n - 1).map(|v| EdgeInput::certain(v, v + 1)).collect();
        Graph::from_edges(0, &edges, true)
    }

    #[test]
    fn chain_converges_in_length_plus_one_supersteps() -> Result<()> {
        let dir = tempdir()?;
        let options = EngineOptions::default()
            .with_num_samples(8)
            .with_threads(2)
            .with_certain_graph(true)
            .with_scratch_path(dir.path().join("chain.tmp"));
        let mut engine = Engine::for_program(chain(5), options, &Hops)?;
        engine.set_start_vertex(0)?;
        let steps = engine.run(&Hops)?;
        assert_eq!(steps, 5);
        for v in 0..5 {
            assert_eq!(engine.value(v, WorldId(3))?, v);
        }
        assert!(engine.activated().is_all_clear());
        assert_eq!(engine.stats().runs, 1);
        Ok(())
    }

    #[test]
    fn out_of_range_arguments_are_rejected() -> Result<()> {
        let dir = tempdir()?;
        let options = EngineOptions::default()
            .with_num_samples(4)
            .with_scratch_path(dir.path().join("range.tmp"));
        let mut engine = Engine::new(chain(3), options, 0u32)?;
        assert!(engine.set_start_vertex(3).is_err());
        assert!(engine.value(0, WorldId(4)).is_err());
        assert_eq!(engine.value(2, WorldId(0))?, 0);
        Ok(())
    }

    #[test]
    fn reset_restores_initial_values() -> Result<()> {
        let dir = tempdir()?;
        let options = EngineOptions::default()
            .with_num_samples(4)
            .with_threads(1)
            .with_certain_graph(true)
            .with_scratch_path(dir.path().join("reset.tmp"));
        let mut engine = Engine::for_program(chain(3), options, &Hops)?;
        engine.set_start_vertex(0)?;
        engine.run(&Hops)?;
        assert_eq!(engine.value(2, WorldId(0))?, 2);
        engine.reset()?;
        assert_eq!(engine.value(2, WorldId(0))?, u32::MAX);
        Ok(())
    }
}
