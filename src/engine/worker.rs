//! Worker loops for the engine phases.
//!
//! Every worker claims vertices from a shared [`PartitionCursor`], records
//! them in the [`RunningSet`] so the cache can follow the scan, and talks to
//! the cache through its own [`CacheFront`]. Results are returned per worker
//! and merged by the engine after the join.

use std::sync::Arc;

use crate::cache::{CacheFront, SectionHint, VertexCache};
use crate::graph::{Edge, EdgeSampler, Graph};
use crate::primitives::bitmap::Bitmap;
use crate::primitives::concurrency::{PartitionCursor, RunningSet};
use crate::primitives::io::FileIo;
use crate::record::{RecordLayout, VertexRecord, VertexValue};
use crate::types::{Result, VertexId, NO_VERTEX};

use super::update::{
    fill_record, gather_record, next_parity, scatter_record, start_record, Crossing,
};
use super::{EncodingMode, PhaseCounters, SectionMap, VertexProgram, VertexQuery};

/// Everything a worker needs that stays fixed for one phase.
pub(crate) struct PhaseContext<'e> {
    pub graph: &'e Graph,
    pub cache: &'e VertexCache,
    pub io: &'e Arc<dyn FileIo>,
    pub layout: RecordLayout,
    pub sections: SectionMap,
    pub running: &'e RunningSet,
    pub iteration: u32,
    pub partition_size: usize,
    pub io_depth: usize,
    pub encoding: EncodingMode,
}

/// Per-worker result of a scatter or gather phase.
#[derive(Debug)]
pub(crate) struct WorkerOutput {
    pub activated: Bitmap,
    pub activated_count: usize,
    pub scattered: Bitmap,
    pub scattered_out: Bitmap,
    pub counters: PhaseCounters,
}

impl WorkerOutput {
    fn new(num_vertices: usize) -> Self {
        Self {
            activated: Bitmap::new(num_vertices),
            activated_count: 0,
            scattered: Bitmap::new(num_vertices),
            scattered_out: Bitmap::new(num_vertices),
            counters: PhaseCounters::default(),
        }
    }
}

/// Bitmaps the gather phase reads, merged across scatter workers.
pub(crate) struct GatherInputs<'e> {
    /// Vertices that scattered this superstep.
    pub scattered: &'e Bitmap,
    /// Vertices gathered this superstep.
    pub targets: &'e Bitmap,
    /// Vertices the scatter phase visited.
    pub active: &'e Bitmap,
    pub sampler: &'e EdgeSampler,
}

/// Record encodings seen by a query pass.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Census {
    pub dense: u64,
    pub sparse: u64,
    pub entries: u64,
}

impl<'e> PhaseContext<'e> {
    fn front<C>(&self) -> CacheFront<'e, C> {
        CacheFront::new(self.cache, Arc::clone(self.io), self.io_depth)
    }

    fn claim(
        &self,
        cursor: &PartitionCursor<'_>,
        is_scatter: bool,
        max: usize,
    ) -> Result<Vec<VertexId>> {
        let batch = cursor.next_batch(max);
        if batch.is_empty() {
            return Ok(batch);
        }
        if let Some(min) = self.running.add(&batch) {
            self.cache
                .set_current_section(self.sections.section(is_scatter, min))?;
        }
        Ok(batch)
    }

    fn decode(&self, vertex: VertexId, bytes: &[u8]) -> Result<VertexRecord> {
        let mut record = VertexRecord::from_bytes(bytes.to_vec(), self.layout)?;
        record.set_vertex_id(vertex);
        Ok(record)
    }

    /// Reads every claimed vertex, applies `update` to a private copy and
    /// installs the copy back into the cache.
    fn rewrite_each<F>(
        &self,
        cursor: &PartitionCursor<'_>,
        is_scatter: bool,
        mut update: F,
    ) -> Result<()>
    where
        F: FnMut(VertexId, &mut VertexRecord),
    {
        let mut front = self.front::<()>();
        loop {
            let batch = self.claim(cursor, is_scatter, self.partition_size)?;
            if batch.is_empty() {
                return Ok(());
            }
            for &vertex in &batch {
                front.read_append(vertex, ());
            }
            front.submit();
            while front.pending() > 0 {
                for done in front.wait_for_complete(1, usize::MAX)? {
                    let mut record = self.decode(done.vertex, done.record.bytes())?;
                    front.end_read(done.record, SectionHint::FREE);
                    update(done.vertex, &mut record);
                    front.write(done.vertex, record.into_bytes(), SectionHint::FREE)?;
                    self.running.remove(done.vertex);
                }
            }
        }
    }

    fn hint(&self, is_scatter: bool, vertex: VertexId) -> SectionHint {
        self.sections.hint(is_scatter, vertex, self.iteration)
    }

    /// Where a gathered destination is needed next: as the source of its own
    /// furthest out-neighbor later in this gather, or as a scatter vertex in
    /// the next superstep.
    fn dest_hint(
        &self,
        dest: VertexId,
        inputs: &GatherInputs<'_>,
        activated: &Bitmap,
    ) -> SectionHint {
        if inputs.scattered.get(dest as usize) {
            if let Some(last) = self.graph.out_edges(dest).last() {
                if last.neighbor > dest {
                    return self.hint(false, last.neighbor);
                }
            }
        }
        if activated.get(dest as usize) {
            return self.hint(true, dest);
        }
        SectionHint::FREE
    }

    /// Where a source is needed next: at its next out-neighbor in this
    /// gather, at its own gather slot, or at its scatter slot next superstep.
    fn src_hint(
        &self,
        src: VertexId,
        dest: VertexId,
        edge: &Edge,
        inputs: &GatherInputs<'_>,
    ) -> SectionHint {
        let gathered_later = inputs.targets.get(src as usize) && dest < src;
        if edge.next_dest != NO_VERTEX {
            if gathered_later && src < edge.next_dest {
                return self.hint(false, src);
            }
            return self.hint(false, edge.next_dest);
        }
        if gathered_later {
            return self.hint(true, src);
        }
        SectionHint::FREE
    }
}

/// Writes `init` into every world of every claimed vertex.
pub(crate) fn init_worker<V: VertexValue>(
    ctx: &PhaseContext<'_>,
    cursor: &PartitionCursor<'_>,
    init: V,
) -> Result<()> {
    ctx.rewrite_each(cursor, false, |_, record| fill_record(record, init))
}

/// Activates every world of every claimed vertex, optionally resetting its
/// value to `start`.
pub(crate) fn start_worker<V: VertexValue>(
    ctx: &PhaseContext<'_>,
    cursor: &PartitionCursor<'_>,
    start: Option<V>,
) -> Result<()> {
    ctx.rewrite_each(cursor, true, |_, record| start_record(record, start))
}

/// Runs the scatter callback over claimed active vertices and records which
/// vertices scattered and which out-neighbors must gather.
pub(crate) fn scatter_worker<P: VertexProgram>(
    ctx: &PhaseContext<'_>,
    cursor: &PartitionCursor<'_>,
    program: &mut P,
) -> Result<WorkerOutput> {
    let graph = ctx.graph;
    let mut out = WorkerOutput::new(graph.num_vertices());
    ctx.rewrite_each(cursor, true, |vertex, record| {
        out.counters.vertices += 1;
        let out_edges = graph.out_edges(vertex);
        let in_edges = graph.in_edges(vertex);
        if scatter_record(program, record, ctx.iteration, out_edges, in_edges, &mut out.counters) {
            out.scattered.set(vertex as usize);
            for edge in out_edges.iter() {
                out.scattered_out.set(edge.neighbor as usize);
            }
        }
    })?;
    Ok(out)
}

/// Gathers every claimed destination from its scattered in-neighbors, one
/// destination at a time with source reads overlapped up to the I/O depth.
pub(crate) fn gather_worker<P: VertexProgram>(
    ctx: &PhaseContext<'_>,
    cursor: &PartitionCursor<'_>,
    inputs: &GatherInputs<'_>,
    program: &mut P,
) -> Result<WorkerOutput> {
    let graph = ctx.graph;
    let mut out = WorkerOutput::new(graph.num_vertices());
    let mut front = ctx.front::<usize>();
    loop {
        let batch = ctx.claim(cursor, false, 1)?;
        let Some(&dest) = batch.first() else {
            return Ok(out);
        };
        out.counters.vertices += 1;

        let pinned = front.read(dest)?;
        let mut record = ctx.decode(dest, pinned.bytes())?;
        front.end_read(pinned, SectionHint::KEEP);
        if !inputs.active.get(dest as usize) {
            // Not scattered this superstep, so its next-parity bits are stale.
            record.activation_mut(next_parity(ctx.iteration)).clear_all();
        }

        let in_edges = graph.in_edges(dest);
        let mut sources = (0..in_edges.degree())
            .filter(|&i| inputs.scattered.get(in_edges.get(i).neighbor as usize));
        let mut exhausted = false;
        let mut activated = false;
        loop {
            while !exhausted && front.pending() < ctx.io_depth {
                match sources.next() {
                    Some(i) => front.read_append(in_edges.get(i).neighbor, i),
                    None => exhausted = true,
                }
            }
            if front.pending() == 0 {
                break;
            }
            front.submit();
            for done in front.wait_for_complete(1, usize::MAX)? {
                let i = done.context;
                let edge = in_edges.get(i);
                let src = ctx.decode(done.vertex, done.record.bytes())?;
                let worlds = inputs.sampler.worlds(dest, edge, in_edges.global_index(i));
                let crossing = Crossing {
                    edge,
                    attr: in_edges.attr(i),
                    worlds: &worlds,
                };
                activated |= gather_record(
                    program,
                    &src,
                    &mut record,
                    &crossing,
                    ctx.iteration,
                    ctx.encoding,
                    &mut out.counters,
                );
                let hint = ctx.src_hint(done.vertex, dest, edge, inputs);
                front.end_read(done.record, hint);
            }
        }

        if activated {
            out.activated.set(dest as usize);
            out.activated_count += 1;
        }
        let hint = ctx.dest_hint(dest, inputs, &out.activated);
        front.write(dest, record.into_bytes(), hint)?;
        ctx.running.remove(dest);
    }
}

/// Feeds every claimed vertex's values to `query`.
pub(crate) fn query_worker<V, Q>(
    ctx: &PhaseContext<'_>,
    cursor: &PartitionCursor<'_>,
    query: &mut Q,
) -> Result<Census>
where
    V: VertexValue,
    Q: VertexQuery<V>,
{
    let mut census = Census::default();
    let mut front = ctx.front::<()>();
    loop {
        let batch = ctx.claim(cursor, false, ctx.partition_size)?;
        if batch.is_empty() {
            return Ok(census);
        }
        for &vertex in &batch {
            front.read_append(vertex, ());
        }
        front.submit();
        while front.pending() > 0 {
            for done in front.wait_for_complete(1, usize::MAX)? {
                let record = ctx.decode(done.vertex, done.record.bytes())?;
                front.end_read(done.record, SectionHint::FREE);
                match &record {
                    VertexRecord::Dense(r) => {
                        census.dense += 1;
                        for world in 0..ctx.layout.num_samples() {
                            query.visit(done.vertex, &r.value(world), 1);
                        }
                    }
                    VertexRecord::Sparse(r) => {
                        census.sparse += 1;
                        census.entries += r.num_values() as u64;
                        for entry in 0..r.num_values() {
                            let count = r.bitmap(entry).count();
                            if count > 0 {
                                query.visit(done.vertex, &r.value(entry), count);
                            }
                        }
                    }
                }
                ctx.running.remove(done.vertex);
            }
        }
    }
}
