//! What each phase does to a single decoded record.
//!
//! Nothing here knows about caching or threads. Activation bitmaps alternate
//! by superstep parity: superstep `i` reads parity `i % 2` and writes parity
//! `(i + 1) % 2`.

use crate::graph::{Edge, EdgeList};
use crate::primitives::bitmap::Bitmap;
use crate::record::{DenseRecord, SparseRecord, VertexRecord, VertexValue};

use super::{EncodingMode, PhaseCounters, VertexProgram};

/// Parity the first superstep reads.
const START_PARITY: usize = 1;

pub(crate) fn current_parity(iteration: u32) -> usize {
    (iteration % 2) as usize
}

pub(crate) fn next_parity(iteration: u32) -> usize {
    ((iteration + 1) % 2) as usize
}

/// The edge a gather crosses and the worlds it exists in.
pub(crate) struct Crossing<'a> {
    pub edge: &'a Edge,
    pub attr: f32,
    pub worlds: &'a Bitmap,
}

/// Sets every world of `record` to `value`.
pub(crate) fn fill_record<V: VertexValue>(record: &mut VertexRecord, value: V) {
    match record {
        VertexRecord::Dense(r) => {
            for world in 0..r.layout().num_samples() {
                r.set_value(world, value);
            }
        }
        VertexRecord::Sparse(r) => r.collapse_to(value),
    }
}

/// Prepares an activated vertex for the first superstep: optionally
/// overwrites every world with `start` and activates all worlds.
pub(crate) fn start_record<V: VertexValue>(record: &mut VertexRecord, start: Option<V>) {
    if let Some(value) = start {
        fill_record(record, value);
    }
    record.activation_mut(START_PARITY).set_all();
}

/// Runs the scatter callback over the active worlds of `record`. Returns
/// whether any world scattered.
pub(crate) fn scatter_record<P: VertexProgram>(
    program: &mut P,
    record: &mut VertexRecord,
    iteration: u32,
    out_edges: EdgeList<'_>,
    in_edges: EdgeList<'_>,
    counters: &mut PhaseCounters,
) -> bool {
    let cur = current_parity(iteration);
    record.activation_mut(next_parity(iteration)).clear_all();
    let active = record.activation(cur).to_bitmap();
    let mut scattered = false;
    match record {
        VertexRecord::Dense(r) => {
            for world in active.iter_ones() {
                let mut value: P::Value = r.value(world);
                counters.scatter_calls += 1;
                let keep = program.scatter(&mut value, out_edges, in_edges);
                r.set_value(world, value);
                if keep {
                    scattered = true;
                } else {
                    r.activation_mut(cur).clear(world);
                }
            }
        }
        VertexRecord::Sparse(r) => {
            let mut pruned = Bitmap::new(active.len());
            let mut moved = Vec::new();
            for entry in 0..r.num_values() {
                let mut worlds = r.bitmap(entry).to_bitmap();
                worlds.and_assign(&active);
                if worlds.is_all_clear() {
                    continue;
                }
                let before = r.value_bytes(entry).to_vec();
                let mut value: P::Value = r.value(entry);
                counters.scatter_calls += 1;
                if program.scatter(&mut value, out_edges, in_edges) {
                    scattered = true;
                } else {
                    pruned.or_assign(&worlds);
                }
                let after = value.to_bytes();
                if after != before {
                    r.bitmap_mut(entry).and_not_assign(&worlds);
                    moved.push((after, worlds));
                }
            }
            r.activation_mut(cur).and_not_assign(&pruned);
            for (value, worlds) in moved {
                if r.assign_worlds(&value, &worlds) {
                    counters.expansions += 1;
                }
            }
        }
    }
    scattered
}

/// Folds `src` into `dest` across one edge, in every world where the edge
/// exists and `src` is active. Returns whether `dest` was activated in any
/// world.
pub(crate) fn gather_record<P: VertexProgram>(
    program: &mut P,
    src: &VertexRecord,
    dest: &mut VertexRecord,
    crossing: &Crossing<'_>,
    iteration: u32,
    encoding: EncodingMode,
    counters: &mut PhaseCounters,
) -> bool {
    let mut candidates = crossing.worlds.clone();
    candidates.and_slice(&src.activation(current_parity(iteration)));
    if candidates.is_all_clear() {
        return false;
    }
    let next = next_parity(iteration);
    if matches!(src, VertexRecord::Dense(_)) && dest.make_dense() {
        counters.transforms += 1;
    }
    let activated = match (src, &mut *dest) {
        (_, VertexRecord::Dense(d)) => {
            gather_into_dense(program, src, d, &candidates, crossing, next, counters)
        }
        (VertexRecord::Sparse(s), VertexRecord::Sparse(d)) => {
            gather_sparse(program, s, d, &candidates, crossing, next, counters)
        }
        (VertexRecord::Dense(_), VertexRecord::Sparse(_)) => {
            unreachable!("dense source converts its destination first")
        }
    };
    let outgrown = matches!(
        &*dest,
        VertexRecord::Sparse(d) if d.allocated_pages() > d.layout().dense_pages()
    );
    if encoding == EncodingMode::Adaptive && outgrown && dest.make_dense() {
        counters.transforms += 1;
    }
    activated
}

fn gather_into_dense<P: VertexProgram>(
    program: &mut P,
    src: &VertexRecord,
    dest: &mut DenseRecord,
    candidates: &Bitmap,
    crossing: &Crossing<'_>,
    next: usize,
    counters: &mut PhaseCounters,
) -> bool {
    let mut activated = false;
    match src {
        VertexRecord::Dense(s) => {
            for world in candidates.iter_ones() {
                let src_value: P::Value = s.value(world);
                activated |=
                    gather_world(program, &src_value, dest, world, crossing, next, counters);
            }
        }
        VertexRecord::Sparse(s) => {
            for entry in 0..s.num_values() {
                let mut worlds = candidates.clone();
                worlds.and_slice(&s.bitmap(entry));
                if worlds.is_all_clear() {
                    continue;
                }
                let src_value: P::Value = s.value(entry);
                for world in worlds.iter_ones() {
                    activated |=
                        gather_world(program, &src_value, dest, world, crossing, next, counters);
                }
            }
        }
    }
    activated
}

fn gather_world<P: VertexProgram>(
    program: &mut P,
    src_value: &P::Value,
    dest: &mut DenseRecord,
    world: usize,
    crossing: &Crossing<'_>,
    next: usize,
    counters: &mut PhaseCounters,
) -> bool {
    let mut value: P::Value = dest.value(world);
    counters.gather_calls += 1;
    let activated = program.gather(src_value, &mut value, crossing.edge, crossing.attr);
    dest.set_value(world, value);
    if activated {
        dest.activation_mut(next).set(world);
    }
    activated
}

fn gather_sparse<P: VertexProgram>(
    program: &mut P,
    src: &SparseRecord,
    dest: &mut SparseRecord,
    candidates: &Bitmap,
    crossing: &Crossing<'_>,
    next: usize,
    counters: &mut PhaseCounters,
) -> bool {
    let mut newly_active = Bitmap::new(candidates.len());
    let mut inserts: Vec<(Vec<u8>, Bitmap)> = Vec::new();
    for i in 0..dest.num_values() {
        let mut dest_worlds = dest.bitmap(i).to_bitmap();
        dest_worlds.and_assign(candidates);
        if dest_worlds.is_all_clear() {
            continue;
        }
        let before = dest.value_bytes(i).to_vec();
        let dest_value: P::Value = dest.value(i);
        for j in 0..src.num_values() {
            let mut worlds = dest_worlds.clone();
            worlds.and_slice(&src.bitmap(j));
            if worlds.is_all_clear() {
                continue;
            }
            let mut value = dest_value;
            counters.gather_calls += 1;
            if program.gather(&src.value(j), &mut value, crossing.edge, crossing.attr) {
                newly_active.or_assign(&worlds);
            }
            let after = value.to_bytes();
            if after != before {
                dest.bitmap_mut(i).and_not_assign(&worlds);
                inserts.push((after, worlds));
            }
        }
    }
    for (value, worlds) in inserts {
        if dest.assign_worlds(&value, &worlds) {
            counters.expansions += 1;
        }
    }
    dest.activation_mut(next).or_assign(&newly_active);
    !newly_active.is_all_clear()
}
