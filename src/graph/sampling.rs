//! Per-world edge existence.
//!
//! Whether edge `src -> dest` exists in world `w` is a pure function of the
//! pair, the edge probability and the global seed, so every worker and every
//! superstep sees the same world.

use std::borrow::Cow;
use std::thread;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::primitives::bitmap::Bitmap;
use crate::primitives::concurrency::PartitionCursor;
use crate::types::VertexId;

use super::{Edge, Graph};

const SEED_PRIME: u64 = 10_000_007;

/// Fills `dst` with the worlds in which edge `src -> dest` exists. Every bit
/// of `dst` is written.
pub fn sample_edge(dst: &mut Bitmap, src: VertexId, dest: VertexId, probability: f32, seed: u64) {
    if probability <= 0.0 {
        dst.clear_all();
        return;
    }
    if probability >= 1.0 {
        dst.set_all();
        return;
    }
    dst.clear_all();
    let threshold = (probability * 256.0) as u32;
    let mut rng = ChaCha8Rng::seed_from_u64(
        (dest as u64)
            .wrapping_mul(SEED_PRIME)
            .wrapping_add(src as u64)
            .wrapping_add(seed),
    );
    let mut world = 0;
    while world < dst.len() {
        let draw = rng.next_u32().to_le_bytes();
        for byte in draw {
            if world == dst.len() {
                break;
            }
            if u32::from(byte) < threshold {
                dst.set(world);
            }
            world += 1;
        }
    }
}

/// Picks vertices by ascending in-degree until `ratio` of the edges is
/// covered. A ratio of one or more selects every vertex.
pub fn select_vertices(graph: &Graph, ratio: f32) -> Bitmap {
    let n = graph.num_vertices();
    if ratio >= 1.0 {
        return Bitmap::full(n);
    }
    let mut selected = Bitmap::new(n);
    if ratio <= 0.0 {
        return selected;
    }
    let budget = (ratio as f64 * graph.num_edges() as f64) as usize;
    let mut by_degree: Vec<(VertexId, usize)> = (0..n as VertexId)
        .map(|v| (v, graph.in_degree(v)))
        .collect();
    by_degree.sort_by_key(|&(_, degree)| degree);
    let mut spent = 0;
    for (vertex, degree) in by_degree {
        spent += degree;
        if spent > budget {
            break;
        }
        selected.set(vertex as usize);
    }
    selected
}

/// Precomputed sampling bitmaps for the in-edges of selected vertices, keyed
/// by global edge index.
#[derive(Debug, Default)]
pub struct SamplingIndex {
    bitmaps: Vec<Option<Bitmap>>,
    cached: usize,
}

impl SamplingIndex {
    /// Samples the in-edges of the vertices [`select_vertices`] picks for
    /// `ratio`, spreading the work over `threads` workers that claim
    /// `partition_size` vertices at a time.
    pub fn build(
        graph: &Graph,
        ratio: f32,
        threads: usize,
        partition_size: usize,
        seed: u64,
        num_samples: usize,
    ) -> Self {
        let selected = select_vertices(graph, ratio);
        let cursor = PartitionCursor::new(&selected);
        let parts: Vec<Vec<(usize, Bitmap)>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..threads.max(1))
                .map(|_| {
                    scope.spawn(|| {
                        let mut local = Vec::new();
                        loop {
                            let batch = cursor.next_batch(partition_size.max(1));
                            if batch.is_empty() {
                                break local;
                            }
                            for dest in batch {
                                let list = graph.in_edges(dest);
                                for (i, edge) in list.iter().enumerate() {
                                    let mut bitmap = Bitmap::new(num_samples);
                                    sample_edge(
                                        &mut bitmap,
                                        edge.neighbor,
                                        dest,
                                        edge.probability,
                                        seed,
                                    );
                                    local.push((list.global_index(i), bitmap));
                                }
                            }
                        }
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        });

        let mut bitmaps = vec![None; graph.num_stored_edges()];
        let mut cached = 0;
        for (index, bitmap) in parts.into_iter().flatten() {
            bitmaps[index] = Some(bitmap);
            cached += 1;
        }
        info!(
            vertices = selected.count(),
            edges = cached,
            ratio,
            "sampling.index.build"
        );
        Self { bitmaps, cached }
    }

    /// Cached bitmap of the edge at `global_index`.
    pub fn get(&self, global_index: usize) -> Option<&Bitmap> {
        self.bitmaps.get(global_index).and_then(Option::as_ref)
    }

    /// Number of cached edges.
    pub fn len(&self) -> usize {
        self.cached
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.cached == 0
    }
}

/// Source of per-edge world bitmaps for the gather phase.
#[derive(Debug)]
pub enum EdgeSampler {
    /// Every edge exists in every world.
    Certain(Bitmap),
    /// Look up the index first, sample on a miss.
    Indexed {
        /// Precomputed bitmaps.
        index: SamplingIndex,
        /// Global seed.
        seed: u64,
        /// World count.
        num_samples: usize,
    },
    /// Sample every edge as it is traversed.
    OnTheFly {
        /// Global seed.
        seed: u64,
        /// World count.
        num_samples: usize,
    },
}

impl EdgeSampler {
    /// Bitmap of the worlds containing in-edge `edge` (`edge.neighbor -> dest`)
    /// stored at `global_index`.
    pub fn worlds(&self, dest: VertexId, edge: &Edge, global_index: usize) -> Cow<'_, Bitmap> {
        let (seed, num_samples) = match self {
            Self::Certain(all) => return Cow::Borrowed(all),
            Self::Indexed {
                index,
                seed,
                num_samples,
            } => {
                if let Some(bitmap) = index.get(global_index) {
                    return Cow::Borrowed(bitmap);
                }
                (*seed, *num_samples)
            }
            Self::OnTheFly { seed, num_samples } => (*seed, *num_samples),
        };
        let mut bitmap = Bitmap::new(num_samples);
        sample_edge(&mut bitmap, edge.neighbor, dest, edge.probability, seed);
        Cow::Owned(bitmap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeInput;

    #[test]
    fn extreme_probabilities_short_circuit() {
        let mut bm = Bitmap::new(100);
        sample_edge(&mut bm, 1, 2, 1.0, 0);
        assert!(bm.is_all_set());
        sample_edge(&mut bm, 1, 2, 0.0, 0);
        assert!(bm.is_all_clear());
    }

    #[test]
    fn sampling_is_deterministic_and_roughly_calibrated() {
        let mut a = Bitmap::new(4000);
        let mut b = Bitmap::new(4000);
        sample_edge(&mut a, 3, 9, 0.5, 42);
        sample_edge(&mut b, 3, 9, 0.5, 42);
        assert_eq!(a, b);
        let ones = a.count();
        assert!((1600..2400).contains(&ones), "{ones} of 4000");
        sample_edge(&mut b, 3, 9, 0.5, 43);
        assert_ne!(a, b);
    }

    #[test]
    fn selection_prefers_low_in_degree() {
        let edges: Vec<_> = [(0, 3), (1, 3), (2, 3), (0, 1)]
            .iter()
            .map(|&(s, d)| EdgeInput::certain(s, d))
            .collect();
        let g = Graph::from_edges(0, &edges, true);
        let picked = select_vertices(&g, 0.25);
        assert!(picked.get(0) && picked.get(2) && picked.get(1));
        assert!(!picked.get(3));
        assert!(select_vertices(&g, 1.0).is_all_set());
        assert!(select_vertices(&g, 0.0).is_all_clear());
    }

    #[test]
    fn index_matches_on_the_fly_sampling() {
        let edges: Vec<_> = (0..20u32)
            .map(|i| EdgeInput {
                src: i,
                dest: (i * 7 + 1) % 20,
                probability: 0.3,
                attr: 0.0,
            })
            .collect();
        let g = Graph::from_edges(0, &edges, true);
        let index = SamplingIndex::build(&g, 1.0, 3, 2, 7, 256);
        assert_eq!(index.len(), 20);
        let sampler = EdgeSampler::Indexed {
            index,
            seed: 7,
            num_samples: 256,
        };
        let fresh = EdgeSampler::OnTheFly {
            seed: 7,
            num_samples: 256,
        };
        for dest in 0..20 {
            let list = g.in_edges(dest);
            for (i, edge) in list.iter().enumerate() {
                let cached = sampler.worlds(dest, edge, list.global_index(i));
                assert!(matches!(cached, Cow::Borrowed(_)));
                assert_eq!(*cached, *fresh.worlds(dest, edge, list.global_index(i)));
            }
        }
    }
}
