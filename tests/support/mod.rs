#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::sync::Once;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use sage::graph::{sample_edge, EdgeInput};
use sage::primitives::bitmap::Bitmap;
use sage::VertexId;
use tracing_subscriber::EnvFilter;

pub const SEED: u64 = 0x5a6e_5eed;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sage=warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

/// Directed graph without self loops or parallel edges. Probabilities are
/// drawn from a few exactly representable values.
pub fn random_edges(rng: &mut ChaCha8Rng, num_vertices: u32, num_edges: usize) -> Vec<EdgeInput> {
    const PROBABILITIES: [f32; 4] = [0.25, 0.5, 0.75, 1.0];
    let mut pairs = BTreeSet::new();
    let max_pairs = (num_vertices as usize) * (num_vertices as usize - 1);
    while pairs.len() < num_edges.min(max_pairs) {
        let src = rng.gen_range(0..num_vertices);
        let dest = rng.gen_range(0..num_vertices);
        if src != dest {
            pairs.insert((src, dest));
        }
    }
    pairs
        .into_iter()
        .map(|(src, dest)| EdgeInput {
            src,
            dest,
            probability: PROBABILITIES[rng.gen_range(0..PROBABILITIES.len())],
            attr: 0.0,
        })
        .collect()
}

/// Hop distance from `source` in every world, indexed `[world][vertex]`.
/// Unreached vertices hold `u32::MAX`.
pub fn reference_hops(
    num_vertices: usize,
    edges: &[EdgeInput],
    source: VertexId,
    num_samples: usize,
    seed: u64,
    certain: bool,
) -> Vec<Vec<u32>> {
    let presence: Vec<Bitmap> = edges
        .iter()
        .map(|e| {
            let mut worlds = Bitmap::new(num_samples);
            if certain {
                worlds.set_all();
            } else {
                sample_edge(&mut worlds, e.src, e.dest, e.probability, seed);
            }
            worlds
        })
        .collect();
    (0..num_samples)
        .map(|world| {
            let mut adjacency = vec![Vec::new(); num_vertices];
            for (edge, worlds) in edges.iter().zip(&presence) {
                if worlds.get(world) {
                    adjacency[edge.src as usize].push(edge.dest);
                }
            }
            let mut dist = vec![u32::MAX; num_vertices];
            dist[source as usize] = 0;
            let mut queue = VecDeque::from([source]);
            while let Some(v) = queue.pop_front() {
                for &next in &adjacency[v as usize] {
                    if dist[next as usize] == u32::MAX {
                        dist[next as usize] = dist[v as usize] + 1;
                        queue.push_back(next);
                    }
                }
            }
            dist
        })
        .collect()
}
