//! End-to-end Monte-Carlo BFS over a synthetic graph, in memory and under a
//! cache budget that forces eviction.
#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::collections::BTreeSet;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sage::engine::{CacheBudget, EncodingMode, Engine, EngineOptions, SectionCount};
use sage::graph::{EdgeInput, Graph};
use sage::programs::{Bfs, Reachability};
use tempfile::TempDir;

const VERTICES: u32 = 4_096;
const EDGES: usize = 16_384;
const SAMPLES: usize = 64;

fn synthetic_graph() -> Graph {
    let mut rng = ChaCha8Rng::seed_from_u64(0xb0f5);
    let mut pairs = BTreeSet::new();
    while pairs.len() < EDGES {
        let src = rng.gen_range(0..VERTICES);
        let dest = rng.gen_range(0..VERTICES);
        if src != dest {
            pairs.insert((src, dest));
        }
    }
    let edges: Vec<EdgeInput> = pairs
        .into_iter()
        .map(|(src, dest)| EdgeInput {
            src,
            dest,
            probability: rng.gen_range(0.1..0.9),
            attr: 0.0,
        })
        .collect();
    Graph::from_edges(VERTICES - 1, &edges, true)
}

fn macro_bfs(c: &mut Criterion) {
    let mut group = c.benchmark_group("macro/bfs");
    group.sample_size(10);
    group.throughput(Throughput::Elements(u64::from(VERTICES)));

    let graph = synthetic_graph();
    let cases = [
        ("dense_in_memory", EncodingMode::Dense, CacheBudget::DenseMultiple(2.0)),
        ("adaptive_in_memory", EncodingMode::Adaptive, CacheBudget::DenseMultiple(2.0)),
        ("adaptive_quarter_budget", EncodingMode::Adaptive, CacheBudget::DenseMultiple(0.25)),
    ];
    for (name, encoding, budget) in cases {
        group.bench_with_input(
            BenchmarkId::new("run", name),
            &(encoding, budget),
            |b, &(encoding, budget)| {
                b.iter(|| {
                    let tmpdir = TempDir::new().expect("tmpdir");
                    let options = EngineOptions::default()
                        .with_num_samples(SAMPLES)
                        .with_threads(4)
                        .with_partition_size(16)
                        .with_encoding(encoding)
                        .with_cache_budget(budget)
                        .with_gather_sections(SectionCount::Fixed(64))
                        .with_scratch_path(tmpdir.path().join("bench.tmp"));
                    let mut engine =
                        Engine::for_program(graph.clone(), options, &Bfs).expect("engine");
                    engine.set_start_vertex(0).expect("start");
                    engine.run(&Bfs).expect("run");
                    let reach = engine
                        .query(&Reachability::new(Bfs::UNREACHED))
                        .expect("query");
                    black_box(reach.reached())
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, macro_bfs);
criterion_main!(benches);
