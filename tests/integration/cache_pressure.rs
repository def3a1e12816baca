#![allow(missing_docs)]

#[path = "../support/mod.rs"]
mod support;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sage::engine::{CacheBudget, EncodingMode, Engine, EngineOptions, SectionCount};
use sage::graph::Graph;
use sage::programs::{Bfs, Reachability};
use sage::record::RecordLayout;
use sage::types::Result;
use sage::WorldId;
use tempfile::tempdir;

use support::{init_tracing, random_edges, reference_hops, SEED};

const VERTICES: u32 = 200;
const EDGES: usize = 700;
const SAMPLES: usize = 64;

fn run_under_budget(
    encoding: EncodingMode,
    budget_records: usize,
    sections: SectionCount,
) -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(SEED ^ 0xcafe);
    let edges = random_edges(&mut rng, VERTICES, EDGES);
    let expected = reference_hops(VERTICES as usize, &edges, 0, SAMPLES, SEED, false);
    let dense = RecordLayout::for_value::<u32>(SAMPLES, 512, 2).dense_size();

    let dir = tempdir()?;
    let options = EngineOptions::default()
        .with_num_samples(SAMPLES)
        .with_threads(4)
        .with_partition_size(4)
        .with_io_depth(8)
        .with_seed(SEED)
        .with_encoding(encoding)
        .with_cache_budget(CacheBudget::Bytes(budget_records * dense))
        .with_gather_sections(sections)
        .with_scratch_path(dir.path().join("pressure.tmp"));
    let graph = Graph::from_edges(VERTICES - 1, &edges, true);
    let mut engine = Engine::for_program(graph, options, &Bfs)?;
    engine.set_start_vertex(0)?;
    engine.run(&Bfs)?;

    for (world, dist) in expected.iter().enumerate() {
        for (vertex, &hops) in dist.iter().enumerate() {
            assert_eq!(
                engine.value(vertex as u32, WorldId(world as u32))?,
                hops,
                "vertex {vertex} world {world}"
            );
        }
    }
    let reach = engine.query(&Reachability::new(Bfs::UNREACHED))?;
    let reached = expected.iter().flatten().filter(|&&d| d != u32::MAX).count();
    assert_eq!(reach.reached(), reached as u64);

    let cache = engine.cache_stats();
    assert!(cache.evictions > 0, "expected evictions, got {cache:?}");
    assert!(cache.misses > 0, "expected disk reads, got {cache:?}");
    assert!(cache.write_bytes > 0);
    Ok(())
}

#[test]
fn dense_records_survive_eviction() -> Result<()> {
    init_tracing();
    run_under_budget(EncodingMode::Dense, 8, SectionCount::Fixed(16))
}

#[test]
fn sparse_records_survive_eviction_and_growth() -> Result<()> {
    init_tracing();
    run_under_budget(EncodingMode::Sparse, 8, SectionCount::PerVertices(10))
}

#[test]
fn adaptive_records_survive_eviction_without_sections() -> Result<()> {
    init_tracing();
    run_under_budget(EncodingMode::Adaptive, 12, SectionCount::Fixed(0))
}
