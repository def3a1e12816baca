#![allow(missing_docs)]

#[path = "../support/mod.rs"]
mod support;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sage::engine::{EncodingMode, Engine, EngineOptions, SectionCount};
use sage::graph::{EdgeInput, Graph};
use sage::programs::{Bfs, DistanceSum, Reachability, ShortestPath};
use sage::types::Result;
use sage::WorldId;
use tempfile::tempdir;

use support::{init_tracing, random_edges, reference_hops, SEED};

const VERTICES: u32 = 60;
const EDGES: usize = 180;
const SAMPLES: usize = 32;

fn options(scratch: &std::path::Path) -> EngineOptions {
    EngineOptions::default()
        .with_num_samples(SAMPLES)
        .with_threads(4)
        .with_seed(SEED)
        .with_scratch_path(scratch)
}

fn assert_matches_reference(engine: &Engine<u32>, expected: &[Vec<u32>]) -> Result<()> {
    for (world, dist) in expected.iter().enumerate() {
        for (vertex, &hops) in dist.iter().enumerate() {
            let got = engine.value(vertex as u32, WorldId(world as u32))?;
            assert_eq!(got, hops, "vertex {vertex} world {world}");
        }
    }
    Ok(())
}

#[test]
fn directed_cycle_settles_every_world() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let edges: Vec<_> = (0..4).map(|v| EdgeInput::certain(v, (v + 1) % 4)).collect();
    let graph = Graph::from_edges(0, &edges, true);
    let opts = options(&dir.path().join("cycle.tmp")).with_certain_graph(true);
    let mut engine = Engine::for_program(graph, opts, &Bfs)?;
    engine.set_start_vertex(0)?;
    let steps = engine.run(&Bfs)?;
    assert_eq!(steps, 4);
    for world in [0, 7, 31] {
        for v in 0..4 {
            assert_eq!(engine.value(v, WorldId(world))?, v);
        }
    }
    Ok(())
}

#[test]
fn probabilistic_bfs_matches_per_world_search_in_every_encoding() -> Result<()> {
    init_tracing();
    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let edges = random_edges(&mut rng, VERTICES, EDGES);
    let expected = reference_hops(VERTICES as usize, &edges, 0, SAMPLES, SEED, false);

    let variants = [
        (EncodingMode::Dense, 0.0, false),
        (EncodingMode::Sparse, 0.0, false),
        (EncodingMode::Adaptive, 0.0, false),
        (EncodingMode::Adaptive, 0.5, false),
        (EncodingMode::Sparse, 1.0, true),
    ];
    for (encoding, ratio, init_all) in variants {
        let dir = tempdir()?;
        let graph = Graph::from_edges(VERTICES - 1, &edges, true);
        let opts = options(&dir.path().join("bfs.tmp"))
            .with_encoding(encoding)
            .with_batch_sampling_ratio(ratio)
            .with_init_all_values(init_all)
            .with_gather_sections(SectionCount::Fixed(8));
        let mut engine = Engine::for_program(graph, opts, &Bfs)?;
        engine.set_start_vertex(0)?;
        engine.run(&Bfs)?;
        assert_matches_reference(&engine, &expected)?;
    }
    Ok(())
}

#[test]
fn queries_agree_with_reference_tallies() -> Result<()> {
    init_tracing();
    let mut rng = ChaCha8Rng::seed_from_u64(SEED ^ 1);
    let edges = random_edges(&mut rng, VERTICES, EDGES);
    let expected = reference_hops(VERTICES as usize, &edges, 3, SAMPLES, SEED, false);
    let reached: Vec<u32> = expected
        .iter()
        .flatten()
        .copied()
        .filter(|&d| d != u32::MAX)
        .collect();
    let reached_vertices = (0..VERTICES as usize)
        .filter(|&v| expected.iter().any(|dist| dist[v] != u32::MAX))
        .count();

    let dir = tempdir()?;
    let graph = Graph::from_edges(VERTICES - 1, &edges, true);
    let mut engine = Engine::for_program(graph, options(&dir.path().join("q.tmp")), &Bfs)?;
    engine.set_start_vertex(3)?;
    engine.run(&Bfs)?;

    let reach = engine.query(&Reachability::new(Bfs::UNREACHED))?;
    assert_eq!(reach.reached(), reached.len() as u64);
    assert_eq!(reach.reached_vertices(), reached_vertices as u64);
    let sum = engine.query(&DistanceSum::new(Bfs::UNREACHED))?;
    let total: f64 = reached.iter().map(|&d| f64::from(d)).sum();
    assert_eq!(sum.sum(), total);
    assert_eq!(sum.count(), reached.len() as u64);

    let stats = engine.stats();
    assert_eq!(stats.dense_vertices + stats.sparse_vertices, u64::from(VERTICES));
    Ok(())
}

#[test]
fn query_census_reflects_encoding() -> Result<()> {
    init_tracing();
    let mut rng = ChaCha8Rng::seed_from_u64(SEED ^ 2);
    let edges = random_edges(&mut rng, 24, 60);
    for (encoding, dense) in [(EncodingMode::Dense, 24), (EncodingMode::Sparse, 0)] {
        let dir = tempdir()?;
        let graph = Graph::from_edges(23, &edges, true);
        let opts = options(&dir.path().join("census.tmp")).with_encoding(encoding);
        let mut engine = Engine::for_program(graph, opts, &Bfs)?;
        engine.set_start_vertex(0)?;
        engine.run(&Bfs)?;
        engine.query(&Reachability::new(Bfs::UNREACHED))?;
        assert_eq!(engine.stats().dense_vertices, dense);
        assert_eq!(engine.stats().sparse_vertices, 24 - dense);
    }
    Ok(())
}

#[test]
fn activate_all_starts_every_vertex() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    // Vertex 5 has no edges at all.
    let edges = [EdgeInput::certain(0, 1), EdgeInput::certain(1, 2), EdgeInput::certain(3, 4)];
    let graph = Graph::from_edges(5, &edges, true);
    let mut engine = Engine::for_program(graph, options(&dir.path().join("all.tmp")), &Bfs)?;
    engine.activate_all();
    let steps = engine.run(&Bfs)?;
    assert_eq!(steps, 1);
    for v in 0..6 {
        for world in [0, 16] {
            assert_eq!(engine.value(v, WorldId(world))?, 0);
        }
    }
    Ok(())
}

#[test]
fn run_without_start_keeps_existing_values() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let edges: Vec<_> = (0..3).map(|v| EdgeInput::certain(v, v + 1)).collect();
    let graph = Graph::from_edges(0, &edges, true);
    let opts = options(&dir.path().join("nostart.tmp")).with_certain_graph(true);
    let mut engine = Engine::new(graph, opts, 2u32)?;

    engine.set_start_vertex(0)?;
    assert_eq!(engine.run_with(&Bfs, false)?, 1);
    for v in 0..4 {
        assert_eq!(engine.value(v, WorldId(0))?, 2);
    }

    engine.set_start_vertex(0)?;
    engine.run(&Bfs)?;
    let values: Vec<u32> = (0..4)
        .map(|v| engine.value(v, WorldId(9)))
        .collect::<Result<_>>()?;
    assert_eq!(values, vec![0, 1, 2, 2]);
    Ok(())
}

#[test]
fn reset_allows_a_fresh_run_from_another_source() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let edges: Vec<_> = (0..5).map(|v| EdgeInput::certain(v, v + 1)).collect();
    let graph = Graph::from_edges(0, &edges, true);
    let opts = options(&dir.path().join("reset.tmp")).with_certain_graph(true);
    let mut engine = Engine::for_program(graph, opts, &Bfs)?;
    engine.set_start_vertex(0)?;
    engine.run(&Bfs)?;
    assert_eq!(engine.value(5, WorldId(0))?, 5);

    engine.reset()?;
    engine.set_start_vertex(3)?;
    engine.run(&Bfs)?;
    assert_eq!(engine.value(0, WorldId(0))?, Bfs::UNREACHED);
    assert_eq!(engine.value(5, WorldId(0))?, 2);
    assert_eq!(engine.stats().runs, 2);
    Ok(())
}

#[test]
fn weighted_shortest_path_prefers_cheaper_detour() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let edge = |src, dest, attr| EdgeInput {
        src,
        dest,
        probability: 1.0,
        attr,
    };
    let edges = [edge(0, 1, 1.0), edge(0, 2, 4.0), edge(1, 2, 1.0), edge(2, 3, 2.0)];
    let graph = Graph::from_edges(0, &edges, true);
    let program = ShortestPath::for_graph(&graph);
    let opts = options(&dir.path().join("sssp.tmp")).with_certain_graph(true);
    let mut engine = Engine::for_program(graph, opts, &program)?;
    engine.set_start_vertex(0)?;
    engine.run(&program)?;
    let distances: Vec<f32> = (0..4)
        .map(|v| engine.value(v, WorldId(5)))
        .collect::<Result<_>>()?;
    assert_eq!(distances, vec![0.0, 1.0, 2.0, 4.0]);
    Ok(())
}
