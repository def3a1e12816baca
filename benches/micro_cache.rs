#![forbid(unsafe_code)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sage::cache::{CacheConfig, CacheStats, Lookup, SectionHint, VertexCache};
use sage::primitives::io::{FileIo, StdFileIo};
use sage::VertexId;
use tempfile::TempDir;

const VERTICES: usize = 16_384;
const RECORD: usize = 512;

fn micro_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/cache");
    group.sample_size(40);
    group.throughput(Throughput::Elements(1));

    for resident_share in [1usize, 4, 16] {
        let mut harness = CacheHarness::new(VERTICES / resident_share, 16);
        group.bench_with_input(
            BenchmarkId::new("get_put_random", format!("1/{resident_share}")),
            &resident_share,
            |b, _| b.iter(|| black_box(harness.touch_random())),
        );
        let mut harness = CacheHarness::new(VERTICES / resident_share, 16);
        group.bench_with_input(
            BenchmarkId::new("get_put_sectioned_scan", format!("1/{resident_share}")),
            &resident_share,
            |b, _| b.iter(|| black_box(harness.touch_scan())),
        );
    }
    group.finish();
}

struct CacheHarness {
    _tmpdir: TempDir,
    io: Arc<dyn FileIo>,
    cache: VertexCache,
    rng: ChaCha8Rng,
    sections: u32,
    cursor: usize,
}

impl CacheHarness {
    fn new(budget_records: usize, sections: u32) -> Self {
        let tmpdir = tempfile::tempdir().expect("tmpdir");
        let io: Arc<dyn FileIo> =
            Arc::new(StdFileIo::open_scratch(tmpdir.path().join("bench.tmp")).expect("scratch"));
        let cache = VertexCache::new(
            Arc::clone(&io),
            CacheConfig {
                budget_bytes: budget_records * RECORD,
                num_vertices: VERTICES,
                num_sections: sections as usize + 2,
            },
            vec![0; RECORD],
            Arc::new(CacheStats::default()),
        );
        Self {
            _tmpdir: tmpdir,
            io,
            cache,
            rng: ChaCha8Rng::seed_from_u64(0xbe7c),
            sections,
            cursor: 0,
        }
    }

    fn touch(&self, vertex: VertexId, hint: SectionHint) -> u8 {
        let first = match self.cache.get(vertex) {
            Lookup::Hit(record) => {
                let first = record.bytes()[0];
                record.release(SectionHint::KEEP);
                first
            }
            Lookup::Miss(request) => {
                let mut buf = vec![0u8; request.len];
                self.io.read_at(request.offset, &mut buf).expect("read");
                let record = self.cache.fill(vertex, buf).expect("fill");
                let first = record.bytes()[0];
                record.release(SectionHint::KEEP);
                first
            }
        };
        self.cache
            .put(vertex, vec![first.wrapping_add(1); RECORD], hint)
            .expect("put");
        first
    }

    fn touch_random(&mut self) -> u8 {
        let vertex = self.rng.gen_range(0..VERTICES) as VertexId;
        self.touch(vertex, SectionHint::FREE)
    }

    fn touch_scan(&mut self) -> u8 {
        let vertex = self.cursor as VertexId;
        self.cursor = (self.cursor + 1) % VERTICES;
        let band = |v: usize| 2 + (v * self.sections as usize / VERTICES) as u32;
        if self.cursor == 0 {
            self.cache.set_current_section(2).expect("rewind");
        } else {
            self.cache
                .set_current_section(band(vertex as usize))
                .expect("advance");
        }
        // Next needed one sweep later, in its own band.
        self.touch(vertex, SectionHint::at(band(vertex as usize), vertex as f64))
    }
}

criterion_group!(benches, micro_cache);
criterion_main!(benches);
