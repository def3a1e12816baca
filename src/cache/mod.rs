//! Disk-backed vertex-state cache.
//!
//! Resident record buffers live in a [`VertexCache`] bounded by a byte
//! budget. Victims are chosen by the [`SectionedLru`] policy and written back
//! to a scratch file at offsets handed out by the [`OffsetAllocator`]. Each
//! worker talks to the cache through its own [`CacheFront`], which overlaps
//! misses with asynchronous disk reads.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

mod allocator;
mod front;
mod policy;
mod store;

pub use allocator::OffsetAllocator;
pub use front::{CacheFront, Completed};
pub use policy::{Section, SectionHint, SectionedLru};
pub use store::{CacheConfig, Lookup, ReadRequest, VertexCache, VertexRef};

/// Counters shared by the cache and the engine. Updated with relaxed
/// ordering; read them through [`CacheStats::snapshot`].
#[derive(Default, Debug)]
pub struct CacheStats {
    /// Lookups served from memory, including the initial-value template.
    pub hits: AtomicU64,
    /// Lookups that required a disk read.
    pub misses: AtomicU64,
    /// Bytes read back from the scratch file.
    pub read_bytes: AtomicU64,
    /// Bytes written to the scratch file.
    pub write_bytes: AtomicU64,
    /// Resident buffers reclaimed under memory pressure.
    pub evictions: AtomicU64,
    /// Evictions that had to write the buffer back first.
    pub dirty_writebacks: AtomicU64,
    /// Sparse records that grew by one allocation unit.
    pub expansions: AtomicU64,
    /// Sparse records converted to the dense encoding.
    pub transforms: AtomicU64,
}

impl CacheStats {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    /// Copies the current counter values.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            write_bytes: self.write_bytes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            dirty_writebacks: self.dirty_writebacks.load(Ordering::Relaxed),
            expansions: self.expansions.load(Ordering::Relaxed),
            transforms: self.transforms.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    /// Lookups served from memory.
    pub hits: u64,
    /// Lookups that required a disk read.
    pub misses: u64,
    /// Bytes read from the scratch file.
    pub read_bytes: u64,
    /// Bytes written to the scratch file.
    pub write_bytes: u64,
    /// Buffers reclaimed under memory pressure.
    pub evictions: u64,
    /// Evictions that wrote the buffer back first.
    pub dirty_writebacks: u64,
    /// Sparse record expansions.
    pub expansions: u64,
    /// Sparse-to-dense conversions.
    pub transforms: u64,
}

impl CacheStatsSnapshot {
    /// Fraction of lookups served from memory, or 1.0 with no lookups.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            1.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} hit_ratio={:.3} read_mb={:.1} write_mb={:.1} evictions={} dirty_writebacks={} expansions={} transforms={}",
            self.hits,
            self.misses,
            self.hit_ratio(),
            self.read_bytes as f64 / (1024.0 * 1024.0),
            self.write_bytes as f64 / (1024.0 * 1024.0),
            self.evictions,
            self.dirty_writebacks,
            self.expansions,
            self.transforms
        )
    }
}
