use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use tracing::{debug, trace, warn};

use crate::primitives::io::FileIo;
use crate::types::{Result, VertexId};

use super::{CacheStats, OffsetAllocator, Section, SectionHint, SectionedLru};

const PIN_WAIT: Duration = Duration::from_millis(2);
const MAX_PIN_WAITS: usize = 50;

/// Sizing of a [`VertexCache`].
#[derive(Clone, Copy, Debug)]
pub struct CacheConfig {
    /// Upper bound on resident record bytes.
    pub budget_bytes: usize,
    /// Vertex ids are `0..num_vertices`.
    pub num_vertices: usize,
    /// Eviction bands, at least two.
    pub num_sections: usize,
}

/// Disk read the caller must perform to resolve a miss.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadRequest {
    /// Vertex being read.
    pub vertex: VertexId,
    /// Byte offset of its record in the scratch file.
    pub offset: u64,
    /// Record length.
    pub len: usize,
}

/// Outcome of [`VertexCache::get`].
pub enum Lookup<'c> {
    /// Buffer available now: resident, or the shared template for a vertex
    /// that was never written.
    Hit(VertexRef<'c>),
    /// The vertex is pinned but its record is on disk. Read it and hand the
    /// bytes to [`VertexCache::fill`].
    Miss(ReadRequest),
}

#[derive(Default)]
struct Entry {
    buf: Option<Arc<[u8]>>,
    pending: Option<Arc<[u8]>>,
    offset: Option<u64>,
    size: usize,
    use_count: u32,
    dirty: bool,
}

impl Entry {
    /// Bytes this entry counts against the budget: the buffer that will be
    /// resident once every reader is gone.
    fn charged(&self) -> usize {
        match (&self.pending, &self.buf) {
            (Some(pending), _) => pending.len(),
            (None, Some(buf)) => buf.len(),
            (None, None) => 0,
        }
    }
}

struct Residency {
    policy: SectionedLru,
    resident_bytes: usize,
    current_section: u32,
}

enum Evict {
    Done,
    Pinned,
}

/// Write-back cache of encoded vertex records.
///
/// Locking: `residency` guards the eviction policy and the byte total, and
/// each entry has its own lock. When both are needed `residency` is taken
/// first. Neither lock is held across a disk write; write-back drops the
/// residency lock for the duration of the I/O and re-validates afterwards.
pub struct VertexCache {
    io: Arc<dyn FileIo>,
    offsets: OffsetAllocator,
    template: RwLock<Arc<[u8]>>,
    entries: Box<[Mutex<Entry>]>,
    residency: Mutex<Residency>,
    unpinned: Condvar,
    budget: usize,
    stats: Arc<CacheStats>,
}

impl VertexCache {
    /// Creates an empty cache writing back to `io`. `template` is returned
    /// for every vertex that was never written.
    pub fn new(
        io: Arc<dyn FileIo>,
        config: CacheConfig,
        template: Vec<u8>,
        stats: Arc<CacheStats>,
    ) -> Self {
        let entries = (0..config.num_vertices)
            .map(|_| Mutex::new(Entry::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        debug!(
            budget_bytes = config.budget_bytes,
            vertices = config.num_vertices,
            sections = config.num_sections,
            "cache.open"
        );
        Self {
            io,
            offsets: OffsetAllocator::new(),
            template: RwLock::new(Arc::from(template)),
            entries,
            residency: Mutex::new(Residency {
                policy: SectionedLru::new(config.num_vertices, config.num_sections),
                resident_bytes: 0,
                current_section: Section::FIRST_LOCAL,
            }),
            unpinned: Condvar::new(),
            budget: config.budget_bytes,
            stats,
        }
    }

    /// Configured byte budget.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Bytes currently charged against the budget.
    pub fn resident_bytes(&self) -> usize {
        self.residency.lock().resident_bytes
    }

    /// Shared statistics handle.
    pub fn stats(&self) -> &Arc<CacheStats> {
        &self.stats
    }

    /// Number of vertex slots.
    pub fn num_vertices(&self) -> usize {
        self.entries.len()
    }

    /// Current initial-value template.
    pub fn template(&self) -> Arc<[u8]> {
        Arc::clone(&self.template.read())
    }

    /// Replaces the initial-value template.
    pub fn set_template(&self, template: Vec<u8>) {
        *self.template.write() = Arc::from(template);
    }

    /// Current use count of `vertex`.
    pub fn use_count(&self, vertex: VertexId) -> u32 {
        self.entry(vertex).lock().use_count
    }

    /// True when `vertex` has a resident buffer.
    pub fn is_resident(&self, vertex: VertexId) -> bool {
        self.entry(vertex).lock().buf.is_some()
    }

    fn entry(&self, vertex: VertexId) -> &Mutex<Entry> {
        &self.entries[vertex as usize]
    }

    /// Looks `vertex` up. A resident hit or a miss pins the vertex until the
    /// returned [`VertexRef`] is released; the template hit pins nothing.
    pub fn get(&self, vertex: VertexId) -> Lookup<'_> {
        let mut entry = self.entry(vertex).lock();
        if let Some(buf) = &entry.buf {
            let buf = Arc::clone(buf);
            entry.use_count += 1;
            drop(entry);
            CacheStats::bump(&self.stats.hits, 1);
            self.residency
                .lock()
                .policy
                .access(vertex, Section::Keep, 0.0);
            return Lookup::Hit(VertexRef::pinned(self, vertex, buf));
        }
        match entry.offset {
            None => {
                drop(entry);
                CacheStats::bump(&self.stats.hits, 1);
                Lookup::Hit(VertexRef::unpinned(self, vertex, self.template()))
            }
            Some(offset) => {
                entry.use_count += 1;
                let len = entry.size;
                drop(entry);
                CacheStats::bump(&self.stats.misses, 1);
                Lookup::Miss(ReadRequest {
                    vertex,
                    offset,
                    len,
                })
            }
        }
    }

    /// Installs the bytes read for a miss and returns the pinned reference.
    ///
    /// If another reader filled the vertex first, or a writer installed a
    /// newer buffer meanwhile, `bytes` are dropped and the resident buffer is
    /// returned instead.
    ///
    /// Unlike a plain read cache, installing a filled buffer evicts unpinned
    /// vertices to stay within the budget, so reads count against it as much
    /// as writes do. Eviction here never waits on pinned vertices; if nothing
    /// can be evicted the budget is exceeded until the next release.
    pub fn fill(&self, vertex: VertexId, bytes: Vec<u8>) -> Result<VertexRef<'_>> {
        let len = bytes.len();
        let mut residency = self.residency.lock();
        if let Some(buf) = self.resident_buffer(vertex) {
            residency.policy.access(vertex, Section::IN_USE, 0.0);
            return Ok(VertexRef::adopt(self, vertex, buf));
        }
        self.make_room(&mut residency, vertex, len, false)?;
        let mut entry = self.entry(vertex).lock();
        if let Some(buf) = &entry.buf {
            let buf = Arc::clone(buf);
            drop(entry);
            residency.policy.access(vertex, Section::IN_USE, 0.0);
            return Ok(VertexRef::adopt(self, vertex, buf));
        }
        debug_assert!(entry.use_count > 0, "fill of unpinned vertex {vertex}");
        let buf: Arc<[u8]> = Arc::from(bytes);
        entry.buf = Some(Arc::clone(&buf));
        entry.size = len;
        entry.dirty = false;
        drop(entry);
        residency.resident_bytes += len;
        residency.policy.access(vertex, Section::IN_USE, 0.0);
        CacheStats::bump(&self.stats.read_bytes, len as u64);
        Ok(VertexRef::adopt(self, vertex, buf))
    }

    fn resident_buffer(&self, vertex: VertexId) -> Option<Arc<[u8]>> {
        self.entry(vertex).lock().buf.clone()
    }

    /// Installs a modified record for `vertex`.
    ///
    /// With no readers the buffer replaces the resident one immediately and
    /// the vertex moves to `hint`. With readers still holding the old buffer
    /// the new one is staged and swapped in by the last release. Evicting to
    /// make room may wait for pinned victims to be released.
    pub fn put(&self, vertex: VertexId, bytes: Vec<u8>, hint: SectionHint) -> Result<()> {
        let len = bytes.len();
        let buf: Arc<[u8]> = Arc::from(bytes);
        let mut residency = self.residency.lock();
        let grow = len.saturating_sub(self.entry(vertex).lock().charged());
        if grow > 0 {
            self.make_room(&mut residency, vertex, grow, true)?;
        }
        let mut entry = self.entry(vertex).lock();
        let before = entry.charged();
        let section = if entry.use_count == 0 {
            if entry.size != len {
                entry.offset = None;
            }
            entry.buf = Some(buf);
            entry.pending = None;
            entry.size = len;
            entry.dirty = true;
            hint.section
        } else if entry.buf.is_none() {
            // A read is in flight; the newer bytes win over the disk image.
            entry.offset = None;
            entry.buf = Some(buf);
            entry.size = len;
            entry.dirty = true;
            Section::IN_USE
        } else {
            entry.pending = Some(buf);
            Section::Keep
        };
        let after = entry.charged();
        drop(entry);
        residency.resident_bytes = residency.resident_bytes + after - before;
        residency.policy.access(vertex, section, hint.priority);
        trace!(vertex, len, resident = residency.resident_bytes, "cache.put");
        Ok(())
    }

    /// Releases one pin on `vertex`. The last release installs a staged
    /// replacement and moves the vertex to `hint`; earlier releases park it in
    /// the in-use band.
    pub fn end_read(&self, vertex: VertexId, hint: SectionHint) {
        let mut residency = self.residency.lock();
        let mut entry = self.entry(vertex).lock();
        assert!(entry.use_count > 0, "release of unpinned vertex {vertex}");
        entry.use_count -= 1;
        let resident = entry.buf.is_some() || entry.pending.is_some();
        if entry.use_count == 0 {
            if let Some(pending) = entry.pending.take() {
                if pending.len() != entry.size {
                    entry.offset = None;
                }
                entry.size = pending.len();
                entry.buf = Some(pending);
                entry.dirty = true;
            }
            drop(entry);
            if resident {
                residency
                    .policy
                    .access(vertex, hint.section, hint.priority);
            }
            self.unpinned.notify_all();
        } else {
            drop(entry);
            if resident {
                residency
                    .policy
                    .access(vertex, Section::IN_USE, hint.priority);
            }
        }
    }

    /// Writes the resident buffer of `vertex` to disk if it is dirty. The
    /// first flush after a size change allocates a fresh disk range.
    pub fn flush(&self, vertex: VertexId) -> Result<()> {
        let Some((buf, offset)) = self.prepare_flush(vertex) else {
            return Ok(());
        };
        self.write_back(vertex, &buf, offset)?;
        let mut entry = self.entry(vertex).lock();
        if entry.buf.as_ref().is_some_and(|cur| Arc::ptr_eq(cur, &buf)) {
            entry.dirty = false;
        }
        Ok(())
    }

    fn prepare_flush(&self, vertex: VertexId) -> Option<(Arc<[u8]>, u64)> {
        let mut entry = self.entry(vertex).lock();
        if !entry.dirty {
            return None;
        }
        let buf = entry.buf.clone()?;
        let offset = match entry.offset {
            Some(offset) => offset,
            None => {
                let offset = self.offsets.alloc(buf.len());
                entry.offset = Some(offset);
                offset
            }
        };
        Some((buf, offset))
    }

    fn write_back(&self, vertex: VertexId, buf: &[u8], offset: u64) -> Result<()> {
        self.io.write_at(offset, buf)?;
        CacheStats::bump(&self.stats.write_bytes, buf.len() as u64);
        trace!(vertex, offset, len = buf.len(), "cache.flush");
        Ok(())
    }

    /// Moves the scan position to `section`. Bands the scan left behind are
    /// drained and their unpinned members evicted.
    pub fn set_current_section(&self, section: u32) -> Result<()> {
        let mut residency = self.residency.lock();
        if section <= residency.current_section {
            residency.current_section = section;
            return Ok(());
        }
        let prev = residency.current_section;
        let demoted = residency.policy.cleaning(prev, section);
        residency.current_section = section;
        if !demoted.is_empty() {
            trace!(prev, section, demoted = demoted.len(), "cache.section.cleaning");
        }
        for vertex in demoted {
            residency.policy.remove(vertex);
            if let Evict::Pinned = self.evict(&mut residency, vertex)? {
                residency.policy.access(vertex, Section::IN_USE, 0.0);
            }
        }
        Ok(())
    }

    /// Current scan section.
    pub fn current_section(&self) -> u32 {
        self.residency.lock().current_section
    }

    /// Evicts until `additional` bytes fit. When only pinned vertices remain,
    /// waits up to `MAX_PIN_WAITS` releases if `wait_for_pins`, then admits the
    /// bytes over budget.
    fn make_room(
        &self,
        residency: &mut MutexGuard<'_, Residency>,
        vertex: VertexId,
        additional: usize,
        wait_for_pins: bool,
    ) -> Result<()> {
        let mut waits = 0;
        loop {
            if residency.resident_bytes + additional <= self.budget {
                return Ok(());
            }
            let mut skipped = Vec::new();
            let mut progressed = false;
            let mut saw_pinned = false;
            while residency.resident_bytes + additional > self.budget {
                let Some(victim) = residency.policy.victim() else {
                    break;
                };
                if victim == vertex {
                    skipped.push(victim);
                    continue;
                }
                match self.evict(residency, victim)? {
                    Evict::Done => progressed = true,
                    Evict::Pinned => {
                        saw_pinned = true;
                        skipped.push(victim);
                    }
                }
            }
            for victim in skipped {
                if self.entry(victim).lock().buf.is_some() {
                    residency.policy.access(victim, Section::IN_USE, 0.0);
                }
            }
            if residency.resident_bytes + additional <= self.budget || progressed {
                continue;
            }
            if wait_for_pins && saw_pinned && waits < MAX_PIN_WAITS {
                waits += 1;
                self.unpinned.wait_for(residency, PIN_WAIT);
                continue;
            }
            if saw_pinned {
                warn!(
                    vertex,
                    additional,
                    resident = residency.resident_bytes,
                    budget = self.budget,
                    "cache.over_budget"
                );
            }
            return Ok(());
        }
    }

    /// Evicts `victim`, which the caller already removed from the policy.
    fn evict(
        &self,
        residency: &mut MutexGuard<'_, Residency>,
        victim: VertexId,
    ) -> Result<Evict> {
        {
            let entry = self.entry(victim).lock();
            if entry.use_count > 0 {
                return Ok(Evict::Pinned);
            }
            if entry.buf.is_none() {
                return Ok(Evict::Done);
            }
        }
        let mut flushed = None;
        if let Some((buf, offset)) = self.prepare_flush(victim) {
            MutexGuard::unlocked(residency, || self.write_back(victim, &buf, offset))?;
            CacheStats::bump(&self.stats.dirty_writebacks, 1);
            flushed = Some(buf);
        }
        let mut entry = self.entry(victim).lock();
        if let Some(written) = &flushed {
            let unchanged = entry
                .buf
                .as_ref()
                .is_some_and(|cur| Arc::ptr_eq(cur, written));
            if unchanged {
                entry.dirty = false;
            }
            if !unchanged || entry.use_count > 0 || entry.dirty {
                // Touched while the residency lock was released.
                let resident = entry.buf.is_some();
                let pinned = entry.use_count > 0;
                drop(entry);
                if resident {
                    let section = if pinned { Section::IN_USE } else { Section::FREE };
                    residency.policy.access(victim, section, 0.0);
                }
                return Ok(Evict::Pinned);
            }
        }
        if entry.use_count > 0 {
            return Ok(Evict::Pinned);
        }
        let freed = entry.charged();
        entry.buf = None;
        entry.pending = None;
        drop(entry);
        residency.policy.remove(victim);
        residency.resident_bytes -= freed;
        CacheStats::bump(&self.stats.evictions, 1);
        trace!(vertex = victim, freed, "cache.evict");
        Ok(Evict::Done)
    }

    /// Drops every resident buffer and disk range. The scratch file is
    /// truncated and reused from offset zero.
    pub fn reset(&self) -> Result<()> {
        let mut residency = self.residency.lock();
        for (vertex, slot) in self.entries.iter().enumerate() {
            let mut entry = slot.lock();
            debug_assert_eq!(entry.use_count, 0, "reset with pinned vertex {vertex}");
            *entry = Entry::default();
        }
        residency.policy.clear();
        residency.resident_bytes = 0;
        residency.current_section = Section::FIRST_LOCAL;
        self.offsets.reset();
        self.io.truncate(0)?;
        debug!("cache.reset");
        Ok(())
    }
}

/// Scope guard over a record buffer obtained from a [`VertexCache`].
///
/// Dropping the guard releases its pin with [`SectionHint::KEEP`];
/// [`release`](Self::release) lets the caller choose the band.
pub struct VertexRef<'c> {
    cache: &'c VertexCache,
    vertex: VertexId,
    buf: Arc<[u8]>,
    pinned: bool,
}

impl<'c> VertexRef<'c> {
    fn pinned(cache: &'c VertexCache, vertex: VertexId, buf: Arc<[u8]>) -> Self {
        Self {
            cache,
            vertex,
            buf,
            pinned: true,
        }
    }

    fn unpinned(cache: &'c VertexCache, vertex: VertexId, buf: Arc<[u8]>) -> Self {
        Self {
            cache,
            vertex,
            buf,
            pinned: false,
        }
    }

    /// Wraps the pin taken by a [`Lookup::Miss`].
    fn adopt(cache: &'c VertexCache, vertex: VertexId, buf: Arc<[u8]>) -> Self {
        Self::pinned(cache, vertex, buf)
    }

    /// Vertex the buffer belongs to.
    pub fn vertex(&self) -> VertexId {
        self.vertex
    }

    /// Encoded record.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// True when this is the shared initial-value template.
    pub fn is_template(&self) -> bool {
        !self.pinned
    }

    /// Releases the pin, placing the vertex in `hint`.
    pub fn release(mut self, hint: SectionHint) {
        if self.pinned {
            self.pinned = false;
            self.cache.end_read(self.vertex, hint);
        }
    }
}

impl Drop for VertexRef<'_> {
    fn drop(&mut self) {
        if self.pinned {
            self.cache.end_read(self.vertex, SectionHint::KEEP);
        }
    }
}

impl std::fmt::Debug for VertexRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VertexRef")
            .field("vertex", &self.vertex)
            .field("len", &self.buf.len())
            .field("pinned", &self.pinned)
            .finish()
    }
}
