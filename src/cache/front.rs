use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::primitives::io::{DiskQueue, FileIo, IoRequest};
use crate::types::{Result, VertexId};

use super::{Lookup, SectionHint, VertexCache, VertexRef};

/// A record handed back by [`CacheFront::wait_for_complete`], whether it was
/// a hit or a miss that has since been filled.
#[derive(Debug)]
pub struct Completed<'c, C> {
    /// Vertex the record belongs to.
    pub vertex: VertexId,
    /// Pinned record buffer.
    pub record: VertexRef<'c>,
    /// Caller context passed to [`CacheFront::read_append`].
    pub context: C,
}

/// Per-worker pipeline over a shared [`VertexCache`].
///
/// Hits are parked in a local queue and returned without touching the disk;
/// misses become reads on the worker's private [`DiskQueue`]. Callers see both
/// through [`wait_for_complete`](Self::wait_for_complete) and cannot tell them
/// apart except by latency.
pub struct CacheFront<'c, C> {
    cache: &'c VertexCache,
    queue: DiskQueue,
    cached: VecDeque<Completed<'c, C>>,
    waiting: FxHashMap<u64, (VertexId, C)>,
    next_token: u64,
}

impl<'c, C> CacheFront<'c, C> {
    /// Creates a front-end over `cache` whose disk reads go to `io` with at
    /// most `depth` in flight.
    pub fn new(cache: &'c VertexCache, io: Arc<dyn FileIo>, depth: usize) -> Self {
        Self {
            cache,
            queue: DiskQueue::new(io, depth),
            cached: VecDeque::new(),
            waiting: FxHashMap::default(),
            next_token: 0,
        }
    }

    /// Shared cache behind this front-end.
    pub fn cache(&self) -> &'c VertexCache {
        self.cache
    }

    /// Requests `vertex`. A hit is ready at the next wait; a miss is staged
    /// as a disk read until [`submit`](Self::submit).
    pub fn read_append(&mut self, vertex: VertexId, context: C) {
        match self.cache.get(vertex) {
            Lookup::Hit(record) => self.cached.push_back(Completed {
                vertex,
                record,
                context,
            }),
            Lookup::Miss(request) => {
                let token = self.next_token;
                self.next_token += 1;
                self.waiting.insert(token, (vertex, context));
                self.queue
                    .enqueue(IoRequest::read(request.offset, request.len, token));
                trace!(vertex, offset = request.offset, "cache.front.miss");
            }
        }
    }

    /// Submits staged reads up to the remaining queue depth.
    pub fn submit(&mut self) -> usize {
        self.queue.submit()
    }

    /// Requests issued but not yet returned by a wait.
    pub fn pending(&self) -> usize {
        self.cached.len() + self.waiting.len()
    }

    /// Returns between `min` and `max` completed records.
    ///
    /// Parked hits are drained first. If fewer than `min` were available the
    /// call submits staged reads and blocks until disk reads finish; each one
    /// is installed in the cache before being returned. `min` is capped at
    /// [`pending`](Self::pending).
    pub fn wait_for_complete(&mut self, min: usize, max: usize) -> Result<Vec<Completed<'c, C>>> {
        let min = min.min(self.pending()).min(max);
        let take = self.cached.len().min(max);
        let mut out: Vec<Completed<'c, C>> = self.cached.drain(..take).collect();
        while out.len() < min {
            self.queue.submit();
            let want = min - out.len();
            for done in self.queue.wait_for_complete(want.max(1), max - out.len()) {
                let Some((vertex, context)) = self.waiting.remove(&done.token) else {
                    continue;
                };
                let bytes = done.result?;
                let record = self.cache.fill(vertex, bytes)?;
                out.push(Completed {
                    vertex,
                    record,
                    context,
                });
            }
        }
        Ok(out)
    }

    /// Blocking read of `vertex`, bypassing the queue.
    pub fn read(&mut self, vertex: VertexId) -> Result<VertexRef<'c>> {
        match self.cache.get(vertex) {
            Lookup::Hit(record) => Ok(record),
            Lookup::Miss(request) => {
                let bytes = self.queue.read_sync(request.offset, request.len)?;
                self.cache.fill(vertex, bytes)
            }
        }
    }

    /// Installs a modified record. Never writes through to disk.
    pub fn write(&self, vertex: VertexId, bytes: Vec<u8>, hint: SectionHint) -> Result<()> {
        self.cache.put(vertex, bytes, hint)
    }

    /// Releases a record obtained from this front-end.
    pub fn end_read(&self, record: VertexRef<'c>, hint: SectionHint) {
        record.release(hint);
    }
}
