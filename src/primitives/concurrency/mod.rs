#![forbid(unsafe_code)]

//! Work distribution shared by the worker pool.

use std::collections::BTreeSet;

use parking_lot::Mutex;

use crate::primitives::bitmap::Bitmap;
use crate::types::VertexId;

/// Hands out ascending batches of eligible vertex ids to whichever worker
/// asks next. Every eligible id is returned exactly once.
pub struct PartitionCursor<'a> {
    eligible: &'a Bitmap,
    state: Mutex<CursorState>,
}

#[derive(Debug, Default)]
struct CursorState {
    next: usize,
    handed_out: usize,
}

impl<'a> PartitionCursor<'a> {
    /// Creates a cursor over the set bits of `eligible`.
    pub fn new(eligible: &'a Bitmap) -> Self {
        Self {
            eligible,
            state: Mutex::new(CursorState::default()),
        }
    }

    /// Claims up to `max` of the next unclaimed eligible vertices. An empty
    /// batch means the cursor is exhausted.
    pub fn next_batch(&self, max: usize) -> Vec<VertexId> {
        let mut state = self.state.lock();
        let mut batch = Vec::with_capacity(max.min(64));
        let len = self.eligible.len();
        while batch.len() < max && state.next < len {
            let idx = state.next;
            state.next += 1;
            if self.eligible.get(idx) {
                batch.push(idx as VertexId);
            }
        }
        state.handed_out += batch.len();
        batch
    }

    /// Number of vertices handed out so far.
    pub fn handed_out(&self) -> usize {
        self.state.lock().handed_out
    }
}

/// Vertices currently held by some worker.
///
/// The minimum member approximates the slowest point of the scan and drives
/// the cache's current locality section.
#[derive(Debug, Default)]
pub struct RunningSet {
    inner: Mutex<BTreeSet<VertexId>>,
}

impl RunningSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a claimed batch and returns the smallest running vertex, or `None`
    /// if nothing is running.
    pub fn add(&self, batch: &[VertexId]) -> Option<VertexId> {
        let mut set = self.inner.lock();
        set.extend(batch.iter().copied());
        set.first().copied()
    }

    /// Removes a vertex once its processing finished.
    pub fn remove(&self, vertex: VertexId) {
        self.inner.lock().remove(&vertex);
    }

    /// Number of vertices currently running.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True when no vertex is running.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn cursor_hands_out_each_vertex_once() {
        let mut eligible = Bitmap::new(1000);
        for v in (0..1000).filter(|v| v % 3 != 0) {
            eligible.set(v);
        }
        let cursor = PartitionCursor::new(&eligible);
        let mut claimed: Vec<VertexId> = thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        let mut mine = Vec::new();
                        loop {
                            let batch = cursor.next_batch(7);
                            if batch.is_empty() {
                                break mine;
                            }
                            assert!(batch.windows(2).all(|w| w[0] < w[1]));
                            mine.extend(batch);
                        }
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().expect("worker"))
                .collect()
        });
        claimed.sort_unstable();
        let expected: Vec<VertexId> = (0..1000).filter(|v| v % 3 != 0).collect();
        assert_eq!(claimed, expected);
        assert_eq!(cursor.handed_out(), expected.len());
    }

    #[test]
    fn running_set_reports_minimum() {
        let running = RunningSet::new();
        assert_eq!(running.add(&[10, 4, 7]), Some(4));
        running.remove(4);
        assert_eq!(running.add(&[]), Some(7));
        running.remove(7);
        running.remove(10);
        assert!(running.is_empty());
    }
}
