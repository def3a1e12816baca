use std::{
    collections::VecDeque,
    sync::Arc,
    thread::{self, JoinHandle},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::types::Result;

use super::FileIo;

const MAX_IO_THREADS: usize = 4;

/// Direction and payload of a queued disk operation.
#[derive(Clone, Debug)]
pub enum IoOp {
    /// Read `len` bytes.
    Read {
        /// Number of bytes to read.
        len: usize,
    },
    /// Write the shared buffer.
    Write(Arc<[u8]>),
}

/// One positional request flowing through a [`DiskQueue`].
#[derive(Clone, Debug)]
pub struct IoRequest {
    /// Byte offset into the backing file.
    pub offset: u64,
    /// What to do at `offset`.
    pub op: IoOp,
    /// Caller-chosen tag echoed back in the completion.
    pub token: u64,
}

impl IoRequest {
    /// Convenience constructor for a read.
    pub fn read(offset: u64, len: usize, token: u64) -> Self {
        Self {
            offset,
            op: IoOp::Read { len },
            token,
        }
    }

    /// Convenience constructor for a write.
    pub fn write(offset: u64, data: Arc<[u8]>, token: u64) -> Self {
        Self {
            offset,
            op: IoOp::Write(data),
            token,
        }
    }
}

/// Result of a finished request. Reads carry the bytes, writes an empty
/// buffer.
#[derive(Debug)]
pub struct IoCompletion {
    /// Token of the originating request.
    pub token: u64,
    /// Offset of the originating request.
    pub offset: u64,
    /// Bytes read, or the failure that ended the request.
    pub result: Result<Vec<u8>>,
}

#[derive(Default)]
struct QueueState {
    submitted: VecDeque<IoRequest>,
    completed: VecDeque<IoCompletion>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    submitted: Condvar,
    completed: Condvar,
}

/// Bounded asynchronous I/O queue owned by a single worker.
///
/// Requests are staged with [`enqueue`](Self::enqueue) and handed to a small
/// set of background I/O threads by [`submit`](Self::submit), which never lets
/// more than `depth` requests be in flight. Completions are collected with
/// [`wait_for_complete`](Self::wait_for_complete).
pub struct DiskQueue {
    io: Arc<dyn FileIo>,
    depth: usize,
    queued: VecDeque<IoRequest>,
    in_flight: usize,
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl DiskQueue {
    /// Creates a queue over `io` with room for `depth` in-flight requests.
    pub fn new(io: Arc<dyn FileIo>, depth: usize) -> Self {
        Self {
            io,
            depth: depth.max(1),
            queued: VecDeque::new(),
            in_flight: 0,
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                submitted: Condvar::new(),
                completed: Condvar::new(),
            }),
            workers: Vec::new(),
        }
    }

    /// Maximum number of requests in flight at once.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Requests staged but not yet submitted.
    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Requests submitted whose completions have not been collected yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Stages a request for the next [`submit`](Self::submit).
    pub fn enqueue(&mut self, request: IoRequest) {
        self.queued.push_back(request);
    }

    /// Submits as many staged requests as the remaining depth allows and
    /// returns how many were submitted.
    pub fn submit(&mut self) -> usize {
        let room = self.depth.saturating_sub(self.in_flight);
        let count = room.min(self.queued.len());
        if count == 0 {
            return 0;
        }
        self.ensure_workers();
        {
            let mut state = self.shared.state.lock();
            state.submitted.extend(self.queued.drain(..count));
        }
        self.in_flight += count;
        self.shared.submitted.notify_all();
        trace!(
            submitted = count,
            in_flight = self.in_flight,
            queued = self.queued.len(),
            "io.queue.submit"
        );
        count
    }

    /// Blocks until at least `min` in-flight requests have completed, then
    /// returns up to `max` completions. `min` is capped at the number of
    /// requests actually in flight, so the call never waits on nothing.
    pub fn wait_for_complete(&mut self, min: usize, max: usize) -> Vec<IoCompletion> {
        if self.in_flight == 0 || max == 0 {
            return Vec::new();
        }
        let min = min.min(self.in_flight).min(max);
        let mut state = self.shared.state.lock();
        while state.completed.len() < min {
            self.shared.completed.wait(&mut state);
        }
        let take = state.completed.len().min(max);
        let out: Vec<IoCompletion> = state.completed.drain(..take).collect();
        drop(state);
        self.in_flight -= out.len();
        out
    }

    /// Blocking read bypassing the queue.
    pub fn read_sync(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.io.read_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Blocking write bypassing the queue.
    pub fn write_sync(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.io.write_at(offset, data)
    }

    fn ensure_workers(&mut self) {
        if !self.workers.is_empty() {
            return;
        }
        let count = self.depth.min(MAX_IO_THREADS);
        for _ in 0..count {
            let io = Arc::clone(&self.io);
            let shared = Arc::clone(&self.shared);
            self.workers
                .push(thread::spawn(move || Self::worker_loop(io, shared)));
        }
        debug!(threads = count, depth = self.depth, "io.queue.workers_started");
    }

    fn worker_loop(io: Arc<dyn FileIo>, shared: Arc<Shared>) {
        loop {
            let request = {
                let mut state = shared.state.lock();
                loop {
                    if let Some(request) = state.submitted.pop_front() {
                        break request;
                    }
                    if state.shutdown {
                        return;
                    }
                    shared.submitted.wait(&mut state);
                }
            };
            let result = match &request.op {
                IoOp::Read { len } => {
                    let mut buf = vec![0u8; *len];
                    io.read_at(request.offset, &mut buf).map(|()| buf)
                }
                IoOp::Write(data) => io.write_at(request.offset, data).map(|()| Vec::new()),
            };
            let completion = IoCompletion {
                token: request.token,
                offset: request.offset,
                result,
            };
            shared.state.lock().completed.push_back(completion);
            shared.completed.notify_one();
        }
    }
}

impl Drop for DiskQueue {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.submitted.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::io::StdFileIo;
    use tempfile::tempdir;

    #[test]
    fn submit_respects_depth() -> Result<()> {
        let dir = tempdir()?;
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(dir.path().join("q.bin"))?);
        io.write_at(0, &[1u8; 4096])?;
        let mut queue = DiskQueue::new(io, 2);
        for token in 0..5 {
            queue.enqueue(IoRequest::read(token * 512, 512, token));
        }
        assert_eq!(queue.submit(), 2);
        assert_eq!(queue.submit(), 0);
        assert_eq!(queue.queued(), 3);

        let mut seen = Vec::new();
        while queue.in_flight() > 0 || queue.queued() > 0 {
            for done in queue.wait_for_complete(1, usize::MAX) {
                assert_eq!(done.result?.len(), 512);
                seen.push(done.token);
            }
            queue.submit();
            assert!(queue.in_flight() <= 2);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn writes_land_and_failures_are_reported() -> Result<()> {
        let dir = tempdir()?;
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(dir.path().join("q.bin"))?);
        let mut queue = DiskQueue::new(Arc::clone(&io), 4);
        queue.enqueue(IoRequest::write(1024, Arc::from(vec![9u8; 512]), 7));
        queue.submit();
        let done = queue.wait_for_complete(1, 1);
        assert_eq!(done.len(), 1);
        assert!(done[0].result.is_ok());
        assert_eq!(queue.read_sync(1024, 512)?, vec![9u8; 512]);

        queue.enqueue(IoRequest::read(1 << 20, 512, 8));
        queue.submit();
        let done = queue.wait_for_complete(1, 1);
        assert!(done[0].result.is_err());
        Ok(())
    }
}
