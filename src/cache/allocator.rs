use parking_lot::Mutex;

/// Bump allocator for scratch-file space. Ranges are never reclaimed or
/// reused within a run; [`reset`](Self::reset) starts over at zero.
#[derive(Debug, Default)]
pub struct OffsetAllocator {
    next: Mutex<u64>,
}

impl OffsetAllocator {
    /// Creates an allocator starting at offset zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `size` bytes and returns the start of the range.
    pub fn alloc(&self, size: usize) -> u64 {
        let mut next = self.next.lock();
        let offset = *next;
        *next += size as u64;
        offset
    }

    /// Total bytes handed out so far.
    pub fn allocated(&self) -> u64 {
        *self.next.lock()
    }

    /// Forgets every range.
    pub fn reset(&self) {
        *self.next.lock() = 0;
    }
}
