//! Low-level building blocks shared by the cache and the engine.

/// Fixed-size bit vectors, owned and embedded in record buffers.
pub mod bitmap;

/// Partition cursor and running set used by the worker pool.
pub mod concurrency;

/// Positional file I/O and the asynchronous disk queue.
pub mod io;
