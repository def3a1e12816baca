//! Sage: an out-of-core Monte-Carlo scatter/gather engine for probabilistic
//! graphs.
//!
//! Every vertex carries one value per sampled world. Worlds whose values
//! agree are stored once ([`record::SparseRecord`]) until a vertex diverges
//! enough to switch to one slot per world ([`record::DenseRecord`]). Records
//! live in a memory-bounded [`cache::VertexCache`] that spills to a scratch
//! file, and the [`engine::Engine`] drives user [`engine::VertexProgram`]s
//! over them superstep by superstep.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod engine;
pub mod graph;
pub mod primitives;
pub mod programs;
pub mod record;
pub mod types;

pub use engine::{Engine, EngineOptions, VertexProgram, VertexQuery};
pub use graph::Graph;
pub use types::{Result, SageError, VertexId, WorldId};
