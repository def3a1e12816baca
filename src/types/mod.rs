#![forbid(unsafe_code)]

//! Shared identifiers, error type and layout constants.

use std::fmt;

/// Dense vertex identifier in `[0, max_vertex_id]`.
pub type VertexId = u32;

/// Sentinel meaning "no vertex". Also stamped into the header of the
/// initial-value template record.
pub const NO_VERTEX: VertexId = u32::MAX;

/// Default I/O alignment unit for vertex records.
pub const DEFAULT_PAGE_SIZE: usize = 512;

/// Index of a Monte-Carlo world in `[0, num_samples)`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct WorldId(pub u32);

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for WorldId {
    fn from(value: u32) -> Self {
        WorldId(value)
    }
}

/// Errors surfaced by the engine and its storage layers.
#[derive(thiserror::Error, Debug)]
pub enum SageError {
    /// Underlying file or device failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// A buffer did not decode as a well-formed record or graph.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// A caller passed an argument outside the accepted domain.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Same as [`SageError::Invalid`] with a formatted message.
    #[error("invalid argument: {0}")]
    InvalidOwned(String),
    /// Engine options failed validation.
    #[error("config: {0}")]
    Config(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SageError>;

/// Rounds `bytes` up to a whole number of `page_size` pages and returns the
/// page count.
#[inline]
pub fn pages_for(bytes: usize, page_size: usize) -> usize {
    debug_assert!(page_size > 0);
    bytes.div_ceil(page_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_round_up() {
        assert_eq!(pages_for(0, 512), 0);
        assert_eq!(pages_for(1, 512), 1);
        assert_eq!(pages_for(512, 512), 1);
        assert_eq!(pages_for(513, 512), 2);
    }

    #[test]
    fn error_messages_carry_context() {
        let err = SageError::Corruption("record tag");
        assert_eq!(err.to_string(), "corruption: record tag");
        let err = SageError::Config("threads must be > 0".into());
        assert_eq!(err.to_string(), "config: threads must be > 0");
    }
}
