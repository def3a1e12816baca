#![forbid(unsafe_code)]

//! Page-aligned binary layouts for a vertex's per-world state.
//!
//! Every record starts with a fixed [`header`], followed by two activation
//! bitmaps (double-buffered by superstep parity) and a value area. The value
//! area is either a dense array with one slot per world ([`DenseRecord`]) or a
//! list of `(value, world bitmap)` entries whose bitmaps partition the world
//! set ([`SparseRecord`]).

use crate::primitives::bitmap::{bytes_for, BitSlice, BitSliceMut};
use crate::types::{pages_for, Result, SageError, VertexId, WorldId};

mod dense;
mod sparse;
mod value;

pub use dense::DenseRecord;
pub use sparse::SparseRecord;
pub use value::VertexValue;

/// Byte offsets of the fixed header fields. All fields are little-endian.
pub mod header {
    use core::ops::Range;

    /// Vertex id, or [`NO_VERTEX`](crate::types::NO_VERTEX) for the template.
    pub const VERTEX_ID: Range<usize> = 0..4;
    /// [`Encoding`](super::Encoding) tag.
    pub const TAG: Range<usize> = 4..8;
    /// Pages currently backing the record.
    pub const ALLOCATED_PAGES: Range<usize> = 8..12;
    /// Live sparse entries; zero for dense records.
    pub const NUM_VALUES: Range<usize> = 12..16;
    /// World count the record was built for.
    pub const NUM_SAMPLES: Range<usize> = 16..20;
    /// Header length; activation bitmaps follow.
    pub const LEN: usize = 24;
}

/// Which value-area layout a record uses.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Encoding {
    /// One value slot per world.
    Dense = 0,
    /// Deduplicated `(value, world bitmap)` entries.
    Sparse = 1,
}

impl TryFrom<u32> for Encoding {
    type Error = SageError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Encoding::Dense),
            1 => Ok(Encoding::Sparse),
            _ => Err(SageError::Corruption("unknown record encoding tag")),
        }
    }
}

/// Size parameters shared by every record of one engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RecordLayout {
    num_samples: usize,
    value_size: usize,
    page_size: usize,
    initial_entries: usize,
}

impl RecordLayout {
    /// Describes records for `num_samples` worlds of `value_size`-byte values
    /// on `page_size` pages. A fresh sparse record reserves room for
    /// `initial_entries` entries; zero means `num_samples + 1`.
    pub fn new(
        num_samples: usize,
        value_size: usize,
        page_size: usize,
        initial_entries: usize,
    ) -> Self {
        assert!(num_samples > 0, "record layout needs at least one world");
        assert!(page_size > 0, "record layout needs a page size");
        let initial_entries = if initial_entries == 0 {
            num_samples + 1
        } else {
            initial_entries
        };
        Self {
            num_samples,
            value_size,
            page_size,
            initial_entries,
        }
    }

    /// Layout for values of type `V`.
    pub fn for_value<V: VertexValue>(
        num_samples: usize,
        page_size: usize,
        initial_entries: usize,
    ) -> Self {
        Self::new(num_samples, V::SIZE, page_size, initial_entries)
    }

    /// Number of worlds.
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Encoded value width.
    pub fn value_size(&self) -> usize {
        self.value_size
    }

    /// Page size records are rounded to.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Bytes of one serialized world bitmap.
    pub fn bitmap_bytes(&self) -> usize {
        bytes_for(self.num_samples)
    }

    /// Offset of the value area.
    pub fn values_offset(&self) -> usize {
        header::LEN + 2 * self.bitmap_bytes()
    }

    /// Value width padded to a word boundary, as stored in sparse entries.
    pub fn padded_value_size(&self) -> usize {
        self.value_size.div_ceil(8) * 8
    }

    /// Bytes of one sparse entry.
    pub fn entry_size(&self) -> usize {
        self.padded_value_size() + self.bitmap_bytes()
    }

    /// Pages of a dense record.
    pub fn dense_pages(&self) -> usize {
        pages_for(
            self.values_offset() + self.num_samples * self.value_size,
            self.page_size,
        )
    }

    /// Pages of one sparse allocation unit, which is also the size of a fresh
    /// sparse record.
    pub fn sparse_unit_pages(&self) -> usize {
        pages_for(
            self.values_offset() + self.initial_entries * self.entry_size(),
            self.page_size,
        )
    }

    /// Bytes of a dense record.
    pub fn dense_size(&self) -> usize {
        self.dense_pages() * self.page_size
    }

    /// Bytes of a fresh sparse record.
    pub fn sparse_unit_size(&self) -> usize {
        self.sparse_unit_pages() * self.page_size
    }

    /// Entries that fit in a sparse record of `pages` pages.
    pub fn sparse_capacity(&self, pages: usize) -> usize {
        (pages * self.page_size).saturating_sub(self.values_offset()) / self.entry_size()
    }

    /// Upper bound on live sparse entries; exceeding it is a caller bug.
    pub fn max_sparse_entries(&self) -> usize {
        2 * self.num_samples
    }
}

#[inline]
pub(crate) fn read_u32(buf: &[u8], range: core::ops::Range<usize>) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[range]);
    u32::from_le_bytes(raw)
}

#[inline]
pub(crate) fn write_u32(buf: &mut [u8], range: core::ops::Range<usize>, value: u32) {
    buf[range].copy_from_slice(&value.to_le_bytes());
}

/// Reads the vertex id stamped into a raw record buffer.
pub fn peek_vertex_id(buf: &[u8]) -> VertexId {
    read_u32(buf, header::VERTEX_ID)
}

/// Reads the encoding tag of a raw record buffer.
pub fn peek_encoding(buf: &[u8]) -> Result<Encoding> {
    if buf.len() < header::LEN {
        return Err(SageError::Corruption("record shorter than header"));
    }
    Encoding::try_from(read_u32(buf, header::TAG))
}

pub(crate) fn validate(buf: &[u8], layout: &RecordLayout, expected: Encoding) -> Result<()> {
    if peek_encoding(buf)? != expected {
        return Err(SageError::Corruption("record encoding tag mismatch"));
    }
    if read_u32(buf, header::NUM_SAMPLES) as usize != layout.num_samples() {
        return Err(SageError::Corruption("record sample count mismatch"));
    }
    let pages = read_u32(buf, header::ALLOCATED_PAGES) as usize;
    if pages * layout.page_size() != buf.len() {
        return Err(SageError::Corruption("record length disagrees with page count"));
    }
    Ok(())
}

pub(crate) fn activation_range(layout: &RecordLayout, parity: usize) -> core::ops::Range<usize> {
    let bm = layout.bitmap_bytes();
    let start = header::LEN + (parity % 2) * bm;
    start..start + bm
}

/// A decoded vertex record in either encoding.
#[derive(Clone, Debug)]
pub enum VertexRecord {
    /// One slot per world.
    Dense(DenseRecord),
    /// Deduplicated value entries.
    Sparse(SparseRecord),
}

impl VertexRecord {
    /// Decodes `buf`, dispatching on its header tag.
    pub fn from_bytes(buf: Vec<u8>, layout: RecordLayout) -> Result<Self> {
        match peek_encoding(&buf)? {
            Encoding::Dense => DenseRecord::from_bytes(buf, layout).map(Self::Dense),
            Encoding::Sparse => SparseRecord::from_bytes(buf, layout).map(Self::Sparse),
        }
    }

    /// Encoding of this record.
    pub fn encoding(&self) -> Encoding {
        match self {
            Self::Dense(_) => Encoding::Dense,
            Self::Sparse(_) => Encoding::Sparse,
        }
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Dense(r) => r.as_bytes(),
            Self::Sparse(r) => r.as_bytes(),
        }
    }

    /// Gives the buffer back.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Dense(r) => r.into_bytes(),
            Self::Sparse(r) => r.into_bytes(),
        }
    }

    /// Vertex id stamped in the header.
    pub fn vertex_id(&self) -> VertexId {
        peek_vertex_id(self.as_bytes())
    }

    /// Stamps `vertex` into the header.
    pub fn set_vertex_id(&mut self, vertex: VertexId) {
        match self {
            Self::Dense(r) => r.set_vertex_id(vertex),
            Self::Sparse(r) => r.set_vertex_id(vertex),
        }
    }

    /// Pages backing the record.
    pub fn allocated_pages(&self) -> usize {
        read_u32(self.as_bytes(), header::ALLOCATED_PAGES) as usize
    }

    /// Activation bitmap for superstep parity `parity`.
    pub fn activation(&self, parity: usize) -> BitSlice<'_> {
        match self {
            Self::Dense(r) => r.activation(parity),
            Self::Sparse(r) => r.activation(parity),
        }
    }

    /// Mutable activation bitmap for superstep parity `parity`.
    pub fn activation_mut(&mut self, parity: usize) -> BitSliceMut<'_> {
        match self {
            Self::Dense(r) => r.activation_mut(parity),
            Self::Sparse(r) => r.activation_mut(parity),
        }
    }

    /// Value held by `world`.
    pub fn world_value<V: VertexValue>(&self, world: WorldId) -> V {
        match self {
            Self::Dense(r) => r.value(world.0 as usize),
            Self::Sparse(r) => r.world_value(world.0 as usize),
        }
    }

    /// Converts a sparse record to dense in place. Returns whether a
    /// conversion happened.
    pub fn make_dense(&mut self) -> bool {
        match self {
            Self::Dense(_) => false,
            Self::Sparse(r) => {
                let dense = r.take().into_dense();
                *self = Self::Dense(dense);
                true
            }
        }
    }

    /// Converts to the dense encoding, leaving dense records untouched.
    pub fn into_dense(self) -> DenseRecord {
        match self {
            Self::Dense(r) => r,
            Self::Sparse(r) => r.into_dense(),
        }
    }
}
