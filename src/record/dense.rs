use crate::primitives::bitmap::{BitSlice, BitSliceMut};
use crate::types::{Result, VertexId, NO_VERTEX};

use super::{
    activation_range, header, read_u32, validate, write_u32, Encoding, RecordLayout, VertexValue,
};

/// Record with one value slot per world, addressed by world index.
#[derive(Clone, Debug)]
pub struct DenseRecord {
    buf: Vec<u8>,
    layout: RecordLayout,
}

impl DenseRecord {
    /// Builds the initial-value template: every world holds `init` and both
    /// activation bitmaps are clear.
    pub fn template<V: VertexValue>(layout: RecordLayout, init: V) -> Self {
        debug_assert_eq!(V::SIZE, layout.value_size());
        let mut record = Self::blank(layout, NO_VERTEX);
        for world in 0..layout.num_samples() {
            record.set_value(world, init);
        }
        record
    }

    pub(crate) fn blank(layout: RecordLayout, vertex: VertexId) -> Self {
        let mut buf = vec![0u8; layout.dense_size()];
        write_u32(&mut buf, header::VERTEX_ID, vertex);
        write_u32(&mut buf, header::TAG, Encoding::Dense as u32);
        write_u32(&mut buf, header::ALLOCATED_PAGES, layout.dense_pages() as u32);
        write_u32(&mut buf, header::NUM_SAMPLES, layout.num_samples() as u32);
        Self { buf, layout }
    }

    /// Decodes `buf`, checking tag, sample count and length.
    pub fn from_bytes(buf: Vec<u8>, layout: RecordLayout) -> Result<Self> {
        validate(&buf, &layout, Encoding::Dense)?;
        Ok(Self { buf, layout })
    }

    /// Layout the record was built with.
    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Gives the buffer back.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Vertex id stamped in the header.
    pub fn vertex_id(&self) -> VertexId {
        read_u32(&self.buf, header::VERTEX_ID)
    }

    /// Stamps `vertex` into the header.
    pub fn set_vertex_id(&mut self, vertex: VertexId) {
        write_u32(&mut self.buf, header::VERTEX_ID, vertex);
    }

    /// Pages backing the record.
    pub fn allocated_pages(&self) -> usize {
        read_u32(&self.buf, header::ALLOCATED_PAGES) as usize
    }

    /// Activation bitmap for superstep parity `parity`.
    pub fn activation(&self, parity: usize) -> BitSlice<'_> {
        let range = activation_range(&self.layout, parity);
        BitSlice::new(&self.buf[range], self.layout.num_samples())
    }

    /// Mutable activation bitmap for superstep parity `parity`.
    pub fn activation_mut(&mut self, parity: usize) -> BitSliceMut<'_> {
        let range = activation_range(&self.layout, parity);
        BitSliceMut::new(&mut self.buf[range], self.layout.num_samples())
    }

    fn slot(&self, world: usize) -> core::ops::Range<usize> {
        debug_assert!(world < self.layout.num_samples());
        let start = self.layout.values_offset() + world * self.layout.value_size();
        start..start + self.layout.value_size()
    }

    /// Encoded value of `world`.
    pub fn value_bytes(&self, world: usize) -> &[u8] {
        &self.buf[self.slot(world)]
    }

    /// Mutable encoded value of `world`.
    pub fn value_bytes_mut(&mut self, world: usize) -> &mut [u8] {
        let slot = self.slot(world);
        &mut self.buf[slot]
    }

    /// Decoded value of `world`.
    pub fn value<V: VertexValue>(&self, world: usize) -> V {
        V::decode(self.value_bytes(world))
    }

    /// Overwrites the value of `world`.
    pub fn set_value<V: VertexValue>(&mut self, world: usize, value: V) {
        value.encode(self.value_bytes_mut(world));
    }
}
