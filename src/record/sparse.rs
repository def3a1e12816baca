use crate::primitives::bitmap::{BitSlice, BitSliceMut, Bitmap};
use crate::types::{Result, SageError, VertexId, NO_VERTEX};

use super::{
    activation_range, header, read_u32, validate, write_u32, DenseRecord, Encoding, RecordLayout,
    VertexValue,
};

/// Record storing each distinct value once, next to the bitmap of worlds
/// that hold it.
///
/// Entry bitmaps are expected to partition the world set. Mutators do not
/// check this; [`verify_partition`](Self::verify_partition) does.
#[derive(Clone, Debug)]
pub struct SparseRecord {
    buf: Vec<u8>,
    layout: RecordLayout,
}

impl SparseRecord {
    /// Builds the initial-value template: a single entry holding `init` for
    /// every world, activation bitmaps clear.
    pub fn template<V: VertexValue>(layout: RecordLayout, init: V) -> Self {
        debug_assert_eq!(V::SIZE, layout.value_size());
        let mut record = Self::blank(layout, NO_VERTEX);
        let (entry, _) = record.alloc_new_value();
        record.set_value(entry, init);
        record.bitmap_mut(entry).set_all();
        record
    }

    pub(crate) fn blank(layout: RecordLayout, vertex: VertexId) -> Self {
        let mut buf = vec![0u8; layout.sparse_unit_size()];
        write_u32(&mut buf, header::VERTEX_ID, vertex);
        write_u32(&mut buf, header::TAG, Encoding::Sparse as u32);
        write_u32(
            &mut buf,
            header::ALLOCATED_PAGES,
            layout.sparse_unit_pages() as u32,
        );
        write_u32(&mut buf, header::NUM_VALUES, 0);
        write_u32(&mut buf, header::NUM_SAMPLES, layout.num_samples() as u32);
        Self { buf, layout }
    }

    /// Decodes `buf`, checking tag, sample count, length and entry count.
    pub fn from_bytes(buf: Vec<u8>, layout: RecordLayout) -> Result<Self> {
        validate(&buf, &layout, Encoding::Sparse)?;
        let record = Self { buf, layout };
        if record.num_values() > layout.sparse_capacity(record.allocated_pages()) {
            return Err(SageError::Corruption("sparse entry count exceeds allocation"));
        }
        Ok(record)
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

    /// Live entries, including ones whose bitmap became empty.
    pub fn num_values(&self) -> usize {
        read_u32(&self.buf, header::NUM_VALUES) as usize
    }

    /// Entries the current allocation can hold.
    pub fn capacity(&self) -> usize {
        self.layout.sparse_capacity(self.allocated_pages())
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

    fn entry_start(&self, entry: usize) -> usize {
        debug_assert!(entry < self.num_values(), "entry {entry} not live");
        self.layout.values_offset() + entry * self.layout.entry_size()
    }

    /// Encoded value of `entry`.
    pub fn value_bytes(&self, entry: usize) -> &[u8] {
        let start = self.entry_start(entry);
        &self.buf[start..start + self.layout.value_size()]
    }

    /// Decoded value of `entry`.
    pub fn value<V: VertexValue>(&self, entry: usize) -> V {
        V::decode(self.value_bytes(entry))
    }

    /// Overwrites the value of `entry`.
    pub fn set_value<V: VertexValue>(&mut self, entry: usize, value: V) {
        let start = self.entry_start(entry);
        value.encode(&mut self.buf[start..start + self.layout.value_size()]);
    }

    /// Overwrites the encoded value of `entry`.
    pub fn set_value_bytes(&mut self, entry: usize, value: &[u8]) {
        let start = self.entry_start(entry);
        self.buf[start..start + self.layout.value_size()].copy_from_slice(value);
    }

    fn bitmap_range(&self, entry: usize) -> core::ops::Range<usize> {
        let start = self.entry_start(entry) + self.layout.padded_value_size();
        start..start + self.layout.bitmap_bytes()
    }

    /// World bitmap of `entry`.
    pub fn bitmap(&self, entry: usize) -> BitSlice<'_> {
        let range = self.bitmap_range(entry);
        BitSlice::new(&self.buf[range], self.layout.num_samples())
    }

    /// Mutable world bitmap of `entry`.
    pub fn bitmap_mut(&mut self, entry: usize) -> BitSliceMut<'_> {
        let range = self.bitmap_range(entry);
        BitSliceMut::new(&mut self.buf[range], self.layout.num_samples())
    }

    /// First entry whose value is bit-identical to `value`.
    pub fn find_bytes(&self, value: &[u8]) -> Option<usize> {
        (0..self.num_values()).find(|&entry| self.value_bytes(entry) == value)
    }

    /// First entry whose value encodes identically to `value`.
    pub fn find<V: VertexValue>(&self, value: V) -> Option<usize> {
        self.find_bytes(&value.to_bytes())
    }

    /// Entry whose bitmap contains `world`.
    pub fn entry_for_world(&self, world: usize) -> Option<usize> {
        (0..self.num_values()).find(|&entry| self.bitmap(entry).get(world))
    }

    /// Value held by `world`.
    ///
    /// # Panics
    /// Panics if no entry covers `world`, which breaks the partition.
    pub fn world_value<V: VertexValue>(&self, world: usize) -> V {
        let entry = self
            .entry_for_world(world)
            .unwrap_or_else(|| panic!("world {world} not covered by any sparse entry"));
        self.value(entry)
    }

    /// Returns an entry with an all-clear bitmap, preferring an existing empty
    /// entry over appending. Appending past the current allocation grows the
    /// buffer by exactly one allocation unit; the flag reports whether that
    /// happened.
    ///
    /// # Panics
    /// Panics when appending would exceed twice the world count.
    pub fn alloc_new_value(&mut self) -> (usize, bool) {
        let live = self.num_values();
        if let Some(empty) = (0..live).find(|&entry| self.bitmap(entry).is_all_clear()) {
            return (empty, false);
        }
        assert!(
            live < self.layout.max_sparse_entries(),
            "sparse record for vertex {} exceeded {} entries",
            self.vertex_id(),
            self.layout.max_sparse_entries()
        );
        let expanded = live >= self.capacity();
        if expanded {
            self.expand();
        }
        write_u32(&mut self.buf, header::NUM_VALUES, (live + 1) as u32);
        let start = self.entry_start(live);
        let end = start + self.layout.entry_size();
        self.buf[start..end].fill(0);
        (live, expanded)
    }

    fn expand(&mut self) {
        let pages = self.allocated_pages() + self.layout.sparse_unit_pages();
        self.buf.resize(pages * self.layout.page_size(), 0);
        write_u32(&mut self.buf, header::ALLOCATED_PAGES, pages as u32);
    }

    /// Adds `worlds` to the entry holding `value`, creating the entry if none
    /// exists. The caller removes `worlds` from their previous entry first.
    /// Returns whether the buffer grew.
    pub fn assign_worlds(&mut self, value: &[u8], worlds: &Bitmap) -> bool {
        if let Some(entry) = self.find_bytes(value) {
            self.bitmap_mut(entry).or_assign(worlds);
            return false;
        }
        let (entry, expanded) = self.alloc_new_value();
        self.set_value_bytes(entry, value);
        self.bitmap_mut(entry).or_assign(worlds);
        expanded
    }

    /// Makes `value` the only value: entry 0 covers every world and every
    /// other entry is emptied. Activation bitmaps are untouched.
    pub fn collapse_to<V: VertexValue>(&mut self, value: V) {
        if self.num_values() == 0 {
            self.alloc_new_value();
        }
        self.set_value(0, value);
        self.bitmap_mut(0).set_all();
        for entry in 1..self.num_values() {
            self.bitmap_mut(entry).clear_all();
        }
    }

    pub(crate) fn take(&mut self) -> SparseRecord {
        SparseRecord {
            buf: std::mem::take(&mut self.buf),
            layout: self.layout,
        }
    }

    /// True when the entry bitmaps are pairwise disjoint and cover every
    /// world.
    pub fn verify_partition(&self) -> bool {
        let mut seen = Bitmap::new(self.layout.num_samples());
        for entry in 0..self.num_values() {
            let bits = self.bitmap(entry).to_bitmap();
            if seen.intersects(&bits) {
                return false;
            }
            seen.or_assign(&bits);
        }
        seen.is_all_set()
    }

    /// Rewrites the record in the dense encoding: header and activation
    /// bitmaps carry over, and each entry's value is copied into the slot of
    /// every world in its bitmap.
    pub fn into_dense(self) -> DenseRecord {
        let mut dense = DenseRecord::blank(self.layout, self.vertex_id());
        for parity in 0..2 {
            dense
                .activation_mut(parity)
                .copy_from(&self.activation(parity).to_bitmap());
        }
        for entry in 0..self.num_values() {
            let value = self.value_bytes(entry);
            for world in self.bitmap(entry).iter_ones() {
                dense.value_bytes_mut(world).copy_from_slice(value);
            }
        }
        dense
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> RecordLayout {
        RecordLayout::new(100, 4, 512, 2)
    }

    #[test]
    fn template_holds_one_full_entry() {
        let record = SparseRecord::template(layout(), 7u32);
        assert_eq!(record.num_values(), 1);
        assert!(record.verify_partition());
        assert_eq!(record.world_value::<u32>(99), 7);
        assert_eq!(record.find(7u32), Some(0));
        assert_eq!(record.find(8u32), None);
    }

    #[test]
    fn empty_entries_are_reused() {
        let mut record = SparseRecord::template(layout(), 0u32);
        let (first, _) = record.alloc_new_value();
        assert_eq!(first, 1);
        let (again, expanded) = record.alloc_new_value();
        assert_eq!(again, 1);
        assert!(!expanded);
        record.bitmap_mut(first).set(3);
        let (second, _) = record.alloc_new_value();
        assert_eq!(second, 2);
    }

    #[test]
    fn conversion_scatters_values_into_world_slots() {
        let mut record = SparseRecord::template(layout(), 10u32);
        record.set_vertex_id(5);
        let (entry, _) = record.alloc_new_value();
        record.set_value(entry, 20u32);
        let moved: Bitmap = {
            let mut bm = Bitmap::new(100);
            (40..60).for_each(|w| bm.set(w));
            bm
        };
        record.bitmap_mut(entry).copy_from(&moved);
        record.bitmap_mut(0).and_not_assign(&moved);
        record.activation_mut(0).set(41);
        assert!(record.verify_partition());

        let dense = record.into_dense();
        assert_eq!(dense.vertex_id(), 5);
        for world in 0..100 {
            let expected = if (40..60).contains(&world) { 20 } else { 10 };
            assert_eq!(dense.value::<u32>(world), expected);
        }
        assert!(dense.activation(0).get(41));
        assert_eq!(dense.activation(0).count(), 1);
    }

    #[test]
    fn assigned_worlds_join_matching_entry() {
        let mut record = SparseRecord::template(layout(), 1u32);
        let mut low = Bitmap::new(100);
        (0..10).for_each(|w| low.set(w));
        record.bitmap_mut(0).and_not_assign(&low);
        record.assign_worlds(&2u32.to_bytes(), &low);
        assert_eq!(record.num_values(), 2);

        let mut more = Bitmap::new(100);
        (10..20).for_each(|w| more.set(w));
        record.bitmap_mut(0).and_not_assign(&more);
        record.assign_worlds(&2u32.to_bytes(), &more);
        assert_eq!(record.num_values(), 2);
        assert_eq!(record.bitmap(1).count(), 20);
        assert!(record.verify_partition());

        record.collapse_to(9u32);
        assert!(record.verify_partition());
        assert_eq!(record.world_value::<u32>(5), 9);
        assert!(record.bitmap(1).is_all_clear());
    }

    #[test]
    fn filling_past_capacity_expands_once_and_keeps_entries() {
        let layout = layout();
        let mut record = SparseRecord::template(layout, 0u32);
        let start_pages = record.allocated_pages();
        let calls = record.capacity();
        let mut expansions = 0;
        let mut before = Vec::new();
        for world in 1..=calls {
            if record.num_values() == record.capacity() {
                let end = layout.values_offset() + record.num_values() * layout.entry_size();
                before = record.as_bytes()[layout.values_offset()..end].to_vec();
            }
            let (entry, expanded) = record.alloc_new_value();
            if expanded {
                expansions += 1;
                let end = layout.values_offset() + before.len();
                assert_eq!(&record.as_bytes()[layout.values_offset()..end], &before[..]);
            }
            record.set_value(entry, world as u32);
            record.bitmap_mut(0).clear(world);
            record.bitmap_mut(entry).set(world);
            assert!(record.verify_partition());
        }
        assert_eq!(expansions, 1);
        assert_eq!(
            record.allocated_pages(),
            start_pages + layout.sparse_unit_pages()
        );
        assert_eq!(record.as_bytes().len(), record.allocated_pages() * layout.page_size());
        for world in 1..=calls {
            assert_eq!(record.world_value::<u32>(world), world as u32);
        }
    }

    #[test]
    fn overlapping_bitmaps_fail_verification() {
        let mut record = SparseRecord::template(layout(), 0u32);
        let (entry, _) = record.alloc_new_value();
        record.bitmap_mut(entry).set(0);
        assert!(!record.verify_partition());
    }

    #[test]
    #[should_panic(expected = "exceeded")]
    fn allocating_past_twice_the_world_count_panics() {
        let layout = RecordLayout::new(2, 4, 64, 1);
        let mut record = SparseRecord::template(layout, 0u32);
        for _ in 0..4 {
            let (entry, _) = record.alloc_new_value();
            record.bitmap_mut(entry).set(0);
        }
    }
}
