#![forbid(unsafe_code)]

//! Fixed-size bit vectors over `u64` words.
//!
//! [`Bitmap`] owns its words. [`BitSlice`] and [`BitSliceMut`] view bitmaps
//! embedded in record buffers, where each word is stored little-endian. With
//! that layout bit `i` always lives in byte `i / 8` at position `i % 8`, so
//! single-bit operations work on bytes and bulk operations on whole words.
//!
//! Bits at or past `len` in the last word are kept clear by every mutating
//! operation, which lets counts and "all set" checks work word-at-a-time.

const WORD_BITS: usize = 64;

/// Number of `u64` words needed to hold `num_bits` bits.
#[inline]
pub const fn words_for(num_bits: usize) -> usize {
    num_bits.div_ceil(WORD_BITS)
}

/// Number of bytes a serialized bitmap of `num_bits` bits occupies.
#[inline]
pub const fn bytes_for(num_bits: usize) -> usize {
    words_for(num_bits) * 8
}

#[inline]
fn tail_mask(num_bits: usize) -> u64 {
    match num_bits % WORD_BITS {
        0 => u64::MAX,
        rem => (1u64 << rem) - 1,
    }
}

/// Owned bit vector of a fixed length.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Bitmap {
    words: Vec<u64>,
    len: usize,
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("len", &self.len)
            .field("ones", &self.count())
            .finish()
    }
}

impl Bitmap {
    /// Creates an all-clear bitmap of `len` bits.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; words_for(len)],
            len,
        }
    }

    /// Creates an all-set bitmap of `len` bits.
    pub fn full(len: usize) -> Self {
        let mut bitmap = Self::new(len);
        bitmap.set_all();
        bitmap
    }

    /// Copies a serialized bitmap out of a record buffer.
    pub fn from_slice(slice: &BitSlice<'_>) -> Self {
        let words = (0..words_for(slice.len)).map(|i| slice.word(i)).collect();
        Self {
            words,
            len: slice.len,
        }
    }

    /// Number of addressable bits.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true when the bitmap addresses no bits at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Backing words, low bit first.
    #[inline]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Tests bit `idx`.
    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        debug_assert!(idx < self.len, "bit {idx} out of range {}", self.len);
        (self.words[idx / WORD_BITS] >> (idx % WORD_BITS)) & 1 == 1
    }

    /// Sets bit `idx`.
    #[inline]
    pub fn set(&mut self, idx: usize) {
        debug_assert!(idx < self.len, "bit {idx} out of range {}", self.len);
        self.words[idx / WORD_BITS] |= 1u64 << (idx % WORD_BITS);
    }

    /// Clears bit `idx`.
    #[inline]
    pub fn clear(&mut self, idx: usize) {
        debug_assert!(idx < self.len, "bit {idx} out of range {}", self.len);
        self.words[idx / WORD_BITS] &= !(1u64 << (idx % WORD_BITS));
    }

    /// Sets every addressable bit.
    pub fn set_all(&mut self) {
        for word in &mut self.words {
            *word = u64::MAX;
        }
        if let Some(last) = self.words.last_mut() {
            *last &= tail_mask(self.len);
        }
    }

    /// Clears every bit.
    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    /// `self |= other`.
    pub fn or_assign(&mut self, other: &Bitmap) {
        debug_assert_eq!(self.len, other.len);
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst |= *src;
        }
    }

    /// `self &= other`.
    pub fn and_assign(&mut self, other: &Bitmap) {
        debug_assert_eq!(self.len, other.len);
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst &= *src;
        }
    }

    /// `self &= !other`.
    pub fn and_not_assign(&mut self, other: &Bitmap) {
        debug_assert_eq!(self.len, other.len);
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst &= !*src;
        }
    }

    /// `self &= slice`, reading the other operand from a record buffer.
    pub fn and_slice(&mut self, other: &BitSlice<'_>) {
        debug_assert_eq!(self.len, other.len);
        for (i, dst) in self.words.iter_mut().enumerate() {
            *dst &= other.word(i);
        }
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// True when no bit is set.
    pub fn is_all_clear(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// True when every addressable bit is set.
    pub fn is_all_set(&self) -> bool {
        self.count() == self.len
    }

    /// True when `self` and `other` share at least one set bit.
    pub fn intersects(&self, other: &Bitmap) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .any(|(a, b)| a & b != 0)
    }

    /// Iterates set bit positions in ascending order.
    pub fn iter_ones(&self) -> Ones<'_> {
        Ones::new(&self.words)
    }
}

/// Ascending iterator over set bit positions of a word array.
pub struct Ones<'a> {
    words: &'a [u64],
    word_idx: usize,
    current: u64,
}

impl<'a> Ones<'a> {
    fn new(words: &'a [u64]) -> Self {
        Self {
            words,
            word_idx: 0,
            current: words.first().copied().unwrap_or(0),
        }
    }
}

impl Iterator for Ones<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.word_idx * WORD_BITS + bit);
            }
            self.word_idx += 1;
            if self.word_idx >= self.words.len() {
                return None;
            }
            self.current = self.words[self.word_idx];
        }
    }
}

/// Read-only view of a bitmap serialized inside a byte buffer.
#[derive(Clone, Copy)]
pub struct BitSlice<'a> {
    bytes: &'a [u8],
    len: usize,
}

impl<'a> BitSlice<'a> {
    /// Wraps `bytes`, which must hold at least [`bytes_for`]`(len)` bytes.
    pub fn new(bytes: &'a [u8], len: usize) -> Self {
        debug_assert!(bytes.len() >= bytes_for(len));
        Self {
            bytes: &bytes[..bytes_for(len)],
            len,
        }
    }

    /// Number of addressable bits.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the view addresses no bits.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn word(&self, idx: usize) -> u64 {
        let start = idx * 8;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.bytes[start..start + 8]);
        u64::from_le_bytes(raw)
    }

    /// Tests bit `idx`.
    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        debug_assert!(idx < self.len);
        (self.bytes[idx / 8] >> (idx % 8)) & 1 == 1
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// True when no bit is set.
    pub fn is_all_clear(&self) -> bool {
        self.bytes.iter().all(|&b| b == 0)
    }

    /// True when every addressable bit is set.
    pub fn is_all_set(&self) -> bool {
        self.count() == self.len
    }

    /// Copies the view into an owned [`Bitmap`].
    pub fn to_bitmap(&self) -> Bitmap {
        Bitmap::from_slice(self)
    }

    /// Iterates set bit positions in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + 'a {
        let bytes = self.bytes;
        bytes.iter().enumerate().flat_map(|(byte_idx, &byte)| {
            (0..8usize)
                .filter(move |bit| (byte >> bit) & 1 == 1)
                .map(move |bit| byte_idx * 8 + bit)
        })
    }
}

/// Mutable view of a bitmap serialized inside a byte buffer.
pub struct BitSliceMut<'a> {
    bytes: &'a mut [u8],
    len: usize,
}

impl<'a> BitSliceMut<'a> {
    /// Wraps `bytes`, which must hold at least [`bytes_for`]`(len)` bytes.
    pub fn new(bytes: &'a mut [u8], len: usize) -> Self {
        debug_assert!(bytes.len() >= bytes_for(len));
        let end = bytes_for(len);
        Self {
            bytes: &mut bytes[..end],
            len,
        }
    }

    /// Reborrows as a read-only view.
    pub fn as_slice(&self) -> BitSlice<'_> {
        BitSlice {
            bytes: self.bytes,
            len: self.len,
        }
    }

    /// Tests bit `idx`.
    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        self.as_slice().get(idx)
    }

    /// Sets bit `idx`.
    #[inline]
    pub fn set(&mut self, idx: usize) {
        debug_assert!(idx < self.len);
        self.bytes[idx / 8] |= 1u8 << (idx % 8);
    }

    /// Clears bit `idx`.
    #[inline]
    pub fn clear(&mut self, idx: usize) {
        debug_assert!(idx < self.len);
        self.bytes[idx / 8] &= !(1u8 << (idx % 8));
    }

    /// Sets every addressable bit.
    pub fn set_all(&mut self) {
        self.copy_from(&Bitmap::full(self.len));
    }

    /// Clears every bit.
    pub fn clear_all(&mut self) {
        self.bytes.fill(0);
    }

    /// Overwrites the view with `src`.
    pub fn copy_from(&mut self, src: &Bitmap) {
        debug_assert_eq!(self.len, src.len());
        for (chunk, word) in self.bytes.chunks_exact_mut(8).zip(src.words()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
    }

    /// `self |= src`.
    pub fn or_assign(&mut self, src: &Bitmap) {
        let mut merged = self.as_slice().to_bitmap();
        merged.or_assign(src);
        self.copy_from(&merged);
    }

    /// `self &= !src`.
    pub fn and_not_assign(&mut self, src: &Bitmap) {
        let mut merged = self.as_slice().to_bitmap();
        merged.and_not_assign(src);
        self.copy_from(&merged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_bits_stay_clear() {
        let mut bm = Bitmap::full(70);
        assert_eq!(bm.count(), 70);
        assert!(bm.is_all_set());
        bm.clear(69);
        assert!(!bm.is_all_set());
        assert_eq!(bm.words()[1], (1u64 << 5) - 1);
    }

    #[test]
    fn set_algebra() {
        let mut a = Bitmap::new(100);
        let mut b = Bitmap::new(100);
        for i in (0..100).step_by(2) {
            a.set(i);
        }
        for i in (0..100).step_by(3) {
            b.set(i);
        }
        let mut both = a.clone();
        both.and_assign(&b);
        assert_eq!(both.iter_ones().collect::<Vec<_>>(), (0..100).step_by(6).collect::<Vec<_>>());
        let mut only_a = a.clone();
        only_a.and_not_assign(&b);
        assert!(!only_a.intersects(&b));
        let mut either = a.clone();
        either.or_assign(&b);
        assert_eq!(either.count(), 50 + 34 - 17);
    }

    #[test]
    fn slice_views_match_owned_layout() {
        let mut owned = Bitmap::new(130);
        for i in [0, 7, 8, 63, 64, 129] {
            owned.set(i);
        }
        let mut buf = vec![0u8; bytes_for(130)];
        BitSliceMut::new(&mut buf, 130).copy_from(&owned);
        let view = BitSlice::new(&buf, 130);
        assert_eq!(view.to_bitmap(), owned);
        assert_eq!(view.iter_ones().collect::<Vec<_>>(), vec![0, 7, 8, 63, 64, 129]);
        assert!(view.get(63));
        assert!(!view.get(62));

        let mut view = BitSliceMut::new(&mut buf, 130);
        view.set(1);
        view.clear(0);
        assert!(owned.get(0));
        assert!(view.get(1) && !view.get(0));
        view.set_all();
        assert!(view.as_slice().is_all_set());
        assert_eq!(buf[bytes_for(130) - 1], 0);
    }
}
