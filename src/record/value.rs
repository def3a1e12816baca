/// Fixed-width per-world vertex value stored inside record buffers.
///
/// Values are compared bit-exactly through their encoded bytes, so two values
/// are "equal" for deduplication purposes exactly when `encode` produces the
/// same bytes.
pub trait VertexValue: Copy + Send + Sync + 'static {
    /// Encoded width in bytes.
    const SIZE: usize;

    /// Writes the value into `dst[..Self::SIZE]`.
    fn encode(&self, dst: &mut [u8]);

    /// Reads a value from `src[..Self::SIZE]`.
    fn decode(src: &[u8]) -> Self;

    /// Encodes into a fresh vector.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::SIZE];
        self.encode(&mut out);
        out
    }
}

macro_rules! impl_vertex_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl VertexValue for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn encode(&self, dst: &mut [u8]) {
                    dst[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode(src: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&src[..Self::SIZE]);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_vertex_value!(u8, u16, u32, u64, i32, i64, f32, f64);

impl<A: VertexValue, B: VertexValue> VertexValue for (A, B) {
    const SIZE: usize = A::SIZE + B::SIZE;

    fn encode(&self, dst: &mut [u8]) {
        self.0.encode(&mut dst[..A::SIZE]);
        self.1.encode(&mut dst[A::SIZE..A::SIZE + B::SIZE]);
    }

    fn decode(src: &[u8]) -> Self {
        (A::decode(&src[..A::SIZE]), B::decode(&src[A::SIZE..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodings_are_little_endian_and_exact() {
        assert_eq!(7u32.to_bytes(), vec![7, 0, 0, 0]);
        assert_eq!(f32::decode(&1.5f32.to_bytes()), 1.5);
        let pair = (3u16, -1i32);
        assert_eq!(<(u16, i32)>::SIZE, 6);
        assert_eq!(<(u16, i32)>::decode(&pair.to_bytes()), pair);
        assert_ne!(0.0f64.to_bytes(), (-0.0f64).to_bytes());
    }
}
