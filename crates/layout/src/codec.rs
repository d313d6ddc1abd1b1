//! Fixed-width little-endian value codec.
//!
//! Every value stored inside a [`crate::Arena`] block or read back from an
//! exported blob goes through [`Encodable`]. Encodings are fixed-size and
//! position-independent so a blob can be reinterpreted in place without a
//! deserialization pass.

use byteorder::{ByteOrder, LittleEndian};

/// A value with a fixed-size little-endian byte encoding.
///
/// `encode` is always handed a slice of exactly [`Encodable::ENCODED_LEN`]
/// bytes, and `decode` is always handed at least that many.
pub trait Encodable: Sized {
    /// Number of bytes the encoding occupies.
    const ENCODED_LEN: usize;

    /// Writes `self` into `dst` (`dst.len() == ENCODED_LEN`).
    fn encode(&self, dst: &mut [u8]);

    /// Reads a value from the first `ENCODED_LEN` bytes of `src`.
    fn decode(src: &[u8]) -> Self;
}

impl Encodable for u8 {
    const ENCODED_LEN: usize = 1;

    fn encode(&self, dst: &mut [u8]) {
        dst[0] = *self;
    }

    fn decode(src: &[u8]) -> Self {
        src[0]
    }
}

impl Encodable for i8 {
    const ENCODED_LEN: usize = 1;

    fn encode(&self, dst: &mut [u8]) {
        dst[0] = *self as u8;
    }

    fn decode(src: &[u8]) -> Self {
        src[0] as i8
    }
}

macro_rules! impl_encodable_le {
    ($($ty:ty => $len:expr, $write:ident, $read:ident;)*) => {
        $(
            impl Encodable for $ty {
                const ENCODED_LEN: usize = $len;

                fn encode(&self, dst: &mut [u8]) {
                    LittleEndian::$write(dst, *self);
                }

                fn decode(src: &[u8]) -> Self {
                    LittleEndian::$read(src)
                }
            }
        )*
    };
}

impl_encodable_le! {
    u16 => 2, write_u16, read_u16;
    u32 => 4, write_u32, read_u32;
    u64 => 8, write_u64, read_u64;
    i16 => 2, write_i16, read_i16;
    i32 => 4, write_i32, read_i32;
    i64 => 8, write_i64, read_i64;
}

/// Fixed-length byte strings compare lexicographically, which makes them a
/// convenient key type for prefix-encoded or hashed row keys.
impl<const N: usize> Encodable for [u8; N] {
    const ENCODED_LEN: usize = N;

    fn encode(&self, dst: &mut [u8]) {
        dst.copy_from_slice(self);
    }

    fn decode(src: &[u8]) -> Self {
        let mut out = [0u8; N];
        out.copy_from_slice(&src[..N]);
        out
    }
}

/// Encodes `value` into a freshly allocated buffer.
pub fn to_bytes<T: Encodable>(value: &T) -> Vec<u8> {
    let mut buf = vec![0u8; T::ENCODED_LEN];
    value.encode(&mut buf);
    buf
}
