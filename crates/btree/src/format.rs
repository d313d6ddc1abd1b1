//! Static B-tree binary format: header, trailer, node geometry, type tags.
//!
//! ## Header (16 bytes, file offset 0)
//!
//! ```text
//! [magic: u32 "IDX!"][version: u16][trailer_size: u16]
//! [key_type: u32][key_version: u16][pos_type: u8][pad: u8]
//! ```
//!
//! ## Node (variable size, one arena blob each)
//!
//! ```text
//! [first_pos: P][items: offset i32][n_keys: u32][pad to 8][(key: K, pos: P) * n_keys]
//! ```
//!
//! ## Trailer (last `size_of(P) + 8` bytes)
//!
//! ```text
//! [root_pos: P][max_node_size: u32][tree_height: u32]
//! ```
//!
//! All integers are little-endian. With `tree_height == 0` the root position
//! is a position in the indexed data file, not a node.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use layout::{align_up, Encodable, OFFSET_LEN};
use std::fmt::Debug;
use std::io::{self, Read};
use tracing::warn;

use crate::error::{BTreeError, Result};

/// Magic number identifying static B-tree files (ASCII "IDX!").
pub const BTREE_MAGIC: u32 = u32::from_le_bytes(*b"IDX!");

/// Current format version.
pub const BTREE_VERSION: u16 = 0;

/// Size of the header in bytes.
pub const HEADER_BYTES: usize = 4 + 2 + 2 + 4 + 2 + 1 + 1;

/// Alignment of the items array inside a node.
pub const ITEM_ALIGN: usize = 8;

// Position type codes. The low two bits hold log2 of the byte width, bit 2
// marks signed types, and any of the upper bits marks a user-defined type.
pub const MASK_SIZE_EXP: u8 = 0x03;
pub const MASK_SIGNED: u8 = 0x04;
pub const MASK_USER_DEFINED: u8 = 0xf8;

pub const POS_UINT8: u8 = 0;
pub const POS_UINT16: u8 = 1;
pub const POS_UINT32: u8 = 2;
pub const POS_UINT64: u8 = 3;
pub const POS_INT8: u8 = MASK_SIGNED;
pub const POS_INT16: u8 = 1 | MASK_SIGNED;
pub const POS_INT32: u8 = 2 | MASK_SIGNED;
pub const POS_INT64: u8 = 3 | MASK_SIGNED;

/// Type code recorded for `[u8; N]` keys; the key version holds `N`.
pub const FIXED_BYTES_TYPE: u32 = u32::from_le_bytes(*b"FixB");

/// Identifies a key or position type in the file header.
pub trait TypeTag {
    const TYPE_CODE: u32;
    const TYPE_VERSION: u16 = 0;
}

/// A key storable in the tree: fixed-width, totally ordered.
pub trait IndexKey: Encodable + TypeTag + Ord + Clone + Debug {}

impl<T: Encodable + TypeTag + Ord + Clone + Debug> IndexKey for T {}

/// A position storable in the tree.
///
/// Positions name byte offsets: of child nodes inside the index, and of
/// records inside the indexed data file at the leaf level.
pub trait Position: Encodable + TypeTag + Copy + Ord + Debug {
    fn zero() -> Self;

    /// Converts a byte offset, or `None` if it does not fit.
    fn from_u64(value: u64) -> Option<Self>;

    /// Converts back to a byte offset, or `None` if negative.
    fn to_u64(self) -> Option<u64>;

    fn checked_add(self, rhs: Self) -> Option<Self>;
}

macro_rules! impl_integer_types {
    ($($ty:ty => $code:expr;)*) => {
        $(
            impl TypeTag for $ty {
                const TYPE_CODE: u32 = $code as u32;
            }

            impl Position for $ty {
                fn zero() -> Self {
                    0
                }

                fn from_u64(value: u64) -> Option<Self> {
                    <$ty>::try_from(value).ok()
                }

                fn to_u64(self) -> Option<u64> {
                    u64::try_from(self).ok()
                }

                fn checked_add(self, rhs: Self) -> Option<Self> {
                    <$ty>::checked_add(self, rhs)
                }
            }
        )*
    };
}

impl_integer_types! {
    u8 => POS_UINT8;
    u16 => POS_UINT16;
    u32 => POS_UINT32;
    u64 => POS_UINT64;
    i8 => POS_INT8;
    i16 => POS_INT16;
    i32 => POS_INT32;
    i64 => POS_INT64;
}

impl<const N: usize> TypeTag for [u8; N] {
    const TYPE_CODE: u32 = FIXED_BYTES_TYPE;
    const TYPE_VERSION: u16 = N as u16;
}

/// Encoded size of one `(key, pos)` item.
pub fn item_size<K: Encodable, P: Encodable>() -> usize {
    K::ENCODED_LEN + P::ENCODED_LEN
}

/// Bytes in front of a node's items array: `first_pos`, the items offset,
/// `n_keys`, then padding up to [`ITEM_ALIGN`].
pub fn node_header_size<P: Encodable>() -> usize {
    align_up(node_fixed_size::<P>(), ITEM_ALIGN)
}

/// Bytes of the fixed node fields, without padding.
pub fn node_fixed_size<P: Encodable>() -> usize {
    P::ENCODED_LEN + OFFSET_LEN + 4
}

/// Smallest `max_node_size` that fits one item.
pub fn min_node_size<K: Encodable, P: Encodable>() -> usize {
    node_header_size::<P>() + item_size::<K, P>()
}

/// Number of items (besides the implicit first position) a node of at most
/// `max_node_size` bytes can hold. Zero means the size is too small.
pub fn max_keys_per_node<K: Encodable, P: Encodable>(max_node_size: u32) -> usize {
    let header = node_header_size::<P>();
    let max = max_node_size as usize;
    if max < header {
        return 0;
    }
    (max - header) / item_size::<K, P>().max(1)
}

/// Per-file header describing how to interpret the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub version: u16,
    pub trailer_size: u16,
    pub key_type: u32,
    pub key_version: u16,
    pub pos_type: u8,
}

impl Header {
    /// Header for the current format with the given type codes.
    pub fn new<P: Position>(key_type: u32, key_version: u16, pos_type: u8) -> Self {
        Self {
            magic: BTREE_MAGIC,
            version: BTREE_VERSION,
            trailer_size: Trailer::<P>::ENCODED_LEN as u16,
            key_type,
            key_version,
            pos_type,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_BYTES] {
        let mut buf = [0u8; HEADER_BYTES];
        LittleEndian::write_u32(&mut buf[0..4], self.magic);
        LittleEndian::write_u16(&mut buf[4..6], self.version);
        LittleEndian::write_u16(&mut buf[6..8], self.trailer_size);
        LittleEndian::write_u32(&mut buf[8..12], self.key_type);
        LittleEndian::write_u16(&mut buf[12..14], self.key_version);
        buf[14] = self.pos_type;
        buf
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let magic = r.read_u32::<LittleEndian>()?;
        let version = r.read_u16::<LittleEndian>()?;
        let trailer_size = r.read_u16::<LittleEndian>()?;
        let key_type = r.read_u32::<LittleEndian>()?;
        let key_version = r.read_u16::<LittleEndian>()?;
        let pos_type = r.read_u8()?;
        let _pad = r.read_u8()?;
        Ok(Self {
            magic,
            version,
            trailer_size,
            key_type,
            key_version,
            pos_type,
        })
    }

    /// Checks that this header describes a tree of `K` keys and `P`
    /// positions. Key checks can be skipped when the caller validates the key
    /// type itself; user-defined position types are accepted as-is.
    pub fn validate<K: TypeTag, P: Position>(&self, check_key: bool) -> Result<()> {
        if self.magic != BTREE_MAGIC {
            return Err(BTreeError::Format(format!(
                "wrong magic {:#010x}",
                self.magic
            )));
        }
        if self.version != BTREE_VERSION {
            return Err(BTreeError::Format(format!(
                "unsupported version {}",
                self.version
            )));
        }
        if check_key && self.key_type != K::TYPE_CODE {
            return Err(BTreeError::Format(format!(
                "wrong key type {:#x}, expected {:#x}",
                self.key_type,
                K::TYPE_CODE
            )));
        }
        if check_key && self.key_version != K::TYPE_VERSION {
            return Err(BTreeError::Format(format!(
                "wrong key version {}, expected {}",
                self.key_version,
                K::TYPE_VERSION
            )));
        }
        if self.pos_type & MASK_USER_DEFINED != 0 {
            warn!(pos_type = self.pos_type, "user-defined position type, not verified");
        } else if u32::from(self.pos_type) != P::TYPE_CODE {
            return Err(BTreeError::Format(format!(
                "wrong position type {:#x}, expected {:#x}",
                self.pos_type,
                P::TYPE_CODE
            )));
        }
        if usize::from(self.trailer_size) != Trailer::<P>::ENCODED_LEN {
            return Err(BTreeError::Format(format!(
                "wrong trailer size {}",
                self.trailer_size
            )));
        }
        Ok(())
    }
}

/// Fixed-size end of the tree: where the root is, and how tall the tree is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer<P> {
    pub root_pos: P,
    pub max_node_size: u32,
    pub tree_height: u32,
}

impl<P: Position> Trailer<P> {
    pub const ENCODED_LEN: usize = P::ENCODED_LEN + 4 + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::ENCODED_LEN];
        let (pos, rest) = buf.split_at_mut(P::ENCODED_LEN);
        self.root_pos.encode(pos);
        rest[..4].copy_from_slice(&self.max_node_size.to_le_bytes());
        rest[4..].copy_from_slice(&self.tree_height.to_le_bytes());
        buf
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut pos = vec![0u8; P::ENCODED_LEN];
        r.read_exact(&mut pos)?;
        let max_node_size = r.read_u32::<LittleEndian>()?;
        let tree_height = r.read_u32::<LittleEndian>()?;
        Ok(Self {
            root_pos: P::decode(&pos),
            max_node_size,
            tree_height,
        })
    }
}
