//! Reading self-relative offsets and values back out of an exported blob.
//!
//! An offset field is a little-endian `i32`. Added to the address of the
//! field itself it yields the address of the referenced data. The value
//! [`NULL_OFFSET`] means "no reference"; a field can never legitimately
//! point one byte past its own start.

use crate::codec::Encodable;
use crate::error::LayoutError;

/// Sentinel stored in an offset field that references nothing.
pub const NULL_OFFSET: i32 = 1;

/// Encoded size of an offset field.
pub const OFFSET_LEN: usize = 4;

/// Decodes a `T` stored at `at`, checking bounds first.
pub fn read_value<T: Encodable>(blob: &[u8], at: usize) -> Result<T, LayoutError> {
    Ok(T::decode(slice_at(blob, at, T::ENCODED_LEN)?))
}

/// Returns the raw displacement stored at `field`, or `None` for a null
/// reference.
pub fn read_offset(blob: &[u8], field: usize) -> Result<Option<i32>, LayoutError> {
    let raw: i32 = read_value(blob, field)?;
    Ok((raw != NULL_OFFSET).then_some(raw))
}

/// Resolves the offset field at `field` to an absolute address in `blob`.
///
/// The resolved address may equal `blob.len()` (an empty trailing block);
/// anything outside `0..=blob.len()` is reported as truncation.
pub fn resolve(blob: &[u8], field: usize) -> Result<Option<usize>, LayoutError> {
    let Some(displacement) = read_offset(blob, field)? else {
        return Ok(None);
    };
    let addr = field as i64 + i64::from(displacement);
    if addr < 0 || addr as u64 > blob.len() as u64 {
        return Err(LayoutError::Truncated {
            at: field,
            len: OFFSET_LEN,
            size: blob.len(),
        });
    }
    Ok(Some(addr as usize))
}

/// Reads a length-prefixed string (`len: u32` then `len` bytes) at `at`.
pub fn read_string(blob: &[u8], at: usize) -> Result<&[u8], LayoutError> {
    let len: u32 = read_value(blob, at)?;
    slice_at(blob, at + 4, len as usize)
}

/// Borrows `len` bytes at `at`, or reports how far the read overran.
pub fn slice_at(blob: &[u8], at: usize, len: usize) -> Result<&[u8], LayoutError> {
    at.checked_add(len)
        .and_then(|end| blob.get(at..end))
        .ok_or(LayoutError::Truncated {
            at,
            len,
            size: blob.len(),
        })
}
