use std::collections::HashMap;

use crate::arena::{Arena, BlockId};
use crate::error::LayoutError;

/// Alignment of interned string blocks (the `u32` length prefix).
const STRING_ALIGN: usize = 4;

/// Interns byte strings as arena subblocks so each distinct string is stored
/// once per blob.
///
/// Every string becomes a 4-aligned block holding `len: u32` followed by the
/// bytes; read it back with [`crate::read_string`]. Handles are tied to the
/// arena's build cycle: once the arena is reset (or a different arena is
/// passed in) the pool forgets its entries on the next
/// [`intern`](StringPool::intern).
#[derive(Debug, Default)]
pub struct StringPool {
    blocks: HashMap<Vec<u8>, BlockId>,
    data_size: usize,
    /// Root handle of the arena cycle the entries belong to.
    cycle: Option<BlockId>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the block holding `s`, creating it on first use.
    pub fn intern(&mut self, arena: &mut Arena, s: &[u8]) -> Result<BlockId, LayoutError> {
        if !self.cycle.is_some_and(|root| arena.contains(root)) {
            self.clear();
            self.cycle = Some(arena.root());
        }
        if let Some(&id) = self.blocks.get(s) {
            return Ok(id);
        }

        let len = u32::try_from(s.len()).map_err(|_| LayoutError::StringTooLong(s.len()))?;
        let id = arena.subblock(STRING_ALIGN)?;
        arena.append_value(id, &len)?;
        arena.append(id, s)?;

        self.data_size += 4 + crate::block::align_up(s.len(), STRING_ALIGN);
        self.blocks.insert(s.to_vec(), id);
        Ok(id)
    }

    /// Approximate number of blob bytes taken by interned strings, padding
    /// included.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Number of distinct strings interned this cycle.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Forgets every interned string. Call alongside [`Arena::reset`].
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.data_size = 0;
        self.cycle = None;
    }
}
