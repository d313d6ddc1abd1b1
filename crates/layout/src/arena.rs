use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;

use crate::block::Block;
use crate::codec::Encodable;
use crate::error::LayoutError;
use crate::offset::{NULL_OFFSET, OFFSET_LEN};

type Result<T> = std::result::Result<T, LayoutError>;

/// Source of per-arena ids, so a handle from one arena is rejected by another.
static NEXT_ARENA_ID: AtomicU32 = AtomicU32::new(1);

/// Handle to a block owned by an [`Arena`].
///
/// Handles are only valid for the build cycle that created them: after
/// [`Arena::reset`] every old handle (the root's included) is rejected with
/// [`LayoutError::StaleBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    arena: u32,
    generation: u32,
    index: u32,
}

/// Where a pending offset field should end up pointing.
#[derive(Debug, Clone, Copy)]
struct Target {
    block: usize,
    offset: usize,
}

/// Two-phase builder for relocatable, pointer-free blobs.
///
/// The arena owns a root block plus a pool of subblocks. Callers write bytes
/// and offset fields into any block, then [`finalize`](Arena::finalize):
///
/// 1. every live block gets a linear address (root first, then subblocks in
///    creation order, each aligned as requested);
/// 2. every offset field is patched with the signed 32-bit displacement from
///    the field's own address to its target.
///
/// The finished blob is copied out with [`export_to`](Arena::export_to).
/// [`reset`](Arena::reset) starts a new, independent blob while keeping every
/// block's allocation for reuse.
///
/// ```
/// use layout::Arena;
///
/// let mut arena = Arena::new();
/// let root = arena.root();
/// let name = arena.subblock(4).unwrap();
/// arena.append_value(name, &5u32).unwrap();
/// arena.append(name, b"hello").unwrap();
/// arena.append_value(root, &42u32).unwrap();
/// arena.append_offset(root, Some(name), 0).unwrap();
///
/// let blob = arena.build().unwrap();
/// let addr = layout::resolve(&blob, 4).unwrap().unwrap();
/// assert_eq!(layout::read_string(&blob, addr).unwrap(), b"hello");
/// ```
#[derive(Debug)]
pub struct Arena {
    id: u32,
    generation: u32,
    /// `blocks[0]` is the root; `blocks[1..live]` are this cycle's subblocks.
    /// Entries past `live` are pooled for reuse.
    blocks: Vec<Block>,
    live: usize,
    /// Pending offset fields keyed by `(block index, field position)`.
    fixups: BTreeMap<(usize, usize), Target>,
    final_size: Option<usize>,
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Arena {
    /// Creates an empty arena whose root block has alignment 1.
    pub fn new() -> Self {
        Self {
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            generation: 0,
            blocks: vec![Block::new(1)],
            live: 1,
            fixups: BTreeMap::new(),
            final_size: None,
        }
    }

    /// Handle to the root block, which always lands at address 0.
    pub fn root(&self) -> BlockId {
        self.handle(0)
    }

    /// Requests a new block aligned to `align` bytes.
    ///
    /// Pooled blocks from earlier cycles are reused before anything new is
    /// allocated.
    ///
    /// # Errors
    ///
    /// [`LayoutError::BadAlignment`] if `align` is not a power of two, and
    /// [`LayoutError::Finalized`] while the arena is finalized.
    pub fn subblock(&mut self, align: usize) -> Result<BlockId> {
        self.ensure_writable()?;
        if !align.is_power_of_two() {
            return Err(LayoutError::BadAlignment(align));
        }

        if self.live < self.blocks.len() {
            self.blocks[self.live].init(align);
        } else {
            self.blocks.push(Block::new(align));
        }
        self.live += 1;
        Ok(self.handle(self.live - 1))
    }

    /// Returns `true` if `id` refers to a live block of this arena.
    pub fn contains(&self, id: BlockId) -> bool {
        self.index_of(id).is_ok()
    }

    /// Number of live blocks, root included.
    pub fn block_count(&self) -> usize {
        self.live
    }

    /// Current length of a block's contents.
    pub fn len(&self, id: BlockId) -> Result<usize> {
        Ok(self.blocks[self.index_of(id)?].len())
    }

    /// Returns `true` if the block has no contents yet.
    pub fn is_empty(&self, id: BlockId) -> Result<bool> {
        Ok(self.len(id)? == 0)
    }

    /// A block's contents as written so far. Offset fields read as the null
    /// sentinel until the arena is finalized.
    pub fn bytes(&self, id: BlockId) -> Result<&[u8]> {
        Ok(self.blocks[self.index_of(id)?].bytes())
    }

    /// Copies `bytes` to position `pos` of a block, growing it (zero-filled)
    /// as needed. Any pending offset field overlapped by the write is dropped.
    pub fn write(&mut self, id: BlockId, pos: usize, bytes: &[u8]) -> Result<()> {
        let index = self.writable_index(id)?;
        self.cancel_fixups(index, pos, bytes.len());
        self.blocks[index]
            .reserve(pos, bytes.len())
            .copy_from_slice(bytes);
        Ok(())
    }

    /// Appends `bytes` to a block and returns the position they landed at.
    pub fn append(&mut self, id: BlockId, bytes: &[u8]) -> Result<usize> {
        let pos = self.len(id)?;
        self.write(id, pos, bytes)?;
        Ok(pos)
    }

    /// Encodes `value` at position `pos` of a block.
    pub fn write_value<T: Encodable>(&mut self, id: BlockId, pos: usize, value: &T) -> Result<()> {
        let index = self.writable_index(id)?;
        self.cancel_fixups(index, pos, T::ENCODED_LEN);
        value.encode(self.blocks[index].reserve(pos, T::ENCODED_LEN));
        Ok(())
    }

    /// Encodes `value` at the end of a block and returns its position.
    pub fn append_value<T: Encodable>(&mut self, id: BlockId, value: &T) -> Result<usize> {
        let pos = self.len(id)?;
        self.write_value(id, pos, value)?;
        Ok(pos)
    }

    /// Writes a self-relative offset field at `pos` of block `id`.
    ///
    /// The field holds the null sentinel until [`finalize`](Arena::finalize),
    /// which patches it to point at `target_offset` bytes into `target`.
    /// With `target == None` the field stays null. Re-writing a field
    /// replaces its previous target.
    pub fn write_offset(
        &mut self,
        id: BlockId,
        pos: usize,
        target: Option<BlockId>,
        target_offset: usize,
    ) -> Result<()> {
        let target = target.map(|t| self.index_of(t)).transpose()?;
        self.write_value(id, pos, &NULL_OFFSET)?;
        if let Some(block) = target {
            let index = self.index_of(id)?;
            self.fixups.insert(
                (index, pos),
                Target {
                    block,
                    offset: target_offset,
                },
            );
        }
        Ok(())
    }

    /// Appends an offset field to a block and returns its position.
    pub fn append_offset(
        &mut self,
        id: BlockId,
        target: Option<BlockId>,
        target_offset: usize,
    ) -> Result<usize> {
        let pos = self.len(id)?;
        self.write_offset(id, pos, target, target_offset)?;
        Ok(pos)
    }

    /// Zero-extends a block to the next multiple of `align` and returns the
    /// new length. Used to align variable-length payloads inside a block.
    ///
    /// Block-relative padding only yields blob-relative alignment when the
    /// block's own alignment is at least `align`.
    pub fn append_padding(&mut self, id: BlockId, align: usize) -> Result<usize> {
        if !align.is_power_of_two() {
            return Err(LayoutError::BadAlignment(align));
        }
        let index = self.writable_index(id)?;
        let len = self.blocks[index].len();
        let padded = crate::block::align_up(len, align);
        self.blocks[index].reserve(len, padded - len);
        Ok(padded)
    }

    /// Assigns addresses to every live block and resolves every offset field.
    /// Returns the size of the finished blob.
    ///
    /// # Errors
    ///
    /// [`LayoutError::OffsetOverflow`] or [`LayoutError::NullCollision`] when a
    /// displacement cannot be represented. The arena is left unfinalized.
    pub fn finalize(&mut self) -> Result<usize> {
        self.ensure_writable()?;

        let mut top = 0;
        for block in &mut self.blocks[..self.live] {
            top = block.assign_base(top);
        }

        if let Err(e) = self.fixup_references() {
            self.unassign_all();
            return Err(e);
        }

        trace!(blocks = self.live, size = top, "arena finalized");
        self.final_size = Some(top);
        Ok(top)
    }

    /// Size of the finalized blob.
    pub fn final_size(&self) -> Result<usize> {
        self.final_size.ok_or(LayoutError::NotFinalized)
    }

    /// Returns `true` between [`finalize`](Arena::finalize) and the next
    /// [`resume`](Arena::resume) or [`reset`](Arena::reset).
    pub fn is_finalized(&self) -> bool {
        self.final_size.is_some()
    }

    /// Address a finalized block was placed at.
    pub fn base_address(&self, id: BlockId) -> Result<usize> {
        let index = self.index_of(id)?;
        self.blocks[index].base().ok_or(LayoutError::NotFinalized)
    }

    /// Copies the finalized blob into the front of `dst`, zeroing alignment
    /// padding between blocks.
    pub fn export_to(&self, dst: &mut [u8]) -> Result<()> {
        let needed = self.final_size()?;
        if dst.len() < needed {
            return Err(LayoutError::DestinationTooSmall {
                needed,
                actual: dst.len(),
            });
        }
        for block in &self.blocks[..self.live] {
            block.dump(dst);
        }
        Ok(())
    }

    /// Un-finalizes the arena so more data can be written. Contents and
    /// pending offset fields are kept; the next [`finalize`](Arena::finalize)
    /// lays everything out again from scratch.
    pub fn resume(&mut self) -> Result<()> {
        if !self.is_finalized() {
            return Err(LayoutError::NotFinalized);
        }
        self.unassign_all();
        Ok(())
    }

    /// Discards all contents and subblocks, keeping allocations for reuse.
    /// Every previously issued [`BlockId`] becomes stale.
    pub fn reset(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.blocks[0].init(1);
        self.live = 1;
        self.fixups.clear();
        self.final_size = None;
    }

    /// Finalizes, exports into a new buffer, and resets.
    pub fn build(&mut self) -> Result<Vec<u8>> {
        let size = self.finalize()?;
        let mut out = vec![0u8; size];
        self.export_to(&mut out)?;
        self.reset();
        Ok(out)
    }

    fn fixup_references(&mut self) -> Result<()> {
        for (&(src, pos), target) in &self.fixups {
            // Every live block was just placed.
            let src_base = self.blocks[src].base().ok_or(LayoutError::NotFinalized)?;
            let dst_base = self.blocks[target.block]
                .base()
                .ok_or(LayoutError::NotFinalized)?;

            let field = src_base + pos;
            let target_addr = dst_base + target.offset;
            let displacement = target_addr as i64 - field as i64;

            let value = i32::try_from(displacement).map_err(|_| LayoutError::OffsetOverflow {
                field,
                target: target_addr,
                displacement,
            })?;
            if value == NULL_OFFSET {
                return Err(LayoutError::NullCollision { field });
            }
            LittleEndian::write_i32(self.blocks[src].reserve(pos, OFFSET_LEN), value);
        }
        Ok(())
    }

    fn unassign_all(&mut self) {
        for block in &mut self.blocks[..self.live] {
            block.unassign_base();
        }
        self.final_size = None;
    }

    /// Drops pending offset fields of block `index` overlapping `pos..pos + len`.
    fn cancel_fixups(&mut self, index: usize, pos: usize, len: usize) {
        if len == 0 || self.fixups.is_empty() {
            return;
        }
        let first = pos.saturating_sub(OFFSET_LEN - 1);
        let stale: Vec<_> = self
            .fixups
            .range((index, first)..(index, pos + len))
            .map(|(key, _)| *key)
            .collect();
        for key in stale {
            self.fixups.remove(&key);
        }
    }

    fn handle(&self, index: usize) -> BlockId {
        BlockId {
            arena: self.id,
            generation: self.generation,
            index: index as u32,
        }
    }

    fn index_of(&self, id: BlockId) -> Result<usize> {
        let index = id.index as usize;
        if id.arena != self.id || id.generation != self.generation || index >= self.live {
            return Err(LayoutError::StaleBlock);
        }
        Ok(index)
    }

    fn writable_index(&self, id: BlockId) -> Result<usize> {
        self.ensure_writable()?;
        self.index_of(id)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_finalized() {
            Err(LayoutError::Finalized)
        } else {
            Ok(())
        }
    }
}
