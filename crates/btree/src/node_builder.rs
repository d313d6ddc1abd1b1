use layout::{Arena, BlockId};
use std::io::Write;
use std::marker::PhantomData;

use crate::error::{BTreeError, Result};
use crate::format::{IndexKey, Position, ITEM_ALIGN};

/// Encodes one tree node at a time into a reusable [`Arena`].
///
/// The first `(key, pos)` added to a node is special: its position becomes
/// the node's `first_pos` field and its key is kept aside (it is what the
/// parent level uses to point at this node) but never written. Every later
/// pair is appended to the items array.
///
/// After [`emit`](BTreeNodeBuilder::emit) the caller resets the builder;
/// the arena keeps its buffers, so encoding many nodes allocates only for
/// the first few.
pub struct BTreeNodeBuilder<K, P> {
    arena: Arena,
    items: BlockId,
    out_buf: Vec<u8>,
    first_key: Option<K>,
    n_keys: usize,
    max_keys: usize,
    _pos: PhantomData<P>,
}

impl<K: IndexKey, P: Position> BTreeNodeBuilder<K, P> {
    /// Creates a builder for nodes of at most `max_keys` items.
    pub fn new(max_keys: usize) -> Result<Self> {
        let mut arena = Arena::new();
        let items = arena.subblock(ITEM_ALIGN)?;
        Ok(Self {
            arena,
            items,
            out_buf: Vec::new(),
            first_key: None,
            n_keys: 0,
            max_keys,
            _pos: PhantomData,
        })
    }

    /// Adds a `(key, pos)` pair to the current node.
    pub fn add_key(&mut self, key: K, pos: P) -> Result<()> {
        if self.first_key.is_none() {
            let root = self.arena.root();
            self.arena.append_value(root, &pos)?;
            self.first_key = Some(key);
        } else {
            self.arena.append_value(self.items, &key)?;
            self.arena.append_value(self.items, &pos)?;
            self.n_keys += 1;
        }
        Ok(())
    }

    /// Finalizes the node and writes it to `sink` in a single `write` call.
    /// Returns the number of bytes written.
    ///
    /// A failed write can be retried without re-encoding; the node stays
    /// finalized until [`reset`](BTreeNodeBuilder::reset).
    ///
    /// # Errors
    ///
    /// [`BTreeError::ShortWrite`] if the sink takes fewer bytes than the node
    /// holds. No retry is attempted.
    pub fn emit<W: Write>(&mut self, sink: &mut W) -> Result<usize> {
        if self.first_key.is_none() {
            return Err(BTreeError::Config("cannot emit a node without keys".into()));
        }

        if !self.arena.is_finalized() {
            let root = self.arena.root();
            self.arena.append_offset(root, Some(self.items), 0)?;
            self.arena.append_value(root, &(self.n_keys as u32))?;

            let size = self.arena.finalize()?;
            self.out_buf.resize(size, 0);
            self.arena.export_to(&mut self.out_buf)?;
        }

        write_once(sink, &self.out_buf)?;
        Ok(self.out_buf.len())
    }

    /// Clears the node so a new one can be built.
    pub fn reset(&mut self) -> Result<()> {
        self.arena.reset();
        self.items = self.arena.subblock(ITEM_ALIGN)?;
        self.first_key = None;
        self.n_keys = 0;
        Ok(())
    }

    /// Key of the first pair added since the last reset. It is not stored
    /// in the node itself.
    pub fn first_key(&self) -> Option<&K> {
        self.first_key.as_ref()
    }

    /// Returns `true` once a first pair has been added.
    pub fn has_first(&self) -> bool {
        self.first_key.is_some()
    }

    /// Number of items, not counting the implicit first pair.
    pub fn len(&self) -> usize {
        self.n_keys
    }

    /// Returns `true` if no items beyond the implicit first pair exist. A
    /// node holding only its first pair is still empty.
    pub fn is_empty(&self) -> bool {
        self.n_keys == 0
    }

    /// Returns `true` once the node holds its maximum number of items.
    pub fn is_full(&self) -> bool {
        self.n_keys >= self.max_keys
    }
}

/// Hands `buf` to `sink` once. A partial write is an error, not a retry.
pub(crate) fn write_once<W: Write>(sink: &mut W, buf: &[u8]) -> Result<()> {
    let written = sink.write(buf)?;
    if written != buf.len() {
        return Err(BTreeError::ShortWrite {
            written,
            expected: buf.len(),
        });
    }
    Ok(())
}
