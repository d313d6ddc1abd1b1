/// One contiguous region of the final blob.
///
/// A block only knows its own bytes and alignment. Cross-block references
/// live in the owning [`crate::Arena`], keyed by block index, so blocks never
/// point at each other.
#[derive(Debug)]
pub(crate) struct Block {
    buf: Vec<u8>,
    align: usize,
    /// Address inside the blob, set by `assign_base` during finalize.
    base: Option<usize>,
    /// Zero bytes skipped in front of `base` to satisfy `align`.
    padding: usize,
}

impl Block {
    pub(crate) fn new(align: usize) -> Self {
        Self {
            buf: Vec::new(),
            align,
            base: None,
            padding: 0,
        }
    }

    /// Clears contents (keeping the allocation) and sets a new alignment.
    pub(crate) fn init(&mut self, align: usize) {
        self.buf.clear();
        self.align = align;
        self.base = None;
        self.padding = 0;
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn base(&self) -> Option<usize> {
        self.base
    }

    /// Returns the `len` bytes at `pos`, zero-extending the block first if
    /// they lie past its current end.
    pub(crate) fn reserve(&mut self, pos: usize, len: usize) -> &mut [u8] {
        let end = pos + len;
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        &mut self.buf[pos..end]
    }

    /// Places the block at the first aligned address at or after `candidate`
    /// and returns the address just past it. A block that already has a base
    /// keeps it, and `candidate` is passed through.
    pub(crate) fn assign_base(&mut self, candidate: usize) -> usize {
        match self.base {
            Some(base) => {
                debug_assert!(candidate >= base + self.buf.len());
                candidate
            }
            None => {
                let base = align_up(candidate, self.align);
                self.padding = base - candidate;
                self.base = Some(base);
                base + self.buf.len()
            }
        }
    }

    pub(crate) fn unassign_base(&mut self) {
        self.base = None;
        self.padding = 0;
    }

    /// Copies the block to `dst[base..base + len]` and zeroes the alignment
    /// padding in front of it. The caller guarantees the block is placed and
    /// `dst` is large enough.
    pub(crate) fn dump(&self, dst: &mut [u8]) {
        if let Some(base) = self.base {
            dst[base - self.padding..base].fill(0);
            dst[base..base + self.buf.len()].copy_from_slice(&self.buf);
        }
    }
}

/// Rounds `value` up to a multiple of `align` (a power of two).
pub fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
