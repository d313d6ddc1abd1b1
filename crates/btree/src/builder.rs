use config::IndexConfig;
use std::io::Write;
use tracing::{debug, info, warn};

use crate::error::{BTreeError, Result};
use crate::format::{
    max_keys_per_node, min_node_size, Header, IndexKey, Position, Trailer, HEADER_BYTES,
};
use crate::node_builder::{write_once, BTreeNodeBuilder};

/// Bulk-loads a static B-tree from keys that arrive in sorted order.
///
/// The builder writes to `sink` as it goes: the header on construction,
/// each node as soon as it fills, and the remaining partial nodes plus the
/// trailer on [`finish`](BTreeBuilder::finish). Nothing is ever rewritten,
/// so the sink only needs [`Write`].
///
/// Level 0 maps keys to positions in the indexed data file. Each emitted
/// node becomes one entry in the level above, keyed by its first key. The
/// tree therefore grows upward while it is written, one level whenever the
/// current top level fills a node.
///
/// The index is sparse: after the first key, a key is only indexed if its
/// position is at least `min_separation` past the last indexed position.
/// Lookups for skipped keys land on the nearest indexed key below them, and
/// the caller scans forward from there.
///
/// Only [`finish`](BTreeBuilder::finish) writes the trailer. A builder
/// dropped before that leaves an index no reader will open, and logs a
/// warning if any key had been added.
///
/// # Example
///
/// ```
/// use btree::{BTreeBuilder, BTreeSlice};
///
/// let mut builder = BTreeBuilder::<u64, u64, _>::new(Vec::new(), 4096, 0)?;
/// for key in 0..200u64 {
///     builder.add_key(key, key * 100)?;
/// }
/// let (height, bytes) = builder.finish()?;
/// assert_eq!(height, 1);
///
/// let tree = BTreeSlice::<u64, u64>::new(&bytes)?;
/// assert_eq!(tree.lookup(&150)?, 15_000);
/// # Ok::<(), btree::BTreeError>(())
/// ```
pub struct BTreeBuilder<K, P, W: Write> {
    /// Taken by `finish`.
    sink: Option<W>,
    levels: Vec<BTreeNodeBuilder<K, P>>,
    max_keys: usize,
    min_separation: P,
    /// Last key passed to `add_key`, indexed or not.
    last_key: Option<K>,
    /// Position of the last indexed key.
    last_pos: P,
    root_pos: P,
    max_node_size: u32,
    tree_height: u32,
    written: u64,
    node_count: u64,
    poisoned: bool,
}

impl<K: IndexKey, P: Position, W: Write> BTreeBuilder<K, P, W> {
    /// Creates a builder that records the type codes of `K` and `P` in the
    /// header and writes that header to `sink`.
    ///
    /// # Errors
    ///
    /// - [`BTreeError::NodeTooSmall`] if a node of `max_node_size` bytes
    ///   cannot hold its fixed fields plus one item.
    /// - [`BTreeError::Config`] if `min_separation` does not fit `P`.
    /// - [`BTreeError::Io`] / [`BTreeError::ShortWrite`] if the header write fails.
    pub fn new(sink: W, max_node_size: u32, min_separation: u64) -> Result<Self> {
        Self::with_type_codes(
            sink,
            max_node_size,
            min_separation,
            K::TYPE_CODE,
            K::TYPE_VERSION,
            P::TYPE_CODE,
        )
    }

    /// Like [`new`](BTreeBuilder::new) with explicit header type codes, for
    /// keys or positions that share an encoding with a built-in type but
    /// should be told apart on disk.
    ///
    /// `pos_type` must fit in the header's single byte.
    pub fn with_type_codes(
        mut sink: W,
        max_node_size: u32,
        min_separation: u64,
        key_type: u32,
        key_version: u16,
        pos_type: u32,
    ) -> Result<Self> {
        let max_keys = max_keys_per_node::<K, P>(max_node_size);
        if max_keys == 0 {
            return Err(BTreeError::NodeTooSmall {
                min: min_node_size::<K, P>(),
                actual: max_node_size,
            });
        }
        let pos_code = u8::try_from(pos_type)
            .map_err(|_| BTreeError::Config(format!("position type {pos_type:#x} exceeds one byte")))?;
        let min_sep = P::from_u64(min_separation).ok_or_else(|| {
            BTreeError::Config(format!(
                "min_separation {min_separation} does not fit the position type"
            ))
        })?;

        let header = Header::new::<P>(key_type, key_version, pos_code);
        write_once(&mut sink, &header.encode())?;

        Ok(Self {
            sink: Some(sink),
            levels: Vec::new(),
            max_keys,
            min_separation: min_sep,
            last_key: None,
            last_pos: P::zero(),
            root_pos: P::zero(),
            max_node_size,
            tree_height: 0,
            written: HEADER_BYTES as u64,
            node_count: 0,
            poisoned: false,
        })
    }

    /// Creates a builder from validated settings.
    pub fn from_config(sink: W, config: &IndexConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| BTreeError::Config(e.to_string()))?;
        Self::new(sink, config.max_node_size, config.min_separation)
    }

    /// Offers `(key, pos)` to the index.
    ///
    /// Returns `Ok(true)` if the pair was indexed, and `Ok(false)` if it
    /// was skipped: `key` repeats the previous key, or `pos` is closer than
    /// `min_separation` to the last indexed position. The first key is
    /// always indexed.
    ///
    /// # Errors
    ///
    /// - [`BTreeError::Ordering`] if `key` is smaller than the previous key.
    ///   The builder is left as it was and may continue with larger keys.
    /// - [`BTreeError::Aborted`] if an earlier write or encoding failed.
    /// - Any error from writing a node. The builder is unusable afterwards.
    pub fn add_key(&mut self, key: K, pos: P) -> Result<bool> {
        if self.poisoned {
            return Err(BTreeError::Aborted);
        }

        let is_first = match &self.last_key {
            None => true,
            Some(last) if key < *last => return Err(BTreeError::Ordering),
            Some(last) if key == *last => return Ok(false),
            Some(_) => false,
        };
        self.last_key = Some(key.clone());

        if is_first {
            self.root_pos = pos;
        } else {
            match self.last_pos.checked_add(self.min_separation) {
                Some(next) if pos >= next => {}
                _ => return Ok(false),
            }
        }
        self.last_pos = pos;

        let res = self.insert(key, pos, 0);
        self.poison_on_err(res)?;
        Ok(true)
    }

    /// Writes every partial node and the trailer, and hands back the sink.
    /// Returns the tree height along with it; a height of zero means the
    /// root position points straight into the data file.
    pub fn finish(mut self) -> Result<(u32, W)> {
        if self.poisoned {
            return Err(BTreeError::Aborted);
        }
        let res = self.write_tail();
        self.poison_on_err(res)?;

        info!(
            height = self.tree_height,
            root = ?self.root_pos,
            nodes = self.node_count,
            bytes = self.written,
            "b-tree index finished"
        );
        let sink = self.sink.take().ok_or(BTreeError::Aborted)?;
        Ok((self.tree_height, sink))
    }

    /// Height the tree would have if it were finished now, ignoring
    /// unwritten partial nodes.
    pub fn tree_height(&self) -> u32 {
        self.tree_height
    }

    /// Bytes handed to the sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Nodes written so far.
    pub fn node_count(&self) -> u64 {
        self.node_count
    }

    /// Items a node holds besides its implicit first position.
    pub fn max_keys_per_node(&self) -> usize {
        self.max_keys
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Flushes the partial nodes and writes the trailer.
    fn write_tail(&mut self) -> Result<()> {
        // Lower levels first: each emission adds an entry to the level above.
        let mut level = 0;
        while level < self.levels.len() {
            let node = &self.levels[level];
            let pending = if level + 1 == self.levels.len() {
                !node.is_empty()
            } else {
                node.has_first()
            };
            if pending {
                self.emit_level(level)?;
            }
            level += 1;
        }

        let trailer = Trailer {
            root_pos: self.root_pos,
            max_node_size: self.max_node_size,
            tree_height: self.tree_height,
        };
        let bytes = trailer.encode();
        let sink = self.sink.as_mut().ok_or(BTreeError::Aborted)?;
        write_once(sink, &bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn insert(&mut self, key: K, pos: P, level: usize) -> Result<()> {
        while self.levels.len() <= level {
            self.levels.push(BTreeNodeBuilder::new(self.max_keys)?);
        }
        if self.levels[level].is_full() {
            self.emit_level(level)?;
        }
        self.levels[level].add_key(key, pos)
    }

    fn emit_level(&mut self, level: usize) -> Result<()> {
        let node_pos = P::from_u64(self.written).ok_or(BTreeError::PositionOverflow(self.written))?;
        let first_key = self.levels[level]
            .first_key()
            .cloned()
            .ok_or_else(|| BTreeError::Config(format!("level {level} has no keys to emit")))?;

        let items = self.levels[level].len();
        let sink = self.sink.as_mut().ok_or(BTreeError::Aborted)?;
        let size = self.levels[level].emit(sink)?;

        self.root_pos = node_pos;
        self.tree_height = self.tree_height.max(level as u32 + 1);
        self.written += size as u64;
        self.node_count += 1;
        debug!(level, pos = ?node_pos, items, size, "emitted b-tree node");

        self.levels[level].reset()?;
        self.insert(first_key, node_pos, level + 1)
    }

    fn poison_on_err<T>(&mut self, res: Result<T>) -> Result<T> {
        if let Err(e) = &res {
            if !self.poisoned {
                warn!(error = %e, "b-tree bulk load aborted");
            }
            self.poisoned = true;
        }
        res
    }
}

impl<K, P, W: Write> Drop for BTreeBuilder<K, P, W> {
    fn drop(&mut self) {
        if self.sink.is_some() && self.last_key.is_some() && !self.poisoned {
            warn!(
                nodes = self.node_count,
                bytes = self.written,
                "b-tree builder dropped before finish; index has no trailer"
            );
        }
    }
}
