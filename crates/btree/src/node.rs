use layout::{read_value, resolve, slice_at, OFFSET_LEN};
use std::cmp::Ordering;
use std::marker::PhantomData;

use crate::error::{BTreeError, Result};
use crate::format::{item_size, node_fixed_size, IndexKey, Position};

/// A separator inside a node: keys `>= key` live under `pos`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTreeItem<K, P> {
    pub key: K,
    pub pos: P,
}

/// Read-only view of one encoded node.
///
/// A node with `n` items covers `n + 1` key ranges: everything below the
/// first item maps to `first_pos`, and each item maps its own key up to the
/// next item's key to its `pos`. At the leaf level the positions are offsets
/// into the indexed data file; above it they are offsets of child nodes.
///
/// The view borrows the node bytes and never copies them.
/// [`parse`](BTreeNode::parse) checks bounds in constant time and lookups
/// decode only the items they touch. Key ordering is checked separately by
/// [`validate`](BTreeNode::validate), which reads every key.
#[derive(Debug, Clone, Copy)]
pub struct BTreeNode<'a, K, P> {
    first_pos: P,
    items: &'a [u8],
    len: usize,
    /// Offset just past the node's last byte.
    end: usize,
    _key: PhantomData<K>,
}

impl<'a, K: IndexKey, P: Position> BTreeNode<'a, K, P> {
    /// Interprets `bytes` as a node. `bytes` may extend past the node's end.
    ///
    /// # Errors
    ///
    /// [`BTreeError::Format`] if the fixed fields or the items array fall
    /// outside `bytes`.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < node_fixed_size::<P>() {
            return Err(BTreeError::Format(format!(
                "node of {} bytes is shorter than its fixed fields",
                bytes.len()
            )));
        }
        let first_pos: P = read_value(bytes, 0)?;
        let items_field = P::ENCODED_LEN;
        let len = read_value::<u32>(bytes, items_field + OFFSET_LEN)? as usize;

        let (items, end) = match resolve(bytes, items_field) {
            Ok(Some(at)) => {
                let span = len
                    .checked_mul(item_size::<K, P>())
                    .ok_or_else(|| BTreeError::Format(format!("item count {len} overflows")))?;
                let items = slice_at(bytes, at, span).map_err(|_| {
                    BTreeError::Format(format!(
                        "node items ({len} at {at:#x}) run past the {} bytes read",
                        bytes.len()
                    ))
                })?;
                (items, (at + span).max(node_fixed_size::<P>()))
            }
            Ok(None) if len == 0 => (&bytes[..0], node_fixed_size::<P>()),
            Ok(None) => {
                return Err(BTreeError::Format(format!(
                    "null items array with {len} items"
                )))
            }
            Err(e) => return Err(BTreeError::Format(format!("bad items offset: {e}"))),
        };

        Ok(Self {
            first_pos,
            items,
            len,
            end,
            _key: PhantomData,
        })
    }

    /// [`parse`](BTreeNode::parse) followed by [`validate`](BTreeNode::validate).
    pub fn parse_validated(bytes: &'a [u8]) -> Result<Self> {
        let node = Self::parse(bytes)?;
        node.validate()?;
        Ok(node)
    }

    /// Checks that item keys are strictly ascending. Lookups on a node that
    /// fails this return arbitrary positions.
    pub fn validate(&self) -> Result<()> {
        for i in 1..self.len {
            if self.key(i - 1) >= self.key(i) {
                return Err(BTreeError::Format(format!(
                    "node keys not strictly ascending at item {i}"
                )));
            }
        }
        Ok(())
    }

    /// Bytes from the node's start to the end of its items array.
    pub fn encoded_len(&self) -> usize {
        self.end
    }

    /// Position for keys below the first item.
    pub fn first_pos(&self) -> P {
        self.first_pos
    }

    /// Number of items, not counting the implicit first position.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn item(&self, index: usize) -> Option<BTreeItem<K, P>> {
        (index < self.len).then(|| BTreeItem {
            key: self.key(index),
            pos: self.pos(index),
        })
    }

    pub fn items(&self) -> impl Iterator<Item = BTreeItem<K, P>> + '_ {
        (0..self.len).map(move |i| BTreeItem {
            key: self.key(i),
            pos: self.pos(i),
        })
    }

    /// Position of the greatest indexed key `<= key`, or
    /// [`first_pos`](BTreeNode::first_pos) if every item key is greater.
    pub fn lookup(&self, key: &K) -> P {
        self.lookup_by(|stored| stored.cmp(key))
    }

    /// Like [`lookup`](BTreeNode::lookup) for a query of another type.
    /// `cmp(stored)` must order a stored key against the query.
    pub fn lookup_by<F>(&self, mut cmp: F) -> P
    where
        F: FnMut(&K) -> Ordering,
    {
        // Upper bound: first item whose key is greater than the query.
        let (mut lo, mut hi) = (0, self.len);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if cmp(&self.key(mid)) == Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        if lo == 0 {
            self.first_pos
        } else {
            self.pos(lo - 1)
        }
    }

    fn key(&self, index: usize) -> K {
        let at = index * item_size::<K, P>();
        K::decode(&self.items[at..at + K::ENCODED_LEN])
    }

    fn pos(&self, index: usize) -> P {
        let at = index * item_size::<K, P>() + K::ENCODED_LEN;
        P::decode(&self.items[at..at + P::ENCODED_LEN])
    }
}
