//! # Static B-tree - sparse, bulk-loaded, read-only index
//!
//! Maps keys of a sorted data file to byte positions in that file. The tree
//! is written once in a single forward pass over pre-sorted keys and never
//! modified afterwards; readers work directly on its bytes.
//!
//! ## File layout
//!
//! ```text
//! ┌────────┬────────┬────────┬─────┬─────────┬─────────┐
//! │ header │ leaf 0 │ leaf 1 │ ... │  root   │ trailer │
//! └────────┴────────┴────────┴─────┴─────────┴─────────┘
//!   16 B     nodes, written as they fill;       root_pos, node size,
//!            parents after their children       tree height
//! ```
//!
//! Each node is a relocatable blob built with the `layout` crate: a first
//! position, a self-relative offset to the items array, the item count,
//! then `(key, pos)` items sorted by key. See [`format`] for exact layouts.
//!
//! ## Lookup
//!
//! Start at the trailer's `root_pos` with `level = tree_height`. While
//! `level > 0`, read the node, take the position of the greatest key
//! `<= query`, and step down. At level 0 that position is the answer: an
//! offset into the data file, where the caller scans forward.
//!
//! ## Components
//!
//! - [`BTreeBuilder`]: bulk loader writing to any [`std::io::Write`]
//! - [`BTreeNodeBuilder`]: encodes one node into a reusable arena
//! - [`BTreeNode`]: zero-copy view of one node
//! - [`BTreeSlice`]: whole-tree lookups over bytes in memory
//! - [`BTreeReader`]: whole-tree lookups over a file, one read per level

mod builder;
mod error;
pub mod format;
mod node;
mod node_builder;
mod reader;

pub use builder::BTreeBuilder;
pub use error::{BTreeError, Result};
pub use format::{Header, IndexKey, Position, Trailer, TypeTag};
pub use node::{BTreeItem, BTreeNode};
pub use node_builder::BTreeNodeBuilder;
pub use reader::{BTreeReader, BTreeSlice};

#[cfg(test)]
mod tests;
