use layout::LayoutError;
use std::io;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BTreeError>;

/// Errors raised while building or reading a static B-tree.
///
/// Every variant is fatal for the build or lookup in progress. Keys that are
/// merely skipped (duplicates, too close to the previous entry) are not
/// errors; [`crate::BTreeBuilder::add_key`] reports them as `Ok(false)`.
#[derive(Debug, Error)]
pub enum BTreeError {
    /// Invalid construction parameters.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// `max_node_size` cannot hold the node header plus one item.
    #[error("minimum node size is {min} bytes, got {actual}")]
    NodeTooSmall { min: usize, actual: u32 },

    /// A key was smaller than the key before it.
    #[error("keys must be added in non-decreasing order")]
    Ordering,

    /// A node could not be laid out (offset overflow or null collision).
    #[error("node encoding failed: {0}")]
    Layout(#[from] LayoutError),

    /// A byte offset in the output does not fit the position type.
    #[error("output offset {0} does not fit the position type")]
    PositionOverflow(u64),

    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The sink accepted fewer bytes than it was given.
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    /// Index bytes that do not describe a valid tree.
    #[error("corrupt index: {0}")]
    Format(String),

    /// An earlier failure left the builder unusable.
    #[error("build aborted by an earlier error")]
    Aborted,
}
