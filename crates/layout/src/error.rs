use thiserror::Error;

/// Errors raised while laying out or reading back a relocatable blob.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    /// Block alignments must be a non-zero power of two.
    #[error("alignment {0} is not a power of two")]
    BadAlignment(usize),

    /// A self-relative displacement does not fit the signed 32-bit offset field.
    #[error("offset at {field:#x} to {target:#x} overflows i32 (displacement {displacement})")]
    OffsetOverflow {
        field: usize,
        target: usize,
        displacement: i64,
    },

    /// A computed displacement equals the reserved null sentinel.
    #[error("offset at {field:#x} collides with the null sentinel")]
    NullCollision { field: usize },

    /// Writes and new subblocks are refused once the arena is finalized.
    #[error("arena is finalized; call resume() or reset() first")]
    Finalized,

    /// Size queries and export require a finalized arena.
    #[error("arena is not finalized")]
    NotFinalized,

    /// The block handle belongs to an earlier build cycle or another arena.
    #[error("stale or foreign block handle")]
    StaleBlock,

    /// The export destination cannot hold the finalized blob.
    #[error("export destination holds {actual} bytes, need {needed}")]
    DestinationTooSmall { needed: usize, actual: usize },

    /// Interned strings carry a `u32` length prefix.
    #[error("string of {0} bytes exceeds the u32 length prefix")]
    StringTooLong(usize),

    /// A read ran past the end of an exported blob.
    #[error("read of {len} bytes at {at:#x} runs past blob end ({size} bytes)")]
    Truncated { at: usize, len: usize, size: usize },
}
