//! # Layout - relocatable blob builder
//!
//! Builds immutable, self-contained byte blobs out of a graph of
//! variable-size records. Records reference each other through
//! **self-relative offsets** instead of pointers, so a finished blob stays
//! valid wherever it is copied or memory-mapped.
//!
//! ## Model
//!
//! ```text
//!  Arena
//!  ├── root block      (address 0, alignment 1)
//!  ├── subblock #1     (own alignment)
//!  ├── subblock #2
//!  └── ...             (pooled across build cycles)
//!
//!  finalize():
//!    pass 1  root, #1, #2, ... placed back to back, each aligned
//!    pass 2  every offset field := target address - field address
//!
//!  blob:
//!  ┌──────┬─────┬──────────┬─────┬──────────┐
//!  │ root │ pad │ block #1 │ pad │ block #2 │
//!  └──────┴─────┴──────────┴─────┴──────────┘
//! ```
//!
//! Offset fields are little-endian `i32`; the value `1` is the null
//! reference. A displacement that does not fit, or that would collide with
//! the null value, fails the finalize instead of being truncated.
//!
//! ## Lifecycle
//!
//! `reset → write / subblock / write_offset → finalize → export_to`,
//! optionally followed by `resume → write more → finalize` again.
//! `reset` keeps every buffer's capacity, so an arena can encode many small
//! records in a hot loop without reallocating.

mod arena;
mod block;
mod codec;
mod error;
mod offset;
mod string_pool;

pub use arena::{Arena, BlockId};
pub use block::align_up;
pub use codec::{to_bytes, Encodable};
pub use error::LayoutError;
pub use offset::{read_offset, read_string, read_value, resolve, slice_at, NULL_OFFSET, OFFSET_LEN};
pub use string_pool::StringPool;
