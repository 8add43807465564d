//! Copy-on-write column storage and streaming cursors.
//!
//! A [`Column`] is a cheap-to-alias, reference-counted handle over a
//! [`MappedStorage`] — a linked sequence of page-multiple storage units with
//! an optional compressed twin. Cursors ([`Cursor`] and the typed wrappers
//! [`ColumnIter`], [`ColumnVarIter`], [`ColumnDictIter`], [`ColumnRW`],
//! [`BitstringIter`]) stream fixed- and variable-length records through a
//! column, transparently paging storage in as they go.
//!
//! Aliasing a column is O(1): copies share storage behind atomic reference
//! counts, and the next writer to observe that it is not the lone copy must
//! branch off a deep copy before mutating. Mutation of a single column is
//! confined to one thread at a time by convention; parallelism comes from
//! fragment-partitioned cursors over the same frozen column.

mod bitstring;
mod bitstring_iter;
mod column;
mod compress;
mod compressed;
mod cursor;
mod dict;
mod dict_iter;
mod fixed;
mod fragments;
mod readwrite;
mod rle;
mod storage;
mod unit;
mod var;


pub use bitstring::*;
pub use bitstring_iter::*;
pub use column::*;
pub use compress::*;
pub use compressed::*;
pub use cursor::*;
pub use dict::*;
pub use dict_iter::*;
pub use fixed::*;
pub use fragments::*;
pub use readwrite::*;
pub use rle::*;
pub use storage::*;
pub use unit::*;
pub use var::*;

/// Default number of bytes a cursor requests from its column per page-in.
pub const DEFAULT_STEP: u64 = 256 * 1024;

/// Block granule for the compression codec. Decompressing one block at a time
/// keeps the working set inside the cache during partial decompression.
pub const COMPRESSION_BLOCK: u64 = 256 * 1024;
