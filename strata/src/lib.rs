//! Strata is a parallel, disk-backed columnar data-processing engine.
//!
//! This crate re-exports the engine's public surface:
//!
//! - [`buffer`]: page-aligned allocation and the raw region descriptors
//!   exchanged with the disk-array layer.
//! - [`column`](mod@column): copy-on-write column storage, streaming
//!   cursors, the run-length-encoded query-membership bitmaps, and the
//!   dictionary registry.
//! - [`file`]: the chunk/column/relation placement catalog.
//! - [`error`]: the error type, result alias and fatal-abort macros.

pub use {strata_buffer as buffer, strata_column as column, strata_error as error,
    strata_file as file};

pub use strata_column::{
    Bitstring, BitstringIter, Column, ColumnDictIter, ColumnIter, ColumnRW, ColumnVarIter,
    Cursor, MappedStorage,
};
pub use strata_error::{StrataError, StrataResult};
pub use strata_file::FileMetadata;
