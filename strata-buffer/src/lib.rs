#![deny(missing_docs)]

//! Page-aligned byte buffers for Strata.
//!
//! Columns hold their data in page-multiple allocations handed out by
//! [`alloc`]; the disk-array layer exchanges whole representations as ordered
//! [`RegionList`]s of zero-copy [`RegionDesc`] handles.
//!
//! The NUMA node threaded through [`alloc`] is a placement *hint*, not a
//! guarantee — callers must not rely on locality.

use bytes::{Bytes, BytesMut};
use strata_error::StrataExpect;

mod region;

pub use region::*;

/// The allocation granule, in bytes. All storage-unit allocations are a
/// multiple of this.
pub const PAGE_SIZE: u64 = 64 * 1024;

/// Round a byte count up to whole pages.
#[inline(always)]
pub fn bytes_to_pages(bytes: u64) -> u64 {
    bytes.div_ceil(PAGE_SIZE)
}

/// Convert a page count to bytes.
#[inline(always)]
pub fn pages_to_bytes(pages: u64) -> u64 {
    pages
        .checked_mul(PAGE_SIZE)
        .strata_expect("page count overflows the byte address space")
}

/// Round a byte count up to the next page boundary.
#[inline(always)]
pub fn page_align(bytes: u64) -> u64 {
    pages_to_bytes(bytes_to_pages(bytes))
}

/// Allocate a zeroed, page-multiple buffer of at least `num_bytes`.
///
/// `numa_hint` names the preferred NUMA node; it is advisory only.
/// Allocation failure aborts the process — the engine assumes sufficient
/// virtual address space and has no graceful-degradation path.
pub fn alloc(num_bytes: u64, numa_hint: u64) -> BytesMut {
    let _ = numa_hint;
    BytesMut::zeroed(page_align(num_bytes) as usize)
}

/// Freeze a mutable buffer into an immutable, cheaply cloneable one.
///
/// Clones of the result alias the same memory behind an atomic reference
/// count; the last clone dropping frees the allocation.
#[inline(always)]
pub fn freeze(buf: BytesMut) -> Bytes {
    buf.freeze()
}
