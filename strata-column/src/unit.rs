use bytes::{Bytes, BytesMut};
use strata_buffer::alloc;
use strata_error::strata_panic;

/// Backing memory of a [`StorageUnit`].
///
/// Writable units own their allocation exclusively; frozen units alias a
/// shared allocation behind `Bytes`' atomic reference count. A storage unit
/// freezes exactly once, when its storage is sealed read-only.
#[derive(Debug)]
pub enum UnitBytes {
    /// Exclusively owned, mutable memory (write-mode storage).
    Writable(BytesMut),
    /// Shared, immutable memory (read-mode storage).
    Frozen(Bytes),
}

/// One contiguous piece of a column's logical byte stream.
///
/// `start`/`end` are logical column offsets; `end` is the last byte covered
/// (inclusive), so a unit spans `end - start + 1` bytes and `end >= start - 1`
/// permits the empty unit.
#[derive(Debug)]
pub struct StorageUnit {
    bytes: UnitBytes,
    /// First logical byte covered by this unit.
    pub start: u64,
    /// Last logical byte covered by this unit (inclusive).
    pub end: u64,
}

impl StorageUnit {
    /// A fresh writable unit covering `[start, start + num_bytes)`.
    ///
    /// `num_bytes` is rounded up to whole pages by the allocator.
    pub fn writable(num_bytes: u64, start: u64, numa_hint: u64) -> Self {
        let buf = alloc(num_bytes, numa_hint);
        let end = start + buf.len() as u64 - 1;
        StorageUnit {
            bytes: UnitBytes::Writable(buf),
            start,
            end,
        }
    }

    /// Adopt already-populated memory as a frozen unit covering
    /// `[start, start + bytes.len())`.
    pub fn frozen(bytes: Bytes, start: u64) -> Self {
        if bytes.is_empty() {
            strata_panic!("cannot adopt an empty region as a storage unit");
        }
        let end = start + bytes.len() as u64 - 1;
        StorageUnit {
            bytes: UnitBytes::Frozen(bytes),
            start,
            end,
        }
    }

    /// Bytes covered by this unit.
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Immutable view of the unit's memory.
    pub fn as_slice(&self) -> &[u8] {
        match &self.bytes {
            UnitBytes::Writable(b) => b.as_ref(),
            UnitBytes::Frozen(b) => b.as_ref(),
        }
    }

    /// Mutable view of the unit's memory. Fatal on a frozen unit.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.bytes {
            UnitBytes::Writable(b) => b.as_mut(),
            UnitBytes::Frozen(_) => strata_panic!(
                "write into a frozen storage unit [{}, {}]",
                self.start,
                self.end
            ),
        }
    }

    /// Whether the unit has been frozen read-only.
    pub fn is_frozen(&self) -> bool {
        matches!(self.bytes, UnitBytes::Frozen(_))
    }

    /// Alias the frozen memory as a `Bytes` handle. Fatal on a writable unit.
    pub fn frozen_bytes(&self) -> Bytes {
        match &self.bytes {
            UnitBytes::Frozen(b) => b.clone(),
            UnitBytes::Writable(_) => strata_panic!(
                "raw handle requested for a write-mode storage unit [{}, {}]",
                self.start,
                self.end
            ),
        }
    }

    /// Freeze the unit read-only. Idempotent.
    pub fn freeze(&mut self) {
        if let UnitBytes::Writable(buf) = &mut self.bytes {
            let frozen = std::mem::take(buf).freeze();
            self.bytes = UnitBytes::Frozen(frozen);
        }
    }

    /// Alias the same memory with an independent handle. Only frozen units
    /// may be aliased; sharing writable memory would defeat the lone-copy
    /// discipline.
    pub fn shallow_copy(&self) -> Self {
        match &self.bytes {
            UnitBytes::Frozen(b) => StorageUnit {
                bytes: UnitBytes::Frozen(b.clone()),
                start: self.start,
                end: self.end,
            },
            UnitBytes::Writable(_) => strata_panic!(
                "shallow copy of a write-mode storage unit [{}, {}]",
                self.start,
                self.end
            ),
        }
    }

    /// Materialize an independent writable copy of this unit's memory.
    pub fn deep_copy(&self, numa_hint: u64) -> Self {
        let mut copy = StorageUnit::writable(self.size(), self.start, numa_hint);
        let size = self.size() as usize;
        copy.as_mut_slice()[..size].copy_from_slice(&self.as_slice()[..size]);
        copy.end = self.end;
        copy
    }

    /// Copy the overlap of `from`'s logical range on top of this unit's
    /// memory. A no-op when the ranges are disjoint.
    pub fn copy_overlapping(&mut self, from_bytes: &[u8], from_start: u64, from_end: u64) {
        let first = self.start.max(from_start);
        let last = self.end.min(from_end);
        if first > last {
            return;
        }
        let len = (last - first + 1) as usize;
        let dst_off = (first - self.start) as usize;
        let src_off = (first - from_start) as usize;
        self.as_mut_slice()[dst_off..dst_off + len]
            .copy_from_slice(&from_bytes[src_off..src_off + len]);
    }

    /// Immutable view of the overlap of `[start, end]` within this unit, if
    /// any: `(slice, overlap_start, overlap_end)`.
    pub fn overlap(&self, start: u64, end: u64) -> Option<(&[u8], u64, u64)> {
        let first = self.start.max(start);
        let last = self.end.min(end);
        if first > last {
            return None;
        }
        let off = (first - self.start) as usize;
        let len = (last - first + 1) as usize;
        Some((&self.as_slice()[off..off + len], first, last))
    }
}
