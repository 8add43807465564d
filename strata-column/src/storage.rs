use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use strata_buffer::{alloc, bytes_to_pages, page_align, RegionDesc, RegionList, PAGE_SIZE};
use strata_error::{strata_panic, StrataExpect};

use crate::{BlockCodec, CompressedUnit, Lz4Codec, StorageUnit};

/// When a single request outgrows the bridge, subsequent unit allocations are
/// scaled so at least this many such objects fit per unit.
const MIN_OBJECTS_PER_UNIT: u64 = 16;

/// The storage backend contract behind a column.
///
/// A backend owns the logical byte stream of one column and hands out
/// bounds-checked views of it. The two-step `ensure`/`slice` pair is the one
/// primitive everything else is built on: *make at least `len` bytes starting
/// at `pos` resident and contiguous, report how many actually are, then lend
/// a view*. Growth never truncates; a request beyond the current allocation
/// extends it.
///
/// A backend is created write-mode and growing; [`done`](ColumnStorage::done)
/// freezes it read-only at a final logical length. In-place mutation is only
/// legal while [`is_lone_copy`](ColumnStorage::is_lone_copy) holds — callers
/// (column, cursors) are responsible for the copy-on-write check; violating
/// it is a programming error, not a recoverable condition.
pub trait ColumnStorage {
    /// Alias the same bytes with independent per-copy state (read cursor,
    /// decompression progress). The shared count observed by `is_lone_copy`
    /// covers both copies afterwards.
    fn shallow_copy(&self) -> Self
    where
        Self: Sized;

    /// Make `[pos, pos + len)` resident and contiguous; returns the actual
    /// contiguous resident byte count from `pos`, which may exceed `len`.
    fn ensure(&mut self, pos: u64, len: u64) -> u64;

    /// Immutable view of resident bytes `[pos, pos + len)`.
    fn slice(&self, pos: u64, len: u64) -> &[u8];

    /// Mutable view of resident bytes `[pos, pos + len)`. Fatal on read-mode
    /// storage.
    fn slice_mut(&mut self, pos: u64, len: u64) -> &mut [u8];

    /// Freeze the storage read-only, logically truncated to `num_bytes`.
    fn done(&mut self, num_bytes: u64);

    /// Materialize an independent write-mode storage holding bytes
    /// `[0, position)`.
    fn partial_deep_copy(&mut self, position: u64) -> Self
    where
        Self: Sized;

    /// Logical length in bytes.
    fn num_bytes(&self) -> u64;

    /// Freeze all units read-only without changing the logical length.
    fn make_readonly(&mut self);

    /// Whether the storage is still write-mode.
    fn is_write_mode(&self) -> bool;

    /// Whether no other shallow copy shares these bytes.
    fn is_lone_copy(&self) -> bool;

    /// One-shot, non-incremental compression of the logical content. With
    /// `delete_decompressed` the uncompressed units are released and
    /// subsequent reads stream through block decompression.
    fn compress(&mut self, delete_decompressed: bool);

    /// Whether a compressed representation exists.
    fn is_compressed(&self) -> bool;

    /// Describe the compressed representation; leaves `out` empty when there
    /// is none.
    fn compressed(&self, out: &mut RegionList);

    /// Size of the compressed representation in bytes (0 when none).
    fn compressed_size_bytes(&self) -> u64;

    /// Size of the compressed representation in whole pages.
    fn compressed_size_pages(&self) -> u64;

    /// Describe the uncompressed representation. Freezes the storage, since
    /// the descriptors alias its memory.
    fn uncompressed(&mut self, out: &mut RegionList);

    /// Logical (uncompressed) size in bytes.
    fn uncompressed_size_bytes(&self) -> u64;

    /// Logical (uncompressed) size in whole pages.
    fn uncompressed_size_pages(&self) -> u64;
}

/// A flattened contiguous view over a span that crosses storage units.
///
/// Reads copy the covered bytes in; writes land here first and are copied
/// back over the units before the next `ensure` or `done`. The window is
/// only valid between the `ensure` that built it and the next one.
#[derive(Debug)]
struct Bridge {
    buf: BytesMut,
    start: u64,
    len: u64,
    dirty: bool,
}

/// The concrete storage backend: an ordered run of page-multiple
/// [`StorageUnit`]s forming the logical stream, an optional compressed twin,
/// and a bridge for requests that straddle unit boundaries.
#[derive(Debug)]
pub struct MappedStorage {
    units: Vec<StorageUnit>,
    num_bytes: u64,
    bridge: Option<Bridge>,
    alloc_multiplier: u64,
    cstorage: Option<CompressedUnit>,
    /// Reads must stream through the compressed twin (the uncompressed units
    /// are gone).
    decompress: bool,
    write_mode: bool,
    numa: u64,
    copies: Arc<()>,
}

impl MappedStorage {
    /// Blank write-mode storage, growing from nothing.
    pub fn new(numa_hint: u64) -> Self {
        MappedStorage {
            units: Vec::new(),
            num_bytes: 0,
            bridge: None,
            alloc_multiplier: 1,
            cstorage: None,
            decompress: false,
            write_mode: true,
            numa: numa_hint,
            copies: Arc::new(()),
        }
    }

    /// Adopt uncompressed bytes received from the disk layer. Read-mode.
    pub fn from_bytes(bytes: Bytes, size_bytes: u64, numa_hint: u64) -> Self {
        let mut storage = MappedStorage::new(numa_hint);
        storage.units.push(StorageUnit::frozen(bytes, 0));
        storage.num_bytes = size_bytes;
        storage.write_mode = false;
        storage
    }

    /// Adopt compressed bytes received from the disk layer. Read-mode; every
    /// access streams through block decompression.
    pub fn from_compressed_bytes(
        bytes: Bytes,
        size_decompressed: u64,
        codec: Arc<dyn BlockCodec>,
        numa_hint: u64,
    ) -> Self {
        let mut storage = MappedStorage::new(numa_hint);
        storage.cstorage = Some(CompressedUnit::from_compressed(
            bytes,
            size_decompressed,
            codec,
            numa_hint,
        ));
        storage.decompress = true;
        storage.num_bytes = size_decompressed;
        storage.write_mode = false;
        storage
    }

    /// Copy pending bridge writes back over the units and invalidate the
    /// window.
    fn flush_bridge(&mut self) {
        let write_mode = self.write_mode;
        if let Some(bridge) = self.bridge.as_mut() {
            if bridge.len > 0 && bridge.dirty && write_mode {
                let src = &bridge.buf[..bridge.len as usize];
                let (start, end) = (bridge.start, bridge.start + bridge.len - 1);
                for unit in self.units.iter_mut() {
                    unit.copy_overlapping(src, start, end);
                }
            }
            bridge.len = 0;
            bridge.dirty = false;
        }
    }

    /// Make sure the bridge can hold `len` bytes, reallocating if needed.
    fn grow_bridge(&mut self, len: u64) {
        let too_small = match &self.bridge {
            None => true,
            Some(b) => (b.buf.len() as u64) < len,
        };
        if !too_small {
            return;
        }
        if self.bridge.is_some() {
            // an oversized object outgrew the bridge; scale future unit
            // allocations so a run of them fits without bridging every time
            self.alloc_multiplier = bytes_to_pages(len * MIN_OBJECTS_PER_UNIT);
        }
        self.bridge = Some(Bridge {
            buf: alloc(page_align(len), self.numa),
            start: 0,
            len: 0,
            dirty: false,
        });
    }

    fn covering_unit(&self, pos: u64) -> Option<usize> {
        self.units
            .iter()
            .position(|u| u.start <= pos && u.end >= pos)
    }
}

impl ColumnStorage for MappedStorage {
    fn shallow_copy(&self) -> Self {
        if self.write_mode {
            strata_panic!("shallow copy of write-mode storage");
        }
        MappedStorage {
            units: self.units.iter().map(StorageUnit::shallow_copy).collect(),
            num_bytes: self.num_bytes,
            bridge: None,
            alloc_multiplier: self.alloc_multiplier,
            cstorage: self.cstorage.as_ref().map(CompressedUnit::deep_copy),
            decompress: self.decompress,
            write_mode: self.write_mode,
            numa: self.numa,
            copies: self.copies.clone(),
        }
    }

    fn ensure(&mut self, pos: u64, len: u64) -> u64 {
        if len == 0 {
            return 0;
        }

        if self.decompress && !self.write_mode {
            let resident = self
                .cstorage
                .as_mut()
                .strata_expect("decompress-mode storage lost its compressed unit")
                .decompress_up_to(pos + len);
            return resident.saturating_sub(pos);
        }

        self.flush_bridge();

        let end = pos + len - 1;
        match self.covering_unit(pos) {
            Some(i) if end <= self.units[i].end => self.units[i].end - pos + 1,
            Some(i) => {
                // the unit does not cover the whole request: flatten through
                // the bridge
                self.grow_bridge(len);
                let mut upper_end = self.units[i].end;
                {
                    let bridge = self.bridge.as_mut().strata_expect("bridge must exist");
                    bridge.start = pos;
                    bridge.len = len;
                    bridge.dirty = false;
                    let dst = &mut bridge.buf[..len as usize];
                    for unit in &self.units[i..] {
                        if let Some((slice, s, e)) = unit.overlap(pos, end) {
                            dst[(s - pos) as usize..=(e - pos) as usize].copy_from_slice(slice);
                            upper_end = unit.end;
                        }
                    }
                }
                if self.write_mode && upper_end < end {
                    // the tail of the bridged span has no backing yet
                    let alloc_len = (self.alloc_multiplier * PAGE_SIZE).max(end - upper_end);
                    self.units
                        .push(StorageUnit::writable(alloc_len, upper_end + 1, self.numa));
                }
                len
            }
            None => {
                let unit = StorageUnit::writable(len.max(PAGE_SIZE), pos, self.numa);
                let actual = unit.size();
                self.units.push(unit);
                actual
            }
        }
    }

    fn slice(&self, pos: u64, len: u64) -> &[u8] {
        if len == 0 {
            return &[];
        }
        if self.decompress && !self.write_mode {
            return self
                .cstorage
                .as_ref()
                .strata_expect("decompress-mode storage lost its compressed unit")
                .slice(pos, len);
        }
        let end = pos + len - 1;
        if let Some(bridge) = &self.bridge {
            if bridge.len > 0 && bridge.start <= pos && end < bridge.start + bridge.len {
                let off = (pos - bridge.start) as usize;
                return &bridge.buf[off..off + len as usize];
            }
        }
        for unit in &self.units {
            if unit.start <= pos && unit.end >= end {
                let off = (pos - unit.start) as usize;
                return &unit.as_slice()[off..off + len as usize];
            }
        }
        strata_panic!("bytes [{}, {}] are not resident", pos, end);
    }

    fn slice_mut(&mut self, pos: u64, len: u64) -> &mut [u8] {
        if !self.write_mode {
            strata_panic!("write into read-mode storage at {}", pos);
        }
        if len == 0 {
            return &mut [];
        }
        let end = pos + len - 1;
        if let Some(bridge) = self.bridge.as_mut() {
            if bridge.len > 0 && bridge.start <= pos && end < bridge.start + bridge.len {
                bridge.dirty = true;
                let off = (pos - bridge.start) as usize;
                return &mut bridge.buf[off..off + len as usize];
            }
        }
        for unit in self.units.iter_mut() {
            if unit.start <= pos && unit.end >= end {
                let off = (pos - unit.start) as usize;
                return &mut unit.as_mut_slice()[off..off + len as usize];
            }
        }
        strata_panic!("bytes [{}, {}] are not resident", pos, end);
    }

    fn done(&mut self, num_bytes: u64) {
        self.flush_bridge();
        self.make_readonly();
        self.num_bytes = num_bytes;
        self.write_mode = false;
    }

    fn partial_deep_copy(&mut self, position: u64) -> Self {
        self.flush_bridge();

        let mut copy = MappedStorage::new(self.numa);
        copy.num_bytes = self.num_bytes;

        if self.decompress {
            // the uncompressed units are gone; materialize the prefix from
            // the compressed twin so the fork can keep appending
            let cs = self
                .cstorage
                .as_mut()
                .strata_expect("decompress-mode storage lost its compressed unit");
            cs.decompress_up_to(position);
            if position > 0 {
                let mut unit = StorageUnit::writable(position, 0, self.numa);
                unit.as_mut_slice()[..position as usize]
                    .copy_from_slice(cs.slice(0, position));
                copy.units.push(unit);
            }
        } else {
            copy.units = self
                .units
                .iter()
                .filter(|u| u.start <= position)
                .map(|u| u.deep_copy(self.numa))
                .collect();
        }

        // the fork exists to be appended to
        copy.write_mode = true;
        copy
    }

    fn num_bytes(&self) -> u64 {
        self.num_bytes
    }

    fn make_readonly(&mut self) {
        self.flush_bridge();
        for unit in self.units.iter_mut() {
            unit.freeze();
        }
    }

    fn is_write_mode(&self) -> bool {
        self.write_mode
    }

    fn is_lone_copy(&self) -> bool {
        Arc::strong_count(&self.copies) == 1
    }

    fn compress(&mut self, delete_decompressed: bool) {
        self.flush_bridge();

        // the storage units must tile the stream in order, no gaps
        let mut prev_end: Option<u64> = None;
        for unit in &self.units {
            let expected = prev_end.map_or(0, |e| e + 1);
            if unit.start != expected {
                strata_panic!("storage units not in order at {}", unit.start);
            }
            prev_end = Some(unit.end);
        }

        let total = self.num_bytes;
        let cunit = {
            let pieces = self.units.iter().filter_map(|u| {
                if u.start >= total {
                    return None;
                }
                let len = (u.end.min(total - 1) - u.start + 1) as usize;
                Some(&u.as_slice()[..len])
            });
            CompressedUnit::compress(pieces, total, Arc::new(Lz4Codec), self.numa)
        };
        self.cstorage = Some(cunit);

        if delete_decompressed {
            self.units.clear();
            self.bridge = None;
            self.decompress = true;
        }
    }

    fn is_compressed(&self) -> bool {
        self.cstorage.is_some()
    }

    fn compressed(&self, out: &mut RegionList) {
        out.clear();
        if let Some(cs) = &self.cstorage {
            cs.region_list(out);
        }
    }

    fn compressed_size_bytes(&self) -> u64 {
        self.cstorage.as_ref().map_or(0, CompressedUnit::compressed_size)
    }

    fn compressed_size_pages(&self) -> u64 {
        bytes_to_pages(self.compressed_size_bytes())
    }

    fn uncompressed(&mut self, out: &mut RegionList) {
        self.make_readonly();
        out.clear();
        for unit in &self.units {
            // the allocation may extend past the content; trim the last unit
            let len = if unit.end >= self.num_bytes {
                self.num_bytes.saturating_sub(unit.start)
            } else {
                unit.size()
            };
            if len == 0 {
                continue;
            }
            let bytes = unit.frozen_bytes().slice(0..len as usize);
            out.append(RegionDesc::new(bytes, len));
        }
    }

    fn uncompressed_size_bytes(&self) -> u64 {
        self.num_bytes
    }

    fn uncompressed_size_pages(&self) -> u64 {
        bytes_to_pages(self.num_bytes)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn write_bytes(storage: &mut MappedStorage, pos: u64, data: &[u8]) {
        storage.ensure(pos, data.len() as u64);
        storage
            .slice_mut(pos, data.len() as u64)
            .copy_from_slice(data);
    }

    #[test]
    fn grow_write_read_back() {
        let mut storage = MappedStorage::new(0);
        write_bytes(&mut storage, 0, b"hello");
        write_bytes(&mut storage, 5, b"world");
        storage.done(10);

        assert!(!storage.is_write_mode());
        assert_eq!(storage.num_bytes(), 10);
        storage.ensure(0, 10);
        assert_eq!(storage.slice(0, 10), b"helloworld");
    }

    #[test]
    fn ensure_reports_contiguous_residency() {
        let mut storage = MappedStorage::new(0);
        let actual = storage.ensure(0, 10);
        assert!(actual >= PAGE_SIZE);
        // second ask inside the unit reports the remaining extent
        let actual2 = storage.ensure(100, 10);
        assert_eq!(actual2, actual - 100);
    }

    #[test]
    fn bridge_spans_units() {
        let mut storage = MappedStorage::new(0);
        // fill one page exactly, then write across the boundary
        let page = PAGE_SIZE;
        storage.ensure(0, page);
        storage.slice_mut(0, page).fill(1);

        // object straddling the page boundary goes through the bridge
        write_bytes(&mut storage, page - 4, &[9u8; 8]);
        storage.done(page + 4);

        storage.ensure(page - 4, 8);
        assert_eq!(storage.slice(page - 4, 8), &[9u8; 8]);
        assert_eq!(storage.slice(page - 5, 1), &[1u8]);
    }

    #[test]
    fn lone_copy_tracking() {
        let mut storage = MappedStorage::new(0);
        write_bytes(&mut storage, 0, b"abc");
        storage.done(3);
        assert!(storage.is_lone_copy());

        let alias = storage.shallow_copy();
        assert!(!storage.is_lone_copy());
        assert!(!alias.is_lone_copy());

        drop(alias);
        assert!(storage.is_lone_copy());
    }

    #[test]
    fn shallow_copies_see_the_same_bytes() {
        let mut storage = MappedStorage::new(0);
        write_bytes(&mut storage, 0, b"shared");
        storage.done(6);

        let mut alias = storage.shallow_copy();
        alias.ensure(0, 6);
        assert_eq!(alias.slice(0, 6), b"shared");
    }

    #[test]
    fn partial_deep_copy_is_independent() {
        let mut storage = MappedStorage::new(0);
        write_bytes(&mut storage, 0, b"0123456789");

        let mut fork = storage.partial_deep_copy(4);
        assert!(fork.is_write_mode());
        write_bytes(&mut fork, 4, b"XY");
        fork.done(6);

        storage.done(10);
        storage.ensure(0, 10);
        assert_eq!(storage.slice(0, 10), b"0123456789");
        fork.ensure(0, 6);
        assert_eq!(fork.slice(0, 6), b"0123XY");
    }

    #[test]
    fn compress_keep_both_representations() {
        let mut storage = MappedStorage::new(0);
        let data = vec![7u8; 80_000];
        write_bytes(&mut storage, 0, &data);
        storage.done(data.len() as u64);

        storage.compress(false);
        assert!(storage.is_compressed());
        assert_eq!(storage.uncompressed_size_bytes(), data.len() as u64);
        assert!(storage.compressed_size_bytes() > 0);
        assert!(storage.compressed_size_bytes() < data.len() as u64);

        // uncompressed path still serves reads
        storage.ensure(0, 100);
        assert_eq!(storage.slice(0, 100), &data[..100]);
    }

    #[test]
    fn compress_delete_decompressed_streams_reads() {
        let mut storage = MappedStorage::new(0);
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 13) as u8).collect();
        write_bytes(&mut storage, 0, &data);
        storage.done(data.len() as u64);

        storage.compress(true);
        let resident = storage.ensure(0, 1_000);
        assert!(resident >= 1_000);
        assert_eq!(storage.slice(0, 1_000), &data[..1_000]);

        storage.ensure(50_000, 1_000);
        assert_eq!(storage.slice(50_000, 1_000), &data[50_000..51_000]);
    }

    #[test]
    fn region_lists_describe_content() {
        let mut storage = MappedStorage::new(0);
        write_bytes(&mut storage, 0, b"columnar");
        storage.done(8);
        storage.compress(false);

        let mut uncompressed = RegionList::new();
        storage.uncompressed(&mut uncompressed);
        assert_eq!(uncompressed.total_bytes(), 8);

        let mut compressed = RegionList::new();
        storage.compressed(&mut compressed);
        assert_eq!(compressed.total_bytes(), storage.compressed_size_bytes());
    }

    #[test]
    #[should_panic(expected = "read-mode")]
    fn write_after_done_is_fatal() {
        let mut storage = MappedStorage::new(0);
        write_bytes(&mut storage, 0, b"x");
        storage.done(1);
        storage.slice_mut(0, 1)[0] = 0;
    }
}
