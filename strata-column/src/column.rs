use std::sync::Arc;

use parking_lot::Mutex;
use strata_buffer::RegionList;
use strata_error::strata_panic;

use crate::{ColumnStorage, Fragments, MappedStorage};

/// Column-level cleanup hook, run exactly once when the last alias of a
/// column drops (after the storage itself is released). Used to tie external
/// side effects — releasing a dictionary lock, returning quota — to a
/// column's lifetime.
pub type Destroyer = Box<dyn FnOnce() + Send>;

/// Shared between all aliases of one column; firing order is guaranteed by
/// `Arc`'s last-drop semantics.
#[derive(Default)]
struct DestroyGuard {
    destroyer: Mutex<Option<Destroyer>>,
}

impl Drop for DestroyGuard {
    fn drop(&mut self) {
        if let Some(destroyer) = self.destroyer.get_mut().take() {
            destroyer();
        }
    }
}

struct ColumnInner {
    refs: Arc<DestroyGuard>,
    storage: MappedStorage,
    fragments: Fragments,
}

/// The user-facing handle over a column's storage.
///
/// A default-constructed column is the canonical empty/invalid sentinel:
/// every operation on it is either a no-op or fatal, and cursors constructed
/// from it come out in their safe Invalid state.
///
/// [`shallow_copy`](Column::shallow_copy) is the cheap O(1) aliasing path —
/// copies share the frozen bytes behind atomic reference counts, each with
/// independent cursor state. Mutating shared storage requires branching off
/// [`partial_deep_copy`](Column::partial_deep_copy) first; the storage layer
/// enforces the write-mode half of that discipline, the
/// [`is_lone_copy`](Column::is_lone_copy) check is the caller's half.
/// Ownership transfer is a plain `std::mem::swap` — prefer it over
/// `shallow_copy` whenever a move suffices, since aliasing is what forces
/// copy-on-write later.
#[derive(Default)]
pub struct Column {
    inner: Option<ColumnInner>,
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            None => f.write_str("Column(invalid)"),
            Some(inner) => f
                .debug_struct("Column")
                .field("len", &inner.storage.num_bytes())
                .field("write_mode", &inner.storage.is_write_mode())
                .field("fragments", &inner.fragments.num_fragments())
                .finish(),
        }
    }
}

impl Column {
    /// The empty/invalid sentinel.
    pub fn new() -> Self {
        Column { inner: None }
    }

    /// Adopt a storage object. The storage should be loaded into a column
    /// immediately after creation and accessed only through it.
    pub fn from_storage(storage: MappedStorage) -> Self {
        Column {
            inner: Some(ColumnInner {
                refs: Arc::new(DestroyGuard::default()),
                storage,
                fragments: Fragments::new(),
            }),
        }
    }

    /// Adopt a storage object with a cleanup hook that fires when the last
    /// alias of this column drops.
    pub fn from_storage_with_destroyer(storage: MappedStorage, destroyer: Destroyer) -> Self {
        let column = Column::from_storage(storage);
        if let Some(inner) = &column.inner {
            *inner.refs.destroyer.lock() = Some(destroyer);
        }
        column
    }

    /// Whether this handle refers to actual storage.
    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    /// O(1) ownership exchange, no copying.
    pub fn swap(&mut self, other: &mut Column) {
        std::mem::swap(self, other);
    }

    /// Alias the same storage: bumps the shared counts and gives the copy
    /// independent per-copy state. Copying an empty column yields an empty
    /// column. Fatal on a write-mode column — freeze it first.
    pub fn shallow_copy(&self) -> Column {
        let Some(inner) = &self.inner else {
            return Column::new();
        };
        Column {
            inner: Some(ColumnInner {
                refs: inner.refs.clone(),
                storage: inner.storage.shallow_copy(),
                fragments: inner.fragments.clone(),
            }),
        }
    }

    /// Build a fresh, independently owned write-mode column holding bytes
    /// `[0, position)` of `from`. The source is left untouched (modulo
    /// flushing its pending writes); this is how a writer-in-progress column
    /// is branched without disturbing the writer.
    pub fn partial_deep_copy(from: &mut Column, position: u64) -> Column {
        let Some(inner) = &mut from.inner else {
            strata_panic!("partial deep copy of an invalid column");
        };
        Column::from_storage(inner.storage.partial_deep_copy(position))
    }

    fn inner(&self) -> &ColumnInner {
        let Some(inner) = &self.inner else {
            strata_panic!("operation on an invalid column");
        };
        inner
    }

    fn inner_mut(&mut self) -> &mut ColumnInner {
        let Some(inner) = &mut self.inner else {
            strata_panic!("operation on an invalid column");
        };
        inner
    }

    /// Logical length in bytes.
    pub fn col_length(&self) -> u64 {
        self.inner().storage.num_bytes()
    }

    /// Whether the storage is still write-mode.
    pub fn is_write_mode(&self) -> bool {
        self.inner().storage.is_write_mode()
    }

    /// Whether no other alias shares this column's storage.
    pub fn is_lone_copy(&self) -> bool {
        self.inner().storage.is_lone_copy()
    }

    /// Freeze the storage read-only without changing its length.
    pub fn make_readonly(&mut self) {
        if let Some(inner) = &mut self.inner {
            inner.storage.make_readonly();
        }
    }

    /// Freeze the column at `num_bytes`. Called by the owning cursor when a
    /// write pass completes; this is the only path that sets a column's
    /// length. No-op on an empty column.
    pub fn done(&mut self, num_bytes: u64) {
        if let Some(inner) = &mut self.inner {
            inner.storage.done(num_bytes);
        }
    }

    /// Make `[pos, pos + len)` resident; returns actual contiguous residency
    /// from `pos`.
    pub fn ensure(&mut self, pos: u64, len: u64) -> u64 {
        self.inner_mut().storage.ensure(pos, len)
    }

    /// Immutable view of resident bytes.
    pub fn slice(&self, pos: u64, len: u64) -> &[u8] {
        self.inner().storage.slice(pos, len)
    }

    /// Mutable view of resident bytes. Fatal on a read-mode column.
    pub fn slice_mut(&mut self, pos: u64, len: u64) -> &mut [u8] {
        self.inner_mut().storage.slice_mut(pos, len)
    }

    /// One-shot compression of the column's content; see
    /// [`ColumnStorage::compress`].
    pub fn compress(&mut self, delete_decompressed: bool) {
        self.inner_mut().storage.compress(delete_decompressed);
    }

    /// Whether a compressed representation exists.
    pub fn is_compressed(&self) -> bool {
        self.inner().storage.is_compressed()
    }

    /// Describe the compressed representation for the disk layer; `out` is
    /// left empty when there is none.
    pub fn compressed(&self, out: &mut RegionList) {
        self.inner().storage.compressed(out);
    }

    /// Compressed size in bytes (0 when not compressed).
    pub fn compressed_size_bytes(&self) -> u64 {
        self.inner().storage.compressed_size_bytes()
    }

    /// Compressed size in whole pages.
    pub fn compressed_size_pages(&self) -> u64 {
        self.inner().storage.compressed_size_pages()
    }

    /// Describe the uncompressed representation for the disk layer. Freezes
    /// the column.
    pub fn uncompressed(&mut self, out: &mut RegionList) {
        self.inner_mut().storage.uncompressed(out);
    }

    /// Logical (uncompressed) size in bytes.
    pub fn uncompressed_size_bytes(&self) -> u64 {
        self.inner().storage.uncompressed_size_bytes()
    }

    /// Logical (uncompressed) size in whole pages.
    pub fn uncompressed_size_pages(&self) -> u64 {
        self.inner().storage.uncompressed_size_pages()
    }

    /// Fragment boundary metadata.
    pub fn fragments(&self) -> &Fragments {
        &self.inner().fragments
    }

    /// Mutable fragment boundary metadata.
    pub fn fragments_mut(&mut self) -> &mut Fragments {
        &mut self.inner_mut().fragments
    }

    /// Replace the fragment metadata (catalog load path).
    pub fn set_fragments(&mut self, fragments: Fragments) {
        self.inner_mut().fragments = fragments;
    }
}
