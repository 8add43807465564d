use strata_error::strata_panic;

use crate::{
    Column, ColumnIter, DictType, Dictionary, DictionaryReadGuard, DictionaryRegistry,
};

/// A typed cursor over a dictionary-encoded column.
///
/// Construction acquires the named dictionary's read lock and holds it for
/// the whole scan, so ids stay dereferenceable while a merge waits. The lock
/// is released at [`done`](ColumnDictIter::done) — or earlier through
/// [`pre_done`](ColumnDictIter::pre_done), which a waypoint must call on all
/// but the last of several iterators over the same dictionary, or its own
/// `done` would self-deadlock against the merge.
pub struct ColumnDictIter<T: DictType> {
    inner: ColumnIter<T>,
    guard: Option<DictionaryReadGuard>,
}

impl<T: DictType> ColumnDictIter<T> {
    /// Iterate `column`, holding read access to `T`'s dictionary in
    /// `registry`.
    pub fn new(column: Column, registry: &DictionaryRegistry) -> Self {
        ColumnDictIter {
            inner: ColumnIter::new(column),
            guard: Some(registry.read(T::DICTIONARY)),
        }
    }

    /// Iterate only fragments `[frag_start, frag_end]` of `column`.
    pub fn fragment_range(
        column: Column,
        frag_start: u64,
        frag_end: u64,
        registry: &DictionaryRegistry,
    ) -> Self {
        ColumnDictIter {
            inner: ColumnIter::fragment_range(column, frag_start, frag_end),
            guard: Some(registry.read(T::DICTIONARY)),
        }
    }

    /// The dictionary this scan reads ids from. Fatal after
    /// [`pre_done`](ColumnDictIter::pre_done).
    pub fn dictionary(&self) -> &Dictionary {
        let Some(guard) = &self.guard else {
            strata_panic!("dictionary access after the read lock was released");
        };
        guard
    }

    /// Serialize `value` at the current position; advance explicitly.
    pub fn insert(&mut self, value: &T) {
        self.inner.insert(value);
    }

    /// The value at the current position.
    pub fn current(&self) -> T {
        self.inner.current()
    }

    /// Move to the next value.
    pub fn advance(&mut self) {
        self.inner.advance();
    }

    /// True when the cursor sits on never-written bytes.
    pub fn at_unwritten_byte(&self) -> bool {
        self.inner.at_unwritten_byte()
    }

    /// Record a fragment boundary at the current position.
    pub fn mark_fragment(&mut self) {
        self.inner.mark_fragment();
    }

    /// Release the dictionary read lock without finishing the scan.
    pub fn pre_done(&mut self) {
        self.guard = None;
    }

    /// Finish a scan that introduced no new dictionary entries: release the
    /// read lock and hand the column back.
    pub fn done(&mut self) -> Column {
        self.guard = None;
        self.inner.done()
    }

    /// Finish a write scan that interned new values into `local`.
    ///
    /// The local dictionary is merged into the global one; any ids the merge
    /// renumbered are then rewritten across the entire written column in a
    /// mandatory restart pass before the column is frozen. Skipping this
    /// pass would leave stale local ids on disk, so it is not optional.
    pub fn done_with_local(
        &mut self,
        registry: &DictionaryRegistry,
        local: &Dictionary,
    ) -> Column {
        if !self.inner.is_write_only() {
            strata_panic!("dictionary merge on a read-only column scan");
        }

        // release our read access first or the merge below self-deadlocks
        self.guard = None;
        let table = registry.merge_local(T::DICTIONARY, local);

        self.inner.restart();
        while !self.inner.at_unwritten_byte() {
            let mut value = self.inner.current();
            value.translate(&table);
            self.inner.insert(&value);
            self.inner.advance();
        }

        self.inner.done()
    }
}
