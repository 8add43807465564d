use std::collections::BTreeMap;

use crate::{Bitstring, Checkpoint, Column, Cursor, FragmentsTuples, RunWidth, DEFAULT_STEP};

/// Full lookahead snapshot of a [`BitstringIter`]: the cursor checkpoint
/// plus the run-decoding state layered on top of it.
#[derive(Debug, Clone, Copy)]
pub struct BitstringCheckpoint {
    cursor: Checkpoint,
    start_count: u64,
    end_count: u64,
    last_seen: Bitstring,
    once_written: bool,
    num_tuples: u64,
    tuple_count: u64,
}

/// Run-length-encoded per-tuple query-membership bitmaps over a column.
///
/// Scan outputs are overwhelmingly either "matches nothing" or repeat the
/// same small query set for long stretches, so each physical record stores a
/// pattern once with a repeat counter (see [`RunWidth`] for the three
/// layouts). The narrowest width that fits the write pattern is chosen once,
/// at write-iterator construction, and fixed for the column's lifetime — the
/// choice is recorded in the paired [`FragmentsTuples`] header so reloads
/// pick the same width.
///
/// Unlike the generic typed cursors, [`insert`](BitstringIter::insert)
/// drives its own cursor advancement: only after seeing the next pattern can
/// it decide between extending the open run in place and starting a fresh
/// one.
#[derive(Debug)]
pub struct BitstringIter {
    it: Cursor,
    width: RunWidth,
    /// Logical position inside the current run (read) or the open run's
    /// stored counter (write).
    start_count: u64,
    /// Stored counter of the current run (read mode).
    end_count: u64,
    last_seen: Bitstring,
    /// An open run exists; until then `last_seen` is garbage and the cursor
    /// must not advance on insert.
    once_written: bool,
    /// Logical tuples in this iterator's span — per fragment, not global,
    /// when fragment-bounded.
    num_tuples: u64,
    /// Logical tuples consumed so far; local to each iterator.
    tuple_count: u64,
    frag_tuples: FragmentsTuples,
}

impl BitstringIter {
    /// An inert iterator; the starting point for
    /// [`create_deep_copy`](BitstringIter::create_deep_copy) and
    /// [`attach`](BitstringIter::attach).
    pub fn empty() -> Self {
        BitstringIter {
            it: Cursor::invalid(),
            width: RunWidth::Wide,
            start_count: 0,
            end_count: 0,
            last_seen: Bitstring::empty(),
            once_written: false,
            num_tuples: 0,
            tuple_count: 0,
            frag_tuples: FragmentsTuples::new(),
        }
    }

    /// Write-mode construction. `pattern` only sizes the run records unless
    /// `prefill > 0`, in which case one `prefill`-tuple run of `pattern` is
    /// written immediately (bulk initialization; forces the widest records).
    /// Do not use for reading.
    pub fn new_write(column: Column, pattern: Bitstring, prefill: u64, step: u64) -> Self {
        debug_assert!(step > 256);

        let mut iter = BitstringIter {
            it: Cursor::new(column, 0, step),
            ..BitstringIter::empty()
        };
        if iter.it.is_invalid() {
            return iter;
        }

        iter.width = if prefill == 0 {
            RunWidth::for_pattern(pattern.as_u64())
        } else {
            RunWidth::Wide
        };
        iter.end_count = iter.width.max_count();
        iter.it.set_obj_len(iter.width.obj_len());
        iter.frag_tuples.set_header1(iter.width.obj_len());

        iter.it.ensure_first_object(None);

        if prefill != 0 {
            let obj_len = iter.width.obj_len();
            iter.width
                .write_run(iter.it.write_slice(obj_len), pattern.as_u64(), prefill - 1);
            iter.start_count = prefill - 1;
            iter.num_tuples = prefill;
            iter.last_seen = pattern;
            iter.once_written = true;
        }

        iter.tuple_count = 0;
        iter
    }

    /// Read-mode construction; `obj_len` comes from the column's
    /// [`FragmentsTuples`] header. Do not use for writing.
    pub fn new_read(column: Column, num_tuples: u64, obj_len: u64, step: u64) -> Self {
        debug_assert!(step > 256);

        let width = RunWidth::from_obj_len(obj_len);
        let mut iter = BitstringIter {
            it: Cursor::new(column, 0, step),
            width,
            num_tuples,
            ..BitstringIter::empty()
        };
        if iter.it.is_invalid() {
            return iter;
        }

        if iter.it.at_unwritten_byte() {
            log::warn!("bitstring column is unexpectedly empty");
            return iter;
        }

        iter.it.set_obj_len(obj_len);
        iter.it.ensure_first_object(None);
        iter.set_count();
        iter.tuple_count = 0;
        iter
    }

    /// Append one tuple's bitmap. Extends the open run in place when the
    /// pattern repeats and the counter has headroom; otherwise moves past
    /// the previous run and opens a fresh one.
    pub fn insert(&mut self, add: Bitstring) {
        if self.it.is_invalid() {
            return;
        }

        // a fresh span starts counting from its first insert
        if !self.once_written {
            self.num_tuples = 0;
        }
        self.num_tuples += 1;

        let obj_len = self.width.obj_len();

        if self.once_written && self.last_seen == add && self.start_count < self.width.max_count()
        {
            self.start_count += 1;
            self.width
                .write_run(self.it.write_slice(obj_len), add.as_u64(), self.start_count);
            return;
        }

        self.start_count = 0;

        if self.once_written {
            self.it.advance();
        }
        self.it.ensure_write_space();
        self.width
            .write_run(self.it.write_slice(obj_len), add.as_u64(), 0);

        self.last_seen = add;
        self.once_written = true;
    }

    /// Consume one logical tuple: step inside the current run first, move
    /// the physical cursor only at run boundaries. No-op on a write
    /// iterator — insert advances itself.
    pub fn advance(&mut self) {
        if self.it.is_invalid() {
            return;
        }
        self.tuple_count += 1;

        if self.it.is_write_only() {
            return;
        }
        if self.start_count < self.end_count {
            self.start_count += 1;
            return;
        }
        if self.tuple_count < self.num_tuples {
            self.it.advance();
            self.set_count();
        }
    }

    /// Decode the run under the cursor into the iterator's counters.
    pub fn set_count(&mut self) {
        let obj_len = self.width.obj_len();
        let (pattern, count) = self.width.read_run(self.it.read_slice(obj_len));
        self.start_count = 0;
        self.end_count = count;
        self.last_seen = Bitstring::new(pattern);
    }

    /// The bitmap of the tuple under the cursor.
    pub fn current(&self) -> Bitstring {
        self.last_seen
    }

    /// Logical tuples in this iterator's span (per fragment when bounded).
    pub fn num_tuples(&self) -> u64 {
        self.num_tuples
    }

    /// True when the physical cursor sits on never-written bytes.
    pub fn at_unwritten_byte(&self) -> bool {
        self.it.at_unwritten_byte()
    }

    /// True once every logical tuple of the span has been consumed.
    pub fn at_end_of_column(&self) -> bool {
        self.num_tuples <= self.tuple_count
    }

    /// Finish the pass and hand the column back.
    pub fn done(&mut self) -> Column {
        self.it.done()
    }

    /// Finish the pass but keep the column, re-armed for a read pass from
    /// the first run.
    pub fn seal(&mut self) {
        if self.it.is_invalid() {
            return;
        }
        self.it.seal();
        self.set_count();
        self.tuple_count = 0;
        self.once_written = false;
    }

    /// Late-bind a disk-loaded column into an iterator that already knows
    /// its tuple count and record width. Does nothing when `column` is
    /// invalid.
    pub fn attach(&mut self, column: Column) {
        if !column.is_valid() {
            return;
        }
        self.tuple_count = 0;
        self.it.attach(column);
        self.it.set_obj_len(self.width.obj_len());
        self.it.ensure_first_object(None);
        self.set_count();
    }

    /// Restrict this iterator to fragments `[start, end]`; the logical tuple
    /// count for the span comes from the paired [`FragmentsTuples`].
    pub fn set_fragment_range(&mut self, start: u64, end: u64) {
        if self.it.is_invalid() {
            strata_error::strata_panic!("fragment range on an invalid bitstring iterator");
        }
        self.start_count = 0;
        self.it.set_fragment_range(start, end);

        if self.it.at_unwritten_byte() {
            log::warn!("bitstring column is unexpectedly empty");
            return;
        }

        self.num_tuples = self.frag_tuples.tuple_count_range(start, end);
        self.it.ensure_first_object(None);
        self.set_count();
        self.tuple_count = 0;
    }

    /// Close the current fragment during a write pass: record its tuple
    /// count, move past the open run, and mark the boundary. The next insert
    /// always opens a fresh run — a fragment must start on a run boundary
    /// even if the pattern repeats across it.
    pub fn mark_fragment(&mut self, first_time: bool) {
        if self.it.is_invalid() {
            return;
        }
        if !first_time {
            self.frag_tuples.set_tuples_count(self.num_tuples);
            self.it.advance();
        }
        self.it.mark_fragment();
        self.once_written = false;
        self.start_count = 0;
    }

    /// Record the final fragment's tuple count without opening another
    /// fragment.
    pub fn mark_fragment_tuples(&mut self) {
        if self.it.is_invalid() {
            return;
        }
        self.frag_tuples.set_tuples_count(self.num_tuples);
    }

    /// Replace the paired per-fragment tuple counts (catalog load path).
    pub fn set_fragments_tuples(&mut self, tuples: FragmentsTuples) {
        self.frag_tuples = tuples;
    }

    /// The paired per-fragment tuple counts.
    pub fn fragments_tuples(&self) -> &FragmentsTuples {
        &self.frag_tuples
    }

    /// Fork an independent write-only iterator holding a deep copy of
    /// `from`'s column up to `from`'s position, primed to keep appending.
    pub fn create_deep_copy(&mut self, from: &mut BitstringIter) {
        self.it.create_deep_copy(&mut from.it);
        self.width = RunWidth::from_obj_len(self.it.obj_len());
        self.start_count = 0;
        self.end_count = self.width.max_count();
        self.once_written = false;
        self.num_tuples = from.num_tuples;
        self.tuple_count = 0;
        self.last_seen = Bitstring::empty();
        self.frag_tuples = from.frag_tuples.clone();
    }

    /// Snapshot the full lookahead state.
    pub fn checkpoint(&self) -> BitstringCheckpoint {
        BitstringCheckpoint {
            cursor: self.it.checkpoint(),
            start_count: self.start_count,
            end_count: self.end_count,
            last_seen: self.last_seen,
            once_written: self.once_written,
            num_tuples: self.num_tuples,
            tuple_count: self.tuple_count,
        }
    }

    /// Roll back to a snapshot taken by
    /// [`checkpoint`](BitstringIter::checkpoint).
    pub fn restore(&mut self, checkpoint: BitstringCheckpoint) {
        self.it.restore(checkpoint.cursor);
        self.start_count = checkpoint.start_count;
        self.end_count = checkpoint.end_count;
        self.last_seen = checkpoint.last_seen;
        self.once_written = checkpoint.once_written;
        self.num_tuples = checkpoint.num_tuples;
        self.tuple_count = checkpoint.tuple_count;
    }

    /// Per-distinct-query tuple-count histogram over the whole column:
    /// every run is exploded into its member bits. Non-destructive
    /// (checkpointed around a full physical scan); profiling only, never on
    /// a hot path.
    pub fn debug_info(&mut self) -> BTreeMap<Bitstring, u64> {
        let mut histogram = BTreeMap::new();
        if self.it.is_invalid() {
            return histogram;
        }

        let saved = self.checkpoint();
        self.seal();

        let obj_len = self.width.obj_len();
        while !self.it.at_unwritten_byte() {
            let (pattern, count) = self.width.read_run(self.it.read_slice(obj_len));
            let tuples = count + 1;
            let mut query = Bitstring::new(pattern);
            if query.is_empty() {
                *histogram.entry(query).or_insert(0) += tuples;
            } else {
                while !query.is_empty() {
                    let bit = query.take_first();
                    *histogram.entry(bit).or_insert(0) += tuples;
                }
            }
            self.it.advance();
        }

        self.restore(saved);
        histogram
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::MappedStorage;

    fn write_column() -> Column {
        Column::from_storage(MappedStorage::new(0))
    }

    fn read_all(iter: &mut BitstringIter) -> Vec<u64> {
        let mut out = Vec::new();
        while !iter.at_end_of_column() {
            out.push(iter.current().as_u64());
            iter.advance();
        }
        out
    }

    #[test]
    fn rle_merges_repeats_into_one_run() {
        let mut w = BitstringIter::new_write(write_column(), Bitstring::new(1), 0, DEFAULT_STEP);
        for _ in 0..100 {
            w.insert(Bitstring::new(1));
        }
        assert_eq!(w.num_tuples(), 100);
        let col = w.done();

        // one narrow 4-byte record for all 100 tuples
        assert_eq!(col.col_length(), 4);
        let (pattern, count) = RunWidth::Narrow.read_run(col.slice(0, 4));
        assert_eq!(pattern, 1);
        assert_eq!(count + 1, 100);
    }

    #[test]
    fn scenario_two_runs() {
        let mut w = BitstringIter::new_write(write_column(), Bitstring::new(1), 0, DEFAULT_STEP);
        for pattern in [1u64, 1, 1, 2, 2] {
            w.insert(Bitstring::new(pattern));
        }
        assert_eq!(w.num_tuples(), 5);
        let col = w.done();

        // exactly two physical runs with logical counts {3, 2}
        assert_eq!(col.col_length(), 8);
        let (p0, c0) = RunWidth::Narrow.read_run(col.slice(0, 4));
        let (p1, c1) = RunWidth::Narrow.read_run(col.slice(4, 4));
        assert_eq!((p0, c0 + 1), (1, 3));
        assert_eq!((p1, c1 + 1), (2, 2));

        let mut r = BitstringIter::new_read(col, 5, 4, DEFAULT_STEP);
        assert_eq!(read_all(&mut r), vec![1, 1, 1, 2, 2]);
    }

    #[test]
    fn counter_saturation_splits_runs() {
        let total = 70_000u64;
        let mut w = BitstringIter::new_write(write_column(), Bitstring::new(3), 0, DEFAULT_STEP);
        for _ in 0..total {
            w.insert(Bitstring::new(3));
        }
        let col = w.done();

        // narrow counter ceiling: 65536 tuples per run, so two runs
        assert_eq!(col.col_length(), 8);
        let (_, c0) = RunWidth::Narrow.read_run(col.slice(0, 4));
        let (_, c1) = RunWidth::Narrow.read_run(col.slice(4, 4));
        assert_eq!((c0 + 1) + (c1 + 1), total);
        assert_eq!(c0 + 1, u16::MAX as u64 + 1);

        let mut r = BitstringIter::new_read(col, total, 4, DEFAULT_STEP);
        assert_eq!(read_all(&mut r).len(), total as usize);
    }

    #[test]
    fn width_follows_pattern_magnitude() {
        let wide_pattern = Bitstring::new(1u64 << 40);
        let mut w = BitstringIter::new_write(write_column(), wide_pattern, 0, DEFAULT_STEP);
        w.insert(wide_pattern);
        w.insert(wide_pattern);
        assert_eq!(w.fragments_tuples().header1(), 12);
        let col = w.done();

        assert_eq!(col.col_length(), 12);
        let mut r = BitstringIter::new_read(col, 2, 12, DEFAULT_STEP);
        assert_eq!(read_all(&mut r), vec![1u64 << 40, 1u64 << 40]);
    }

    #[test]
    fn prefill_writes_one_bulk_run() {
        let mut w =
            BitstringIter::new_write(write_column(), Bitstring::new(0b11), 1_000, DEFAULT_STEP);
        assert_eq!(w.num_tuples(), 1_000);
        // appending the same pattern keeps extending the prefilled run
        w.insert(Bitstring::new(0b11));
        assert_eq!(w.num_tuples(), 1_001);
        let col = w.done();

        assert_eq!(col.col_length(), 12);
        let (pattern, count) = RunWidth::Wide.read_run(col.slice(0, 12));
        assert_eq!(pattern, 0b11);
        assert_eq!(count + 1, 1_001);
    }

    #[test]
    fn fragment_ranges_partition_tuples() {
        let mut w = BitstringIter::new_write(write_column(), Bitstring::new(1), 0, DEFAULT_STEP);
        w.mark_fragment(true);
        w.insert(Bitstring::new(1));
        w.insert(Bitstring::new(1));
        w.mark_fragment(false);
        w.insert(Bitstring::new(2));
        w.insert(Bitstring::new(2));
        w.mark_fragment(false);
        w.insert(Bitstring::new(2));
        w.insert(Bitstring::new(3));
        w.mark_fragment_tuples();

        let tuples = w.fragments_tuples().clone();
        assert_eq!(tuples.overall_tuple_count(), 6);
        let col = w.done();
        assert_eq!(col.fragments().num_fragments(), 3);

        let mut pieced = Vec::new();
        for frag in 0..3 {
            let mut r =
                BitstringIter::new_read(col.shallow_copy(), 0, tuples.header1(), DEFAULT_STEP);
            r.set_fragments_tuples(tuples.clone());
            r.set_fragment_range(frag, frag);
            assert_eq!(r.num_tuples(), 2);
            pieced.extend(read_all(&mut r));
        }

        let mut full = BitstringIter::new_read(col, 6, tuples.header1(), DEFAULT_STEP);
        assert_eq!(pieced, read_all(&mut full));
    }

    #[test]
    fn deep_copy_continues_the_stream() {
        let mut w = BitstringIter::new_write(write_column(), Bitstring::new(1), 0, DEFAULT_STEP);
        for pattern in [1u64, 1, 2] {
            w.insert(Bitstring::new(pattern));
        }

        let mut fork = BitstringIter::empty();
        fork.create_deep_copy(&mut w);
        // the fork's first insert opens a fresh run at the copy point,
        // replacing the run that was still open in the source
        fork.insert(Bitstring::new(2));
        fork.insert(Bitstring::new(5));

        let col = fork.done();
        let mut r = BitstringIter::new_read(col, 4, 4, DEFAULT_STEP);
        assert_eq!(read_all(&mut r), vec![1, 1, 2, 5]);

        // the original continues untouched
        w.insert(Bitstring::new(9));
        let col = w.done();
        let mut r = BitstringIter::new_read(col, 4, 4, DEFAULT_STEP);
        assert_eq!(read_all(&mut r), vec![1, 1, 2, 9]);
    }

    #[test]
    fn debug_info_histogram() {
        let mut w = BitstringIter::new_write(write_column(), Bitstring::new(1), 0, DEFAULT_STEP);
        // tuples: 3x{q0}, 2x{q0,q1}, 1x{}
        for pattern in [0b01u64, 0b01, 0b01, 0b11, 0b11, 0b00] {
            w.insert(Bitstring::new(pattern));
        }
        w.seal();

        let histogram = w.debug_info();
        assert_eq!(histogram[&Bitstring::new(0b01)], 5);
        assert_eq!(histogram[&Bitstring::new(0b10)], 2);
        assert_eq!(histogram[&Bitstring::new(0)], 1);

        // non-destructive: the iterator still reads from the start
        assert_eq!(read_all(&mut w), vec![0b01, 0b01, 0b01, 0b11, 0b11, 0b00]);
    }
}
