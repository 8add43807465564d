use strata_error::strata_panic;

use crate::Column;

/// A by-value snapshot of the cursor fields that bounded lookahead needs to
/// roll back: position and current object length. Residency deliberately is
/// not part of the snapshot — restoring resets the high-water mark to the
/// saved position and the next access pages back in.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    pos: u64,
    obj_len: u64,
}

/// A streaming cursor over a [`Column`].
///
/// The cursor consumes its column at construction and hands it back at
/// [`done`](Cursor::done). In between it tracks the current byte offset,
/// the resident high-water mark, and the length of the object under the
/// cursor, paging more storage in through
/// [`ensure_space`](Cursor::ensure_space) — the sole page-in mechanism —
/// whenever an access would cross the mark. Within one streaming pass the
/// mark only grows.
///
/// A cursor built from an invalid column is the safe Invalid sentinel: every
/// operation on it is a no-op, and callers are expected to check
/// [`is_invalid`](Cursor::is_invalid) first on paths that would otherwise
/// touch data.
///
/// Reading past the logical end is not an error the cursor detects — callers
/// poll [`at_unwritten_byte`](Cursor::at_unwritten_byte) before each read.
/// Writing through a read-only cursor is fatal.
#[derive(Debug, Default)]
pub struct Cursor {
    column: Column,
    /// Bytes requested from the column per page-in.
    step: u64,
    /// Current byte offset in the column.
    pos: u64,
    /// First byte not yet resident; monotone within a pass.
    first_invalid: u64,
    /// Length in bytes of the object under the cursor.
    obj_len: u64,
    /// Logical length of the column (full length, even when
    /// fragment-bounded).
    col_len: u64,
    /// First byte this cursor must not read: the fragment/range end when
    /// bounded, the column length otherwise.
    limit: u64,
    /// High-water mark of bytes actually written through this cursor.
    written_end: u64,
    /// Bytes needed to learn the next object's length.
    min_header_len: u64,
    write_only: bool,
    invalid: bool,
}

impl Cursor {
    /// The safe Invalid sentinel; also the starting point for
    /// [`create_deep_copy`](Cursor::create_deep_copy).
    pub fn invalid() -> Cursor {
        let mut cursor = Cursor::default();
        cursor.invalid = true;
        cursor
    }

    /// Consume `column` and position at byte 0. If the column holds at least
    /// `min_header_len` bytes (always true for write columns), the first
    /// object's header is paged in eagerly with a `step`-sized request.
    pub fn new(column: Column, min_header_len: u64, step: u64) -> Cursor {
        let mut cursor = Cursor::begin(column, min_header_len, step);
        if cursor.invalid {
            return cursor;
        }
        if cursor.col_len >= min_header_len {
            let actual = cursor.column.ensure(0, step);
            cursor.first_invalid = actual;
        }
        cursor
    }

    /// Consume `column` restricted to fragments `[frag_start, frag_end]`.
    ///
    /// The fragment end is authoritative: [`at_unwritten_byte`] reports true
    /// at the end of fragment `frag_end`, so a fragment cursor cannot wander
    /// into its neighbor even without a separate tuple-count bound.
    ///
    /// [`at_unwritten_byte`]: Cursor::at_unwritten_byte
    pub fn fragment_range(
        column: Column,
        frag_start: u64,
        frag_end: u64,
        min_header_len: u64,
        step: u64,
    ) -> Cursor {
        let mut cursor = Cursor::begin(column, min_header_len, step);
        if cursor.invalid {
            return cursor;
        }
        cursor.init_fragment_range(frag_start, frag_end);
        cursor
    }

    /// Consume `column` restricted to the byte window `[start, end)`.
    pub fn byte_range(column: Column, start: u64, end: u64, min_header_len: u64, step: u64) -> Cursor {
        let mut cursor = Cursor::begin(column, min_header_len, step);
        if cursor.invalid {
            return cursor;
        }
        cursor.pos = start;
        cursor.limit = end.min(cursor.col_len);
        if cursor.col_len >= min_header_len {
            let actual = cursor.column.ensure(cursor.pos, step);
            cursor.first_invalid = cursor.pos + actual;
        }
        cursor
    }

    fn begin(column: Column, min_header_len: u64, step: u64) -> Cursor {
        if !column.is_valid() {
            return Cursor::invalid();
        }
        let write_only = column.is_write_mode();
        let col_len = column.col_length();
        Cursor {
            column,
            step,
            pos: 0,
            first_invalid: 0,
            obj_len: 0,
            col_len,
            limit: col_len,
            written_end: 0,
            min_header_len,
            write_only,
            invalid: false,
        }
    }

    fn init_fragment_range(&mut self, frag_start: u64, frag_end: u64) {
        let (start, end) = {
            let fragments = self.column.fragments();
            if !fragments.is_valid() {
                strata_panic!("fragment-bounded cursor over a column with no fragments");
            }
            (
                fragments.start_position(frag_start),
                fragments.end_position(frag_end),
            )
        };
        self.pos = start;
        self.limit = end.unwrap_or(self.col_len).min(self.col_len);
        if self.col_len >= self.min_header_len {
            let actual = self.column.ensure(self.pos, self.step);
            self.first_invalid = self.pos + actual;
        }
    }

    /// Re-bound an existing cursor to fragments `[start, end]` and reposition
    /// at the start of fragment `start`.
    pub fn set_fragment_range(&mut self, start: u64, end: u64) {
        if self.invalid {
            return;
        }
        self.init_fragment_range(start, end);
    }

    /// Whether this cursor is the Invalid sentinel. Fatal if the flag and
    /// the owned column disagree — that means the cursor was used after
    /// handing its column back.
    pub fn is_invalid(&self) -> bool {
        if !self.invalid && !self.column.is_valid() {
            strata_panic!("cursor used after its column was handed back");
        }
        self.invalid
    }

    /// Whether this cursor writes rather than reads.
    pub fn is_write_only(&self) -> bool {
        self.write_only
    }

    /// True when the byte under the cursor was never written: at or past the
    /// read limit, or the column is empty. Caller-polled; reading anyway is
    /// undefined in content (never in memory safety).
    pub fn at_unwritten_byte(&self) -> bool {
        self.pos >= self.limit || self.col_len == 0
    }

    /// Length of the object under the cursor.
    pub fn obj_len(&self) -> u64 {
        self.obj_len
    }

    /// Set the length of the object under the cursor.
    pub fn set_obj_len(&mut self, len: u64) {
        self.obj_len = len;
    }

    /// First byte not yet resident.
    pub fn first_invalid_byte(&self) -> u64 {
        self.first_invalid
    }

    /// Current byte offset in the column.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Move to the next object: advance by the current object length, then
    /// make the next header and the next full object resident.
    pub fn advance(&mut self) {
        if self.invalid {
            return;
        }
        self.advance_by(self.obj_len);

        // past the end there is nothing to page in
        if self.pos >= self.col_len {
            return;
        }

        self.ensure_space(self.min_header_len, self.step);
        self.ensure_space(self.obj_len, self.obj_len);
    }

    /// Advance the position by `len` bytes without paging anything in.
    pub fn advance_by(&mut self, len: u64) {
        self.pos += len;
    }

    /// The sole page-in mechanism: if `[pos, pos + len)` crosses the resident
    /// mark, request `max(increment, obj_len)` bytes from the column and
    /// raise the mark to the actual residency.
    pub fn ensure_space(&mut self, len: u64, increment: u64) {
        if self.pos + len > self.first_invalid {
            let request = increment.max(self.obj_len);
            let actual = self.column.ensure(self.pos, request);
            self.first_invalid = self.pos + actual;
        }
    }

    /// Ensure the next object's header is resident.
    pub fn ensure_header_space(&mut self) {
        self.ensure_space(self.min_header_len, self.step);
    }

    /// Ensure the object about to be written fits in resident storage.
    pub fn ensure_write_space(&mut self) {
        self.ensure_space(self.obj_len, self.step);
    }

    /// Ensure the first object (or `len` bytes, when given) is resident
    /// without assuming anything was paged in yet.
    pub fn ensure_first_object(&mut self, len: Option<u64>) {
        let needed = len.unwrap_or(self.obj_len);
        if self.pos + needed > self.first_invalid {
            let actual = self.column.ensure(self.pos, needed);
            self.first_invalid = self.pos + actual;
        }
    }

    /// Bounds-checked view of `len` bytes under the cursor. The bytes must
    /// have been made resident by a prior ensure.
    pub fn read_slice(&self, len: u64) -> &[u8] {
        self.column.slice(self.pos, len)
    }

    /// Mutable view of `len` bytes under the cursor. Fatal on a read-only
    /// cursor; raises the written high-water mark.
    pub fn write_slice(&mut self, len: u64) -> &mut [u8] {
        if !self.write_only {
            strata_panic!("write through a read-only cursor at {}", self.pos);
        }
        self.written_end = self.written_end.max(self.pos + len);
        self.column.slice_mut(self.pos, len)
    }

    fn final_len(&self) -> u64 {
        self.col_len.max(self.written_end)
    }

    /// Finish the pass and hand the column back, frozen at the final length
    /// (everything written through this cursor is included). On an Invalid
    /// cursor this returns the empty column.
    pub fn done(&mut self) -> Column {
        if !self.invalid && self.column.is_valid() {
            let final_len = self.final_len();
            self.column.done(final_len);
        }
        std::mem::take(&mut self.column)
    }

    /// Finish the pass but keep the column, re-armed for a fresh read pass
    /// over everything written.
    pub fn seal(&mut self) {
        if self.invalid {
            return;
        }
        let final_len = self.final_len();
        self.column.done(final_len);
        self.pos = 0;
        self.col_len = self.column.col_length();
        self.limit = self.col_len;
        self.write_only = self.column.is_write_mode();
        let actual = self.column.ensure(0, self.step);
        self.first_invalid = actual;
    }

    /// Rewind to byte 0 to re-read what was written, keeping write mode.
    /// The current position becomes the logical end.
    pub fn restart(&mut self) {
        if self.invalid {
            return;
        }
        self.col_len = self.pos;
        self.limit = self.pos;
        self.pos = 0;
        let actual = self.column.ensure(0, self.step);
        self.first_invalid = actual;
    }

    /// Late-bind a disk-loaded column into a cursor that was pre-configured
    /// before its data arrived. Does nothing when `column` is invalid.
    pub fn attach(&mut self, column: Column) {
        if !column.is_valid() {
            return;
        }
        self.column = column;
        self.invalid = false;
        self.write_only = self.column.is_write_mode();
        self.col_len = self.column.col_length();
        self.limit = self.col_len;
        if self.col_len < self.min_header_len {
            return;
        }
        let request = if self.step > 0 { self.step } else { crate::DEFAULT_STEP };
        let actual = self.column.ensure(self.pos, request);
        self.first_invalid = self.pos + actual;
    }

    /// Fork an independent write-only cursor holding a deep copy of
    /// `from`'s column up to `from`'s position, primed to continue
    /// appending. Legal only on an Invalid cursor.
    ///
    /// This is how a join emitting several output tuples from one matched
    /// input forks output streams without re-scanning from the start.
    pub fn create_deep_copy(&mut self, from: &mut Cursor) {
        if !self.invalid {
            strata_panic!("deep copy onto a valid cursor");
        }

        self.step = from.step;
        self.pos = from.pos;
        self.obj_len = from.obj_len;
        self.col_len = from.col_len;
        self.limit = from.limit;
        self.min_header_len = from.min_header_len;
        self.invalid = from.invalid;
        self.write_only = true;
        self.written_end = from.pos;

        self.column = Column::partial_deep_copy(&mut from.column, from.pos);

        let request = from.first_invalid.saturating_sub(from.pos);
        let actual = self.column.ensure(self.pos, request);
        self.first_invalid = self.pos + actual;
    }

    /// Alias `from`'s column and duplicate the cursor state; both cursors
    /// then read the same frozen bytes independently.
    pub fn shallow_copy(from: &Cursor) -> Cursor {
        Cursor {
            column: from.column.shallow_copy(),
            step: from.step,
            pos: from.pos,
            first_invalid: from.first_invalid,
            obj_len: from.obj_len,
            col_len: from.col_len,
            limit: from.limit,
            written_end: from.written_end,
            min_header_len: from.min_header_len,
            write_only: from.write_only,
            invalid: from.invalid,
        }
    }

    /// Snapshot the lookahead state.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            pos: self.pos,
            obj_len: self.obj_len,
        }
    }

    /// Roll back to a snapshot taken by [`checkpoint`](Cursor::checkpoint).
    /// Starts a fresh residency pass from the restored position.
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.pos = checkpoint.pos;
        self.obj_len = checkpoint.obj_len;
        self.first_invalid = checkpoint.pos;
    }

    /// Record a fragment boundary at the current position.
    pub fn mark_fragment(&mut self) {
        let pos = self.pos;
        self.column.fragments_mut().mark(pos);
    }

    /// Number of fragment boundaries recorded on the owned column.
    pub fn num_fragments(&self) -> u64 {
        self.column.fragments().num_fragments()
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        // an abandoned cursor must finalize exactly as explicit done() would,
        // or shallow copies of the column would observe a stale length
        if !self.invalid && self.column.is_valid() {
            let final_len = self.final_len();
            self.column.done(final_len);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{ColumnStorage, MappedStorage};

    fn write_column() -> Column {
        Column::from_storage(MappedStorage::new(0))
    }

    fn read_column(data: &[u8]) -> Column {
        let mut storage = MappedStorage::new(0);
        storage.ensure(0, data.len() as u64);
        storage
            .slice_mut(0, data.len() as u64)
            .copy_from_slice(data);
        storage.done(data.len() as u64);
        Column::from_storage(storage)
    }

    #[test]
    fn invalid_cursor_is_inert() {
        let mut cursor = Cursor::new(Column::new(), 0, 1024);
        assert!(cursor.is_invalid());
        assert!(cursor.at_unwritten_byte());
        cursor.advance();
        assert!(!cursor.done().is_valid());
    }

    #[test]
    fn write_then_read_back() {
        let mut w = Cursor::new(write_column(), 0, 1024);
        w.set_obj_len(4);
        for value in [1u32, 2, 3] {
            w.ensure_write_space();
            w.write_slice(4).copy_from_slice(&value.to_le_bytes());
            w.advance();
        }
        let col = w.done();
        assert_eq!(col.col_length(), 12);

        let mut r = Cursor::new(col, 0, 1024);
        r.set_obj_len(4);
        let mut seen = Vec::new();
        while !r.at_unwritten_byte() {
            let buf = r.read_slice(4);
            seen.push(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]));
            r.advance();
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn residency_mark_is_monotonic() {
        let mut r = Cursor::new(read_column(&[0u8; 4096]), 0, 256);
        r.set_obj_len(8);
        let mut last = r.first_invalid_byte();
        while !r.at_unwritten_byte() {
            r.advance();
            assert!(r.first_invalid_byte() >= last);
            last = r.first_invalid_byte();
        }
    }

    #[test]
    fn trailing_advance_does_not_pad_the_column() {
        let mut w = Cursor::new(write_column(), 0, 1024);
        w.set_obj_len(8);
        for value in [7u64, 8] {
            w.ensure_write_space();
            w.write_slice(8).copy_from_slice(&value.to_le_bytes());
            w.advance();
        }
        // the final advance left the cursor one slot past the written data
        let col = w.done();
        assert_eq!(col.col_length(), 16);
    }

    #[test]
    fn checkpoint_bounds_lookahead() {
        let data: Vec<u8> = (0..64u8).collect();
        let mut r = Cursor::new(read_column(&data), 0, 1024);
        r.set_obj_len(1);

        r.advance();
        r.advance();
        let cp = r.checkpoint();
        assert_eq!(r.read_slice(1)[0], 2);

        for _ in 0..10 {
            r.advance();
        }
        assert_eq!(r.read_slice(1)[0], 12);

        r.restore(cp);
        r.ensure_first_object(None);
        assert_eq!(r.read_slice(1)[0], 2);
    }

    #[test]
    fn deep_copy_forks_at_position() {
        let mut w = Cursor::new(write_column(), 0, 1024);
        w.set_obj_len(1);
        for byte in b"abcd" {
            w.ensure_write_space();
            w.write_slice(1)[0] = *byte;
            w.advance();
        }

        let mut fork = Cursor::invalid();
        fork.create_deep_copy(&mut w);
        assert!(fork.is_write_only());

        // the fork appends independently
        fork.ensure_write_space();
        fork.write_slice(1)[0] = b'X';
        fork.advance();
        let fork_col = fork.done();
        assert_eq!(fork_col.slice(0, 5), b"abcdX");

        // the original continues unaffected
        w.ensure_write_space();
        w.write_slice(1)[0] = b'e';
        w.advance();
        let col = w.done();
        assert_eq!(col.slice(0, 5), b"abcde");
    }

    #[test]
    fn fragment_end_is_authoritative() {
        let mut w = Cursor::new(write_column(), 0, 1024);
        w.set_obj_len(2);
        for i in 0..6u16 {
            if i % 2 == 0 {
                w.mark_fragment();
            }
            w.ensure_write_space();
            w.write_slice(2).copy_from_slice(&i.to_le_bytes());
            w.advance();
        }
        let col = w.done();
        assert_eq!(col.fragments().num_fragments(), 3);

        // fragment 1 covers bytes [4, 8): exactly two values
        let mut r = Cursor::fragment_range(col, 1, 1, 0, 1024);
        r.set_obj_len(2);
        let mut seen = Vec::new();
        while !r.at_unwritten_byte() {
            let buf = r.read_slice(2);
            seen.push(u16::from_le_bytes([buf[0], buf[1]]));
            r.advance();
        }
        assert_eq!(seen, vec![2, 3]);
    }

    #[test]
    fn restart_rereads_written_data() {
        let mut w = Cursor::new(write_column(), 0, 1024);
        w.set_obj_len(1);
        for byte in b"xyz" {
            w.ensure_write_space();
            w.write_slice(1)[0] = *byte;
            w.advance();
        }

        w.restart();
        assert!(w.is_write_only());
        assert!(!w.at_unwritten_byte());
        assert_eq!(w.read_slice(1)[0], b'x');

        // still writable in place
        w.write_slice(1)[0] = b'X';
        let col = w.done();
        assert_eq!(col.slice(0, 3), b"Xyz");
    }

    #[test]
    #[should_panic(expected = "read-only cursor")]
    fn write_through_read_cursor_is_fatal() {
        let mut r = Cursor::new(read_column(b"ro"), 0, 1024);
        r.set_obj_len(1);
        r.write_slice(1)[0] = 0;
    }

    #[test]
    #[should_panic(expected = "valid cursor")]
    fn deep_copy_onto_valid_cursor_is_fatal() {
        let mut a = Cursor::new(read_column(b"a"), 0, 1024);
        let mut b = Cursor::new(read_column(b"b"), 0, 1024);
        a.create_deep_copy(&mut b);
    }
}
