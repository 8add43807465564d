use crate::{Checkpoint, Column, Cursor, DEFAULT_STEP};

/// A variable-size value that can live in a column.
///
/// The generic cursor stores no length prefix of its own; the serialized
/// form must be self-describing, with the full length derivable from the
/// first [`HEADER_LEN`](VarType::HEADER_LEN) bytes.
pub trait VarType: Sized {
    /// Bytes needed before the full serialized length is known.
    const HEADER_LEN: usize;

    /// Upper bound on the serialized length, used to size page-in requests.
    const MAX_OBJECT_LEN: usize;

    /// Serialized length of this value.
    fn serialized_len(&self) -> usize;

    /// Serialized length of the value starting at `header` (at least
    /// [`HEADER_LEN`](VarType::HEADER_LEN) bytes).
    fn peek_len(header: &[u8]) -> usize;

    /// Write the value into the first
    /// [`serialized_len`](VarType::serialized_len) bytes of `buf`.
    fn write_to(&self, buf: &mut [u8]);

    /// Read a value from `buf` (whole serialized form resident).
    fn read_from(buf: &[u8]) -> Self;
}

/// UTF-8 strings with a little-endian u32 length prefix.
impl VarType for String {
    const HEADER_LEN: usize = 4;
    const MAX_OBJECT_LEN: usize = 64 * 1024;

    fn serialized_len(&self) -> usize {
        Self::HEADER_LEN + self.len()
    }

    fn peek_len(header: &[u8]) -> usize {
        let raw = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        Self::HEADER_LEN + raw as usize
    }

    fn write_to(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&(self.len() as u32).to_le_bytes());
        buf[4..4 + self.len()].copy_from_slice(self.as_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        let len = Self::peek_len(buf) - Self::HEADER_LEN;
        String::from_utf8_lossy(&buf[4..4 + len]).into_owned()
    }
}

/// A typed cursor over a column of variable-size values.
///
/// Because records carry no external length field, advancing must re-derive
/// the previous value's serialized length before moving, then eagerly decode
/// the next value's header so its length is known in turn.
#[derive(Debug)]
pub struct ColumnVarIter<T: VarType> {
    it: Cursor,
    current: Option<T>,
}

impl<T: VarType> ColumnVarIter<T> {
    /// Iterate `column` with the default page-in request size.
    pub fn new(column: Column) -> Self {
        Self::with_step(column, DEFAULT_STEP)
    }

    /// Iterate `column`, requesting `step` bytes per page-in.
    pub fn with_step(column: Column, step: u64) -> Self {
        let it = Cursor::new(
            column,
            T::HEADER_LEN as u64,
            step.max(T::MAX_OBJECT_LEN as u64),
        );
        let mut iter = ColumnVarIter { it, current: None };
        if !iter.it.is_invalid() {
            iter.load_current();
        }
        iter
    }

    /// Iterate only fragments `[frag_start, frag_end]` of `column`.
    pub fn fragment_range(column: Column, frag_start: u64, frag_end: u64) -> Self {
        let it = Cursor::fragment_range(
            column,
            frag_start,
            frag_end,
            T::HEADER_LEN as u64,
            DEFAULT_STEP.max(T::MAX_OBJECT_LEN as u64),
        );
        let mut iter = ColumnVarIter { it, current: None };
        if !iter.it.is_invalid() {
            iter.load_current();
        }
        iter
    }

    /// An invalid iterator; the starting point for
    /// [`create_deep_copy`](ColumnVarIter::create_deep_copy).
    pub fn invalid() -> Self {
        ColumnVarIter {
            it: Cursor::invalid(),
            current: None,
        }
    }

    /// Decode the value under the cursor, making its header and body
    /// resident first.
    fn load_current(&mut self) {
        if self.it.at_unwritten_byte() {
            self.current = None;
            return;
        }
        self.it.ensure_header_space();
        let len = T::peek_len(self.it.read_slice(T::HEADER_LEN as u64)) as u64;
        self.it.set_obj_len(len);
        self.it.ensure_space(len, len);
        self.current = Some(T::read_from(self.it.read_slice(len)));
    }

    /// Serialize `value` at the current position. Call
    /// [`advance`](ColumnVarIter::advance) to move past it.
    pub fn insert(&mut self, value: &T) {
        if self.it.is_invalid() {
            return;
        }
        let len = value.serialized_len() as u64;
        self.it.set_obj_len(len);
        self.it.ensure_write_space();
        value.write_to(self.it.write_slice(len));
    }

    /// The value at the current position. Fatal past the end of the column
    /// or on a write-mode iterator.
    pub fn current(&self) -> &T {
        let Some(current) = &self.current else {
            strata_error::strata_panic!("no value under a variable-size cursor");
        };
        current
    }

    /// Move past the current value: its own serialized length tells the
    /// cursor how far. In write mode nothing is decoded — the next readable
    /// byte is unwritten by definition.
    pub fn advance(&mut self) {
        if self.it.is_invalid() {
            return;
        }
        self.it.advance_by(self.it.obj_len());
        self.load_current();
    }

    /// True when the cursor sits on never-written bytes.
    pub fn at_unwritten_byte(&self) -> bool {
        self.it.at_unwritten_byte()
    }

    /// Rewind to re-read what was written.
    pub fn restart(&mut self) {
        self.it.restart();
        if !self.it.is_invalid() {
            self.load_current();
        }
    }

    /// Finish and hand the column back.
    pub fn done(&mut self) -> Column {
        self.it.done()
    }

    /// Fork an independent write-only iterator from `from`'s position.
    pub fn create_deep_copy(&mut self, from: &mut Self) {
        self.it.create_deep_copy(&mut from.it);
        self.current = None;
    }

    /// Snapshot the lookahead state.
    pub fn checkpoint(&self) -> Checkpoint {
        self.it.checkpoint()
    }

    /// Roll back to a snapshot and reload the value under the cursor.
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.it.restore(checkpoint);
        if !self.it.is_invalid() {
            self.load_current();
        }
    }

    /// Record a fragment boundary at the current position.
    pub fn mark_fragment(&mut self) {
        if self.it.is_invalid() {
            return;
        }
        self.it.mark_fragment();
    }
}
