use crate::{Column, Cursor, DEFAULT_STEP};

/// Raw byte-stream access to a column, in the spirit of `read`/`write` on a
/// file descriptor. Used by operators that manage their own record framing.
#[derive(Debug)]
pub struct ColumnRW {
    it: Cursor,
}

impl ColumnRW {
    /// Stream over the whole column.
    pub fn new(column: Column) -> Self {
        Self::with_step(column, DEFAULT_STEP)
    }

    /// Stream over the whole column, requesting `step` bytes per page-in.
    pub fn with_step(column: Column, step: u64) -> Self {
        ColumnRW {
            it: Cursor::new(column, 0, step),
        }
    }

    /// Stream over the byte window `[start, end)` only.
    pub fn with_range(column: Column, start: u64, end: u64) -> Self {
        ColumnRW {
            it: Cursor::byte_range(column, start, end, 0, DEFAULT_STEP),
        }
    }

    /// An invalid stream; the starting point for
    /// [`create_deep_copy`](ColumnRW::create_deep_copy).
    pub fn invalid() -> Self {
        ColumnRW {
            it: Cursor::invalid(),
        }
    }

    /// Copy the next `dst.len()` bytes out of the column and advance past
    /// them.
    pub fn read(&mut self, dst: &mut [u8]) {
        if self.it.is_invalid() || dst.is_empty() {
            return;
        }
        let len = dst.len() as u64;
        self.it.set_obj_len(len);
        self.it.ensure_space(len, len);
        dst.copy_from_slice(self.it.read_slice(len));
        self.it.advance_by(len);
    }

    /// Write `src` at the current position and advance past it.
    pub fn write(&mut self, src: &[u8]) {
        if self.it.is_invalid() || src.is_empty() {
            return;
        }
        let len = src.len() as u64;
        self.it.set_obj_len(len);
        self.it.ensure_write_space();
        self.it.write_slice(len).copy_from_slice(src);
        self.it.advance_by(len);
    }

    /// True when the stream position sits on never-written bytes.
    pub fn at_unwritten_byte(&self) -> bool {
        self.it.at_unwritten_byte()
    }

    /// Finish and hand the column back.
    pub fn done(&mut self) -> Column {
        self.it.done()
    }

    /// Fork an independent write-only stream from `from`'s position.
    pub fn create_deep_copy(&mut self, from: &mut Self) {
        self.it.create_deep_copy(&mut from.it);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::MappedStorage;

    #[test]
    fn stream_roundtrip() {
        let mut w = ColumnRW::new(Column::from_storage(MappedStorage::new(0)));
        w.write(b"hello ");
        w.write(b"column");
        let col = w.done();
        assert_eq!(col.col_length(), 12);

        let mut r = ColumnRW::new(col);
        let mut buf = [0u8; 12];
        r.read(&mut buf);
        assert_eq!(&buf, b"hello column");
        assert!(r.at_unwritten_byte());
    }

    #[test]
    fn ranged_stream_sees_the_window_only() {
        let mut w = ColumnRW::new(Column::from_storage(MappedStorage::new(0)));
        w.write(b"0123456789");
        let col = w.done();

        let mut r = ColumnRW::with_range(col, 2, 6);
        let mut buf = [0u8; 4];
        r.read(&mut buf);
        assert_eq!(&buf, b"2345");
        assert!(r.at_unwritten_byte());
    }
}
