use std::marker::PhantomData;

use crate::{Checkpoint, Column, Cursor, DEFAULT_STEP};

/// A fixed-size value that can live in a column.
///
/// Layouts are little-endian and exactly [`SIZE`](FixedType::SIZE) bytes, so
/// a column written on one machine reads identically on another.
pub trait FixedType: Copy {
    /// Serialized size in bytes.
    const SIZE: usize;

    /// Write the value into the first [`SIZE`](FixedType::SIZE) bytes of
    /// `buf`.
    fn write_to(&self, buf: &mut [u8]);

    /// Read a value from the first [`SIZE`](FixedType::SIZE) bytes of `buf`.
    fn read_from(buf: &[u8]) -> Self;
}

macro_rules! impl_fixed_for_primitive {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl FixedType for $ty {
                const SIZE: usize = size_of::<$ty>();

                #[inline(always)]
                fn write_to(&self, buf: &mut [u8]) {
                    buf[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }

                #[inline(always)]
                fn read_from(buf: &[u8]) -> Self {
                    let mut raw = [0u8; size_of::<$ty>()];
                    raw.copy_from_slice(&buf[..Self::SIZE]);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )+
    };
}

impl_fixed_for_primitive!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// A typed cursor over a column of fixed-size values: a thin serialization
/// layer over [`Cursor`].
///
/// [`insert`](ColumnIter::insert) writes at the current position and leaves
/// cursor advancement to an explicit [`advance`](ColumnIter::advance), so a
/// caller can overwrite the slot it just wrote (run-length counters do).
/// [`current`](ColumnIter::current) deserializes from the resident bytes on
/// every call.
#[derive(Debug)]
pub struct ColumnIter<T: FixedType> {
    pub(crate) it: Cursor,
    _marker: PhantomData<T>,
}

impl<T: FixedType> ColumnIter<T> {
    /// Iterate `column` with the default page-in request size.
    pub fn new(column: Column) -> Self {
        Self::with_step(column, DEFAULT_STEP)
    }

    /// Iterate `column`, requesting `step` bytes per page-in.
    pub fn with_step(column: Column, step: u64) -> Self {
        let mut it = Cursor::new(column, 0, step.max(T::SIZE as u64));
        if !it.is_invalid() {
            it.set_obj_len(T::SIZE as u64);
        }
        ColumnIter {
            it,
            _marker: PhantomData,
        }
    }

    /// Iterate only fragments `[frag_start, frag_end]` of `column`.
    pub fn fragment_range(column: Column, frag_start: u64, frag_end: u64) -> Self {
        let mut it = Cursor::fragment_range(
            column,
            frag_start,
            frag_end,
            0,
            DEFAULT_STEP.max(T::SIZE as u64),
        );
        if !it.is_invalid() {
            it.set_obj_len(T::SIZE as u64);
        }
        ColumnIter {
            it,
            _marker: PhantomData,
        }
    }

    /// An invalid iterator; the starting point for
    /// [`create_deep_copy`](ColumnIter::create_deep_copy).
    pub fn invalid() -> Self {
        ColumnIter {
            it: Cursor::invalid(),
            _marker: PhantomData,
        }
    }

    /// Serialize `value` at the current position, overwriting whatever is
    /// there. Call [`advance`](ColumnIter::advance) to move past it.
    pub fn insert(&mut self, value: &T) {
        if self.it.is_invalid() {
            return;
        }
        self.it.ensure_write_space();
        value.write_to(self.it.write_slice(T::SIZE as u64));
    }

    /// The value at the current position.
    pub fn current(&self) -> T {
        T::read_from(self.it.read_slice(T::SIZE as u64))
    }

    /// Move to the next value.
    pub fn advance(&mut self) {
        self.it.advance();
    }

    /// True when the cursor sits on never-written bytes.
    pub fn at_unwritten_byte(&self) -> bool {
        self.it.at_unwritten_byte()
    }

    /// Whether this iterator writes rather than reads.
    pub fn is_write_only(&self) -> bool {
        self.it.is_write_only()
    }

    /// Rewind to re-read what was written; see [`Cursor::restart`].
    pub fn restart(&mut self) {
        self.it.restart();
    }

    /// Finish and hand the column back; see [`Cursor::done`].
    pub fn done(&mut self) -> Column {
        self.it.done()
    }

    /// Fork an independent write-only iterator from `from`'s position; see
    /// [`Cursor::create_deep_copy`].
    pub fn create_deep_copy(&mut self, from: &mut Self) {
        self.it.create_deep_copy(&mut from.it);
    }

    /// Alias `from`'s column and position.
    pub fn create_shallow_copy(from: &Self) -> Self {
        ColumnIter {
            it: Cursor::shallow_copy(&from.it),
            _marker: PhantomData,
        }
    }

    /// Snapshot the lookahead state.
    pub fn checkpoint(&self) -> Checkpoint {
        self.it.checkpoint()
    }

    /// Roll back to a snapshot.
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.it.restore(checkpoint);
    }

    /// Record a fragment boundary at the current position.
    pub fn mark_fragment(&mut self) {
        if self.it.is_invalid() {
            return;
        }
        self.it.mark_fragment();
    }
}
