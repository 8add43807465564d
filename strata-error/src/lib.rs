#![deny(missing_docs)]

//! Error handling for Strata.
//!
//! The engine distinguishes two failure classes. Recoverable conditions
//! (catalog I/O, corrupt codec frames) surface as [`StrataError`] through
//! [`StrataResult`]. Programmer errors — writing through a read-only cursor,
//! adding catalog columns out of order, replaying decompression out of order —
//! abort the process through [`strata_panic!`]; there is no recovery path for
//! those by design.

use std::fmt::{Display, Formatter};

mod ext;

pub use ext::*;

/// A `Result` whose error type is [`StrataError`].
pub type StrataResult<T> = Result<T, StrataError>;

/// The top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StrataError {
    /// An argument violated an operation's contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(ErrString),

    /// A position fell outside the addressable range.
    #[error("position {0} out of bounds for length {1}")]
    OutOfBounds(u64, u64),

    /// On-disk or in-memory data failed validation.
    #[error("corrupt data: {0}")]
    Corrupt(ErrString),

    /// An operation was attempted in a state that does not support it.
    #[error("invalid state: {0}")]
    InvalidState(ErrString),

    /// An underlying I/O operation failed.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Catalog (de)serialization failed.
    #[error("serde: {0}")]
    Serde(ErrString),
}

/// A wrapper around error message strings.
///
/// Exists so the error macros can accept both `String` and `&'static str`
/// without an allocation in the static case.
#[derive(Debug)]
pub struct ErrString(std::borrow::Cow<'static, str>);

impl<T> From<T> for ErrString
where
    T: Into<std::borrow::Cow<'static, str>>,
{
    fn from(msg: T) -> Self {
        ErrString(msg.into())
    }
}

impl Display for ErrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Construct a [`StrataError`].
///
/// With a leading `Variant:` token the named variant is built, otherwise
/// [`StrataError::InvalidArgument`] is assumed.
#[macro_export]
macro_rules! strata_err {
    (OutOfBounds: $pos:expr, $len:expr) => {
        $crate::StrataError::OutOfBounds($pos as u64, $len as u64)
    };
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::StrataError::$variant(format!($fmt $(, $arg)*).into())
    };
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::strata_err!(InvalidArgument: $fmt $(, $arg)*)
    };
}

/// Return early with a [`StrataError`], using [`strata_err!`] syntax.
#[macro_export]
macro_rules! strata_bail {
    ($($tt:tt)+) => {
        return Err($crate::strata_err!($($tt)+))
    };
}

/// Abort with a diagnostic.
///
/// This is the fatal, non-recoverable path reserved for contract violations;
/// see the crate docs for the taxonomy.
#[macro_export]
macro_rules! strata_panic {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::__private::fatal(::core::format_args!($fmt $(, $arg)*))
    };
}

#[doc(hidden)]
pub mod __private {
    /// Diverging helper behind [`strata_panic!`]; keeps the panic machinery
    /// out of the caller's inlined code.
    #[cold]
    #[inline(never)]
    #[allow(clippy::panic)]
    pub fn fatal(args: core::fmt::Arguments<'_>) -> ! {
        panic!("fatal: {args}")
    }
}

#[cfg(test)]
mod test {
    use crate::{strata_err, StrataError, StrataResult};

    fn chunk_lookup(idx: u64, len: u64) -> StrataResult<u64> {
        if idx >= len {
            crate::strata_bail!(OutOfBounds: idx, len);
        }
        Ok(idx)
    }

    #[test]
    fn err_variants() {
        let e = strata_err!("bad step size {}", 0);
        assert!(matches!(e, StrataError::InvalidArgument(_)));

        let e = strata_err!(Corrupt: "frame header truncated at {}", 12);
        assert!(matches!(e, StrataError::Corrupt(_)));
    }

    #[test]
    fn bail_propagates() {
        assert!(chunk_lookup(3, 2).is_err());
        assert_eq!(chunk_lookup(1, 2).unwrap(), 1);
    }

    #[test]
    #[should_panic(expected = "fatal")]
    fn panic_is_fatal() {
        strata_panic!("column {} added out of order", 7);
    }
}
