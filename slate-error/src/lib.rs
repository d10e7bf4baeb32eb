#![deny(missing_docs)]

//! Error handling for the Slate crates.
//!
//! All fallible Slate APIs return [`SlateResult`]. Errors are constructed
//! with the [`slate_err`] and [`slate_bail`] macros, and invariants that
//! indicate a caller bug are enforced with [`slate_panic`].

use std::fmt::{Debug, Display, Formatter};

mod ext;

pub use ext::*;

/// A string wrapper that avoids re-allocating static error messages.
#[derive(Debug)]
pub struct ErrString(std::borrow::Cow<'static, str>);

impl<T> From<T> for ErrString
where
    T: Into<std::borrow::Cow<'static, str>>,
{
    fn from(msg: T) -> Self {
        Self(msg.into())
    }
}

impl Display for ErrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// The error type for all Slate crates.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SlateError {
    /// An argument provided to a function was invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(ErrString),
    /// An index or offset was out of bounds.
    #[error("out of bounds: {0}")]
    OutOfBounds(ErrString),
    /// A schema or expression failed to parse.
    #[error("parse error: {0}")]
    Parse(ErrString),
    /// Two types could not be combined.
    #[error("incompatible types: {0}")]
    Incompatible(ErrString),
    /// A serialized buffer failed verification or decoding.
    #[error("invalid serialization: {0}")]
    InvalidSerde(ErrString),
    /// A wrapped error from the arrow crates.
    #[error(transparent)]
    ArrowError(#[from] arrow_schema::ArrowError),
}

/// A [`Result`] whose error type is [`SlateError`].
pub type SlateResult<T> = Result<T, SlateError>;

/// Construct a [`SlateError`].
///
/// Defaults to [`SlateError::InvalidArgument`]; a variant can be selected
/// with a leading `Variant:` token, e.g. `slate_err!(Parse: "bad token")`.
#[macro_export]
macro_rules! slate_err {
    (InvalidArgument: $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::SlateError::InvalidArgument(format!($fmt, $($arg),*).into())
    };
    (OutOfBounds: $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::SlateError::OutOfBounds(format!($fmt, $($arg),*).into())
    };
    (Parse: $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::SlateError::Parse(format!($fmt, $($arg),*).into())
    };
    (Incompatible: $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::SlateError::Incompatible(format!($fmt, $($arg),*).into())
    };
    (InvalidSerde: $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::SlateError::InvalidSerde(format!($fmt, $($arg),*).into())
    };
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::SlateError::InvalidArgument(format!($fmt, $($arg),*).into())
    };
}

/// Return early with a [`SlateError`].
#[macro_export]
macro_rules! slate_bail {
    ($($tt:tt)+) => {
        return Err($crate::slate_err!($($tt)+))
    };
}

/// Panic with a formatted message. Reserved for invariant violations that
/// indicate a bug in the caller, never for data errors.
#[macro_export]
macro_rules! slate_panic {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        panic!("{}", format!($fmt, $($arg),*))
    };
    ($err:expr) => {{
        let err: $crate::SlateError = $err;
        panic!("{}", err)
    }};
}

#[cfg(test)]
mod tests {
    use crate::{SlateError, SlateResult, SlateUnwrap};

    fn fallible(fail: bool) -> SlateResult<u8> {
        if fail {
            slate_bail!(OutOfBounds: "index {} out of bounds", 42);
        }
        Ok(1)
    }

    #[test]
    fn macro_variants() {
        let err = slate_err!("bad {}", "argument");
        assert!(matches!(err, SlateError::InvalidArgument(_)));
        assert_eq!(err.to_string(), "invalid argument: bad argument");

        let err = slate_err!(InvalidArgument: "bad {}", "argument");
        assert!(matches!(err, SlateError::InvalidArgument(_)));
        assert_eq!(err.to_string(), "invalid argument: bad argument");

        let err = slate_err!(Parse: "unexpected token");
        assert!(matches!(err, SlateError::Parse(_)));

        assert!(fallible(false).is_ok());
        let err = fallible(true).unwrap_err();
        assert_eq!(err.to_string(), "out of bounds: index 42 out of bounds");
    }

    #[test]
    fn unwrap_passes_values_through() {
        let ok: SlateResult<u8> = Ok(3);
        assert_eq!(ok.slate_unwrap(), 3);
    }

    #[test]
    #[should_panic(expected = "out of bounds: index 9")]
    fn unwrap_panics_with_the_error_display() {
        let err: SlateResult<u8> = Err(slate_err!(OutOfBounds: "index 9"));
        let _ = err.slate_unwrap();
    }
}
