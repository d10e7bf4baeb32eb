use std::fmt::Display;

use crate::SlateError;

/// Unwrap with a message, for conditions that are unreachable by
/// construction. Panics carry the failure context.
pub trait SlateExpect {
    /// The unwrapped value.
    type Output;

    /// Unwrap, panicking with `msg` and the error context on failure.
    fn slate_expect(self, msg: &str) -> Self::Output;
}

impl<T, E: Display> SlateExpect for Result<T, E> {
    type Output = T;

    fn slate_expect(self, msg: &str) -> Self::Output {
        match self {
            Ok(v) => v,
            Err(e) => panic!("{msg}: {e}"),
        }
    }
}

impl<T> SlateExpect for Option<T> {
    type Output = T;

    fn slate_expect(self, msg: &str) -> Self::Output {
        match self {
            Some(v) => v,
            None => panic!("{msg}"),
        }
    }
}

/// Unwrap a [`Result`] whose error renders as a [`SlateError`].
pub trait SlateUnwrap {
    /// The unwrapped value.
    type Output;

    /// Unwrap, panicking with the error display on failure.
    fn slate_unwrap(self) -> Self::Output;
}

impl<T, E: Into<SlateError>> SlateUnwrap for Result<T, E> {
    type Output = T;

    fn slate_unwrap(self) -> Self::Output {
        match self {
            Ok(v) => v,
            Err(e) => {
                let e: SlateError = e.into();
                panic!("{e}")
            }
        }
    }
}
