#![deny(missing_docs)]

//! Columnar table slices for Slate
//!
//! A [`TableSlice`] is an immutable, reference-counted batch of rows that
//! all conform to one named record type. This crate provides the slice
//! itself, its serialized envelope, row/column transformation algorithms
//! that stay in lock-step with the type-level transforms in
//! `slate-types`, a small expression language for selecting rows, and the
//! builders that produce slices row by row.

pub use adaptive::*;
pub use builders::*;
pub use expr::*;
pub use flatten::*;
pub use slice::*;
pub use transform::*;
pub use value::*;

mod adaptive;
mod builders;
mod envelope;
mod expr;
mod flatten;
mod slice;
mod transform;
mod value;
