//! The legacy schema language.
//!
//! A schema is a sequence of `type <name> = <type-expr>` declarations.
//! Parsing yields a [`SymbolMap`] of legacy types that may reference one
//! another (forward references included); [`resolve`] turns it into a
//! [`Module`] of fully resolved binary-encoded types.

pub use parser::parse;
pub use resolver::{resolve, Module, SymbolMap};

mod parser;
mod resolver;
